//! Platform abstraction: control-tool and filesystem collaborators.

pub mod pal;
