//! VM inventory core: descriptor discovery, parsing, disk sizing,
//! reconciliation with running instances, and folder consolidation.

pub mod consolidate;
pub mod descriptor;
pub mod disk;
pub mod engine;
pub mod prefix;
pub mod record;
pub mod walker;
