//! Convenience re-exports for library consumers.
//!
//! ```rust,no_run
//! use vmx_inventory::prelude::*;
//! ```

// Core
pub use crate::core::config::Config;
pub use crate::core::errors::{Result, VmiError};

// Platform
pub use crate::platform::pal::{
    FileSystemReader, LocalFs, RunningInstanceProvider, VmrunProvider,
};

// Inventory
pub use crate::inventory::consolidate::DirectoryConsolidator;
pub use crate::inventory::descriptor::{DescriptorParser, ParseOutcome};
pub use crate::inventory::disk::{DiskSizeResolver, format_gib};
pub use crate::inventory::engine::{InventoryReport, ReconciliationEngine, validate_root};
pub use crate::inventory::prefix::common_prefix;
pub use crate::inventory::record::{Diagnostic, DiagnosticKind, VmRecord, VmStatus};
pub use crate::inventory::walker::{DescriptorWalker, WalkerConfig};

// Logging
pub use crate::logger::jsonl::{JsonlConfig, JsonlWriter};
