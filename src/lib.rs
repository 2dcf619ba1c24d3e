#![forbid(unsafe_code)]

//! VMX inventory (vmi): discovers VMware descriptor files under a storage
//! root and reconciles them with the instances `vmrun` reports as running.
//!
//! One inventory run produces:
//! 1. **Records**: one per unique descriptor, with CPU, RAM, guest OS, MAC,
//!    resolved disk size, and running/stopped status
//! 2. **Consolidated folders**: the minimal set of shared ancestors of the
//!    running VMs' directories
//! 3. **Diagnostics**: every contained failure (unreadable descriptor,
//!    unresolved disk, failed running query)
//!
//! # Library usage
//!
//! Use the [`prelude`] for convenient access to the most common types:
//!
//! ```rust,no_run
//! use vmx_inventory::prelude::*;
//!
//! let config = Config::load(None).unwrap();
//! let report = ReconciliationEngine::from_config(&config).run(&config.inventory.root_dir);
//! for vm in report.running() {
//!     println!("{} {}", vm.name, vm.path.display());
//! }
//! ```
//!
//! Individual modules can also be imported directly:
//!
//! ```rust,no_run
//! use vmx_inventory::inventory::consolidate::DirectoryConsolidator;
//! use vmx_inventory::inventory::walker::{DescriptorWalker, WalkerConfig};
//! ```

pub mod prelude;

pub mod core;
pub mod inventory;
pub mod logger;
pub mod platform;
