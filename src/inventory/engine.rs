//! Reconciliation of on-disk descriptors with running instances.
//!
//! One call to [`ReconciliationEngine::run`] walks the root, queries the
//! running set, unions both, parses every descriptor on a bounded worker
//! pool, tags status, and consolidates the running VMs' directories. Every
//! failure along the way is contained and surfaced as a [`Diagnostic`];
//! `run` itself cannot fail.

#![allow(missing_docs)]

use std::collections::{BTreeSet, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::Instant;

use crossbeam_channel as channel;
use parking_lot::Mutex;
use serde::Serialize;

use crate::core::config::{Config, InventoryConfig};
use crate::core::errors::{Result, VmiError};
use crate::core::paths::absolutize;
use crate::inventory::consolidate::DirectoryConsolidator;
use crate::inventory::descriptor::{DescriptorParser, ParseOutcome};
use crate::inventory::record::{Diagnostic, DiagnosticKind, VmRecord, VmStatus};
use crate::inventory::walker::{DescriptorWalker, WalkerConfig};
use crate::logger::jsonl::{EventType, JsonlWriter, LogEntry, Severity};
use crate::platform::pal::{FileSystemReader, LocalFs, RunningInstanceProvider, VmrunProvider};

/// Reconciled view produced by one inventory run.
#[derive(Debug, Clone, Serialize)]
pub struct InventoryReport {
    pub root: PathBuf,
    /// One record per unique descriptor path, sorted by path.
    pub records: Vec<VmRecord>,
    /// Minimal ancestors of the running VMs' directories. Display hint only.
    pub consolidated_folders: Vec<String>,
    pub running_count: usize,
    pub discovered_count: usize,
    pub diagnostics: Vec<Diagnostic>,
    pub duration_ms: u64,
}

impl InventoryReport {
    pub fn running(&self) -> impl Iterator<Item = &VmRecord> {
        self.records.iter().filter(|r| r.is_running())
    }

    pub fn stopped(&self) -> impl Iterator<Item = &VmRecord> {
        self.records.iter().filter(|r| !r.is_running())
    }
}

/// Orchestrates one stateless inventory pass per call.
pub struct ReconciliationEngine {
    inventory: InventoryConfig,
    consolidator: DirectoryConsolidator,
    running: Arc<dyn RunningInstanceProvider>,
    fs: Arc<dyn FileSystemReader>,
    activity_log: Option<Arc<Mutex<JsonlWriter>>>,
}

impl ReconciliationEngine {
    pub fn new(
        config: &Config,
        running: Arc<dyn RunningInstanceProvider>,
        fs: Arc<dyn FileSystemReader>,
    ) -> Self {
        Self {
            inventory: config.inventory.clone(),
            consolidator: DirectoryConsolidator::new(config.consolidation.min_shared_segments),
            running,
            fs,
            activity_log: None,
        }
    }

    /// Engine backed by `vmrun` and the local filesystem.
    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config,
            Arc::new(VmrunProvider::from_config(&config.vmrun)),
            Arc::new(LocalFs),
        )
    }

    /// Record run start, diagnostics and summaries to an activity log.
    #[must_use]
    pub fn with_activity_log(mut self, log: Arc<Mutex<JsonlWriter>>) -> Self {
        self.activity_log = Some(log);
        self
    }

    /// Inventory everything under `root`.
    ///
    /// Changing the root is simply another call with another argument.
    pub fn run(&self, root: &Path) -> InventoryReport {
        let started = Instant::now();
        let root = absolutize(root);
        self.log_start(&root);

        let walker = DescriptorWalker::new(WalkerConfig::from_inventory(&root, &self.inventory));
        let (running_result, discovered) = thread::scope(|scope| {
            let query = scope.spawn(|| self.running.list_running());
            let discovered = walker.walk();
            let running = query.join().unwrap_or_else(|_| {
                Err(VmiError::Runtime {
                    details: "running-instance query panicked".to_string(),
                })
            });
            (running, discovered)
        });

        let mut diagnostics = Vec::new();
        let running = match running_result {
            Ok(set) => set,
            Err(err) => {
                diagnostics.push(Diagnostic::from_error(DiagnosticKind::RunningQuery, None, &err));
                HashSet::new()
            }
        };

        let discovered_count = discovered.len();
        let all_paths: BTreeSet<PathBuf> = discovered.into_iter().chain(running.iter().cloned()).collect();

        let (mut records, parse_diagnostics) = self.parse_all(all_paths.into_iter().collect());
        diagnostics.extend(parse_diagnostics);
        for record in &mut records {
            record.status = if running.contains(&record.path) {
                VmStatus::Running
            } else {
                VmStatus::Stopped
            };
        }
        records.sort_by(|a, b| a.path.cmp(&b.path));

        let report = InventoryReport {
            root,
            records,
            consolidated_folders: self.running_folders(&running),
            running_count: running.len(),
            discovered_count,
            diagnostics,
            duration_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
        };

        if let Some(log) = &self.activity_log {
            log.lock().record_report(&report);
        }
        report
    }

    /// Consolidated parent directories of the running descriptors.
    pub fn running_folders(&self, running: &HashSet<PathBuf>) -> Vec<String> {
        self.consolidator.consolidate(running.iter().map(|path| {
            path.parent()
                .map(|dir| dir.to_string_lossy().into_owned())
                .unwrap_or_default()
        }))
    }

    /// Parse descriptors on a bounded pool. Output order is arbitrary.
    fn parse_all(&self, paths: Vec<PathBuf>) -> (Vec<VmRecord>, Vec<Diagnostic>) {
        if paths.is_empty() {
            return (Vec::new(), Vec::new());
        }
        let workers = self.inventory.parallelism.max(1).min(paths.len());

        let outcomes: Vec<ParseOutcome> = thread::scope(|scope| {
            let (job_tx, job_rx) = channel::bounded::<PathBuf>(workers * 4);
            let (out_tx, out_rx) = channel::unbounded::<ParseOutcome>();

            for _ in 0..workers {
                let job_rx = job_rx.clone();
                let out_tx = out_tx.clone();
                scope.spawn(move || {
                    let parser = DescriptorParser::new(
                        self.fs.as_ref(),
                        &self.inventory.descriptor_extension,
                        self.inventory.descriptor_scan_limit_bytes,
                    );
                    for path in job_rx {
                        if out_tx.send(parser.parse(&path)).is_err() {
                            return;
                        }
                    }
                });
            }
            drop(job_rx);
            drop(out_tx);

            for path in paths {
                if job_tx.send(path).is_err() {
                    break;
                }
            }
            drop(job_tx);

            out_rx.iter().collect()
        });

        let mut records = Vec::with_capacity(outcomes.len());
        let mut diagnostics = Vec::new();
        for outcome in outcomes {
            if let Some(issue) = &outcome.issue {
                let kind = match issue {
                    VmiError::DiskResolve { .. } => DiagnosticKind::DiskResolve,
                    _ => DiagnosticKind::DescriptorRead,
                };
                diagnostics.push(Diagnostic::from_error(kind, Some(&outcome.record.path), issue));
            }
            records.push(outcome.record);
        }
        (records, diagnostics)
    }

    fn log_start(&self, root: &Path) {
        if let Some(log) = &self.activity_log {
            let mut entry = LogEntry::new(EventType::InventoryStart, Severity::Info);
            entry.root = Some(root.display().to_string());
            log.lock().write_entry(&entry);
        }
    }
}

/// Check that `path` can serve as an inventory root and return it absolutized.
pub fn validate_root(path: &Path) -> Result<PathBuf> {
    let root = absolutize(path);
    match std::fs::metadata(&root) {
        Ok(meta) if meta.is_dir() => Ok(root),
        Ok(_) => Err(VmiError::InvalidRoot {
            path: root,
            reason: "not a directory".to_string(),
        }),
        Err(err) => Err(VmiError::InvalidRoot {
            path: root,
            reason: err.to_string(),
        }),
    }
}
