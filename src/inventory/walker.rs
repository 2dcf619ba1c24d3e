//! Parallel descriptor discovery.
//!
//! Worker threads share a directory work queue; each worker lists one
//! directory, reports matching files, and queues subdirectories. Unreadable
//! directories are skipped without aborting the walk.

#![allow(missing_docs)]

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

use crossbeam_channel as channel;

use crate::core::config::InventoryConfig;

/// Walker configuration derived from `InventoryConfig`.
#[derive(Debug, Clone)]
pub struct WalkerConfig {
    pub root: PathBuf,
    /// Bare extension, e.g. `"vmx"`. Matching is case-sensitive.
    pub extension: String,
    pub max_depth: usize,
    pub follow_symlinks: bool,
    pub parallelism: usize,
}

impl WalkerConfig {
    #[must_use]
    pub fn from_inventory(root: &Path, inventory: &InventoryConfig) -> Self {
        Self {
            root: root.to_path_buf(),
            extension: inventory.descriptor_extension.clone(),
            max_depth: inventory.max_depth,
            follow_symlinks: inventory.follow_symlinks,
            parallelism: inventory.parallelism,
        }
    }

    fn suffix(&self) -> String {
        format!(".{}", self.extension)
    }
}

/// Item in the internal work queue: (directory_path, depth).
type WorkItem = (PathBuf, usize);

/// Recursive descriptor finder.
///
/// - Symlinked directories are only entered when `follow_symlinks` is set;
///   symlinked files are reported like regular files.
/// - Bounded by `max_depth` (the root is depth 0).
pub struct DescriptorWalker {
    config: WalkerConfig,
}

impl DescriptorWalker {
    pub fn new(config: WalkerConfig) -> Self {
        Self { config }
    }

    /// Walk the root and return every matching file, sorted.
    ///
    /// A missing or non-directory root yields an empty list.
    pub fn walk(&self) -> Vec<PathBuf> {
        let mut found: Vec<PathBuf> = self.stream().into_iter().collect();
        found.sort();
        found
    }

    /// Stream matching files as they are discovered. The walk runs in
    /// background threads; the receiver closes when the walk completes.
    pub fn stream(&self) -> channel::Receiver<PathBuf> {
        let parallelism = self.config.parallelism.max(1);

        // Unbounded: dropping a queued directory would silently lose VMs.
        let (work_tx, work_rx) = channel::unbounded::<WorkItem>();
        let (result_tx, result_rx) = channel::unbounded::<PathBuf>();

        let in_flight = Arc::new(AtomicUsize::new(0));

        if fs::metadata(&self.config.root).is_ok_and(|meta| meta.is_dir()) {
            in_flight.fetch_add(1, Ordering::Release);
            let _ = work_tx.send((self.config.root.clone(), 0));
        }

        for _ in 0..parallelism {
            let work_rx = work_rx.clone();
            let work_tx = work_tx.clone();
            let result_tx = result_tx.clone();
            let in_flight = Arc::clone(&in_flight);
            let config = self.config.clone();

            thread::spawn(move || {
                walker_thread(&work_rx, &work_tx, &result_tx, &in_flight, &config);
            });
        }

        result_rx
    }
}

fn walker_thread(
    work_rx: &channel::Receiver<WorkItem>,
    work_tx: &channel::Sender<WorkItem>,
    result_tx: &channel::Sender<PathBuf>,
    in_flight: &AtomicUsize,
    config: &WalkerConfig,
) {
    let suffix = config.suffix();
    loop {
        match work_rx.recv_timeout(Duration::from_millis(20)) {
            Ok((dir_path, depth)) => {
                process_directory(&dir_path, depth, &suffix, work_tx, result_tx, in_flight, config);
                in_flight.fetch_sub(1, Ordering::AcqRel);
            }
            Err(channel::RecvTimeoutError::Timeout) => {
                if in_flight.load(Ordering::Acquire) == 0 {
                    return;
                }
            }
            Err(channel::RecvTimeoutError::Disconnected) => return,
        }
    }
}

/// List one directory: report matching files, queue subdirectories.
fn process_directory(
    dir_path: &Path,
    depth: usize,
    suffix: &str,
    work_tx: &channel::Sender<WorkItem>,
    result_tx: &channel::Sender<PathBuf>,
    in_flight: &AtomicUsize,
    config: &WalkerConfig,
) {
    let Ok(entries) = fs::read_dir(dir_path) else {
        return;
    };

    for entry_result in entries {
        let Ok(entry) = entry_result else {
            continue;
        };
        let Ok(ft) = entry.file_type() else {
            continue;
        };
        let child_path = entry.path();

        // Symlinks are classified by their target; dangling ones count as files.
        let is_dir = if ft.is_symlink() {
            fs::metadata(&child_path).is_ok_and(|meta| meta.is_dir())
        } else {
            ft.is_dir()
        };

        if is_dir {
            let may_descend = !ft.is_symlink() || config.follow_symlinks;
            if may_descend && depth < config.max_depth {
                in_flight.fetch_add(1, Ordering::Release);
                if work_tx.send((child_path, depth + 1)).is_err() {
                    in_flight.fetch_sub(1, Ordering::Release);
                }
            }
            continue;
        }

        let matches = child_path
            .file_name()
            .is_some_and(|name| name.to_string_lossy().ends_with(suffix));
        if matches {
            let _ = result_tx.send(child_path);
        }
    }
}
