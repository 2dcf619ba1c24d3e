//! Disk size resolution through split-disk descriptors.
//!
//! A VM's primary disk reference usually points at a small text descriptor
//! whose extent lines (`RW 204800 SPARSE "disk-s001.vmdk"`) name the files
//! holding the data. The size reported is that of the first existing extent;
//! when no extent resolves, the referenced file is taken to be a monolithic
//! image and its own size is used.

#![allow(missing_docs)]

use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

use crate::core::errors::VmiError;
use crate::core::paths::resolve_sibling;
use crate::inventory::record::UNKNOWN;
use crate::platform::pal::FileSystemReader;

const GIB: f64 = 1024.0 * 1024.0 * 1024.0;

static EXTENT_DIRECTIVE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"RW \d+ (?:SPARSE|FLAT) "(.*?)""#).expect("extent directive regex is valid")
});

/// Where a resolved size came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "path", rename_all = "snake_case")]
pub enum DiskSource {
    /// Size of an extent file named by the descriptor.
    Extent(PathBuf),
    /// Size of the referenced file itself.
    Monolithic,
    /// Nothing could be sized.
    Unresolved,
}

/// Outcome of resolving one disk reference.
#[derive(Debug)]
pub struct DiskResolution {
    /// `"<x.yy> GB"` or `"Unknown"`.
    pub size: String,
    pub source: DiskSource,
    /// Set when a read failed along the way, even if a fallback succeeded.
    pub issue: Option<VmiError>,
}

impl DiskResolution {
    fn unresolved(issue: Option<VmiError>) -> Self {
        Self {
            size: UNKNOWN.to_string(),
            source: DiskSource::Unresolved,
            issue,
        }
    }
}

/// Resolves disk sizes via a [`FileSystemReader`].
pub struct DiskSizeResolver<'a> {
    fs: &'a dyn FileSystemReader,
    scan_limit: u64,
}

impl<'a> DiskSizeResolver<'a> {
    /// `scan_limit` bounds how much of a descriptor is searched for extents,
    /// so a monolithic multi-gigabyte image is never read whole.
    pub fn new(fs: &'a dyn FileSystemReader, scan_limit: u64) -> Self {
        Self { fs, scan_limit }
    }

    pub fn resolve(&self, disk: &Path) -> DiskResolution {
        if !self.fs.exists(disk) {
            return DiskResolution::unresolved(None);
        }

        let mut issue = None;
        match self.fs.read_head(disk, self.scan_limit) {
            Ok(head) => {
                for extent in extent_references(&head) {
                    let extent_path = resolve_sibling(disk, &extent);
                    if !self.fs.exists(&extent_path) {
                        continue;
                    }
                    match self.fs.file_size(&extent_path) {
                        Ok(bytes) => {
                            return DiskResolution {
                                size: format_gib(bytes),
                                source: DiskSource::Extent(extent_path),
                                issue: None,
                            };
                        }
                        Err(source) => {
                            issue = Some(VmiError::DiskResolve {
                                path: extent_path,
                                details: source.to_string(),
                            });
                        }
                    }
                }
            }
            Err(source) => {
                issue = Some(VmiError::DiskResolve {
                    path: disk.to_path_buf(),
                    details: format!("descriptor unreadable: {source}"),
                });
            }
        }

        match self.fs.file_size(disk) {
            Ok(bytes) => DiskResolution {
                size: format_gib(bytes),
                source: DiskSource::Monolithic,
                issue,
            },
            Err(source) => DiskResolution::unresolved(Some(VmiError::DiskResolve {
                path: disk.to_path_buf(),
                details: source.to_string(),
            })),
        }
    }
}

/// Extent file names in descriptor order.
fn extent_references(head: &[u8]) -> Vec<String> {
    let mut refs = Vec::new();
    let mut start = 0;
    for end in memchr::memchr_iter(b'\n', head).chain(std::iter::once(head.len())) {
        let line = String::from_utf8_lossy(&head[start..end]);
        if let Some(caps) = EXTENT_DIRECTIVE.captures(&line) {
            refs.push(caps[1].to_string());
        }
        start = end + 1;
    }
    refs
}

/// Bytes as gibibytes with two decimals, e.g. `"2.00 GB"`.
#[allow(clippy::cast_precision_loss)]
pub fn format_gib(bytes: u64) -> String {
    format!("{:.2} GB", bytes as f64 / GIB)
}
