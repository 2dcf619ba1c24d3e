//! Inventory data model: per-VM records and contained-failure diagnostics.

#![allow(missing_docs)]

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::core::errors::VmiError;

/// Placeholder for any field that could not be determined.
pub const UNKNOWN: &str = "Unknown";

/// Whether a descriptor belongs to a currently running VM.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VmStatus {
    Running,
    Stopped,
}

impl VmStatus {
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Running => "Running",
            Self::Stopped => "Stopped",
        }
    }
}

impl fmt::Display for VmStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// One VM, keyed by its descriptor path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VmRecord {
    /// Short stable identifier derived from `path`, for display layers.
    pub id: String,
    pub name: String,
    pub path: PathBuf,
    pub cpu_count: String,
    pub ram_size: String,
    pub guest_os: String,
    pub disk_size: String,
    pub mac_address: String,
    pub status: VmStatus,
}

impl VmRecord {
    /// All-unknown record for `path`. `name` is the file name with the
    /// descriptor extension removed.
    #[must_use]
    pub fn unknown(path: &Path, extension: &str) -> Self {
        Self {
            id: short_id(path),
            name: descriptor_name(path, extension),
            path: path.to_path_buf(),
            cpu_count: UNKNOWN.to_string(),
            ram_size: UNKNOWN.to_string(),
            guest_os: UNKNOWN.to_string(),
            disk_size: UNKNOWN.to_string(),
            mac_address: UNKNOWN.to_string(),
            status: VmStatus::Stopped,
        }
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.status == VmStatus::Running
    }
}

/// First 8 hex chars of the SHA-256 of the path's bytes.
#[must_use]
pub fn short_id(path: &Path) -> String {
    let digest = Sha256::digest(path.to_string_lossy().as_bytes());
    digest.iter().take(4).map(|b| format!("{b:02x}")).collect()
}

fn descriptor_name(path: &Path, extension: &str) -> String {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let suffix = format!(".{extension}");
    match file_name.strip_suffix(&suffix) {
        Some(stem) => stem.to_string(),
        None => path
            .file_stem()
            .map_or(file_name.clone(), |s| s.to_string_lossy().into_owned()),
    }
}

/// Which stage contained a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiagnosticKind {
    DescriptorRead,
    DiskResolve,
    RunningQuery,
}

/// Side-channel record of a failure that degraded, but did not abort, a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub kind: DiagnosticKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
    pub code: String,
    pub message: String,
}

impl Diagnostic {
    #[must_use]
    pub fn from_error(kind: DiagnosticKind, path: Option<&Path>, error: &VmiError) -> Self {
        Self {
            kind,
            path: path.map(Path::to_path_buf),
            code: error.code().to_string(),
            message: error.to_string(),
        }
    }
}
