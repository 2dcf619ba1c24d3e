//! Collaborator seams: running-instance query and filesystem reads.
//!
//! The inventory core only ever talks to the outside world through these two
//! traits, so tests can substitute the in-memory implementations below.

#![allow(missing_docs)]

use std::collections::{HashMap, HashSet};
use std::fs::{self, File};
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process::Command;

use crate::core::config::VmrunConfig;
use crate::core::errors::{Result, VmiError};

/// Source of the set of descriptors belonging to currently running VMs.
pub trait RunningInstanceProvider: Send + Sync {
    fn list_running(&self) -> Result<HashSet<PathBuf>>;
}

/// Read access to descriptor and extent files.
pub trait FileSystemReader: Send + Sync {
    fn exists(&self, path: &Path) -> bool;
    fn file_size(&self, path: &Path) -> io::Result<u64>;
    /// Read at most `limit` bytes from the start of the file.
    fn read_head(&self, path: &Path, limit: u64) -> io::Result<Vec<u8>>;
    /// Read the whole file.
    fn read_all(&self, path: &Path) -> io::Result<Vec<u8>> {
        self.read_head(path, u64::MAX)
    }
}

/// `vmrun list` backed provider.
#[derive(Debug, Clone)]
pub struct VmrunProvider {
    binary: PathBuf,
}

impl VmrunProvider {
    #[must_use]
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    #[must_use]
    pub fn from_config(config: &VmrunConfig) -> Self {
        Self::new(config.binary.clone())
    }

    fn tool_name(&self) -> String {
        self.binary.display().to_string()
    }
}

impl RunningInstanceProvider for VmrunProvider {
    fn list_running(&self) -> Result<HashSet<PathBuf>> {
        let output = Command::new(&self.binary)
            .arg("list")
            .output()
            .map_err(|source| VmiError::ToolUnavailable {
                tool: self.tool_name(),
                source,
            })?;
        if !output.status.success() {
            return Err(VmiError::ToolFailed {
                tool: self.tool_name(),
                exit_code: output.status.code().unwrap_or(-1),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(parse_vmrun_list(&String::from_utf8_lossy(&output.stdout)))
    }
}

/// Parse `vmrun list` output: the first line is the "Total running VMs: N"
/// header, every following non-blank line is a descriptor path.
pub fn parse_vmrun_list(stdout: &str) -> HashSet<PathBuf> {
    stdout
        .lines()
        .skip(1)
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(PathBuf::from)
        .collect()
}

/// Direct filesystem access.
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalFs;

impl FileSystemReader for LocalFs {
    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }

    fn file_size(&self, path: &Path) -> io::Result<u64> {
        fs::metadata(path).map(|meta| meta.len())
    }

    fn read_head(&self, path: &Path, limit: u64) -> io::Result<Vec<u8>> {
        let file = File::open(path)?;
        let capacity = usize::try_from(limit.min(64 * 1024)).unwrap_or(64 * 1024);
        let mut buf = Vec::with_capacity(capacity);
        file.take(limit).read_to_end(&mut buf)?;
        Ok(buf)
    }

    fn read_all(&self, path: &Path) -> io::Result<Vec<u8>> {
        fs::read(path)
    }
}

/// Fixed running set for deterministic tests. `None` simulates a failing tool.
#[derive(Debug, Default)]
pub struct MockRunningProvider {
    running: Option<HashSet<PathBuf>>,
}

impl MockRunningProvider {
    #[must_use]
    pub fn new<I, P>(paths: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        Self {
            running: Some(paths.into_iter().map(Into::into).collect()),
        }
    }

    /// Provider whose query always fails as if the tool were missing.
    #[must_use]
    pub fn unavailable() -> Self {
        Self { running: None }
    }

}

impl RunningInstanceProvider for MockRunningProvider {
    fn list_running(&self) -> Result<HashSet<PathBuf>> {
        self.running
            .clone()
            .ok_or_else(|| VmiError::ToolUnavailable {
                tool: "mock-vmrun".to_string(),
                source: io::Error::new(io::ErrorKind::NotFound, "mock provider unavailable"),
            })
    }
}

/// In-memory filesystem for parser tests. Sizes can be declared without
/// materializing multi-gigabyte contents.
#[derive(Debug, Default)]
pub struct MemoryFs {
    files: HashMap<PathBuf, MemoryFile>,
}

#[derive(Debug, Clone)]
struct MemoryFile {
    contents: Vec<u8>,
    size: u64,
    readable: bool,
}

impl MemoryFs {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a file whose reported size equals its content length.
    #[must_use]
    pub fn with_file(mut self, path: impl Into<PathBuf>, contents: impl Into<Vec<u8>>) -> Self {
        let contents = contents.into();
        let size = contents.len() as u64;
        self.files.insert(
            path.into(),
            MemoryFile {
                contents,
                size,
                readable: true,
            },
        );
        self
    }

    /// Add an opaque file of `size` bytes (reads yield no text).
    #[must_use]
    pub fn with_sized(mut self, path: impl Into<PathBuf>, size: u64) -> Self {
        self.files.insert(
            path.into(),
            MemoryFile {
                contents: Vec::new(),
                size,
                readable: true,
            },
        );
        self
    }

    /// Add a file that exists but fails every read.
    #[must_use]
    pub fn with_unreadable(mut self, path: impl Into<PathBuf>) -> Self {
        self.files.insert(
            path.into(),
            MemoryFile {
                contents: Vec::new(),
                size: 0,
                readable: false,
            },
        );
        self
    }

    fn get(&self, path: &Path) -> io::Result<&MemoryFile> {
        let file = self
            .files
            .get(path)
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "no such file"))?;
        if file.readable {
            Ok(file)
        } else {
            Err(io::Error::new(io::ErrorKind::PermissionDenied, "unreadable"))
        }
    }
}

impl FileSystemReader for MemoryFs {
    fn exists(&self, path: &Path) -> bool {
        self.files.contains_key(path)
    }

    fn file_size(&self, path: &Path) -> io::Result<u64> {
        self.get(path).map(|file| file.size)
    }

    fn read_head(&self, path: &Path, limit: u64) -> io::Result<Vec<u8>> {
        let file = self.get(path)?;
        let end = usize::try_from(limit)
            .unwrap_or(usize::MAX)
            .min(file.contents.len());
        Ok(file.contents[..end].to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vmrun_list_skips_header_and_blank_lines() {
        let stdout = "Total running VMs: 2\n/vms/a/a.vmx\n\n  /vms/b/b.vmx \n";
        let running = parse_vmrun_list(stdout);
        assert_eq!(running.len(), 2);
        assert!(running.contains(Path::new("/vms/a/a.vmx")));
        assert!(running.contains(Path::new("/vms/b/b.vmx")));
    }

    #[test]
    fn vmrun_list_with_no_running_vms_is_empty() {
        assert!(parse_vmrun_list("Total running VMs: 0\n").is_empty());
        assert!(parse_vmrun_list("").is_empty());
    }

    #[test]
    fn missing_vmrun_binary_is_tool_unavailable() {
        let provider = VmrunProvider::new("/nonexistent/vmi-test/vmrun");
        let err = provider.list_running().expect_err("binary does not exist");
        assert_eq!(err.code(), "VMI-3101");
    }

    #[cfg(unix)]
    #[test]
    fn failing_vmrun_is_tool_failed() {
        // `false list` exits 1 without output.
        let provider = VmrunProvider::new("false");
        let err = provider.list_running().expect_err("false always fails");
        assert!(matches!(err, VmiError::ToolFailed { exit_code: 1, .. }));
    }

    #[test]
    fn local_fs_read_head_respects_limit() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("disk.vmdk");
        fs::write(&path, b"0123456789").unwrap();

        let fs = LocalFs;
        assert!(fs.exists(&path));
        assert_eq!(fs.file_size(&path).unwrap(), 10);
        assert_eq!(fs.read_head(&path, 4).unwrap(), b"0123");
        assert_eq!(fs.read_head(&path, 100).unwrap(), b"0123456789");
        assert_eq!(fs.read_all(&path).unwrap(), b"0123456789");
    }

    #[test]
    fn mock_provider_reports_fixed_set_or_failure() {
        let provider = MockRunningProvider::new(["/vms/a.vmx", "/vms/a.vmx"]);
        assert_eq!(provider.list_running().unwrap().len(), 1);
        assert!(MockRunningProvider::new(Vec::<PathBuf>::new()).list_running().unwrap().is_empty());
        let err = MockRunningProvider::unavailable().list_running().unwrap_err();
        assert_eq!(err.code(), "VMI-3101");
    }

    #[test]
    fn memory_fs_reports_declared_sizes() {
        let fs = MemoryFs::new()
            .with_sized("/vms/flat.vmdk", 2_147_483_648)
            .with_unreadable("/vms/locked.vmx");
        assert_eq!(fs.file_size(Path::new("/vms/flat.vmdk")).unwrap(), 2_147_483_648);
        assert!(fs.exists(Path::new("/vms/locked.vmx")));
        assert!(fs.read_head(Path::new("/vms/locked.vmx"), 10).is_err());
    }
}
