//! JSONL activity log: append-only line-delimited JSON.
//!
//! Each line is a self-contained JSON object, assembled in memory and written
//! with a single `write_all` so a concurrent `tail -f` never sees a partial
//! line.
//!
//! Four-level fallback chain:
//! 1. Primary file path
//! 2. Fallback path (e.g. under `/tmp`)
//! 3. stderr with `[VMI-JSONL]` prefix
//! 4. Silent discard (an inventory run must never fail because of logging)

#![allow(missing_docs)]

use std::fs::{self, File, OpenOptions, rename};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::core::errors::{Result, VmiError};
use crate::inventory::engine::InventoryReport;
use crate::inventory::record::{Diagnostic, DiagnosticKind};

/// Severity level for log events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

/// Activity event types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    InventoryStart,
    InventoryComplete,
    DescriptorIssue,
    RunningQueryFailed,
    ConfigLoaded,
    Error,
}

/// A single JSONL log entry; everything but `ts`, `event` and `severity` is optional.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    /// RFC 3339 UTC timestamp.
    pub ts: String,
    pub event: EventType,
    pub severity: Severity,
    /// Inventory root of the run.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub root: Option<String>,
    /// Affected descriptor or disk path.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    /// Number of records, or running instances, depending on the event.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub count: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    /// Freeform details.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl LogEntry {
    /// Create a new entry stamped with the current UTC time.
    pub fn new(event: EventType, severity: Severity) -> Self {
        Self {
            ts: format_utc_now(),
            event,
            severity,
            root: None,
            path: None,
            count: None,
            duration_ms: None,
            error_code: None,
            error_message: None,
            details: None,
        }
    }

    /// Entry describing one contained failure.
    pub fn from_diagnostic(diagnostic: &Diagnostic) -> Self {
        let event = match diagnostic.kind {
            DiagnosticKind::RunningQuery => EventType::RunningQueryFailed,
            DiagnosticKind::DescriptorRead | DiagnosticKind::DiskResolve => {
                EventType::DescriptorIssue
            }
        };
        let mut entry = Self::new(event, Severity::Warning);
        entry.path = diagnostic.path.as_ref().map(|p| p.display().to_string());
        entry.error_code = Some(diagnostic.code.clone());
        entry.error_message = Some(diagnostic.message.clone());
        entry
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Sink {
    Primary,
    Fallback,
    Stderr,
    Discard,
}

impl Sink {
    const fn label(self) -> &'static str {
        match self {
            Self::Primary => "primary",
            Self::Fallback => "fallback",
            Self::Stderr => "stderr",
            Self::Discard => "discard",
        }
    }
}

/// Configuration for the JSONL writer.
#[derive(Debug, Clone)]
pub struct JsonlConfig {
    pub path: PathBuf,
    pub fallback_path: Option<PathBuf>,
    /// Rotate once the active file would exceed this many bytes.
    pub max_size_bytes: u64,
    /// Number of rotated files to keep.
    pub max_rotated_files: u32,
}

impl JsonlConfig {
    /// Primary at `path`, fallback in the system temp dir.
    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            fallback_path: Some(std::env::temp_dir().join("vmi-activity.jsonl")),
            ..Self::default()
        }
    }
}

impl Default for JsonlConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("activity.jsonl"),
            fallback_path: None,
            max_size_bytes: 16 * 1024 * 1024,
            max_rotated_files: 3,
        }
    }
}

/// Append-only JSONL writer with rotation and multi-level fallback.
pub struct JsonlWriter {
    config: JsonlConfig,
    writer: Option<BufWriter<File>>,
    sink: Sink,
    active_len: u64,
}

impl JsonlWriter {
    /// Open the log. Falls through the degradation chain on failure.
    pub fn open(config: JsonlConfig) -> Self {
        let mut w = Self {
            config,
            writer: None,
            sink: Sink::Discard,
            active_len: 0,
        };
        w.try_open_primary();
        w
    }

    /// Write a single entry as one JSONL line.
    pub fn write_entry(&mut self, entry: &LogEntry) {
        let line = match serde_json::to_string(entry) {
            Ok(json) => format!("{json}\n"),
            Err(e) => {
                let _ = writeln!(io::stderr(), "[VMI-JSONL] serialize error: {e}");
                return;
            }
        };
        self.append_line(&line);
    }

    /// Summary line for a finished run plus one line per diagnostic.
    pub fn record_report(&mut self, report: &InventoryReport) {
        for diagnostic in &report.diagnostics {
            self.write_entry(&LogEntry::from_diagnostic(diagnostic));
        }

        let severity = if report.diagnostics.is_empty() {
            Severity::Info
        } else {
            Severity::Warning
        };
        let mut summary = LogEntry::new(EventType::InventoryComplete, severity);
        summary.root = Some(report.root.display().to_string());
        summary.count = Some(report.records.len() as u64);
        summary.duration_ms = Some(report.duration_ms);
        summary.details = Some(format!(
            "discovered={} running={} folders={} diagnostics={}",
            report.discovered_count,
            report.running_count,
            report.consolidated_folders.len(),
            report.diagnostics.len()
        ));
        self.write_entry(&summary);
        self.flush();
    }

    pub fn flush(&mut self) {
        if let Some(w) = self.writer.as_mut() {
            let _ = w.flush();
        }
    }

    /// Where entries currently go: `primary`, `fallback`, `stderr` or `discard`.
    pub fn state(&self) -> &'static str {
        self.sink.label()
    }

        fn append_line(&mut self, line: &str) {
        if self.active_len + line.len() as u64 > self.config.max_size_bytes
            && matches!(self.sink, Sink::Primary | Sink::Fallback)
        {
            self.rotate();
        }

        match self.sink {
            Sink::Primary | Sink::Fallback => {
                if let Some(w) = self.writer.as_mut() {
                    if w.write_all(line.as_bytes()).is_err() {
                        self.degrade();
                        self.append_line(line);
                        return;
                    }
                    self.active_len += line.len() as u64;
                } else {
                    self.degrade();
                    self.append_line(line);
                }
            }
            Sink::Stderr => {
                let _ = write!(io::stderr(), "[VMI-JSONL] {line}");
            }
            Sink::Discard => {}
        }
    }

    fn try_open_primary(&mut self) {
        match open_append(&self.config.path) {
            Ok((file, size)) => {
                self.writer = Some(BufWriter::new(file));
                self.sink = Sink::Primary;
                self.active_len = size;
            }
            Err(_) => self.try_open_fallback(),
        }
    }

    fn try_open_fallback(&mut self) {
        let Some(fb) = self.config.fallback_path.clone() else {
            self.sink = Sink::Stderr;
            let _ = writeln!(
                io::stderr(),
                "[VMI-JSONL] primary path failed and no fallback configured, using stderr"
            );
            return;
        };
        match open_append(&fb) {
            Ok((file, size)) => {
                let _ = writeln!(
                    io::stderr(),
                    "[VMI-JSONL] primary path failed, using fallback: {}",
                    fb.display()
                );
                self.writer = Some(BufWriter::new(file));
                self.sink = Sink::Fallback;
                self.active_len = size;
            }
            Err(_) => {
                self.sink = Sink::Stderr;
                let _ = writeln!(
                    io::stderr(),
                    "[VMI-JSONL] both primary and fallback paths failed, using stderr"
                );
            }
        }
    }

    fn degrade(&mut self) {
        self.writer = None;
        match self.sink {
            Sink::Primary => self.try_open_fallback(),
            Sink::Fallback => {
                self.sink = Sink::Stderr;
                let _ = writeln!(io::stderr(), "[VMI-JSONL] fallback write failed, using stderr");
            }
            Sink::Stderr => self.sink = Sink::Discard,
            Sink::Discard => {}
        }
    }

    fn rotate(&mut self) {
        if let Some(w) = self.writer.as_mut() {
            let _ = w.flush();
        }
        self.writer = None;

        let base = match self.sink {
            Sink::Primary => self.config.path.clone(),
            Sink::Fallback => match &self.config.fallback_path {
                Some(p) => p.clone(),
                None => return,
            },
            _ => return,
        };

        // .N is dropped, .N-1 → .N, …, current → .1
        let _ = fs::remove_file(rotated_name(&base, self.config.max_rotated_files));
        for i in (1..self.config.max_rotated_files).rev() {
            let _ = rename(rotated_name(&base, i), rotated_name(&base, i + 1));
        }
        let _ = rename(&base, rotated_name(&base, 1));

        match open_append(&base) {
            Ok((file, _)) => {
                self.writer = Some(BufWriter::new(file));
                self.active_len = 0;
            }
            Err(_) => self.degrade(),
        }
    }
}

impl Drop for JsonlWriter {
    fn drop(&mut self) {
        self.flush();
    }
}

/// Open or create a file for appending. Returns `(File, current_size)`.
fn open_append(path: &Path) -> Result<(File, u64)> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent).map_err(|source| VmiError::io(parent, source))?;
    }
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|source| VmiError::io(path, source))?;
    let size = file.metadata().map(|m| m.len()).unwrap_or(0);
    Ok((file, size))
}

/// `foo.jsonl` → `foo.jsonl.3`.
fn rotated_name(base: &Path, index: u32) -> PathBuf {
    let mut name = base.as_os_str().to_owned();
    name.push(format!(".{index}"));
    PathBuf::from(name)
}

fn format_utc_now() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}
