//! VMI-prefixed error types with structured error codes.

#![allow(missing_docs)]

use std::path::{Path, PathBuf};

use thiserror::Error;

/// Shared `Result` alias for the project.
pub type Result<T> = std::result::Result<T, VmiError>;

/// Top-level error type for the VM inventory.
#[derive(Debug, Error)]
pub enum VmiError {
    #[error("[VMI-1001] invalid configuration: {details}")]
    InvalidConfig { details: String },

    #[error("[VMI-1002] missing configuration file: {path}")]
    MissingConfig { path: PathBuf },

    #[error("[VMI-1003] configuration parse failure in {context}: {details}")]
    ConfigParse {
        context: &'static str,
        details: String,
    },

    #[error("[VMI-2001] descriptor read failure for {path}: {source}")]
    DescriptorRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("[VMI-2002] disk size unresolved for {path}: {details}")]
    DiskResolve { path: PathBuf, details: String },

    #[error("[VMI-2003] inventory root {path} is not usable: {reason}")]
    InvalidRoot { path: PathBuf, reason: String },

    #[error("[VMI-2101] serialization failure in {context}: {details}")]
    Serialization {
        context: &'static str,
        details: String,
    },

    #[error("[VMI-3001] permission denied for {path}")]
    PermissionDenied { path: PathBuf },

    #[error("[VMI-3002] IO failure at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("[VMI-3101] control tool {tool} unavailable: {source}")]
    ToolUnavailable {
        tool: String,
        #[source]
        source: std::io::Error,
    },

    #[error("[VMI-3102] control tool {tool} failed (exit {exit_code}): {stderr}")]
    ToolFailed {
        tool: String,
        exit_code: i32,
        stderr: String,
    },

    #[error("[VMI-3900] runtime failure: {details}")]
    Runtime { details: String },
}

impl VmiError {
    /// Stable machine-parseable error code.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::InvalidConfig { .. } => "VMI-1001",
            Self::MissingConfig { .. } => "VMI-1002",
            Self::ConfigParse { .. } => "VMI-1003",
            Self::DescriptorRead { .. } => "VMI-2001",
            Self::DiskResolve { .. } => "VMI-2002",
            Self::InvalidRoot { .. } => "VMI-2003",
            Self::Serialization { .. } => "VMI-2101",
            Self::PermissionDenied { .. } => "VMI-3001",
            Self::Io { .. } => "VMI-3002",
            Self::ToolUnavailable { .. } => "VMI-3101",
            Self::ToolFailed { .. } => "VMI-3102",
            Self::Runtime { .. } => "VMI-3900",
        }
    }

    /// Convenience constructor for IO errors with a known path.
    #[must_use]
    pub fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        let path = path.as_ref().to_path_buf();
        if source.kind() == std::io::ErrorKind::PermissionDenied {
            return Self::PermissionDenied { path };
        }
        Self::Io { path, source }
    }
}

impl From<serde_json::Error> for VmiError {
    fn from(value: serde_json::Error) -> Self {
        Self::Serialization {
            context: "serde_json",
            details: value.to_string(),
        }
    }
}

impl From<toml::de::Error> for VmiError {
    fn from(value: toml::de::Error) -> Self {
        Self::ConfigParse {
            context: "toml",
            details: value.to_string(),
        }
    }
}
