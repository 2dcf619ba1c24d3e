//! Configuration system: TOML file + env var overrides + smart defaults.

#![allow(missing_docs)]

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::core::errors::{Result, VmiError};

/// Smallest scan limit that still covers the embedded descriptor of a
/// monolithic sparse disk (it starts at sector 1).
const MIN_SCAN_LIMIT_BYTES: u64 = 512;

/// Environment variables that override file settings.
pub const ENV_OVERRIDES: &[&str] = &[
    "VMI_ROOT_DIR",
    "VMI_DESCRIPTOR_EXTENSION",
    "VMI_MAX_DEPTH",
    "VMI_PARALLELISM",
    "VMI_FOLLOW_SYMLINKS",
    "VMI_MIN_SHARED_SEGMENTS",
    "VMI_VMRUN_BIN",
    "VMI_JSONL_LOG",
];

/// Full inventory configuration model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct Config {
    pub inventory: InventoryConfig,
    pub consolidation: ConsolidationConfig,
    pub vmrun: VmrunConfig,
    pub paths: PathsConfig,
}

/// Discovery and parsing behavior.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct InventoryConfig {
    /// Default root scanned when no root is passed explicitly.
    pub root_dir: PathBuf,
    /// Descriptor file extension, without the leading dot.
    pub descriptor_extension: String,
    pub max_depth: usize,
    pub parallelism: usize,
    pub follow_symlinks: bool,
    /// Upper bound on bytes read from a disk descriptor while looking for
    /// extent directives.
    pub descriptor_scan_limit_bytes: u64,
}

/// Running-folder consolidation knobs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ConsolidationConfig {
    /// A shared prefix must have strictly more segments than this to merge.
    pub min_shared_segments: usize,
}

/// External control tool settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct VmrunConfig {
    pub binary: PathBuf,
}

/// Filesystem paths used by vmi itself.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PathsConfig {
    pub config_file: PathBuf,
    pub jsonl_log: PathBuf,
}

impl Default for InventoryConfig {
    fn default() -> Self {
        Self {
            root_dir: PathBuf::from("/storage/500SDD/VMS"),
            descriptor_extension: "vmx".to_string(),
            max_depth: 32,
            parallelism: std::thread::available_parallelism()
                .map_or(2, |n| n.get().saturating_div(2).max(1)),
            follow_symlinks: false,
            descriptor_scan_limit_bytes: 1024 * 1024,
        }
    }
}

impl Default for ConsolidationConfig {
    fn default() -> Self {
        Self {
            min_shared_segments: 2,
        }
    }
}

impl Default for VmrunConfig {
    fn default() -> Self {
        Self {
            binary: PathBuf::from("vmrun"),
        }
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        let home_dir = env::var_os("HOME").map_or_else(
            || {
                eprintln!(
                    "[VMI-CONFIG] WARNING: HOME not set, falling back to /tmp for data paths"
                );
                PathBuf::from("/tmp")
            },
            PathBuf::from,
        );
        Self {
            config_file: home_dir.join(".config").join("vmi").join("config.toml"),
            jsonl_log: home_dir
                .join(".local")
                .join("share")
                .join("vmi")
                .join("activity.jsonl"),
        }
    }
}

impl Config {
    /// Default configuration path.
    #[must_use]
    pub fn default_path() -> PathBuf {
        PathsConfig::default().config_file
    }

    /// Load config from default or explicit path, then apply env overrides.
    ///
    /// Missing config file is not an error when loading from default path; defaults are used.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path_buf = path.map_or_else(Self::default_path, Path::to_path_buf);
        let is_explicit_path = path.is_some();

        let mut cfg = if path_buf.exists() {
            let raw = fs::read_to_string(&path_buf).map_err(|source| VmiError::Io {
                path: path_buf.clone(),
                source,
            })?;
            let parsed: Self = toml::from_str(&raw)?;
            parsed
        } else if is_explicit_path {
            return Err(VmiError::MissingConfig { path: path_buf });
        } else {
            Self::default()
        };

        cfg.paths.config_file = path_buf;
        cfg.apply_env_overrides_from(|name| env::var(name).ok())?;
        cfg.normalize_paths();
        cfg.validate()?;
        Ok(cfg)
    }

    /// Deterministic hash of the effective config for log correlation.
    ///
    /// FNV-1a over the canonical JSON form, stable across processes.
    pub fn stable_hash(&self) -> Result<String> {
        let canonical = serde_json::to_string(self)?;
        let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
        for byte in canonical.as_bytes() {
            hash ^= u64::from(*byte);
            hash = hash.wrapping_mul(0x0100_0000_01b3);
        }
        Ok(format!("{hash:016x}"))
    }

    /// Names of the override variables currently set to a non-blank value.
    #[must_use]
    pub fn active_env_overrides() -> Vec<&'static str> {
        active_env_overrides_from(|name| env::var(name).ok())
    }

    fn apply_env_overrides_from<F>(&mut self, mut lookup: F) -> Result<()>
    where
        F: FnMut(&str) -> Option<String>,
    {
        let mut var = |name: &str| lookup(name).filter(|raw| !raw.trim().is_empty());

        if let Some(raw) = var("VMI_ROOT_DIR") {
            self.inventory.root_dir = PathBuf::from(raw);
        }
        if let Some(raw) = var("VMI_DESCRIPTOR_EXTENSION") {
            self.inventory.descriptor_extension = raw.trim().to_string();
        }
        if let Some(raw) = var("VMI_MAX_DEPTH") {
            self.inventory.max_depth = parse_env("VMI_MAX_DEPTH", &raw)?;
        }
        if let Some(raw) = var("VMI_PARALLELISM") {
            self.inventory.parallelism = parse_env("VMI_PARALLELISM", &raw)?;
        }
        if let Some(raw) = var("VMI_FOLLOW_SYMLINKS") {
            self.inventory.follow_symlinks = parse_env("VMI_FOLLOW_SYMLINKS", &raw)?;
        }
        if let Some(raw) = var("VMI_MIN_SHARED_SEGMENTS") {
            self.consolidation.min_shared_segments =
                parse_env("VMI_MIN_SHARED_SEGMENTS", &raw)?;
        }
        if let Some(raw) = var("VMI_VMRUN_BIN") {
            self.vmrun.binary = PathBuf::from(raw);
        }
        if let Some(raw) = var("VMI_JSONL_LOG") {
            self.paths.jsonl_log = PathBuf::from(raw);
        }
        Ok(())
    }

    /// Strip trailing separators so configured roots compare and join consistently.
    fn normalize_paths(&mut self) {
        self.inventory.root_dir = strip_trailing_separator(&self.inventory.root_dir);
        let ext = self.inventory.descriptor_extension.trim();
        self.inventory.descriptor_extension = ext.to_string();
    }

    fn validate(&self) -> Result<()> {
        if self.inventory.parallelism == 0 {
            return Err(VmiError::InvalidConfig {
                details: "inventory.parallelism must be >= 1".to_string(),
            });
        }
        if self.inventory.max_depth == 0 {
            return Err(VmiError::InvalidConfig {
                details: "inventory.max_depth must be >= 1".to_string(),
            });
        }

        let ext = &self.inventory.descriptor_extension;
        if ext.is_empty() || ext.starts_with('.') || ext.contains(std::path::MAIN_SEPARATOR) {
            return Err(VmiError::InvalidConfig {
                details: format!(
                    "inventory.descriptor_extension must be a bare extension like \"vmx\", got {ext:?}"
                ),
            });
        }

        if self.inventory.descriptor_scan_limit_bytes < MIN_SCAN_LIMIT_BYTES {
            return Err(VmiError::InvalidConfig {
                details: format!(
                    "inventory.descriptor_scan_limit_bytes must be >= {MIN_SCAN_LIMIT_BYTES}, got {}",
                    self.inventory.descriptor_scan_limit_bytes
                ),
            });
        }

        if self.vmrun.binary.as_os_str().is_empty() {
            return Err(VmiError::InvalidConfig {
                details: "vmrun.binary must not be empty".to_string(),
            });
        }

        Ok(())
    }
}

fn strip_trailing_separator(path: &Path) -> PathBuf {
    let s = path.to_string_lossy();
    if s.len() > 1
        && let Some(stripped) = s.strip_suffix(std::path::MAIN_SEPARATOR)
    {
        return PathBuf::from(stripped);
    }
    path.to_path_buf()
}

fn active_env_overrides_from<F>(lookup: F) -> Vec<&'static str>
where
    F: Fn(&str) -> Option<String>,
{
    ENV_OVERRIDES
        .iter()
        .copied()
        .filter(|name| lookup(name).is_some_and(|raw| !raw.trim().is_empty()))
        .collect()
}

fn parse_env<T>(name: &str, raw: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim().parse::<T>().map_err(|error| VmiError::ConfigParse {
        context: "env",
        details: format!("{name}={raw:?}: {error}"),
    })
}
