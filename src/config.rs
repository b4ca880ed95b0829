use serde::Deserialize;
use std::path::PathBuf;
use crate::error::{DlsError, Result};

/// Top-level configuration loaded from a TOML file.
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    /// Listener and environment settings consumed by the protocol layer.
    pub node: NodeConfig,
    /// Storage engine tuning.
    #[serde(default)]
    pub storage: StorageConfig,
}

/// Node-level settings. The storage core only uses `data_dir`; the rest is
/// handed to the connection handling layer untouched.
#[derive(Debug, Deserialize, Clone)]
pub struct NodeConfig {
    /// Base directory under which one subdirectory per channel is kept.
    pub data_dir: PathBuf,
    /// Listen port for the legacy protocol.
    #[serde(default = "default_legacy_port")]
    pub legacy_port: u16,
    /// Listen port for the neo protocol.
    #[serde(default = "default_neo_port")]
    pub neo_port: u16,
    /// Maximum number of concurrent client connections.
    #[serde(default = "default_connection_limit")]
    pub connection_limit: usize,
    /// Listen backlog.
    #[serde(default = "default_backlog")]
    pub backlog: u32,
    /// CPU index to pin the main thread to (-1 = no pinning).
    #[serde(default = "default_cpu")]
    pub cpu: i32,
    /// Path of the unix control socket.
    #[serde(default = "default_control_socket")]
    pub control_socket: PathBuf,
    /// Directory for protocol-layer checkpoints.
    #[serde(default = "default_checkpoint_dir")]
    pub checkpoint_dir: PathBuf,
}

/// Storage engine tuning knobs.
#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    /// Write buffer per open bucket, in KiB. Flushed at record boundaries.
    #[serde(default = "default_write_buffer_kb")]
    pub write_buffer_kb: usize,
    /// Read buffer per open bucket, in KiB. 0 means unbuffered.
    #[serde(default = "default_read_buffer_kb")]
    pub read_buffer_kb: usize,
    /// Largest accepted record value, in bytes.
    #[serde(default = "default_max_value_len")]
    pub max_value_len: usize,
    /// Bytes appended between two automatic fdatasync calls.
    #[serde(default = "default_sync_interval_kb")]
    pub sync_interval_kb: usize,
    /// Worker threads executing blocking bucket reads.
    #[serde(default = "default_io_workers")]
    pub io_workers: usize,
    /// Iterator state-machine steps between cooperative yields.
    #[serde(default = "default_cede_interval")]
    pub cede_interval: u32,
    /// Upper bound on concurrently acquired iterators (0 = unbounded).
    #[serde(default)]
    pub max_iterators: usize,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            write_buffer_kb: default_write_buffer_kb(),
            read_buffer_kb: default_read_buffer_kb(),
            max_value_len: default_max_value_len(),
            sync_interval_kb: default_sync_interval_kb(),
            io_workers: default_io_workers(),
            cede_interval: default_cede_interval(),
            max_iterators: 0,
        }
    }
}

fn default_legacy_port() -> u16 { 30010 }
fn default_neo_port() -> u16 { 30011 }
fn default_connection_limit() -> usize { 5000 }
fn default_backlog() -> u32 { 1024 }
fn default_cpu() -> i32 { -1 }
fn default_control_socket() -> PathBuf { PathBuf::from("dls.control") }
fn default_checkpoint_dir() -> PathBuf { PathBuf::from("checkpoints") }

fn default_write_buffer_kb() -> usize { 64 }
fn default_read_buffer_kb() -> usize { 64 }
fn default_max_value_len() -> usize { 16 * 1024 * 1024 }
fn default_sync_interval_kb() -> usize { 4 * 1024 }
fn default_io_workers() -> usize { 4 }
fn default_cede_interval() -> u32 { 128 }

impl Config {
    /// Load configuration from a TOML file at `path`.
    pub fn from_file(path: &std::path::Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| DlsError::Config(format!("Cannot read config file: {e}")))?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| DlsError::Config(format!("Invalid TOML: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.node.data_dir.as_os_str().is_empty() {
            return Err(DlsError::Config("data_dir must not be empty".into()));
        }
        if self.storage.io_workers == 0 {
            return Err(DlsError::Config("io_workers must be > 0".into()));
        }
        if self.storage.cede_interval == 0 {
            return Err(DlsError::Config("cede_interval must be > 0".into()));
        }
        if self.storage.max_value_len == 0 {
            return Err(DlsError::Config("max_value_len must be > 0".into()));
        }
        if self.storage.max_value_len as u64 > crate::storage::framing::MAX_VALUE_LEN {
            return Err(DlsError::Config(format!(
                "max_value_len must be <= {}",
                crate::storage::framing::MAX_VALUE_LEN
            )));
        }
        Ok(())
    }
}
