//! Configuration management for Hypercorn nodes.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// One year, in seconds
pub const DEFAULT_TRUST_EXPIRY_SECS: u64 = 365 * 24 * 60 * 60;

/// Output format for the tracing subscriber
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Root of the node's persisted layout (feeds, trust store, key pair)
    pub storage_dir: PathBuf,
    /// Lifetime of issued trust links when the caller gives none
    pub default_trust_expiry_secs: u64,
    /// Upper bound for `get_timeline` page sizes
    pub max_timeline_limit: usize,
    /// Capacity of the watch -> coordinator event channel
    pub event_buffer: usize,
    pub log_format: LogFormat,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            storage_dir: PathBuf::from("./hypercorn-data"),
            default_trust_expiry_secs: DEFAULT_TRUST_EXPIRY_SECS,
            max_timeline_limit: 100,
            event_buffer: 256,
            log_format: LogFormat::Pretty,
        }
    }
}

impl NodeConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: NodeConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn with_storage_dir(storage_dir: impl Into<PathBuf>) -> Self {
        Self {
            storage_dir: storage_dir.into(),
            ..Self::default()
        }
    }

    pub fn validate(&self) -> crate::Result<()> {
        if self.max_timeline_limit == 0 {
            return Err(crate::CoreError::Config(
                "max_timeline_limit must be positive".to_string(),
            ));
        }
        if self.event_buffer == 0 {
            return Err(crate::CoreError::Config(
                "event_buffer must be positive".to_string(),
            ));
        }
        Ok(())
    }

    pub fn feeds_dir(&self) -> PathBuf {
        self.storage_dir.join("feeds")
    }

    pub fn trust_store_path(&self) -> PathBuf {
        self.storage_dir.join("trust").join("links.db")
    }

    pub fn keypair_path(&self) -> PathBuf {
        self.storage_dir.join("keypair.json")
    }
}
