//! Stream configuration: flow-control policy, frame selection and storage.

use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{StreamError, StreamResult};
use crate::storage::{StoragePolicy, TierKind};

/// Environment variable naming the folder used by file tiers and manifests.
pub const STORAGE_FOLDER_ENV: &str = "SLUICE_STORAGE_FOLDER";

/// Folder used when neither the configuration nor the environment names one.
pub const DEFAULT_STORAGE_FOLDER: &str = "/tmp";

/// Flow control between producers, link and consumers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamPolicy {
    /// Plain redistribution, no flow control.
    #[default]
    None,
    /// The consumer tells the link (or the producer, without a link) when it is ready.
    Single,
    /// The link also grants the producer each put.
    Double,
}

impl FromStr for StreamPolicy {
    type Err = StreamError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "none" => Ok(StreamPolicy::None),
            "single" | "single_feedback" => Ok(StreamPolicy::Single),
            "double" | "double_feedback" => Ok(StreamPolicy::Double),
            other => Err(StreamError::Configuration(format!("unknown stream policy '{}'", other))),
        }
    }
}

/// Which frames the link forwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FramePolicy {
    /// No selection policy configured; behaves as `Seq`.
    #[default]
    None,
    /// Every sampled frame, in order.
    Seq,
    /// The newest frame available.
    Recent,
    /// At least one frame per low-frequency window, more when the consumer keeps up.
    #[serde(rename = "lowhigh")]
    LowHigh,
}

impl FromStr for FramePolicy {
    type Err = StreamError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "none" => Ok(FramePolicy::None),
            "seq" | "sequential" => Ok(FramePolicy::Seq),
            "recent" | "most_recent" => Ok(FramePolicy::Recent),
            "lowhigh" | "low_high" => Ok(FramePolicy::LowHigh),
            other => Err(StreamError::Configuration(format!("unknown frame policy '{}'", other))),
        }
    }
}

/// One storage tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierConfig {
    /// Storage medium.
    pub kind: TierKind,
    /// Maximum number of frames.
    pub capacity: usize,
}

impl TierConfig {
    /// In-memory tier.
    pub fn memory(capacity: usize) -> Self {
        Self {
            kind: TierKind::MainMemory,
            capacity,
        }
    }

    /// File tier.
    pub fn file(capacity: usize) -> Self {
        Self {
            kind: TierKind::File,
            capacity,
        }
    }
}

/// Stream settings shared by every rank of a stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Flow-control policy (default: none).
    pub stream: StreamPolicy,
    /// Frame selection policy (default: none).
    pub frame_policy: FramePolicy,
    /// Producers send every n-th frame (default: 1).
    pub prod_freq_output: u32,
    /// Low-high policy: guaranteed forwarding period.
    pub low_frequency: u32,
    /// Low-high policy: producer sampling period.
    pub high_frequency: u32,
    /// Tier placement policy (default: greedy).
    pub storage_policy: StoragePolicy,
    /// Tiers in the order they are filled.
    pub storages: Vec<TierConfig>,
    /// Folder for file tiers and manifests.
    pub storage_folder: Option<PathBuf>,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            stream: StreamPolicy::None,
            frame_policy: FramePolicy::None,
            prod_freq_output: 1,
            low_frequency: 0,
            high_frequency: 0,
            storage_policy: StoragePolicy::Greedy,
            storages: Vec::new(),
            storage_folder: None,
        }
    }
}

impl StreamConfig {
    /// Loads a configuration from a `.toml` or `.json` file and validates it.
    pub fn from_file(path: &Path) -> StreamResult<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| StreamError::Config(format!("{}: {}", path.display(), e)))?;
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default();

        let config: StreamConfig = match ext.to_lowercase().as_str() {
            "toml" => toml::from_str(&contents)?,
            "json" => serde_json::from_str(&contents)?,
            _ => {
                return Err(StreamError::Config(format!(
                    "unsupported config file extension: {}",
                    ext
                )))
            }
        };
        config.validate()?;
        Ok(config)
    }

    /// Checks settings that would make the stream unusable.
    pub fn validate(&self) -> StreamResult<()> {
        if self.prod_freq_output == 0 {
            return Err(StreamError::Configuration("prod_freq_output must be at least 1".to_string()));
        }
        if self.frame_policy == FramePolicy::LowHigh {
            if self.high_frequency == 0 {
                return Err(StreamError::Configuration("high_frequency must be at least 1".to_string()));
            }
            if self.low_frequency <= self.high_frequency {
                return Err(StreamError::Configuration(format!(
                    "low_frequency ({}) must be greater than high_frequency ({})",
                    self.low_frequency, self.high_frequency
                )));
            }
        }
        if let Some(tier) = self.storages.iter().find(|t| t.capacity == 0) {
            return Err(StreamError::Configuration(format!("{:?} tier with zero capacity", tier.kind)));
        }
        Ok(())
    }

    /// Storage folder: the configured one, else `$SLUICE_STORAGE_FOLDER`, else `/tmp`.
    pub fn resolved_storage_folder(&self) -> PathBuf {
        self.storage_folder
            .clone()
            .or_else(|| std::env::var_os(STORAGE_FOLDER_ENV).map(PathBuf::from))
            .unwrap_or_else(|| PathBuf::from(DEFAULT_STORAGE_FOLDER))
    }
}
