//! Streaming configuration
//!
//! Every field has a default, so a YAML document only needs the values it
//! overrides:
//!
//! ```rust
//! use packet_streaming::StreamingConfig;
//!
//! let config = StreamingConfig::from_yaml_str("release_threshold: 4\n").unwrap();
//! assert_eq!(config.release_threshold, 4);
//! assert_eq!(config.max_pending_buffers, StreamingConfig::default().max_pending_buffers);
//! ```

use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::{Result, StreamingError};

/// Tuning knobs for the streaming server, client, and drivers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StreamingConfig {
    /// Pending released ids that trigger a batched release buffer
    pub release_threshold: usize,
    /// Data buffers the client parks while waiting for their domain packet
    pub max_pending_buffers: usize,
    /// How often the server driver drains the outbound queue
    pub poll_interval_ms: u64,
    /// Capacity of the channel feeding decoded packets to the consumer
    pub packet_channel_capacity: usize,
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            release_threshold: 16,
            max_pending_buffers: 4096,
            poll_interval_ms: 5,
            packet_channel_capacity: 1024,
        }
    }
}

impl StreamingConfig {
    /// Parse a YAML document and validate it.
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let config: Self = serde_yaml_ng::from_str(yaml)
            .map_err(|e| StreamingError::config(format!("YAML parsing failed: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a YAML configuration file.
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let yaml = std::fs::read_to_string(path)
            .with_context(|| format!("Reading streaming config {}", path.display()))?;
        let config = Self::from_yaml_str(&yaml)
            .with_context(|| format!("Parsing streaming config {}", path.display()))?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.release_threshold == 0 {
            return Err(StreamingError::config("release_threshold must be at least 1"));
        }
        if self.max_pending_buffers == 0 {
            return Err(StreamingError::config("max_pending_buffers must be at least 1"));
        }
        if self.poll_interval_ms == 0 {
            return Err(StreamingError::config("poll_interval_ms must be at least 1"));
        }
        if self.packet_channel_capacity == 0 {
            return Err(StreamingError::config("packet_channel_capacity must be at least 1"));
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}
