//! Engine configuration

use crate::{Error, PreloadPolicy, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Preload policy applied before the consumer asks to play
    pub preload: PreloadPolicy,
    /// Seed for the bandwidth estimate in bits per second
    pub initial_bandwidth: Option<f64>,
    /// Forward buffer to build ahead of the playhead (seconds)
    pub goal_buffer_length: f64,
    /// Declared bitrates are multiplied by this margin before comparing to bandwidth
    pub bandwidth_variance: f64,
    /// How long a failing rendition stays excluded (milliseconds)
    pub exclusion_window_ms: u64,
    /// Periodic buffer check interval (milliseconds)
    pub check_interval_ms: u64,
    /// Media kept behind the playhead when no seekable window applies (seconds)
    pub back_buffer_length: f64,
    /// Chunk request timeout as a multiple of the chunk's nominal duration
    pub chunk_timeout_factor: f64,
    /// Key request failures before the key is given up on
    pub max_key_retries: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            preload: PreloadPolicy::Auto,
            initial_bandwidth: None,
            goal_buffer_length: 30.0,
            bandwidth_variance: 1.2,
            exclusion_window_ms: 5 * 60 * 1000,
            check_interval_ms: 500,
            back_buffer_length: 60.0,
            chunk_timeout_factor: 1.5,
            max_key_retries: 2,
        }
    }
}

impl EngineConfig {
    /// Parse a JSON document, filling absent fields with defaults
    pub fn from_json(json: &str) -> Result<Self> {
        let config: EngineConfig =
            serde_json::from_str(json).map_err(|e| Error::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.goal_buffer_length > 0.0) {
            return Err(Error::InvalidConfig(
                "goal_buffer_length must be positive".into(),
            ));
        }
        if !(self.bandwidth_variance > 0.0) {
            return Err(Error::InvalidConfig(
                "bandwidth_variance must be positive".into(),
            ));
        }
        if self.check_interval_ms == 0 {
            return Err(Error::InvalidConfig(
                "check_interval_ms must be positive".into(),
            ));
        }
        if !(self.chunk_timeout_factor > 0.0) {
            return Err(Error::InvalidConfig(
                "chunk_timeout_factor must be positive".into(),
            ));
        }
        if self.back_buffer_length < 0.0 {
            return Err(Error::InvalidConfig(
                "back_buffer_length must not be negative".into(),
            ));
        }
        if self.max_key_retries == 0 {
            return Err(Error::InvalidConfig(
                "max_key_retries must be at least 1".into(),
            ));
        }
        if let Some(bw) = self.initial_bandwidth {
            if bw.is_nan() || bw < 0.0 {
                return Err(Error::InvalidConfig(
                    "initial_bandwidth must not be negative".into(),
                ));
            }
        }
        Ok(())
    }

    pub fn exclusion_window(&self) -> Duration {
        Duration::from_millis(self.exclusion_window_ms)
    }

    pub fn check_interval(&self) -> Duration {
        Duration::from_millis(self.check_interval_ms)
    }

    /// Request timeout for a chunk of the given nominal duration
    pub fn chunk_timeout(&self, nominal_duration: f64) -> Duration {
        Duration::from_secs_f64((nominal_duration * self.chunk_timeout_factor).max(0.0))
    }
}
