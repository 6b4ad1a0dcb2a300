//! Pipeline configuration.
//!
//! Every field has a default matching the reference behavior, so an empty
//! document is a valid configuration:
//!
//! ```rust
//! use geocast::StreamConfig;
//!
//! let config = StreamConfig::from_yaml_str("transport:\n  ping_interval_secs: 20\n").unwrap();
//! assert_eq!(config.transport.ping_interval_secs, 20);
//! assert_eq!(config.capture.min_frame_interval_ms, 200);
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::platform::{LocationPriority, LocationRequest};
use crate::transport::BackoffPolicy;
use crate::types::FrameRate;
use crate::{Result, StreamError};

/// Top-level configuration document
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StreamConfig {
    pub capture: CaptureConfig,
    pub location: LocationConfig,
    pub transport: TransportConfig,
    pub composer: ComposerConfig,
    pub log: LogConfig,
}

impl StreamConfig {
    /// Parse and validate a YAML document
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let config: StreamConfig = serde_yaml_ng::from_str(yaml)
            .map_err(|e| StreamError::config_error("yaml", e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a YAML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| StreamError::store_error(path.to_path_buf(), e))?;
        Self::from_yaml_str(&text)
    }

    /// Check cross-field constraints serde cannot express
    pub fn validate(&self) -> Result<()> {
        let capture = &self.capture;
        if !matches!(capture.rotation_degrees, 0 | 90 | 180 | 270) {
            return Err(StreamError::config_error(
                "capture.rotation_degrees",
                format!("{} is not a multiple of 90 in 0..=270", capture.rotation_degrees),
            ));
        }
        if !(1..=100).contains(&capture.transport_quality) {
            return Err(StreamError::config_error(
                "capture.transport_quality",
                format!("{} is outside 1..=100", capture.transport_quality),
            ));
        }
        if capture.min_frame_interval_ms == 0 {
            return Err(StreamError::config_error("capture.min_frame_interval_ms", "must be > 0"));
        }

        let location = &self.location;
        if location.min_interval_ms > location.interval_ms {
            return Err(StreamError::config_error(
                "location.min_interval_ms",
                "must not exceed location.interval_ms",
            ));
        }

        let transport = &self.transport;
        if transport.ping_interval_secs == 0 || transport.connect_timeout_secs == 0 {
            return Err(StreamError::config_error("transport", "timeouts and intervals must be > 0"));
        }

        if self.log.capacity == 0 {
            return Err(StreamError::config_error("log.capacity", "must be > 0"));
        }

        Ok(())
    }
}

/// Camera frame pipeline tunables
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CaptureConfig {
    /// Minimum time between accepted frames
    pub min_frame_interval_ms: u64,
    /// Clockwise rotation correcting for device mounting
    pub rotation_degrees: u16,
    /// JPEG quality for the transport encoding
    pub transport_quality: u8,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self { min_frame_interval_ms: 200, rotation_degrees: 90, transport_quality: 50 }
    }
}

impl CaptureConfig {
    pub fn frame_rate(&self) -> FrameRate {
        FrameRate::IntervalMs(self.min_frame_interval_ms)
    }
}

/// Location update request tunables
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LocationConfig {
    pub interval_ms: u64,
    pub min_interval_ms: u64,
    pub max_delay_ms: u64,
    pub high_accuracy: bool,
}

impl Default for LocationConfig {
    fn default() -> Self {
        Self { interval_ms: 1000, min_interval_ms: 500, max_delay_ms: 2000, high_accuracy: true }
    }
}

impl LocationConfig {
    pub fn request(&self) -> LocationRequest {
        LocationRequest {
            priority: if self.high_accuracy {
                LocationPriority::HighAccuracy
            } else {
                LocationPriority::Balanced
            },
            interval: Duration::from_millis(self.interval_ms),
            min_interval: Duration::from_millis(self.min_interval_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
        }
    }
}

/// Socket session tunables
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TransportConfig {
    pub connect_timeout_secs: u64,
    pub ping_interval_secs: u64,
    pub max_reconnect_attempts: u32,
    pub max_backoff_secs: u64,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: 30,
            ping_interval_secs: 10,
            max_reconnect_attempts: 8,
            max_backoff_secs: 60,
        }
    }
}

impl TransportConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn ping_interval(&self) -> Duration {
        Duration::from_secs(self.ping_interval_secs)
    }

    pub fn backoff(&self) -> BackoffPolicy {
        BackoffPolicy::new(self.max_reconnect_attempts, Duration::from_secs(self.max_backoff_secs))
    }
}

/// Envelope composition tunables
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ComposerConfig {
    /// Skip frames until a location fix exists instead of sending zeros
    pub require_location_fix: bool,
}

/// Log sink tunables
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LogConfig {
    pub capacity: usize,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self { capacity: crate::log_sink::DEFAULT_LOG_CAPACITY }
    }
}
