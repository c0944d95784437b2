//! Configuration for the baton toolkit.
//!
//! Configuration is optional: every section has defaults matching the
//! documented behavior (unbounded subscription queues, lock statistics on,
//! `info` logging). A TOML file only needs the keys it changes.
//!
//! ```toml
//! [logging]
//! level = "debug"
//!
//! [events]
//! queue_capacity = 256
//! overflow = "drop_oldest"
//!
//! [sync]
//! track_stats = false
//! ```

use std::path::Path;

use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::utils::logging::LogLevel;

/// Logging configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Maximum level passed to the `log` facade
    #[serde(default)]
    pub level: LogLevel,
}

/// What a subscription queue does when a bounded capacity is reached.
///
/// Publishers never block; one event is always discarded instead.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// Discard the oldest queued event to make room for the new one
    #[default]
    DropOldest,

    /// Discard the incoming event
    DropNewest,
}

/// Event bridge configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventConfig {
    /// Per-subscription queue capacity; `None` means unbounded
    #[serde(default)]
    pub queue_capacity: Option<usize>,

    /// Policy applied when `queue_capacity` is reached
    #[serde(default)]
    pub overflow: OverflowPolicy,
}

impl EventConfig {
    /// An unbounded configuration.
    pub fn unbounded() -> Self {
        Self::default()
    }

    /// A bounded configuration with the given capacity and overflow policy.
    ///
    /// The capacity is checked by [`validate`](Self::validate).
    pub fn bounded(capacity: usize, overflow: OverflowPolicy) -> Self {
        Self {
            queue_capacity: Some(capacity),
            overflow,
        }
    }

    /// Check that a configured capacity can hold at least one event.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.queue_capacity == Some(0) {
            return Err(ConfigError::Invalid(
                "events.queue_capacity must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Lock configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Whether mutexes collect acquisition statistics
    #[serde(default = "default_track_stats")]
    pub track_stats: bool,
}

fn default_track_stats() -> bool {
    true
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            track_stats: default_track_stats(),
        }
    }
}

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatonConfig {
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Event bridge configuration
    #[serde(default)]
    pub events: EventConfig,

    /// Lock configuration
    #[serde(default)]
    pub sync: SyncConfig,
}

impl BatonConfig {
    /// Parse and validate configuration from TOML text.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        info!("Loading configuration from {}", path.display());

        let text = std::fs::read_to_string(path)?;
        let config = Self::from_toml_str(&text)?;

        debug!("Loaded configuration: {:?}", config);
        Ok(config)
    }

    /// Check constraints serde cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.events.validate()
    }

    /// Serialize to TOML text.
    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        toml::to_string(self).map_err(|e| ConfigError::Invalid(e.to_string()))
    }
}
