//! Utility types.
//!
//! Configuration loading and the logging level vocabulary.

pub mod config;
pub mod logging;

pub use config::{BatonConfig, EventConfig, LoggingConfig, OverflowPolicy, SyncConfig};
pub use logging::LogLevel;
