//! # Configs
//!
//! File-based configuration for feed consumers.

/// Feed configuration file and overrides.
pub mod feed_config;

pub use feed_config::{ConfigError, ConnectionSettings, FeedConfig, FeedOverrides, LoggingSettings, NodeConfig};
