//! # Feed Configuration
//!
//! JSON configuration for live subscriptions. Values are layered the usual
//! way: built-in defaults, then the file, then command-line overrides
//! (`FeedConfig::merge`). The result is validated once, after the last
//! layer.
//!
//! ```json
//! {
//!   "serverUrl": "https://a.cluster.test:8080",
//!   "database": "Orders",
//!   "nodes": [{ "tag": "A" }, { "tag": "B", "shard": 1 }],
//!   "connection": { "heartbeatTimeoutMs": 15000, "reconnectDelayMs": 3000 },
//!   "cutoff": "2024-03-01T10:00:00Z",
//!   "logging": { "level": "info", "dir": "./logs", "keepFiles": 1 }
//! }
//! ```

use std::collections::HashSet;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use crate::models::Location;

/// Why a configuration was rejected.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("failed to read {}: {source}", path.display())]
    Io {
        /// File path.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// The file is not valid configuration JSON.
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] serde_json::Error),

    /// A value is out of range or inconsistent.
    #[error("invalid configuration: {0}")]
    Invalid(String),

    /// The server URL does not parse.
    #[error("invalid server url: {0}")]
    Url(#[from] url::ParseError),
}

/// One subscribed source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeConfig {
    /// Node tag.
    pub tag: String,
    /// Shard number for sharded databases.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shard: Option<u32>,
}

impl NodeConfig {
    /// The location this entry subscribes to.
    pub fn location(&self) -> Location {
        Location {
            node_tag: self.tag.clone(),
            shard_number: self.shard,
        }
    }
}

impl FromStr for NodeConfig {
    type Err = ConfigError;

    /// Parses `A` or `B$2`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (tag, shard) = match s.split_once('$') {
            Some((tag, shard)) => {
                let shard = shard
                    .parse::<u32>()
                    .map_err(|_| ConfigError::Invalid(format!("bad shard number in '{s}'")))?;
                (tag, Some(shard))
            }
            None => (s, None),
        };
        let tag = tag.trim();
        if tag.is_empty() {
            return Err(ConfigError::Invalid(format!("empty node tag in '{s}'")));
        }
        Ok(Self {
            tag: tag.to_string(),
            shard,
        })
    }
}

impl fmt::Display for NodeConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.location())
    }
}

/// Reconnect and staleness settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ConnectionSettings {
    /// Silence allowed before a socket is treated as dead.
    pub heartbeat_timeout_ms: u64,
    /// Delay before reconnecting.
    pub reconnect_delay_ms: u64,
    /// `false` for one-shot subscriptions.
    pub auto_reconnect: bool,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            heartbeat_timeout_ms: 15_000,
            reconnect_delay_ms: 3_000,
            auto_reconnect: true,
        }
    }
}

impl ConnectionSettings {
    /// Heartbeat timeout as a `Duration`.
    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_millis(self.heartbeat_timeout_ms)
    }

    /// Reconnect delay as a `Duration`.
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }
}

/// Log output settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default filter level when `RUST_LOG` is unset.
    pub level: String,
    /// Directory for log files; stdout only when unset.
    pub dir: Option<PathBuf>,
    /// Old log files kept on startup.
    pub keep_files: usize,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            dir: None,
            keep_files: 1,
        }
    }
}

/// Complete feed configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedConfig {
    /// Base server URL, http or https.
    pub server_url: String,
    /// Database for database-scoped feeds.
    #[serde(default)]
    pub database: Option<String>,
    /// Subscribed sources, in display order.
    #[serde(default)]
    pub nodes: Vec<NodeConfig>,
    /// Reconnect policy.
    #[serde(default)]
    pub connection: ConnectionSettings,
    /// Records started at or before this instant are ignored.
    #[serde(default)]
    pub cutoff: Option<DateTime<Utc>>,
    /// Logging.
    #[serde(default)]
    pub logging: LoggingSettings,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            server_url: "http://localhost:8080".to_string(),
            database: None,
            nodes: Vec::new(),
            connection: ConnectionSettings::default(),
            cutoff: None,
            logging: LoggingSettings::default(),
        }
    }
}

/// Optional values layered over a loaded configuration.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeedOverrides {
    /// Replaces `server_url`.
    pub server_url: Option<String>,
    /// Replaces `database`.
    pub database: Option<String>,
    /// Replaces the whole node list when non-empty.
    pub nodes: Vec<NodeConfig>,
    /// Replaces `connection.heartbeat_timeout_ms`.
    pub heartbeat_timeout_ms: Option<u64>,
    /// Replaces `connection.reconnect_delay_ms`.
    pub reconnect_delay_ms: Option<u64>,
    /// Replaces `connection.auto_reconnect`.
    pub auto_reconnect: Option<bool>,
    /// Replaces `cutoff`.
    pub cutoff: Option<DateTime<Utc>>,
    /// Replaces `logging.level`.
    pub log_level: Option<String>,
    /// Replaces `logging.dir`.
    pub log_dir: Option<PathBuf>,
}

impl FeedConfig {
    /// Reads, parses and validates a configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let config = Self::read(path)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads and parses a configuration file. Validation is left to the
    /// caller, after any overrides are merged.
    pub fn read(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&text)
    }

    /// Parses without validating.
    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(text)?)
    }

    /// Overlays `other`; every value it carries wins.
    pub fn merge(self, other: FeedOverrides) -> Self {
        Self {
            server_url: other.server_url.unwrap_or(self.server_url),
            database: other.database.or(self.database),
            nodes: if other.nodes.is_empty() { self.nodes } else { other.nodes },
            connection: ConnectionSettings {
                heartbeat_timeout_ms: other
                    .heartbeat_timeout_ms
                    .unwrap_or(self.connection.heartbeat_timeout_ms),
                reconnect_delay_ms: other.reconnect_delay_ms.unwrap_or(self.connection.reconnect_delay_ms),
                auto_reconnect: other.auto_reconnect.unwrap_or(self.connection.auto_reconnect),
            },
            cutoff: other.cutoff.or(self.cutoff),
            logging: LoggingSettings {
                level: other.log_level.unwrap_or(self.logging.level),
                dir: other.log_dir.or(self.logging.dir),
                keep_files: self.logging.keep_files,
            },
        }
    }

    /// Checks cross-field rules.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let url = Url::parse(&self.server_url)?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(ConfigError::Invalid(format!(
                "server url must be http or https, got '{}'",
                url.scheme()
            )));
        }

        if self.nodes.is_empty() {
            return Err(ConfigError::Invalid("at least one node is required".to_string()));
        }

        let mut seen = HashSet::new();
        for node in &self.nodes {
            if !seen.insert(node.location()) {
                return Err(ConfigError::Invalid(format!("duplicate node '{node}'")));
            }
        }

        if self.connection.heartbeat_timeout_ms == 0 {
            return Err(ConfigError::Invalid("heartbeat timeout must be positive".to_string()));
        }

        Ok(())
    }

    /// Locations in configured order.
    pub fn locations(&self) -> Vec<Location> {
        self.nodes.iter().map(NodeConfig::location).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const SAMPLE: &str = r#"{
        "serverUrl": "https://a.cluster.test:8080",
        "database": "Orders",
        "nodes": [{ "tag": "A" }, { "tag": "B", "shard": 1 }],
        "connection": { "heartbeatTimeoutMs": 5000 },
        "cutoff": "2024-03-01T10:00:00Z"
    }"#;

    #[test]
    fn load_fills_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();

        let config = FeedConfig::load(file.path()).unwrap();
        assert_eq!(config.database.as_deref(), Some("Orders"));
        assert_eq!(config.locations(), vec![Location::node("A"), Location::shard("B", 1)]);
        assert_eq!(config.connection.heartbeat_timeout(), Duration::from_secs(5));
        assert_eq!(config.connection.reconnect_delay(), Duration::from_secs(3));
        assert!(config.connection.auto_reconnect);
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.cutoff.map(|c| c.to_rfc3339()), Some("2024-03-01T10:00:00+00:00".to_string()));
    }

    #[test]
    fn missing_file_is_io_error() {
        let err = FeedConfig::load("/definitely/not/here.json").unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }

    #[test]
    fn overrides_win() {
        let base = FeedConfig::from_json(SAMPLE).unwrap();
        let merged = base.merge(FeedOverrides {
            nodes: vec!["C".parse().unwrap()],
            auto_reconnect: Some(false),
            log_level: Some("debug".to_string()),
            ..Default::default()
        });
        assert_eq!(merged.locations(), vec![Location::node("C")]);
        assert!(!merged.connection.auto_reconnect);
        assert_eq!(merged.connection.heartbeat_timeout_ms, 5000);
        assert_eq!(merged.logging.level, "debug");
        assert_eq!(merged.server_url, "https://a.cluster.test:8080");
    }

    #[test]
    fn validation_rules() {
        let ok = FeedConfig::from_json(SAMPLE).unwrap();
        assert!(ok.validate().is_ok());

        let mut no_nodes = ok.clone();
        no_nodes.nodes.clear();
        assert!(matches!(no_nodes.validate(), Err(ConfigError::Invalid(_))));

        let mut dup = ok.clone();
        dup.nodes.push(NodeConfig { tag: "B".to_string(), shard: Some(1) });
        assert!(matches!(dup.validate(), Err(ConfigError::Invalid(_))));

        let mut zero = ok.clone();
        zero.connection.heartbeat_timeout_ms = 0;
        assert!(matches!(zero.validate(), Err(ConfigError::Invalid(_))));

        let mut ws = ok.clone();
        ws.server_url = "ws://a.cluster.test".to_string();
        assert!(matches!(ws.validate(), Err(ConfigError::Invalid(_))));

        let mut garbage = ok;
        garbage.server_url = "not a url".to_string();
        assert!(matches!(garbage.validate(), Err(ConfigError::Url(_))));
    }

    #[test]
    fn node_strings_parse() {
        assert_eq!("A".parse::<NodeConfig>().unwrap().location(), Location::node("A"));
        assert_eq!("B$2".parse::<NodeConfig>().unwrap().location(), Location::shard("B", 2));
        assert!("B$x".parse::<NodeConfig>().is_err());
        assert!("$1".parse::<NodeConfig>().is_err());
    }
}
