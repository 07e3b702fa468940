use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, ValueEnum};
use lib_livefeed::configs::{FeedConfig, FeedOverrides, NodeConfig};

/// Which live feed to tail.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedKind {
    /// ETL performance statistics (database scoped).
    Etl,
    /// Admin log tail (server wide).
    Logs,
    /// Cluster node status (server wide).
    Nodes,
}

#[derive(Parser, Debug, Clone)]
#[clap(about = "Headless tail of live cluster telemetry", version)]
pub struct Cli {
    #[clap(long, env = "LIVE_TAIL_CONFIG_PATH", help = "Path to the JSON configuration file.")]
    pub config_path: Option<PathBuf>,

    #[clap(long, value_enum, env = "LIVE_TAIL_FEED", default_value = "etl", help = "Feed to subscribe to.")]
    pub feed: FeedKind,

    #[clap(long, env = "LIVE_TAIL_SERVER_URL", help = "Server base URL (http or https).")]
    pub server_url: Option<String>,

    #[clap(long, env = "LIVE_TAIL_DATABASE", help = "Database for database-scoped feeds.")]
    pub database: Option<String>,

    #[clap(
        long = "node",
        env = "LIVE_TAIL_NODES",
        value_delimiter = ',',
        help = "Node to subscribe to, `A` or `B$2` for a shard. Repeatable."
    )]
    pub nodes: Vec<NodeConfig>,

    #[clap(long, env = "LIVE_TAIL_HEARTBEAT_TIMEOUT_MS", help = "Silence in ms before a socket is considered dead.")]
    pub heartbeat_timeout_ms: Option<u64>,

    #[clap(long, env = "LIVE_TAIL_RECONNECT_DELAY_MS", help = "Delay in ms before reconnecting.")]
    pub reconnect_delay_ms: Option<u64>,

    #[clap(long, help = "Give up on the first lost socket instead of reconnecting.")]
    pub one_shot: bool,

    #[clap(long, env = "LIVE_TAIL_CUTOFF", help = "Ignore records started at or before this RFC 3339 instant.")]
    pub cutoff: Option<DateTime<Utc>>,

    #[clap(long, help = "Seed each source from its REST snapshot before going live.")]
    pub seed: bool,

    #[clap(long, env = "LIVE_TAIL_LOG_DIR", help = "Directory for log files.")]
    pub log_dir: Option<PathBuf>,

    #[clap(long, env = "LIVE_TAIL_LOG_LEVEL", help = "Logging level (trace, debug, info, warn, error).")]
    pub log_level: Option<String>,
}

impl Cli {
    /// Everything given on the command line or environment, as overrides.
    pub fn overrides(&self) -> FeedOverrides {
        FeedOverrides {
            server_url: self.server_url.clone(),
            database: self.database.clone(),
            nodes: self.nodes.clone(),
            heartbeat_timeout_ms: self.heartbeat_timeout_ms,
            reconnect_delay_ms: self.reconnect_delay_ms,
            auto_reconnect: self.one_shot.then_some(false),
            cutoff: self.cutoff,
            log_level: self.log_level.clone(),
            log_dir: self.log_dir.clone(),
        }
    }
}

/// Defaults, then the config file (if any), then CLI/env. Validated last.
pub fn load_config(cli: &Cli) -> Result<FeedConfig> {
    let config_file_path = cli
        .config_path
        .clone()
        .unwrap_or_else(|| PathBuf::from("live_tail.json"));

    let base = if config_file_path.exists() {
        FeedConfig::read(&config_file_path)
            .with_context(|| format!("loading {}", config_file_path.display()))?
    } else if cli.config_path.is_some() {
        anyhow::bail!("config file not found: {}", config_file_path.display());
    } else {
        FeedConfig::default()
    };

    let config = base.merge(cli.overrides());
    config.validate()?;
    Ok(config)
}
