use anyhow::{Context, Result};
use lib_livefeed::configs::FeedConfig;
use lib_livefeed::connections::{ConnectionConfig, EndpointUrl, StreamConnection, WsTransport};
use lib_livefeed::core::{
    AggregateView, ClusterSummary, EtlMergeEngine, EtlRow, LogMergeEngine, LogRecord, MergeEngine,
    NodeStatusMergeEngine, PerSourceAggregator, SourceRows, TabularView,
};
use lib_livefeed::models::nodes::NodeStatus;
use lib_livefeed::retrieve::SnapshotClient;
use lib_livefeed::Location;
use serde::de::DeserializeOwned;
use tokio::sync::broadcast;
use tracing::{info, warn};

use super::config::FeedKind;

const SNAPSHOT_RETRIES: u32 = 3;

/// Endpoints of one feed kind.
struct FeedEndpoints {
    live: &'static str,
    snapshot: &'static str,
    database_scoped: bool,
}

fn endpoints(kind: FeedKind) -> FeedEndpoints {
    match kind {
        FeedKind::Etl => FeedEndpoints {
            live: "etl/performance/live",
            snapshot: "etl/performance",
            database_scoped: true,
        },
        FeedKind::Logs => FeedEndpoints {
            live: "admin/logs/watch",
            snapshot: "admin/logs",
            database_scoped: false,
        },
        FeedKind::Nodes => FeedEndpoints {
            live: "admin/cluster/nodes/watch",
            snapshot: "admin/cluster/nodes",
            database_scoped: false,
        },
    }
}

/// Tails `kind` until `shutdown` fires.
pub async fn run(config: FeedConfig, kind: FeedKind, seed: bool, shutdown: broadcast::Receiver<()>) -> Result<()> {
    let cutoff = config.cutoff;
    match kind {
        FeedKind::Etl => {
            tail(&config, kind, seed, shutdown, |_| EtlMergeEngine::new(cutoff), summarize_etl).await
        }
        FeedKind::Logs => {
            tail(&config, kind, seed, shutdown, |_| LogMergeEngine::new(cutoff), summarize_logs).await
        }
        FeedKind::Nodes => {
            tail(&config, kind, seed, shutdown, |_| NodeStatusMergeEngine::new(), summarize_nodes).await
        }
    }
}

async fn tail<E>(
    config: &FeedConfig,
    kind: FeedKind,
    seed: bool,
    mut shutdown: broadcast::Receiver<()>,
    make_engine: impl FnMut(&Location) -> E,
    summarize: fn(&AggregateView<<E::Tree as TabularView>::Row>) -> String,
) -> Result<()>
where
    E: MergeEngine,
    E::Item: DeserializeOwned,
    E::Tree: TabularView,
{
    let endpoints = endpoints(kind);
    let database = match (&config.database, endpoints.database_scoped) {
        (Some(db), true) => Some(db.clone()),
        (None, true) => anyhow::bail!("the {:?} feed needs a database", kind),
        (_, false) => None,
    };

    let mut urls = EndpointUrl::new(&config.server_url, endpoints.live)?;
    if let Some(db) = &database {
        urls = urls.database(db.clone());
    }
    let connector = StreamConnection::new(
        WsTransport::new(),
        urls,
        ConnectionConfig {
            heartbeat_timeout: config.connection.heartbeat_timeout(),
            reconnect_delay: config.connection.reconnect_delay(),
            auto_reconnect: config.connection.auto_reconnect,
        },
    );

    let mut aggregator = PerSourceAggregator::new(config.locations(), make_engine, move |view| {
        info!(state = ?view.state(), "{}", summarize(view));
    });

    if seed {
        // Hold live data back until every snapshot is in.
        aggregator.pause();
        aggregator.connect(&connector);

        let mut snapshots = SnapshotClient::new(&config.server_url, SNAPSHOT_RETRIES)?;
        if let Some(db) = &database {
            snapshots = snapshots.database(db.clone());
        }
        for location in config.locations() {
            match snapshots.fetch::<E::Item>(endpoints.snapshot, &location).await {
                Ok(items) => {
                    if let Some(flow) = aggregator.flow(&location) {
                        flow.lock().seed(items);
                    }
                }
                Err(e) => warn!(%location, error = %e, "snapshot unavailable, starting from live data"),
            }
        }
        aggregator.resume();
    } else {
        aggregator.connect(&connector);
    }

    info!(feed = ?kind, sources = config.nodes.len(), "tailing");
    shutdown
        .recv()
        .await
        .context("shutdown channel closed unexpectedly")?;

    aggregator.close();
    info!(feed = ?kind, "all connections closed");
    Ok(())
}

fn source_counts<R>(view: &AggregateView<R>) -> (usize, usize) {
    let failed = view
        .sources()
        .iter()
        .filter(|(_, rows)| matches!(rows, SourceRows::NoData { .. }))
        .count();
    (view.sources().len(), failed)
}

fn summarize_etl(view: &AggregateView<EtlRow>) -> String {
    let rows = view.tagged_rows();
    let records: Vec<&EtlRow> = rows
        .iter()
        .filter_map(|row| match row {
            lib_livefeed::core::TaggedRow::Data { row, .. } => Some(*row),
            lib_livefeed::core::TaggedRow::NoData { .. } => None,
        })
        .collect();
    let running = records.iter().filter(|r| !r.record.is_completed()).count();
    let with_errors = records.iter().filter(|r| r.record.has_errors).count();
    let (sources, failed) = source_counts(view);
    format!(
        "{} ETL batches ({} running, {} with errors) from {} sources, {} without data",
        records.len(),
        running,
        with_errors,
        sources,
        failed
    )
}

fn summarize_logs(view: &AggregateView<LogRecord>) -> String {
    let newest = view
        .sources()
        .iter()
        .filter_map(|(location, rows)| match rows {
            SourceRows::Rows(rows) => rows.last().map(|r| (location, r)),
            _ => None,
        })
        .max_by_key(|(_, r)| r.time);
    match newest {
        Some((location, record)) => format!(
            "[{}] {} {}: {}",
            location, record.entry.level, record.entry.logger, record.entry.message
        ),
        None => "no log lines yet".to_string(),
    }
}

fn summarize_nodes(view: &AggregateView<NodeStatus>) -> String {
    let summary = ClusterSummary::from_view(view);
    format!(
        "{} online, {} offline, {} disabled",
        summary.online, summary.offline, summary.disabled
    )
}
