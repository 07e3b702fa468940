//! # Core Engine Module
//!
//! Everything between a decoded payload and the consumer callback. Nothing
//! in here touches a socket; connections feed these types through
//! `StreamHandler` implementations.
//!
//! ## Core Components:
//!
//! - **`merge`**: the `MergeEngine` contract and the per-record error type.
//!   An engine is a stateful fold over successive batches that reports
//!   whether anything observable changed.
//!
//! - **`etl_engine`**: the three-level ETL performance tree
//!   (task, transformation, record) with update-in-place by record id and an
//!   ingestion-time cutoff.
//!
//! - **`log_engine`** / **`node_engine`**: the flat admin log tail and the
//!   per-node cluster status tile.
//!
//! - **`flow_controller`**: pause/resume buffering in front of an engine.
//!   Payloads queued while paused are replayed on resume and announced with
//!   one conflated notification.
//!
//! - **`aggregator`**: one connection, flow controller and engine per
//!   `Location`, combined into a single view with stable row order.

/// The merge engine contract.
pub mod merge;
/// ETL performance merge engine.
pub mod etl_engine;
/// Admin log tail merge engine.
pub mod log_engine;
/// Cluster node status merge engine.
pub mod node_engine;
/// Pause/resume buffering in front of a merge engine.
pub mod flow_controller;
/// Combined views over many sources.
pub mod aggregator;

// --- Public API Re-exports ---
pub use merge::{MergeEngine, MergeError, TabularView};
pub use etl_engine::{EtlMergeEngine, EtlRow, EtlTree, PerformanceRecord, TaskGroup, TaskGroupKey, TransformationGroup};
pub use log_engine::{LogMergeEngine, LogRecord, LogTree};
pub use node_engine::{NodeStatusMergeEngine, NodeTree};
pub use flow_controller::{FlowController, SharedFlow};
pub use aggregator::{AggregateState, AggregateView, ClusterSummary, PerSourceAggregator, SourceRows, TaggedRow};
