//! # Feed Models
//!
//! Plain data carried by live feeds. Nothing in here knows about sockets
//! or merging; these are the shapes the server sends and the identity of
//! the source it sends them from.
//!
//! - **`location`**: which node (and optionally which shard) a subscription
//!   targets.
//! - **`payload`**: the `{ "Results": [...] }` envelope and heartbeat frames.
//! - **`etl`**: ETL performance statistics, the three-level hierarchy.
//! - **`logs`**: admin log tail entries.
//! - **`nodes`**: per-node cluster status reports.

/// Data source identity.
pub mod location;
/// Raw payload envelope and frame classification.
pub mod payload;
/// ETL performance wire types.
pub mod etl;
/// Admin log entries.
pub mod logs;
/// Cluster node status reports.
pub mod nodes;

pub use location::Location;
pub use payload::{DecodeError, RawPayload};
