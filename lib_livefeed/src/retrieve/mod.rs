/// REST snapshot retrieval with retries.
pub mod snapshot_client;

pub use snapshot_client::{SnapshotClient, SnapshotError};
