use std::fmt;

use serde::{Deserialize, Serialize};

/// # Location
///
/// Identifies one data source: a cluster node tag plus an optional shard
/// number. A `Location` is fixed for the lifetime of the connection opened
/// against it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Location {
    /// The cluster node tag, e.g. `"A"`.
    pub node_tag: String,
    /// Shard number for sharded databases, `None` otherwise.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shard_number: Option<u32>,
}

impl Location {
    /// A location on a node of a non-sharded database.
    pub fn node(node_tag: impl Into<String>) -> Self {
        Self {
            node_tag: node_tag.into(),
            shard_number: None,
        }
    }

    /// A location on one shard hosted by a node.
    pub fn shard(node_tag: impl Into<String>, shard_number: u32) -> Self {
        Self {
            node_tag: node_tag.into(),
            shard_number: Some(shard_number),
        }
    }

    /// Query parameters identifying this location on an endpoint URL.
    pub fn query_pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = vec![("nodeTag", self.node_tag.clone())];
        if let Some(shard) = self.shard_number {
            pairs.push(("shardNumber", shard.to_string()));
        }
        pairs
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.shard_number {
            Some(shard) => write!(f, "{}${}", self.node_tag, shard),
            None => write!(f, "{}", self.node_tag),
        }
    }
}
