use serde::{Deserialize, Serialize};

/// Reachability of a cluster node as reported by its own live feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeState {
    /// Reachable and serving.
    Online,
    /// Unreachable or failing.
    Offline,
    /// Deliberately taken out of rotation.
    Disabled,
}

/// Status snapshot of one cluster node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct NodeStatus {
    /// Cluster node tag.
    pub node_tag: String,
    /// Public URL of the node.
    #[serde(default)]
    pub node_url: String,
    /// Current state.
    pub state: NodeState,
    /// Server version string.
    #[serde(default)]
    pub server_version: Option<String>,
    /// Uptime as reported by the server.
    #[serde(default)]
    pub up_time: Option<String>,
    /// Last error text for offline nodes.
    #[serde(default)]
    pub error: Option<String>,
}
