use std::collections::HashMap;

use crate::core::merge::{MergeEngine, TabularView};
use crate::models::nodes::NodeStatus;

/// Latest status per node tag, in first-seen order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NodeTree {
    nodes: Vec<NodeStatus>,
    by_tag: HashMap<String, usize>,
}

impl NodeTree {
    /// Statuses in first-seen order.
    pub fn nodes(&self) -> &[NodeStatus] {
        &self.nodes
    }

    /// Latest status of one node.
    pub fn node(&self, tag: &str) -> Option<&NodeStatus> {
        self.by_tag.get(tag).map(|&pos| &self.nodes[pos])
    }
}

impl TabularView for NodeTree {
    type Row = NodeStatus;

    fn rows(&self) -> Vec<NodeStatus> {
        self.nodes.clone()
    }
}

/// Keeps the latest `NodeStatus` per node; an identical resend is not a change.
#[derive(Debug, Default)]
pub struct NodeStatusMergeEngine {
    tree: NodeTree,
}

impl NodeStatusMergeEngine {
    /// Creates an empty engine.
    pub fn new() -> Self {
        Self::default()
    }
}

impl MergeEngine for NodeStatusMergeEngine {
    type Item = NodeStatus;
    type Tree = NodeTree;

    fn ingest(&mut self, batch: Vec<NodeStatus>) -> bool {
        let mut changed = false;
        for status in batch {
            match self.tree.by_tag.get(&status.node_tag) {
                Some(&pos) => {
                    if self.tree.nodes[pos] != status {
                        self.tree.nodes[pos] = status;
                        changed = true;
                    }
                }
                None => {
                    self.tree.by_tag.insert(status.node_tag.clone(), self.tree.nodes.len());
                    self.tree.nodes.push(status);
                    changed = true;
                }
            }
        }
        changed
    }

    fn tree(&self) -> &NodeTree {
        &self.tree
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::nodes::NodeState;

    fn status(tag: &str, state: NodeState) -> NodeStatus {
        NodeStatus {
            node_tag: tag.to_string(),
            node_url: format!("https://{}.example.test", tag.to_lowercase()),
            state,
            server_version: Some("6.0".to_string()),
            up_time: None,
            error: None,
        }
    }

    #[test]
    fn replaces_only_when_status_differs() {
        let mut engine = NodeStatusMergeEngine::new();
        assert!(engine.ingest(vec![status("A", NodeState::Online), status("B", NodeState::Online)]));
        assert!(!engine.ingest(vec![status("A", NodeState::Online)]));
        assert!(engine.ingest(vec![status("B", NodeState::Disabled)]));

        let tags: Vec<&str> = engine.tree().nodes().iter().map(|n| n.node_tag.as_str()).collect();
        assert_eq!(tags, vec!["A", "B"]);
        assert_eq!(engine.tree().node("B").map(|n| n.state), Some(NodeState::Disabled));
    }
}
