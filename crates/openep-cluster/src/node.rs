//! Cluster node representation
//!
//! Owned by [`crate::Membership`]; every other component reads copies.

use openep_common::{NodeId, NodeState};
use serde::{Deserialize, Serialize};

/// A member of the cluster
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Node {
    /// Stable node identifier
    pub id: NodeId,
    /// Human-readable name
    pub name: String,
    /// Bind host
    pub addr: String,
    /// Bind port
    pub port: u16,
    /// Lifecycle state
    pub state: NodeState,
    /// Gossip protocol version
    pub protocol_version: u32,
    /// Advertised capacity in bytes
    pub capacity_bytes: u64,
    /// Bytes in use
    pub used_bytes: u64,
    /// Region tag
    pub region: String,
    /// Zone tag
    pub zone: String,
    /// Storage class served by this node
    pub storage_class: String,
    /// Join time, seconds since epoch
    pub joined_at: u64,
    /// Last time any peer heard from this node, seconds since epoch
    pub last_seen: u64,
    /// Monotonic per-node update counter; the higher incarnation wins a
    /// gossip merge
    pub incarnation: u64,
    /// Opaque metadata blob supplied by the node's delegate
    pub metadata: Vec<u8>,
}

impl Node {
    /// `host:port` gossip address
    #[must_use]
    pub fn address(&self) -> String {
        format!("{}:{}", self.addr, self.port)
    }

    /// Whether the node participates in placement
    #[must_use]
    pub fn is_alive(&self) -> bool {
        self.state == NodeState::Alive
    }
}

/// Rank used to break gossip merge ties at equal incarnation: the more
/// terminal state wins
pub(crate) fn state_precedence(state: NodeState) -> u8 {
    match state {
        NodeState::Alive => 0,
        NodeState::Suspect => 1,
        NodeState::Dead => 2,
        NodeState::Left => 3,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address_format() {
        let node = Node {
            id: NodeId::new(),
            name: "n1".into(),
            addr: "10.0.0.1".into(),
            port: 7946,
            state: NodeState::Alive,
            protocol_version: 1,
            capacity_bytes: 0,
            used_bytes: 0,
            region: "r".into(),
            zone: "z".into(),
            storage_class: "STANDARD".into(),
            joined_at: 0,
            last_seen: 0,
            incarnation: 1,
            metadata: Vec::new(),
        };
        assert_eq!(node.address(), "10.0.0.1:7946");
        assert!(node.is_alive());
    }

    #[test]
    fn test_state_precedence_ordering() {
        assert!(state_precedence(NodeState::Left) > state_precedence(NodeState::Dead));
        assert!(state_precedence(NodeState::Dead) > state_precedence(NodeState::Suspect));
        assert!(state_precedence(NodeState::Suspect) > state_precedence(NodeState::Alive));
    }
}
