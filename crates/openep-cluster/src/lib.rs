//! OpenEndpoint cluster data plane
//!
//! Gossip-based membership, the consistent-hash placement of replicas and
//! erasure shards onto cluster nodes, and the rebalancer that moves shards
//! back onto their ring owners after membership changes. Peer I/O goes
//! through the [`transport::PeerClient`] seam; the in-memory implementation
//! backs tests and single-process clusters.

pub mod coordinator;
pub mod ecstore;
pub mod membership;
pub mod node;
pub mod rebalancer;
pub mod replicator;
pub mod transport;

pub use coordinator::RingCoordinator;
pub use ecstore::{ErasureStore, ShardPlacement};
pub use membership::{GossipState, Membership, MembershipEvent, NodeDelegate};
pub use node::Node;
pub use rebalancer::{MoveStatus, RebalanceOperation, Rebalancer, RebalancerStatus};
pub use replicator::{ReplicaWriteReport, Replicator, ReplicatorConfig};
pub use transport::{
    serve_gossip, GossipTransport, InMemoryCluster, InMemoryMesh, PeerClient, ShardInfo,
    TcpGossipTransport,
};
