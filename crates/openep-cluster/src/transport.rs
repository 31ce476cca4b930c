//! Cluster transport seams
//!
//! [`PeerClient`] is the data-plane RPC boundary (replica and shard I/O);
//! [`GossipTransport`] is the membership push-pull boundary. The in-memory
//! implementations back tests and single-process clusters; a networked
//! deployment supplies its own implementations behind the same traits.

use crate::membership::GossipState;
use crate::node::Node;
use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use openep_common::{Error, NodeId, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

/// A shard held by a node, as reported for rebalance planning
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ShardInfo {
    /// Shard identifier (also its ring placement key)
    pub id: String,
    /// Shard size in bytes
    pub size: u64,
}

/// Data-plane RPC client addressing one peer at a time
#[async_trait]
pub trait PeerClient: Send + Sync {
    /// Store a full object replica on a peer
    async fn put_object(&self, node: &Node, bucket: &str, key: &str, data: Bytes, etag: &str) -> Result<()>;

    /// Fetch a full object replica and its ETag from a peer
    async fn get_object(&self, node: &Node, bucket: &str, key: &str) -> Result<(Bytes, String)>;

    /// Remove a full object replica from a peer
    async fn delete_object(&self, node: &Node, bucket: &str, key: &str) -> Result<()>;

    /// Store an erasure shard on a peer
    async fn put_shard(&self, node: &Node, shard_id: &str, data: Bytes) -> Result<()>;

    /// Fetch an erasure shard from a peer, `None` when absent
    async fn fetch_shard(&self, node: &Node, shard_id: &str) -> Result<Option<Bytes>>;

    /// Whether a peer holds a shard
    async fn has_shard(&self, node: &Node, shard_id: &str) -> Result<bool>;

    /// Remove a shard from a peer
    async fn delete_shard(&self, node: &Node, shard_id: &str) -> Result<()>;

    /// Shards held by a peer (for rebalance planning)
    async fn list_shards(&self, node: &Node) -> Result<Vec<ShardInfo>>;
}

/// Membership push-pull transport: send the local state, get the peer's
#[async_trait]
pub trait GossipTransport: Send + Sync {
    /// Exchange full membership state with the peer at `addr`
    async fn exchange(&self, addr: &str, state: Vec<Node>) -> Result<Vec<Node>>;
}

// In-memory implementations

#[derive(Default)]
struct NodeStore {
    objects: DashMap<String, (Bytes, String)>,
    shards: DashMap<String, Bytes>,
}

/// In-process cluster fabric implementing [`PeerClient`]
///
/// Nodes are registered by id; `fail_node` makes every call against that
/// node error, which is how the tests exercise quorum and retry paths.
#[derive(Default)]
pub struct InMemoryCluster {
    stores: DashMap<NodeId, Arc<NodeStore>>,
    failed: DashMap<NodeId, ()>,
    /// Artificial per-call latency, for timeout tests
    latency: parking_lot::Mutex<Duration>,
}

impl InMemoryCluster {
    /// Empty fabric
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a node's backing store
    pub fn register(&self, node_id: NodeId) {
        self.stores.entry(node_id).or_default();
    }

    /// Make every call against this node fail
    pub fn fail_node(&self, node_id: NodeId) {
        self.failed.insert(node_id, ());
    }

    /// Restore a failed node
    pub fn heal_node(&self, node_id: &NodeId) {
        self.failed.remove(node_id);
    }

    /// Inject latency into every call
    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock() = latency;
    }

    /// Number of objects stored on a node
    #[must_use]
    pub fn object_count(&self, node_id: &NodeId) -> usize {
        self.stores
            .get(node_id)
            .map_or(0, |store| store.objects.len())
    }

    /// Number of shards stored on a node
    #[must_use]
    pub fn shard_count(&self, node_id: &NodeId) -> usize {
        self.stores
            .get(node_id)
            .map_or(0, |store| store.shards.len())
    }

    async fn store_for(&self, node: &Node) -> Result<Arc<NodeStore>> {
        let latency = *self.latency.lock();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        if self.failed.contains_key(&node.id) {
            return Err(Error::ConnectionFailed(format!("node {} unreachable", node.id)));
        }
        self.stores
            .get(&node.id)
            .map(|entry| Arc::clone(&entry))
            .ok_or_else(|| Error::NodeNotFound(node.id.to_string()))
    }
}

fn object_key(bucket: &str, key: &str) -> String {
    format!("{bucket}/{key}")
}

#[async_trait]
impl PeerClient for InMemoryCluster {
    async fn put_object(&self, node: &Node, bucket: &str, key: &str, data: Bytes, etag: &str) -> Result<()> {
        let store = self.store_for(node).await?;
        store
            .objects
            .insert(object_key(bucket, key), (data, etag.to_string()));
        Ok(())
    }

    async fn get_object(&self, node: &Node, bucket: &str, key: &str) -> Result<(Bytes, String)> {
        let store = self.store_for(node).await?;
        store
            .objects
            .get(&object_key(bucket, key))
            .map(|entry| entry.value().clone())
            .ok_or_else(|| Error::no_such_key(bucket, key))
    }

    async fn delete_object(&self, node: &Node, bucket: &str, key: &str) -> Result<()> {
        let store = self.store_for(node).await?;
        store.objects.remove(&object_key(bucket, key));
        Ok(())
    }

    async fn put_shard(&self, node: &Node, shard_id: &str, data: Bytes) -> Result<()> {
        let store = self.store_for(node).await?;
        store.shards.insert(shard_id.to_string(), data);
        Ok(())
    }

    async fn fetch_shard(&self, node: &Node, shard_id: &str) -> Result<Option<Bytes>> {
        let store = self.store_for(node).await?;
        Ok(store.shards.get(shard_id).map(|entry| entry.value().clone()))
    }

    async fn has_shard(&self, node: &Node, shard_id: &str) -> Result<bool> {
        let store = self.store_for(node).await?;
        Ok(store.shards.contains_key(shard_id))
    }

    async fn delete_shard(&self, node: &Node, shard_id: &str) -> Result<()> {
        let store = self.store_for(node).await?;
        store.shards.remove(shard_id);
        Ok(())
    }

    async fn list_shards(&self, node: &Node) -> Result<Vec<ShardInfo>> {
        let store = self.store_for(node).await?;
        let mut out: Vec<ShardInfo> = store
            .shards
            .iter()
            .map(|entry| ShardInfo {
                id: entry.key().clone(),
                size: entry.value().len() as u64,
            })
            .collect();
        out.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(out)
    }
}

/// In-process gossip mesh implementing [`GossipTransport`]
///
/// Memberships register their shared state under their gossip address;
/// `exchange` merges directly into the target and returns its snapshot.
#[derive(Default)]
pub struct InMemoryMesh {
    peers: DashMap<String, Arc<GossipState>>,
    partitioned: DashMap<String, ()>,
}

impl InMemoryMesh {
    /// Empty mesh
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a membership's state under its address
    pub fn register(&self, addr: String, state: Arc<GossipState>) {
        self.peers.insert(addr, state);
    }

    /// Drop every exchange to and from this address
    pub fn partition(&self, addr: &str) {
        self.partitioned.insert(addr.to_string(), ());
    }

    /// Heal a partition
    pub fn heal(&self, addr: &str) {
        self.partitioned.remove(addr);
    }
}

#[async_trait]
impl GossipTransport for InMemoryMesh {
    async fn exchange(&self, addr: &str, state: Vec<Node>) -> Result<Vec<Node>> {
        if self.partitioned.contains_key(addr) {
            return Err(Error::ConnectionFailed(format!("{addr} partitioned")));
        }
        let peer = self
            .peers
            .get(addr)
            .map(|entry| Arc::clone(&entry))
            .ok_or_else(|| Error::ConnectionFailed(format!("no peer at {addr}")))?;
        peer.merge(state);
        Ok(peer.snapshot())
    }
}

/// TCP push-pull transport: one length-prefixed bincode frame each way
pub struct TcpGossipTransport {
    connect_timeout: Duration,
}

impl TcpGossipTransport {
    /// Transport with the given connect/exchange timeout
    #[must_use]
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

impl Default for TcpGossipTransport {
    fn default() -> Self {
        Self::new(Duration::from_secs(5))
    }
}

async fn write_frame(stream: &mut TcpStream, nodes: &[Node]) -> Result<()> {
    let payload =
        bincode::serialize(nodes).map_err(|e| Error::Serialization(e.to_string()))?;
    stream.write_u32(payload.len() as u32).await?;
    stream.write_all(&payload).await?;
    stream.flush().await?;
    Ok(())
}

async fn read_frame(stream: &mut TcpStream) -> Result<Vec<Node>> {
    let len = stream.read_u32().await? as usize;
    if len > 64 * 1024 * 1024 {
        return Err(Error::MalformedRequest(format!("gossip frame of {len} bytes")));
    }
    let mut payload = vec![0u8; len];
    stream.read_exact(&mut payload).await?;
    bincode::deserialize(&payload).map_err(|e| Error::Serialization(e.to_string()))
}

#[async_trait]
impl GossipTransport for TcpGossipTransport {
    async fn exchange(&self, addr: &str, state: Vec<Node>) -> Result<Vec<Node>> {
        let exchange = async {
            let mut stream = TcpStream::connect(addr)
                .await
                .map_err(|e| Error::ConnectionFailed(format!("{addr}: {e}")))?;
            write_frame(&mut stream, &state).await?;
            read_frame(&mut stream).await
        };
        tokio::time::timeout(self.connect_timeout, exchange)
            .await
            .map_err(|_| Error::Timeout)?
    }
}

/// Serve push-pull exchanges for a membership over TCP
///
/// Accepts one frame per connection, merges it, answers with the local
/// snapshot. Checks the shutdown signal before every accept.
pub async fn serve_gossip(
    listener: tokio::net::TcpListener,
    state: Arc<GossipState>,
    mut shutdown: tokio::sync::watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    return;
                }
            }
            accepted = listener.accept() => {
                let Ok((mut stream, _)) = accepted else { continue };
                let state = Arc::clone(&state);
                tokio::spawn(async move {
                    if let Ok(remote) = read_frame(&mut stream).await {
                        state.merge(remote);
                        let _ = write_frame(&mut stream, &state.snapshot()).await;
                    }
                });
            }
        }
    }
}
