//! Erasure-coded object placement
//!
//! Encodes an object into k+m shards and places them on ring-selected
//! nodes; position i goes to owner i modulo the distinct owners available,
//! so small clusters hold several positions per node. A read fetches
//! whatever shards answer and decodes once k are in hand; `repair`
//! reconstructs and re-places missing shards.

use crate::membership::Membership;
use crate::node::Node;
use crate::transport::PeerClient;
use bytes::Bytes;
use futures::stream::{FuturesUnordered, StreamExt};
use openep_common::{Error, NodeId, Result};
use openep_erasure::{ErasureCoder, ErasureProfile};
use openep_ring::HashRing;
use std::sync::Arc;
use tracing::{debug, warn};

/// Where one shard position was placed
#[derive(Clone, Debug)]
pub struct ShardPlacement {
    /// Shard identifier (also its ring placement key)
    pub shard_id: String,
    /// Position within the stripe (0..k-1 data, k..k+m-1 parity)
    pub position: u8,
    /// Node holding the shard
    pub node: NodeId,
}

/// Erasure-coded store over the cluster transport
pub struct ErasureStore {
    ring: Arc<HashRing>,
    membership: Arc<Membership>,
    client: Arc<dyn PeerClient>,
    coder: ErasureCoder,
}

impl ErasureStore {
    /// Build a store for one erasure profile
    pub fn new(
        ring: Arc<HashRing>,
        membership: Arc<Membership>,
        client: Arc<dyn PeerClient>,
        profile: ErasureProfile,
    ) -> Result<Self> {
        Ok(Self {
            ring,
            membership,
            client,
            coder: ErasureCoder::new(profile)?,
        })
    }

    /// Shard identifier for one position of one object
    #[must_use]
    pub fn shard_id(bucket: &str, key: &str, position: u8) -> String {
        format!("{bucket}/{key}/{position}")
    }

    /// The node responsible for each shard position
    fn placements(&self, bucket: &str, key: &str) -> Result<Vec<(u8, Node)>> {
        let total = self.coder.total_shards();
        let owner_ids = self
            .ring
            .get_nodes(&format!("{bucket}/{key}"), total);
        if owner_ids.is_empty() {
            return Err(Error::NodeNotFound("ring has no nodes".to_string()));
        }
        let owners: Vec<Node> = owner_ids
            .iter()
            .filter_map(|id| self.membership.get_member(id))
            .collect();
        if owners.is_empty() {
            return Err(Error::NodeNotFound("no known owners".to_string()));
        }

        Ok((0..total)
            .map(|position| (position as u8, owners[position % owners.len()].clone()))
            .collect())
    }

    /// Encode and place an object's shards; tolerates up to m placement
    /// failures
    pub async fn write(&self, bucket: &str, key: &str, data: &[u8]) -> Result<Vec<ShardPlacement>> {
        let shards = self.coder.encode(data)?;
        let targets = self.placements(bucket, key)?;

        let mut pending = FuturesUnordered::new();
        for ((position, node), shard) in targets.into_iter().zip(shards) {
            let client = Arc::clone(&self.client);
            let shard_id = Self::shard_id(bucket, key, position);
            pending.push(async move {
                let outcome = client
                    .put_shard(&node, &shard_id, Bytes::from(shard))
                    .await;
                (position, node.id, shard_id, outcome)
            });
        }

        let mut placed = Vec::new();
        let mut failed = 0usize;
        while let Some((position, node, shard_id, outcome)) = pending.next().await {
            match outcome {
                Ok(()) => placed.push(ShardPlacement {
                    shard_id,
                    position,
                    node,
                }),
                Err(e) => {
                    warn!(shard = shard_id, node = %node, error = %e, "shard placement failed");
                    failed += 1;
                }
            }
        }

        if placed.len() < self.coder.data_shards() {
            return Err(Error::InsufficientShards {
                available: placed.len(),
                required: self.coder.data_shards(),
            });
        }
        if failed > 0 {
            debug!(bucket, key, failed, "object stored with degraded parity");
        }
        placed.sort_by_key(|p| p.position);
        Ok(placed)
    }

    /// Collect whatever shards answer, position-indexed
    async fn gather(&self, bucket: &str, key: &str) -> Result<Vec<Option<Vec<u8>>>> {
        let targets = self.placements(bucket, key)?;
        let mut slots: Vec<Option<Vec<u8>>> = vec![None; self.coder.total_shards()];

        let mut pending = FuturesUnordered::new();
        for (position, node) in targets {
            let client = Arc::clone(&self.client);
            let shard_id = Self::shard_id(bucket, key, position);
            pending.push(async move {
                let outcome = client.fetch_shard(&node, &shard_id).await;
                (position, outcome)
            });
        }
        while let Some((position, outcome)) = pending.next().await {
            match outcome {
                Ok(Some(data)) => slots[position as usize] = Some(data.to_vec()),
                Ok(None) => {}
                Err(e) => debug!(position, error = %e, "shard fetch failed"),
            }
        }
        Ok(slots)
    }

    /// Read an object back from any k of its shards
    pub async fn read(&self, bucket: &str, key: &str, original_len: usize) -> Result<Vec<u8>> {
        let mut slots = self.gather(bucket, key).await?;
        self.coder.decode(&mut slots, original_len)
    }

    /// Reconstruct and re-place missing shards; returns how many were
    /// repaired
    pub async fn repair(&self, bucket: &str, key: &str) -> Result<usize> {
        let mut slots = self.gather(bucket, key).await?;
        let missing: Vec<usize> = slots
            .iter()
            .enumerate()
            .filter_map(|(i, slot)| slot.is_none().then_some(i))
            .collect();
        if missing.is_empty() {
            return Ok(0);
        }

        self.coder.reconstruct(&mut slots)?;
        let targets = self.placements(bucket, key)?;
        let mut repaired = 0;
        for position in missing {
            let Some((_, node)) = targets.iter().find(|(p, _)| *p as usize == position) else {
                continue;
            };
            let Some(shard) = &slots[position] else { continue };
            let shard_id = Self::shard_id(bucket, key, position as u8);
            self.client
                .put_shard(node, &shard_id, Bytes::from(shard.clone()))
                .await?;
            repaired += 1;
        }
        debug!(bucket, key, repaired, "erasure repair finished");
        Ok(repaired)
    }

    /// Remove every shard of an object
    pub async fn delete(&self, bucket: &str, key: &str) -> Result<()> {
        for (position, node) in self.placements(bucket, key)? {
            let shard_id = Self::shard_id(bucket, key, position);
            if let Err(e) = self.client.delete_shard(&node, &shard_id).await {
                warn!(shard = shard_id, error = %e, "shard delete failed");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{GossipTransport, InMemoryCluster, InMemoryMesh};
    use openep_common::ClusterConfig;

    fn cluster(node_count: usize) -> (Arc<HashRing>, Arc<Membership>, Arc<InMemoryCluster>) {
        let mesh = Arc::new(InMemoryMesh::new());
        let ring = Arc::new(HashRing::new());
        let fabric = Arc::new(InMemoryCluster::new());

        let seed = Membership::new(
            ClusterConfig {
                bind_port: 9000,
                ..Default::default()
            },
            Arc::clone(&mesh) as Arc<dyn GossipTransport>,
            None,
        );
        ring.add_node(seed.local_node().id);
        fabric.register(seed.local_node().id);

        let mut others = Vec::new();
        for i in 1..node_count {
            let m = Membership::new(
                ClusterConfig {
                    bind_port: 9000 + i as u16,
                    ..Default::default()
                },
                Arc::clone(&mesh) as Arc<dyn GossipTransport>,
                None,
            );
            let node = m.local_node();
            ring.add_node(node.id);
            fabric.register(node.id);
            others.push(node);
        }
        seed.state().merge(others);
        (ring, Arc::new(seed), fabric)
    }

    fn store(
        ring: &Arc<HashRing>,
        membership: &Arc<Membership>,
        fabric: &Arc<InMemoryCluster>,
    ) -> ErasureStore {
        ErasureStore::new(
            Arc::clone(ring),
            Arc::clone(membership),
            Arc::clone(fabric) as Arc<dyn PeerClient>,
            ErasureProfile::EC_4_2,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_write_places_all_shards() {
        let (ring, membership, fabric) = cluster(6);
        let store = store(&ring, &membership, &fabric);

        let data = vec![42u8; 5000];
        let placements = store.write("docs", "ec-object", &data).await.unwrap();
        assert_eq!(placements.len(), 6);

        let read_back = store.read("docs", "ec-object", data.len()).await.unwrap();
        assert_eq!(read_back, data);
    }

    #[tokio::test]
    async fn test_read_survives_m_node_losses() {
        let (ring, membership, fabric) = cluster(6);
        let store = store(&ring, &membership, &fabric);

        let data = b"erasure coded payload that outlives two node failures".to_vec();
        let placements = store.write("docs", "k", &data).await.unwrap();

        // Knock out the nodes holding two positions
        fabric.fail_node(placements[0].node);
        let second_node = placements
            .iter()
            .map(|p| p.node)
            .find(|n| *n != placements[0].node);
        if let Some(node) = second_node {
            fabric.fail_node(node);
        }

        let read_back = store.read("docs", "k", data.len()).await.unwrap();
        assert_eq!(read_back, data);
    }

    #[tokio::test]
    async fn test_read_fails_below_k() {
        let (ring, membership, fabric) = cluster(2);
        let store = store(&ring, &membership, &fabric);

        let data = b"two nodes hold three positions each".to_vec();
        store.write("docs", "k", &data).await.unwrap();

        // With every node down no shard answers at all
        let members = membership.members();
        for node in &members {
            fabric.fail_node(node.id);
        }
        assert!(store.read("docs", "k", data.len()).await.is_err());
    }

    #[tokio::test]
    async fn test_repair_restores_missing_shards() {
        let (ring, membership, fabric) = cluster(6);
        let store = store(&ring, &membership, &fabric);

        let data = vec![7u8; 4096];
        let placements = store.write("docs", "k", &data).await.unwrap();

        // Drop two shards outright
        for placement in placements.iter().take(2) {
            let node = membership.get_member(&placement.node).unwrap();
            fabric
                .delete_shard(&node, &placement.shard_id)
                .await
                .unwrap();
        }

        assert_eq!(store.repair("docs", "k").await.unwrap(), 2);
        assert_eq!(store.repair("docs", "k").await.unwrap(), 0);
        assert_eq!(store.read("docs", "k", data.len()).await.unwrap(), data);
    }

    #[tokio::test]
    async fn test_delete_removes_shards() {
        let (ring, membership, fabric) = cluster(3);
        let store = store(&ring, &membership, &fabric);

        store.write("docs", "k", b"short lived").await.unwrap();
        store.delete("docs", "k").await.unwrap();

        let total: usize = membership
            .members()
            .iter()
            .map(|node| fabric.shard_count(&node.id))
            .sum();
        assert_eq!(total, 0);
    }
}
