//! N-way replication over ring-selected nodes
//!
//! A write fans out to the N distinct owners the ring reports for the
//! key, with bounded concurrency and a per-destination timeout, and
//! succeeds once the quorum of ⌈N/2⌉+1 acknowledgements (capped at N) is
//! in. Laggards are left to the rebalancer's reconciliation. A read walks
//! the owner list in placement order and returns the first response whose
//! ETag matches the expected value.

use crate::membership::Membership;
use crate::node::Node;
use crate::transport::PeerClient;
use bytes::Bytes;
use futures::stream::{FuturesUnordered, StreamExt};
use openep_common::{Error, NodeId, Result};
use openep_ring::HashRing;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Replication tuning
#[derive(Clone, Debug)]
pub struct ReplicatorConfig {
    /// Number of distinct nodes holding each key
    pub replication_factor: usize,
    /// Per-destination timeout
    pub per_node_timeout: Duration,
    /// Bounded fan-out width
    pub max_concurrent: usize,
}

impl Default for ReplicatorConfig {
    fn default() -> Self {
        Self {
            replication_factor: 3,
            per_node_timeout: Duration::from_secs(5),
            max_concurrent: 8,
        }
    }
}

/// Acknowledgement tally of a replicated write
#[derive(Clone, Debug)]
pub struct ReplicaWriteReport {
    /// Nodes that acknowledged
    pub acks: Vec<NodeId>,
    /// Nodes that failed or timed out
    pub failures: Vec<NodeId>,
    /// Quorum that was required
    pub required: usize,
}

/// Quorum for `n` replicas: ⌈n/2⌉+1, capped at n
#[must_use]
pub fn write_quorum(n: usize) -> usize {
    (n.div_ceil(2) + 1).min(n)
}

/// Replicates whole objects across the ring's owners
pub struct Replicator {
    ring: Arc<HashRing>,
    membership: Arc<Membership>,
    client: Arc<dyn PeerClient>,
    config: ReplicatorConfig,
}

impl Replicator {
    /// Build a replicator over the shared ring, membership and transport
    #[must_use]
    pub fn new(
        ring: Arc<HashRing>,
        membership: Arc<Membership>,
        client: Arc<dyn PeerClient>,
        config: ReplicatorConfig,
    ) -> Self {
        Self {
            ring,
            membership,
            client,
            config,
        }
    }

    fn placement_key(bucket: &str, key: &str) -> String {
        format!("{bucket}/{key}")
    }

    /// The nodes responsible for a key, in placement order
    fn owners(&self, bucket: &str, key: &str) -> Result<Vec<Node>> {
        let ids = self
            .ring
            .get_nodes(&Self::placement_key(bucket, key), self.config.replication_factor);
        if ids.is_empty() {
            return Err(Error::NodeNotFound("ring has no nodes".to_string()));
        }
        Ok(ids
            .into_iter()
            .filter_map(|id| self.membership.get_member(&id))
            .collect())
    }

    /// Write a key to its N owners; succeeds at quorum
    pub async fn write(
        &self,
        bucket: &str,
        key: &str,
        data: Bytes,
        etag: &str,
    ) -> Result<ReplicaWriteReport> {
        let owners = self.owners(bucket, key)?;
        let required = write_quorum(owners.len());

        let mut pending = FuturesUnordered::new();
        let mut queue = owners.into_iter();
        let mut acks = Vec::new();
        let mut failures = Vec::new();

        loop {
            while pending.len() < self.config.max_concurrent {
                let Some(node) = queue.next() else { break };
                let client = Arc::clone(&self.client);
                let data = data.clone();
                let etag = etag.to_string();
                let bucket = bucket.to_string();
                let key = key.to_string();
                let timeout = self.config.per_node_timeout;
                pending.push(async move {
                    let result = tokio::time::timeout(
                        timeout,
                        client.put_object(&node, &bucket, &key, data, &etag),
                    )
                    .await;
                    match result {
                        Ok(Ok(())) => (node.id, None),
                        Ok(Err(e)) => (node.id, Some(e)),
                        Err(_) => (node.id, Some(Error::Timeout)),
                    }
                });
            }
            let Some((node_id, outcome)) = pending.next().await else {
                break;
            };
            match outcome {
                None => acks.push(node_id),
                Some(e) => {
                    warn!(node = %node_id, bucket, key, error = %e, "replica write failed");
                    failures.push(node_id);
                }
            }
        }

        if acks.len() < required {
            return Err(Error::QuorumNotReached {
                acks: acks.len(),
                required,
            });
        }
        debug!(bucket, key, acks = acks.len(), "replicated write committed");
        Ok(ReplicaWriteReport {
            acks,
            failures,
            required,
        })
    }

    /// Read a key from its owners, first verified response wins
    pub async fn read(&self, bucket: &str, key: &str, expected_etag: Option<&str>) -> Result<Bytes> {
        let owners = self.owners(bucket, key)?;
        let mut last_error = Error::no_such_key(bucket, key);

        for node in owners {
            let attempt = tokio::time::timeout(
                self.config.per_node_timeout,
                self.client.get_object(&node, bucket, key),
            )
            .await;
            match attempt {
                Ok(Ok((data, etag))) => {
                    if let Some(expected) = expected_etag {
                        if etag != expected {
                            warn!(node = %node.id, bucket, key, "replica etag mismatch, trying next owner");
                            last_error = Error::internal(format!(
                                "replica on {} returned etag {etag}, expected {expected}",
                                node.id
                            ));
                            continue;
                        }
                    }
                    return Ok(data);
                }
                Ok(Err(e)) => last_error = e,
                Err(_) => last_error = Error::Timeout,
            }
        }
        Err(last_error)
    }

    /// Delete a key from its owners; succeeds at quorum
    pub async fn delete(&self, bucket: &str, key: &str) -> Result<ReplicaWriteReport> {
        let owners = self.owners(bucket, key)?;
        let required = write_quorum(owners.len());
        let mut acks = Vec::new();
        let mut failures = Vec::new();

        for node in owners {
            let attempt = tokio::time::timeout(
                self.config.per_node_timeout,
                self.client.delete_object(&node, bucket, key),
            )
            .await;
            match attempt {
                Ok(Ok(())) => acks.push(node.id),
                Ok(Err(e)) => {
                    warn!(node = %node.id, bucket, key, error = %e, "replica delete failed");
                    failures.push(node.id);
                }
                Err(_) => failures.push(node.id),
            }
        }

        if acks.len() < required {
            return Err(Error::QuorumNotReached {
                acks: acks.len(),
                required,
            });
        }
        Ok(ReplicaWriteReport {
            acks,
            failures,
            required,
        })
    }
}
