//! Shard rebalancer
//!
//! Observes the ring and the members' shard inventories and moves every
//! shard that is no longer held by its ring owner back onto it, with
//! bounded concurrency and optional byte-rate throttling. The rebalancer
//! never mutates the ring; a failed move leaves the source holding the
//! shard, and completing a move that already happened is a no-op.

use crate::membership::Membership;
use crate::transport::PeerClient;
use dashmap::DashMap;
use futures::stream::{self, StreamExt};
use openep_common::{NodeId, RebalanceConfig, Result};
use openep_ring::HashRing;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

/// Lifecycle of one shard move
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MoveStatus {
    /// Scheduled, not yet running
    Pending,
    /// Transfer in flight
    Running,
    /// Shard is on the target and gone from the source
    Complete,
    /// Transfer failed; the source retains the shard
    Failed,
    /// Cancelled before completion
    Cancelled,
}

impl MoveStatus {
    /// Whether this status is terminal
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete | Self::Failed | Self::Cancelled)
    }
}

/// One pending or finished shard move
#[derive(Clone, Debug)]
pub struct RebalanceOperation {
    /// Operation identifier
    pub id: String,
    /// Shard being moved
    pub shard_id: String,
    /// Node currently holding the shard
    pub source: NodeId,
    /// Ring owner the shard moves to
    pub target: NodeId,
    /// Current status
    pub status: MoveStatus,
    /// Progress in 0..1
    pub progress: f64,
    /// Start time, seconds since epoch
    pub started_at: Option<u64>,
    /// Completion time, seconds since epoch
    pub completed_at: Option<u64>,
    /// Failure detail
    pub error: Option<String>,
}

/// Point-in-time rebalancer report
#[derive(Clone, Debug)]
pub struct RebalancerStatus {
    /// Whether move execution is paused
    pub paused: bool,
    /// Largest per-node deviation from the mean virtual-point count,
    /// as a fraction of the mean
    pub imbalance: f64,
    /// Known operations, pending and retained-terminal alike
    pub operations: Vec<RebalanceOperation>,
}

/// Moves shards back onto their ring owners
pub struct Rebalancer {
    ring: Arc<HashRing>,
    membership: Arc<Membership>,
    client: Arc<dyn PeerClient>,
    config: RebalanceConfig,
    operations: DashMap<String, RebalanceOperation>,
    excluded: DashMap<NodeId, ()>,
    paused: AtomicBool,
    shutdown_tx: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Rebalancer {
    /// Build a rebalancer over the shared ring, membership and transport
    #[must_use]
    pub fn new(
        ring: Arc<HashRing>,
        membership: Arc<Membership>,
        client: Arc<dyn PeerClient>,
        config: RebalanceConfig,
    ) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            ring,
            membership,
            client,
            config,
            operations: DashMap::new(),
            excluded: DashMap::new(),
            paused: AtomicBool::new(false),
            shutdown_tx,
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Largest deviation from the mean virtual-point count, as a fraction
    /// of the mean
    #[must_use]
    pub fn imbalance(&self) -> f64 {
        let distribution = self.ring.node_distribution();
        if distribution.is_empty() {
            return 0.0;
        }
        let mean = distribution.values().sum::<usize>() as f64 / distribution.len() as f64;
        if mean == 0.0 {
            return 0.0;
        }
        distribution
            .values()
            .map(|&count| (count as f64 - mean).abs() / mean)
            .fold(0.0, f64::max)
    }

    /// Exclude a node from being a move target
    pub fn exclude_node(&self, node: NodeId) {
        self.excluded.insert(node, ());
    }

    /// Allow a previously excluded node again
    pub fn include_node(&self, node: &NodeId) {
        self.excluded.remove(node);
    }

    /// Stop executing moves (planning state is kept)
    pub fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
        info!("rebalancer paused");
    }

    /// Resume executing moves
    pub fn resume(&self) {
        self.paused.store(false, Ordering::SeqCst);
        info!("rebalancer resumed");
    }

    /// Whether move execution is paused
    #[must_use]
    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    /// Cancel a pending or running move; returns whether anything changed
    pub fn cancel(&self, op_id: &str) -> bool {
        match self.operations.get_mut(op_id) {
            Some(mut op) if !op.status.is_terminal() => {
                op.status = MoveStatus::Cancelled;
                op.completed_at = Some(now_secs());
                true
            }
            _ => false,
        }
    }

    /// Current status report
    #[must_use]
    pub fn status(&self) -> RebalancerStatus {
        let mut operations: Vec<RebalanceOperation> = self
            .operations
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        operations.sort_by(|a, b| a.id.cmp(&b.id));
        RebalancerStatus {
            paused: self.is_paused(),
            imbalance: self.imbalance(),
            operations,
        }
    }

    /// Drop terminal operations from the report; returns how many
    pub fn clear_finished(&self) -> usize {
        let before = self.operations.len();
        self.operations.retain(|_, op| !op.status.is_terminal());
        before - self.operations.len()
    }

    /// Plan moves for every shard not held by its ring owner
    async fn plan(&self) -> Vec<RebalanceOperation> {
        let mut planned = Vec::new();
        for node in self.membership.alive_members() {
            let shards = match self.client.list_shards(&node).await {
                Ok(shards) => shards,
                Err(e) => {
                    debug!(node = %node.id, error = %e, "inventory scan failed");
                    continue;
                }
            };
            for shard in shards {
                let Some(owner) = self.ring.get_node(&shard.id) else {
                    continue;
                };
                if owner == node.id || self.excluded.contains_key(&owner) {
                    continue;
                }
                // One open operation per shard at a time
                let already_open = self
                    .operations
                    .iter()
                    .any(|entry| entry.shard_id == shard.id && !entry.status.is_terminal());
                if already_open {
                    continue;
                }
                planned.push(RebalanceOperation {
                    id: Uuid::new_v4().to_string(),
                    shard_id: shard.id,
                    source: node.id,
                    target: owner,
                    status: MoveStatus::Pending,
                    progress: 0.0,
                    started_at: None,
                    completed_at: None,
                    error: None,
                });
            }
        }
        planned
    }

    /// Plan and execute one rebalance pass; returns the operation ids it
    /// scheduled
    pub async fn scan(&self) -> Result<Vec<String>> {
        if self.is_paused() {
            return Ok(Vec::new());
        }

        let planned = self.plan().await;
        if planned.is_empty() {
            return Ok(Vec::new());
        }
        info!(moves = planned.len(), "rebalance pass scheduled");

        let ids: Vec<String> = planned.iter().map(|op| op.id.clone()).collect();
        for op in planned {
            self.operations.insert(op.id.clone(), op);
        }

        stream::iter(ids.clone())
            .for_each_concurrent(self.config.max_concurrent_moves.max(1), |op_id| async move {
                self.execute_move(&op_id).await;
            })
            .await;
        Ok(ids)
    }

    async fn execute_move(&self, op_id: &str) {
        let Some((shard_id, source, target)) = self.operations.get_mut(op_id).and_then(|mut op| {
            if op.status != MoveStatus::Pending {
                return None;
            }
            op.status = MoveStatus::Running;
            op.started_at = Some(now_secs());
            Some((op.shard_id.clone(), op.source, op.target))
        }) else {
            return;
        };

        let outcome = self.transfer(&shard_id, &source, &target).await;
        if let Some(mut op) = self.operations.get_mut(op_id) {
            // A cancel that raced the transfer wins the status
            if op.status == MoveStatus::Cancelled {
                return;
            }
            op.completed_at = Some(now_secs());
            match outcome {
                Ok(()) => {
                    op.status = MoveStatus::Complete;
                    op.progress = 1.0;
                }
                Err(e) => {
                    warn!(shard = %op.shard_id, error = %e, "shard move failed");
                    op.status = MoveStatus::Failed;
                    op.error = Some(e.to_string());
                }
            }
        }
    }

    async fn transfer(&self, shard_id: &str, source: &NodeId, target: &NodeId) -> Result<()> {
        let source_node = self
            .membership
            .get_member(source)
            .ok_or_else(|| openep_common::Error::NodeNotFound(source.to_string()))?;
        let target_node = self
            .membership
            .get_member(target)
            .ok_or_else(|| openep_common::Error::NodeNotFound(target.to_string()))?;

        // Completing a move that already happened is a no-op
        if self.client.has_shard(&target_node, shard_id).await? {
            let _ = self.client.delete_shard(&source_node, shard_id).await;
            return Ok(());
        }

        let Some(data) = self.client.fetch_shard(&source_node, shard_id).await? else {
            return Err(openep_common::Error::internal(format!(
                "shard {shard_id} vanished from source"
            )));
        };

        if self.config.throttle_bytes_per_sec > 0 {
            let secs = data.len() as f64 / self.config.throttle_bytes_per_sec as f64;
            tokio::time::sleep(Duration::from_secs_f64(secs)).await;
        }

        if let Some(mut op) = self
            .operations
            .iter_mut()
            .find(|entry| entry.shard_id == shard_id && entry.status == MoveStatus::Running)
        {
            op.progress = 0.5;
        }

        self.client.put_shard(&target_node, shard_id, data).await?;
        if let Err(e) = self.client.delete_shard(&source_node, shard_id).await {
            warn!(shard = shard_id, error = %e, "source cleanup failed after move");
        }
        Ok(())
    }

    /// Start the periodic checker
    pub async fn start(self: &Arc<Self>) {
        let interval = Duration::from_secs(self.config.check_interval.max(1));
        let this = Arc::clone(self);
        let mut shutdown = self.shutdown_tx.subscribe();
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = shutdown.changed() => {
                        if *shutdown.borrow() {
                            debug!("rebalance checker stopping");
                            return;
                        }
                    }
                    _ = ticker.tick() => {
                        if this.is_paused() {
                            continue;
                        }
                        if let Err(e) = this.scan().await {
                            warn!(error = %e, "rebalance pass failed");
                        }
                    }
                }
            }
        });
        self.tasks.lock().push(task);
        info!("rebalancer started");
    }

    /// Stop the periodic checker
    pub async fn stop(&self) {
        let _ = self.shutdown_tx.send(true);
        let tasks: Vec<_> = self.tasks.lock().drain(..).collect();
        for task in tasks {
            let _ = task.await;
        }
        info!("rebalancer stopped");
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

    fn rebalancer(
        ring: &Arc<HashRing>,
        membership: &Arc<Membership>,
        fabric: &Arc<InMemoryCluster>,
    ) -> Arc<Rebalancer> {
        Arc::new(Rebalancer::new(
            Arc::clone(ring),
            Arc::clone(membership),
            Arc::clone(fabric) as Arc<dyn PeerClient>,
            RebalanceConfig {
                check_interval: 1,
                ..Default::default()
            },
        ))
    }

    /// Put a shard on some node that is NOT its ring owner
    async fn misplace(
        membership: &Arc<Membership>,
        fabric: &Arc<InMemoryCluster>,
        ring: &Arc<HashRing>,
        shard_id: &str,
    ) -> (NodeId, NodeId) {
        let owner = ring.get_node(shard_id).unwrap();
        let holder = membership
            .members()
            .into_iter()
            .find(|node| node.id != owner)
            .unwrap();
        fabric
            .put_shard(&holder, shard_id, bytes::Bytes::from_static(b"shard-bytes"))
            .await
            .unwrap();
        (holder.id, owner)
    }

    #[tokio::test]
    async fn test_scan_moves_misplaced_shard_to_owner() {
        let (ring, membership, fabric) = cluster(3);
        let rebalancer = rebalancer(&ring, &membership, &fabric);

        let (holder, owner) = misplace(&membership, &fabric, &ring, "docs/a/0").await;
        let ids = rebalancer.scan().await.unwrap();
        assert_eq!(ids.len(), 1);

        let status = rebalancer.status();
        assert_eq!(status.operations.len(), 1);
        assert_eq!(status.operations[0].status, MoveStatus::Complete);
        assert!((status.operations[0].progress - 1.0).abs() < f64::EPSILON);

        assert_eq!(fabric.shard_count(&holder), 0);
        assert_eq!(fabric.shard_count(&owner), 1);

        // Converged: the next pass schedules nothing
        assert!(rebalancer.scan().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_move_is_idempotent_when_target_has_shard() {
        let (ring, membership, fabric) = cluster(3);
        let rebalancer = rebalancer(&ring, &membership, &fabric);

        let (holder, owner) = misplace(&membership, &fabric, &ring, "docs/b/0").await;
        let owner_node = membership.get_member(&owner).unwrap();
        fabric
            .put_shard(&owner_node, "docs/b/0", bytes::Bytes::from_static(b"shard-bytes"))
            .await
            .unwrap();

        rebalancer.scan().await.unwrap();
        assert_eq!(fabric.shard_count(&holder), 0);
        assert_eq!(fabric.shard_count(&owner), 1);
        assert_eq!(
            rebalancer.status().operations[0].status,
            MoveStatus::Complete
        );
    }

    #[tokio::test]
    async fn test_failed_move_leaves_source_intact() {
        let (ring, membership, fabric) = cluster(3);
        let rebalancer = rebalancer(&ring, &membership, &fabric);

        let (holder, owner) = misplace(&membership, &fabric, &ring, "docs/c/0").await;
        fabric.fail_node(owner);

        rebalancer.scan().await.unwrap();
        let status = rebalancer.status();
        assert_eq!(status.operations[0].status, MoveStatus::Failed);
        assert!(status.operations[0].error.is_some());
        assert_eq!(fabric.shard_count(&holder), 1);

        // Healing the target lets a retry pass converge
        fabric.heal_node(&owner);
        rebalancer.scan().await.unwrap();
        assert_eq!(fabric.shard_count(&holder), 0);
        assert_eq!(fabric.shard_count(&owner), 1);
    }

    #[tokio::test]
    async fn test_pause_blocks_scans() {
        let (ring, membership, fabric) = cluster(3);
        let rebalancer = rebalancer(&ring, &membership, &fabric);

        let (holder, _) = misplace(&membership, &fabric, &ring, "docs/d/0").await;
        rebalancer.pause();
        assert!(rebalancer.scan().await.unwrap().is_empty());
        assert_eq!(fabric.shard_count(&holder), 1);

        rebalancer.resume();
        assert_eq!(rebalancer.scan().await.unwrap().len(), 1);
        assert_eq!(fabric.shard_count(&holder), 0);
    }

    #[tokio::test]
    async fn test_excluded_target_is_skipped() {
        let (ring, membership, fabric) = cluster(3);
        let rebalancer = rebalancer(&ring, &membership, &fabric);

        let (_, owner) = misplace(&membership, &fabric, &ring, "docs/e/0").await;
        rebalancer.exclude_node(owner);
        assert!(rebalancer.scan().await.unwrap().is_empty());

        rebalancer.include_node(&owner);
        assert_eq!(rebalancer.scan().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_status_retention_and_cleanup() {
        let (ring, membership, fabric) = cluster(3);
        let rebalancer = rebalancer(&ring, &membership, &fabric);

        misplace(&membership, &fabric, &ring, "docs/f/0").await;
        rebalancer.scan().await.unwrap();

        // Terminal operations stay visible until explicitly cleared
        assert_eq!(rebalancer.status().operations.len(), 1);
        assert_eq!(rebalancer.clear_finished(), 1);
        assert!(rebalancer.status().operations.is_empty());

        assert!(!rebalancer.cancel("no-such-op"));
    }

    #[tokio::test]
    async fn test_balanced_ring_reports_no_imbalance() {
        let (ring, membership, fabric) = cluster(4);
        let rebalancer = rebalancer(&ring, &membership, &fabric);
        assert!(rebalancer.imbalance() < 1e-9);
        assert!(!rebalancer.is_paused());
        let _ = membership;
    }

    #[tokio::test]
    async fn test_background_checker_runs_and_stops() {
        let (ring, membership, fabric) = cluster(3);
        let rebalancer = rebalancer(&ring, &membership, &fabric);

        let (holder, _) = misplace(&membership, &fabric, &ring, "docs/g/0").await;
        rebalancer.start().await;
        // First tick fires immediately
        tokio::time::sleep(Duration::from_millis(100)).await;
        rebalancer.stop().await;

        assert_eq!(fabric.shard_count(&holder), 0);
    }
}
