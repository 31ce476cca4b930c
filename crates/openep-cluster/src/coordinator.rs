//! Membership-to-ring coordinator
//!
//! Keeps the hash ring in step with the member set: alive members
//! contribute virtual points, dead and departed members are withdrawn.
//! The coordinator is the only writer to the ring; placement readers see
//! a consistent view through the ring's own lock.

use crate::membership::{Membership, MembershipEvent};
use crate::node::Node;
use openep_common::NodeState;
use openep_ring::HashRing;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Applies membership changes to the ring
pub struct RingCoordinator {
    ring: Arc<HashRing>,
    membership: Arc<Membership>,
    shutdown_tx: watch::Sender<bool>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl RingCoordinator {
    /// Build a coordinator over the shared ring and membership
    #[must_use]
    pub fn new(ring: Arc<HashRing>, membership: Arc<Membership>) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            ring,
            membership,
            shutdown_tx,
            task: Mutex::new(None),
        }
    }

    fn apply(ring: &HashRing, node: &Node) {
        match node.state {
            NodeState::Alive | NodeState::Suspect => ring.add_node(node.id),
            NodeState::Dead | NodeState::Left => ring.remove_node(&node.id),
        }
    }

    /// Seed the ring from the current member set
    pub fn sync_now(&self) {
        for node in self.membership.members() {
            Self::apply(&self.ring, &node);
        }
        debug!(nodes = self.ring.node_count(), "ring synchronized with membership");
    }

    /// Consume the membership event stream and start applying it
    ///
    /// Takes the stream from the membership; returns false when another
    /// consumer already took it.
    pub fn start(&self) -> bool {
        let Some(events) = self.membership.events() else {
            warn!("membership event stream already taken");
            return false;
        };
        self.sync_now();
        self.spawn(events);
        true
    }

    /// Start from an explicitly provided event stream
    pub fn start_with_events(&self, events: mpsc::Receiver<MembershipEvent>) {
        self.sync_now();
        self.spawn(events);
    }

    fn spawn(&self, mut events: mpsc::Receiver<MembershipEvent>) {
        let ring = Arc::clone(&self.ring);
        let mut shutdown = self.shutdown_tx.subscribe();
        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.changed() => {
                        if *shutdown.borrow() {
                            debug!("ring coordinator stopping");
                            return;
                        }
                    }
                    event = events.recv() => {
                        let Some(event) = event else {
                            debug!("membership event stream closed");
                            return;
                        };
                        match event {
                            MembershipEvent::Joined(node) | MembershipEvent::Updated(node) => {
                                Self::apply(&ring, &node);
                            }
                            MembershipEvent::Left(node) => {
                                ring.remove_node(&node.id);
                            }
                        }
                    }
                }
            }
        });
        *self.task.lock() = Some(task);
        info!("ring coordinator started");
    }

    /// Stop applying events
    pub async fn stop(&self) {
        let _ = self.shutdown_tx.send(true);
        if let Some(task) = self.task.lock().take() {
            let _ = task.await;
        }
        info!("ring coordinator stopped");
    }
}
