//! Gossip-based cluster membership
//!
//! Full-state push-pull gossip over the [`crate::transport::GossipTransport`]
//! seam. Every node keeps a map of member records versioned by per-node
//! incarnation numbers; a merge keeps the higher incarnation, breaking ties
//! toward the more terminal lifecycle state and the fresher last-seen
//! timestamp. A node that hears itself reported suspect or dead refutes by
//! bumping its own incarnation.
//!
//! Joins, leaves and updates surface both through the optional
//! [`NodeDelegate`] callbacks and as [`MembershipEvent`]s on a bounded
//! queue; when the queue is full, events are dropped and logged rather
//! than buffered without bound.

use crate::node::{state_precedence, Node};
use crate::transport::GossipTransport;
use openep_common::{ClusterConfig, NodeId, NodeState, Result};
use parking_lot::{Mutex, RwLock};
use rand::seq::SliceRandom;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Capacity of the membership event queue
pub const EVENT_QUEUE_CAPACITY: usize = 100;

/// Gossip protocol version spoken by this build
pub const PROTOCOL_VERSION: u32 = 1;

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

/// A membership change observed by this node
#[derive(Clone, Debug)]
pub enum MembershipEvent {
    /// A node joined (or was first learned about)
    Joined(Node),
    /// A node left voluntarily
    Left(Node),
    /// A node's state, metadata or liveness changed
    Updated(Node),
}

/// Callbacks into the embedding application
///
/// `local_metadata` is polled on every probe tick and gossiped to peers;
/// the notify hooks mirror the event queue for callers that prefer a
/// synchronous delegate over a channel.
pub trait NodeDelegate: Send + Sync {
    /// Serialized local metadata to gossip
    fn local_metadata(&self) -> Vec<u8>;

    /// A node joined
    fn notify_join(&self, _node: &Node) {}

    /// A node left
    fn notify_leave(&self, _node: &Node) {}

    /// A node changed
    fn notify_update(&self, _node: &Node) {}
}

/// Shared gossip state: the member map plus event fan-out
pub struct GossipState {
    local_id: NodeId,
    nodes: RwLock<std::collections::HashMap<NodeId, Node>>,
    events_tx: mpsc::Sender<MembershipEvent>,
    delegate: RwLock<Option<Arc<dyn NodeDelegate>>>,
}

enum Emitted {
    Joined(Node),
    Left(Node),
    Updated(Node),
}

impl GossipState {
    fn new(local: Node, events_tx: mpsc::Sender<MembershipEvent>, delegate: Option<Arc<dyn NodeDelegate>>) -> Self {
        let mut nodes = std::collections::HashMap::new();
        let local_id = local.id;
        nodes.insert(local_id, local);
        Self {
            local_id,
            nodes: RwLock::new(nodes),
            events_tx,
            delegate: RwLock::new(delegate),
        }
    }

    /// Identifier of the local node
    #[must_use]
    pub fn local_id(&self) -> NodeId {
        self.local_id
    }

    /// Full member snapshot, local node included
    #[must_use]
    pub fn snapshot(&self) -> Vec<Node> {
        self.nodes.read().values().cloned().collect()
    }

    /// Merge a remote full-state view into the local map
    pub fn merge(&self, remote: Vec<Node>) {
        let mut emitted = Vec::new();
        {
            let mut nodes = self.nodes.write();
            for incoming in remote {
                if incoming.id == self.local_id {
                    // Refute rumors of our own demise
                    if let Some(local) = nodes.get_mut(&self.local_id) {
                        if incoming.state != NodeState::Alive
                            && incoming.incarnation >= local.incarnation
                        {
                            local.incarnation = incoming.incarnation + 1;
                            local.state = NodeState::Alive;
                            emitted.push(Emitted::Updated(local.clone()));
                        }
                    }
                    continue;
                }

                match nodes.entry(incoming.id) {
                    std::collections::hash_map::Entry::Vacant(slot) => {
                        if matches!(incoming.state, NodeState::Alive | NodeState::Suspect) {
                            emitted.push(Emitted::Joined(incoming.clone()));
                        }
                        slot.insert(incoming);
                    }
                    std::collections::hash_map::Entry::Occupied(mut slot) => {
                        let existing = slot.get_mut();
                        let newer = incoming.incarnation > existing.incarnation
                            || (incoming.incarnation == existing.incarnation
                                && (state_precedence(incoming.state)
                                    > state_precedence(existing.state)
                                    || incoming.last_seen > existing.last_seen));
                        if !newer {
                            continue;
                        }
                        let previous_state = existing.state;
                        let mut merged = incoming;
                        merged.last_seen = merged.last_seen.max(existing.last_seen);
                        let changed = merged.state != previous_state
                            || merged.metadata != existing.metadata
                            || merged.incarnation != existing.incarnation;
                        *existing = merged.clone();
                        if changed {
                            if merged.state == NodeState::Left && previous_state != NodeState::Left {
                                emitted.push(Emitted::Left(merged));
                            } else {
                                emitted.push(Emitted::Updated(merged));
                            }
                        }
                    }
                }
            }
        }
        self.dispatch(emitted);
    }

    /// Advance local liveness and refresh delegate metadata
    fn touch_local(&self) {
        let metadata = self
            .delegate
            .read()
            .as_ref()
            .map(|delegate| delegate.local_metadata());
        let mut emitted = Vec::new();
        {
            let mut nodes = self.nodes.write();
            if let Some(local) = nodes.get_mut(&self.local_id) {
                local.last_seen = now_secs();
                if let Some(metadata) = metadata {
                    if metadata != local.metadata {
                        local.metadata = metadata;
                        local.incarnation += 1;
                        emitted.push(Emitted::Updated(local.clone()));
                    }
                }
            }
        }
        self.dispatch(emitted);
    }

    /// Apply suspicion / death timeouts to every non-local member
    fn apply_timeouts(&self, now: u64, suspicion: Duration, death: Duration) {
        let mut emitted = Vec::new();
        {
            let mut nodes = self.nodes.write();
            for node in nodes.values_mut() {
                if node.id == self.local_id {
                    continue;
                }
                let silent = now.saturating_sub(node.last_seen);
                match node.state {
                    NodeState::Alive if silent > suspicion.as_secs() => {
                        node.state = NodeState::Suspect;
                        emitted.push(Emitted::Updated(node.clone()));
                    }
                    NodeState::Suspect if silent > death.as_secs() => {
                        node.state = NodeState::Dead;
                        emitted.push(Emitted::Updated(node.clone()));
                    }
                    _ => {}
                }
            }
        }
        self.dispatch(emitted);
    }

    /// Replace the local metadata blob immediately
    fn set_local_metadata(&self, metadata: Vec<u8>) {
        let mut emitted = Vec::new();
        {
            let mut nodes = self.nodes.write();
            if let Some(local) = nodes.get_mut(&self.local_id) {
                if local.metadata != metadata {
                    local.metadata = metadata;
                    local.incarnation += 1;
                    emitted.push(Emitted::Updated(local.clone()));
                }
            }
        }
        self.dispatch(emitted);
    }

    /// Mark the local node as voluntarily gone
    fn leave(&self) {
        let mut nodes = self.nodes.write();
        if let Some(local) = nodes.get_mut(&self.local_id) {
            local.state = NodeState::Left;
            local.incarnation += 1;
        }
    }

    fn dispatch(&self, emitted: Vec<Emitted>) {
        if emitted.is_empty() {
            return;
        }
        let delegate = self.delegate.read().clone();
        for event in emitted {
            let (event, node) = match event {
                Emitted::Joined(node) => {
                    if let Some(delegate) = &delegate {
                        delegate.notify_join(&node);
                    }
                    (MembershipEvent::Joined(node.clone()), node)
                }
                Emitted::Left(node) => {
                    if let Some(delegate) = &delegate {
                        delegate.notify_leave(&node);
                    }
                    (MembershipEvent::Left(node.clone()), node)
                }
                Emitted::Updated(node) => {
                    if let Some(delegate) = &delegate {
                        delegate.notify_update(&node);
                    }
                    (MembershipEvent::Updated(node.clone()), node)
                }
            };
            if self.events_tx.try_send(event).is_err() {
                warn!(node = %node.id, "membership event queue full, dropping event");
            }
        }
    }
}

/// Cluster membership engine
pub struct Membership {
    config: ClusterConfig,
    state: Arc<GossipState>,
    transport: Arc<dyn GossipTransport>,
    shutdown_tx: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    events_rx: Mutex<Option<mpsc::Receiver<MembershipEvent>>>,
}

impl Membership {
    /// Build a membership from configuration; nothing runs until
    /// [`Membership::start`]
    #[must_use]
    pub fn new(
        config: ClusterConfig,
        transport: Arc<dyn GossipTransport>,
        delegate: Option<Arc<dyn NodeDelegate>>,
    ) -> Self {
        let node_id = uuid::Uuid::parse_str(&config.node_id)
            .map(NodeId::from_uuid)
            .unwrap_or_default();
        let now = now_secs();
        let local = Node {
            id: node_id,
            name: config.node_name.clone(),
            addr: config.bind_addr.clone(),
            port: config.bind_port,
            state: NodeState::Alive,
            protocol_version: PROTOCOL_VERSION,
            capacity_bytes: 0,
            used_bytes: 0,
            region: String::new(),
            zone: String::new(),
            storage_class: "STANDARD".to_string(),
            joined_at: now,
            last_seen: now,
            incarnation: 1,
            metadata: delegate
                .as_ref()
                .map(|delegate| delegate.local_metadata())
                .unwrap_or_default(),
        };

        let (events_tx, events_rx) = mpsc::channel(EVENT_QUEUE_CAPACITY);
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            config,
            state: Arc::new(GossipState::new(local, events_tx, delegate)),
            transport,
            shutdown_tx,
            tasks: Mutex::new(Vec::new()),
            events_rx: Mutex::new(Some(events_rx)),
        }
    }

    /// Shared state handle (for transport registration and serving)
    #[must_use]
    pub fn state(&self) -> Arc<GossipState> {
        Arc::clone(&self.state)
    }

    /// Snapshot of every known member
    #[must_use]
    pub fn members(&self) -> Vec<Node> {
        let mut members = self.state.snapshot();
        members.sort_by_key(|node| node.id.as_uuid());
        members
    }

    /// Members currently in the alive state
    #[must_use]
    pub fn alive_members(&self) -> Vec<Node> {
        self.members().into_iter().filter(Node::is_alive).collect()
    }

    /// One member by id
    #[must_use]
    pub fn get_member(&self, id: &NodeId) -> Option<Node> {
        self.state.snapshot().into_iter().find(|node| node.id == *id)
    }

    /// The local node record
    #[must_use]
    pub fn local_node(&self) -> Node {
        self.get_member(&self.state.local_id())
            .expect("local node is always present")
    }

    /// Replace the local metadata blob; propagates on the next push-pull
    pub fn update_metadata(&self, metadata: Vec<u8>) {
        self.state.set_local_metadata(metadata);
    }

    /// Take the event stream; `None` after the first call
    pub fn events(&self) -> Option<mpsc::Receiver<MembershipEvent>> {
        self.events_rx.lock().take()
    }

    /// Exchange state with one peer address and merge its reply
    pub async fn push_pull(&self, addr: &str) -> Result<()> {
        let reply = self
            .transport
            .exchange(addr, self.state.snapshot())
            .await?;
        self.state.merge(reply);
        Ok(())
    }

    /// Start the gossip and probe loops
    pub async fn start(&self) {
        // Contact seeds once so the first snapshot is non-trivial
        for seed in self.config.seeds.clone() {
            if let Err(e) = self.push_pull(&seed).await {
                warn!(seed, error = %e, "seed contact failed");
            }
        }

        let push_pull_interval = Duration::from_secs(self.config.push_pull_interval.max(1));
        let probe_interval = Duration::from_secs(self.config.probe_interval.max(1));
        let suspicion = Duration::from_secs(self.config.suspicion_timeout.max(1));
        let death = Duration::from_secs(self.config.death_timeout.max(1));

        let state = Arc::clone(&self.state);
        let transport = Arc::clone(&self.transport);
        let mut shutdown = self.shutdown_tx.subscribe();
        let push_pull = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(push_pull_interval);
            loop {
                tokio::select! {
                    _ = shutdown.changed() => {
                        if *shutdown.borrow() {
                            debug!("push-pull loop stopping");
                            return;
                        }
                    }
                    _ = ticker.tick() => {
                        let Some(peer) = pick_gossip_peer(&state) else { continue };
                        match transport.exchange(&peer.address(), state.snapshot()).await {
                            Ok(reply) => state.merge(reply),
                            Err(e) => debug!(peer = %peer.id, error = %e, "push-pull failed"),
                        }
                    }
                }
            }
        });

        let state = Arc::clone(&self.state);
        let mut shutdown = self.shutdown_tx.subscribe();
        let probe = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(probe_interval);
            loop {
                tokio::select! {
                    _ = shutdown.changed() => {
                        if *shutdown.borrow() {
                            debug!("probe loop stopping");
                            return;
                        }
                    }
                    _ = ticker.tick() => {
                        state.touch_local();
                        state.apply_timeouts(now_secs(), suspicion, death);
                    }
                }
            }
        });

        self.tasks.lock().extend([push_pull, probe]);
        info!(node = %self.state.local_id(), "membership started");
    }

    /// Announce departure and stop the background loops
    pub async fn stop(&self) {
        self.state.leave();
        // Best-effort spread of the Left state before the loops die
        if let Some(peer) = pick_gossip_peer(&self.state) {
            let _ = self
                .transport
                .exchange(&peer.address(), self.state.snapshot())
                .await;
        }

        let _ = self.shutdown_tx.send(true);
        let tasks: Vec<_> = self.tasks.lock().drain(..).collect();
        for task in tasks {
            let _ = task.await;
        }
        info!(node = %self.state.local_id(), "membership stopped");
    }
}

fn pick_gossip_peer(state: &GossipState) -> Option<Node> {
    let local_id = state.local_id();
    let candidates: Vec<Node> = state
        .snapshot()
        .into_iter()
        .filter(|node| node.id != local_id)
        .filter(|node| matches!(node.state, NodeState::Alive | NodeState::Suspect))
        .collect();
    candidates.choose(&mut rand::thread_rng()).cloned()
}
