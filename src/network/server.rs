//! Replication Server
//!
//! The server role: owns the authoritative registry, runs the ready barrier,
//! answers pings, dispatches behaviour traffic and emits per-tick deltas.
//!
//! The server never pumps the transport itself. The peer hosting it pumps the
//! shared [`MessageRouter`] once per frame and then polls the server and its
//! own client; see [`crate::network::peer::Peer`].

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, trace, warn};

use super::handshake::{HandshakeState, ReadyOutcome, ServerHandshake};
use super::protocol::{
    BehaviourInitialized, BehaviourMessage, DeliveryMode, DestroyEntity, EntityStateList, MessageType, NetworkId,
    PingReply, PingRequest, ResourceId, RELIABLE_MTU, UNRELIABLE_MTU,
};
use super::router::{Inbound, Inbox, MessageRouter, Role};
use super::transport::{PeerId, Transport};
use crate::core::codec::{WireDecode, WireEncode};
use crate::core::tasks::{TaskId, TaskQueue};
use crate::core::transform::Transform;
use crate::game::behaviour::{Behaviour, BehaviourContext, BehaviourRegistry, OutgoingMessage};
use crate::game::events::ServerEvent;
use crate::replication::scheduler::ReplicationScheduler;
use crate::replication::server_registry::{ServerEntity, ServerRegistry};
use crate::replication::template::TemplateCatalog;
use crate::replication::ReplicationError;

/// Default replication rate (Hz).
pub const DEFAULT_SERVER_HZ: f32 = 16.0;

/// Default barrier timeout (seconds).
pub const DEFAULT_BARRIER_TIMEOUT_SECS: f32 = 30.0;

/// Default interval between full unreliable refreshes (seconds).
pub const DEFAULT_REFRESH_SECS: f32 = 1.0;

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Replication ticks per second.
    pub tick_hz: f32,
    /// Only send entities whose transform changed since the previous tick.
    pub only_send_changes: bool,
    /// Start with the ready subset after this long. `None` waits forever.
    pub barrier_timeout_secs: Option<f32>,
    /// Payload ceiling for per-tick (unreliable) lists.
    pub unreliable_ceiling: usize,
    /// Payload ceiling for snapshot (reliable) lists.
    pub reliable_ceiling: usize,
    /// Send every entity unreliably this often, so deltas lost in transit
    /// are repaired. `None` disables refreshes.
    pub refresh_secs: Option<f32>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            tick_hz: DEFAULT_SERVER_HZ,
            only_send_changes: true,
            barrier_timeout_secs: Some(DEFAULT_BARRIER_TIMEOUT_SECS),
            unreliable_ceiling: UNRELIABLE_MTU,
            reliable_ceiling: RELIABLE_MTU,
            refresh_secs: Some(DEFAULT_REFRESH_SECS),
        }
    }
}

impl ServerConfig {
    /// Seconds between replication ticks.
    pub fn tick_interval(&self) -> f32 {
        1.0 / self.tick_hz.max(f32::EPSILON)
    }
}

#[derive(Debug, Clone)]
enum ServerTask {
    Spawn {
        resource_id: ResourceId,
        transform: Transform,
        parent: Option<NetworkId>,
    },
}

/// The authoritative side of a session.
pub struct GameServer {
    config: ServerConfig,
    catalog: Arc<TemplateCatalog>,
    behaviours: Arc<BehaviourRegistry>,
    registry: ServerRegistry,
    scheduler: ReplicationScheduler,
    handshake: ServerHandshake,
    inbox: Inbox,
    /// Clients that acknowledged each not-yet-initialized behaviour.
    acks: BTreeMap<(NetworkId, usize), BTreeSet<PeerId>>,
    tasks: TaskQueue<ServerTask>,
    outbox: Vec<OutgoingMessage>,
    events: Vec<ServerEvent>,
    now: f32,
    last_poll: Option<f32>,
    next_tick: Option<f32>,
    next_refresh: Option<f32>,
}

impl GameServer {
    /// Create the server role and subscribe it on `router`'s server table.
    pub fn new<T: Transport>(
        config: ServerConfig,
        catalog: Arc<TemplateCatalog>,
        behaviours: Arc<BehaviourRegistry>,
        router: &mut MessageRouter<T>,
    ) -> Self {
        let inbox = router.subscribe(
            Role::Server,
            &[
                MessageType::PingPong,
                MessageType::Initialization,
                MessageType::EntityBehaviourMessage,
                MessageType::EntityBehaviourInitialized,
            ],
        );
        let scheduler = ReplicationScheduler {
            only_send_changes: config.only_send_changes,
            unreliable_ceiling: config.unreliable_ceiling,
            reliable_ceiling: config.reliable_ceiling,
        };
        info!(
            tick_hz = config.tick_hz,
            templates = catalog.len(),
            peer = %router.local_peer_id(),
            "Replication server created"
        );

        Self {
            handshake: ServerHandshake::new(config.barrier_timeout_secs),
            config,
            catalog,
            behaviours,
            registry: ServerRegistry::new(),
            scheduler,
            inbox,
            acks: BTreeMap::new(),
            tasks: TaskQueue::new(),
            outbox: Vec::new(),
            events: Vec::new(),
            now: 0.0,
            last_poll: None,
            next_tick: None,
            next_refresh: None,
        }
    }

    // =========================================================================
    // ACCESSORS
    // =========================================================================

    /// Configuration in use.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Barrier state.
    pub fn state(&self) -> HandshakeState {
        self.handshake.state()
    }

    /// True once replication is live.
    pub fn is_running(&self) -> bool {
        self.handshake.is_running()
    }

    /// Peers that have sent Initialization.
    pub fn ready_peers(&self) -> &BTreeSet<PeerId> {
        self.handshake.ready()
    }

    /// Authoritative entities.
    pub fn registry(&self) -> &ServerRegistry {
        &self.registry
    }

    /// Entity by id.
    pub fn entity(&self, network_id: NetworkId) -> Option<&ServerEntity> {
        self.registry.get(network_id)
    }

    /// Mutable entity by id. Transform edits go out on the next tick.
    pub fn entity_mut(&mut self, network_id: NetworkId) -> Option<&mut ServerEntity> {
        self.registry.get_mut(network_id)
    }

    /// Typed access to one server-side behaviour.
    pub fn behaviour_mut<B: Behaviour>(&mut self, network_id: NetworkId, index: usize) -> Option<&mut B> {
        self.registry.get_mut(network_id)?.behaviours.downcast_mut::<B>(index)
    }

    // =========================================================================
    // ENTITY LIFECYCLE
    // =========================================================================

    /// Add an entity to the registry. While running it is announced with one
    /// reliable EntityState; before that it rides in the barrier snapshot.
    pub fn register<T: Transport>(&mut self, entity: ServerEntity, router: &mut MessageRouter<T>) -> NetworkId {
        let network_id = entity.network_id;
        let announce = self.is_running().then(|| entity.to_state(self.now).to_bytes());
        if self.registry.insert(entity).is_some() {
            warn!(network_id, "Registered over an existing entity");
        }
        if let Some(bytes) = announce {
            let _ = router.send_to_all(&bytes, MessageType::EntityState, DeliveryMode::ReliableOrdered);
        }
        debug!(network_id, running = self.is_running(), "Entity registered");
        network_id
    }

    /// Instantiate a template and register every member root first.
    /// Returns the root's network id.
    #[instrument(level = "debug", skip(self, router))]
    pub fn spawn<T: Transport>(
        &mut self,
        resource_id: ResourceId,
        transform: Transform,
        parent: Option<NetworkId>,
        router: &mut MessageRouter<T>,
    ) -> Result<NetworkId, ReplicationError> {
        let catalog = self.catalog.clone();
        let template = catalog
            .get(resource_id)
            .ok_or(ReplicationError::UnknownTemplate(resource_id))?;
        if let Some(parent) = parent {
            if !self.registry.contains(parent) {
                return Err(ReplicationError::UnknownEntityReference(parent));
            }
        }

        let members = self
            .registry
            .instantiate(template, transform, parent, &self.behaviours);
        let root = members.first().map_or(0, |e| e.network_id);
        for entity in members {
            self.register(entity, router);
        }
        info!(template = %template.name, resource_id, root, "Spawned");
        Ok(root)
    }

    /// Spawn once `delay` seconds have passed. Errors are logged when the
    /// task runs.
    pub fn spawn_after(
        &mut self,
        delay: f32,
        resource_id: ResourceId,
        transform: Transform,
        parent: Option<NetworkId>,
    ) -> TaskId {
        self.tasks.schedule(
            self.now + delay.max(0.0),
            ServerTask::Spawn {
                resource_id,
                transform,
                parent,
            },
        )
    }

    /// Cancel a pending [`GameServer::spawn_after`].
    pub fn cancel_task(&mut self, id: TaskId) -> bool {
        self.tasks.cancel(id)
    }

    /// Destroy an entity and its descendants, deepest first. Every client is
    /// told before the entity leaves the registry.
    #[instrument(level = "debug", skip(self, router))]
    pub fn despawn<T: Transport>(
        &mut self,
        network_id: NetworkId,
        router: &mut MessageRouter<T>,
    ) -> Result<Vec<NetworkId>, ReplicationError> {
        if !self.registry.contains(network_id) {
            return Err(ReplicationError::UnknownEntityReference(network_id));
        }
        let doomed = self.registry.subtree_deepest_first(network_id);
        for id in &doomed {
            let bytes = DestroyEntity { network_id: *id }.to_bytes();
            let _ = router.send_to_all(&bytes, MessageType::DestroyEntity, DeliveryMode::ReliableOrdered);
            self.registry.remove(*id);
            self.acks.retain(|(entity, _), _| entity != id);
        }
        info!(network_id, removed = doomed.len(), "Despawned");
        Ok(doomed)
    }

    /// Replace an entity's parent-local transform.
    pub fn set_transform(&mut self, network_id: NetworkId, transform: Transform) -> Result<(), ReplicationError> {
        let entity = self
            .registry
            .get_mut(network_id)
            .ok_or(ReplicationError::UnknownEntityReference(network_id))?;
        entity.transform = transform;
        Ok(())
    }

    /// Reparent an entity. Replicated on the next tick it changes in.
    pub fn set_parent(&mut self, network_id: NetworkId, parent: Option<NetworkId>) -> Result<(), ReplicationError> {
        self.registry.set_parent(network_id, parent)?;
        // Force the next delta to include it even if the transform is unchanged.
        if let Some(entity) = self.registry.get_mut(network_id) {
            entity.touch();
        }
        Ok(())
    }

    /// Broadcast the game-defined start signal.
    pub fn start_game<T: Transport>(&mut self, payload: &[u8], router: &mut MessageRouter<T>) {
        info!(len = payload.len(), "StartGame");
        let _ = router.send_to_all(payload, MessageType::StartGame, DeliveryMode::ReliableOrdered);
    }

    // =========================================================================
    // POLL
    // =========================================================================

    /// Process routed traffic, run due tasks, tick behaviours and replicate.
    /// The caller pumps `router` first.
    pub fn poll<T: Transport>(&mut self, now: f32, router: &mut MessageRouter<T>) -> Vec<ServerEvent> {
        let dt = self.last_poll.map_or(0.0, |last| (now - last).max(0.0));
        self.last_poll = Some(now);
        self.now = now;

        for message in self.inbox.drain() {
            self.handle(message, router);
        }

        if !self.is_running() {
            let session = router.session_peer_ids();
            if let Some(missing) = self.handshake.check_timeout(&session, now) {
                let targets: Vec<PeerId> = session
                    .iter()
                    .copied()
                    .filter(|p| self.handshake.is_ready(*p))
                    .collect();
                self.events.push(ServerEvent::BarrierTimedOut { missing });
                self.go_live(router, Some(targets));
            }
        }

        for task in self.tasks.poll(now) {
            match task {
                ServerTask::Spawn {
                    resource_id,
                    transform,
                    parent,
                } => {
                    if let Err(e) = self.spawn(resource_id, transform, parent, router) {
                        warn!(error = %e, resource_id, "Scheduled spawn failed");
                    }
                }
            }
        }

        if self.is_running() {
            self.resolve_pending_acks(router);
            self.tick_behaviours(dt, router);
            self.replicate(router);
        }

        std::mem::take(&mut self.events)
    }

    fn handle<T: Transport>(&mut self, message: Inbound, router: &mut MessageRouter<T>) {
        let Inbound { kind, sender, payload, .. } = message;
        match kind {
            MessageType::PingPong => self.on_ping(sender, &payload, router),
            MessageType::Initialization => self.on_initialization(sender, router),
            MessageType::EntityBehaviourMessage => self.on_behaviour_message(sender, &payload, router),
            MessageType::EntityBehaviourInitialized => self.on_behaviour_ack(sender, &payload, router),
            other => trace!(?other, %sender, "Unhandled server message"),
        }
    }

    fn on_ping<T: Transport>(&mut self, sender: PeerId, payload: &[u8], router: &mut MessageRouter<T>) {
        let request = match PingRequest::from_bytes(payload) {
            Ok(request) => request,
            Err(e) => {
                warn!(%sender, error = %e, "Malformed ping");
                return;
            }
        };
        let reply = PingReply {
            echoed_time: request.client_time,
            tick_hz: self.config.tick_hz,
        };
        let _ = router.send_to(
            sender,
            &reply.to_bytes(),
            MessageType::PingPong,
            DeliveryMode::UnreliableUnordered,
        );
    }

    fn on_initialization<T: Transport>(&mut self, sender: PeerId, router: &mut MessageRouter<T>) {
        let newly_ready = !self.handshake.is_ready(sender);
        let session = router.session_peer_ids();
        let outcome = self.handshake.record_ready(sender, &session, self.now);
        if newly_ready {
            self.events.push(ServerEvent::PeerReady(sender));
        }

        match outcome {
            ReadyOutcome::Waiting { missing } => {
                trace!(%sender, ?missing, "Barrier waiting");
            }
            ReadyOutcome::BarrierPassed => self.go_live(router, None),
            ReadyOutcome::LateJoin => {
                self.events.push(ServerEvent::LateJoin(sender));
                self.send_snapshot(router, &[sender]);
            }
            ReadyOutcome::AlreadyReady => {
                // The client is still retrying; repeat the echo only.
                let _ = router.send_to(sender, &[], MessageType::Initialization, DeliveryMode::ReliableOrdered);
            }
        }
    }

    /// Start replicating. `targets` of `None` means every session peer.
    fn go_live<T: Transport>(&mut self, router: &mut MessageRouter<T>, targets: Option<Vec<PeerId>>) {
        let targets = targets.unwrap_or_else(|| router.session_peer_ids().into_iter().collect());
        info!(peers = targets.len(), entities = self.registry.len(), "Replication running");
        self.send_snapshot(router, &targets);
        self.next_tick = Some(self.now + self.config.tick_interval());
        self.next_refresh = self.config.refresh_secs.map(|secs| self.now + secs.max(0.0));
        self.events.push(ServerEvent::Running);
    }

    /// Reliable full snapshot followed by the Initialization echo.
    fn send_snapshot<T: Transport>(&mut self, router: &mut MessageRouter<T>, targets: &[PeerId]) {
        let lists: Vec<Vec<u8>> = self
            .scheduler
            .full_snapshot(&mut self.registry, self.now)
            .iter()
            .map(EntityStateList::to_bytes)
            .collect();
        for peer in targets {
            for bytes in &lists {
                let _ = router.send_to(*peer, bytes, MessageType::EntityStateList, DeliveryMode::ReliableOrdered);
            }
            let _ = router.send_to(*peer, &[], MessageType::Initialization, DeliveryMode::ReliableOrdered);
        }
        debug!(peers = targets.len(), lists = lists.len(), "Snapshot sent");
    }

    fn on_behaviour_message<T: Transport>(&mut self, sender: PeerId, payload: &[u8], router: &mut MessageRouter<T>) {
        let message = match BehaviourMessage::from_bytes(payload) {
            Ok(message) => message,
            Err(e) => {
                warn!(%sender, error = %e, "Malformed behaviour message");
                return;
            }
        };
        let local_peer = router.local_peer_id();
        let Some(entity) = self.registry.get_mut(message.network_id) else {
            warn!(%sender, error = %ReplicationError::UnknownEntityReference(message.network_id), "Behaviour message dropped");
            return;
        };
        let Some(index) = entity.behaviours.ordinal(message.behaviour_index) else {
            let error = ReplicationError::UnknownBehaviour {
                network_id: message.network_id,
                index: message.behaviour_index,
            };
            warn!(%sender, %error, "Behaviour message dropped");
            return;
        };

        let ServerEntity {
            behaviours, transform, ..
        } = entity;
        if let Some(behaviour) = behaviours.get_mut(index) {
            let mut ctx = BehaviourContext::new(
                message.network_id,
                index,
                local_peer,
                self.now,
                0.0,
                transform,
                &mut self.outbox,
            );
            behaviour.on_server_message(&mut ctx, &message.payload, sender);
        }
        self.flush_outbox(router);
    }

    fn on_behaviour_ack<T: Transport>(&mut self, sender: PeerId, payload: &[u8], router: &mut MessageRouter<T>) {
        let ack = match BehaviourInitialized::from_bytes(payload) {
            Ok(ack) => ack,
            Err(e) => {
                warn!(%sender, error = %e, "Malformed behaviour ack");
                return;
            }
        };
        let Some(entity) = self.registry.get(ack.network_id) else {
            debug!(%sender, network_id = ack.network_id, "Ack for unknown entity");
            return;
        };
        let Some(index) = entity.behaviours.ordinal(ack.behaviour_index) else {
            warn!(%sender, network_id = ack.network_id, index = ack.behaviour_index, "Ack for unknown behaviour");
            return;
        };

        if entity.behaviours.is_initialized(index) {
            // Late joiner catching up.
            let _ = router.send_to(
                sender,
                &ack.to_bytes(),
                MessageType::EntityBehaviourInitialized,
                DeliveryMode::ReliableOrdered,
            );
            return;
        }

        let key = (ack.network_id, index);
        self.acks.entry(key).or_default().insert(sender);
        trace!(network_id = ack.network_id, index, "Behaviour ack recorded");
        self.resolve_pending_acks(router);
    }

    /// Initialize every pending behaviour acknowledged by all ready session
    /// peers. Runs on each ack and each poll, so a peer leaving without
    /// acking does not stall the rest.
    fn resolve_pending_acks<T: Transport>(&mut self, router: &mut MessageRouter<T>) {
        if self.acks.is_empty() {
            return;
        }
        let session = router.session_peer_ids();
        let required: Vec<PeerId> = session
            .into_iter()
            .filter(|p| self.handshake.is_ready(*p))
            .collect();
        let covered: Vec<(NetworkId, usize)> = self
            .acks
            .iter()
            .filter(|(_, acked)| required.iter().all(|p| acked.contains(p)))
            .map(|(key, _)| *key)
            .collect();

        for (network_id, index) in covered {
            self.acks.remove(&(network_id, index));
            self.initialize_behaviour(network_id, index, router);
        }
    }

    fn initialize_behaviour<T: Transport>(&mut self, network_id: NetworkId, index: usize, router: &mut MessageRouter<T>) {
        let local_peer = router.local_peer_id();
        let Some(entity) = self.registry.get_mut(network_id) else {
            return;
        };
        if !entity.behaviours.mark_initialized(index) {
            return;
        }

        let bytes = BehaviourInitialized {
            network_id,
            behaviour_index: index as i32,
        }
        .to_bytes();
        let _ = router.send_to_all(&bytes, MessageType::EntityBehaviourInitialized, DeliveryMode::ReliableOrdered);

        let ServerEntity {
            behaviours, transform, ..
        } = entity;
        if let Some(behaviour) = behaviours.get_mut(index) {
            let mut ctx = BehaviourContext::new(network_id, index, local_peer, self.now, 0.0, transform, &mut self.outbox);
            behaviour.on_initialized_server(&mut ctx);
        }
        debug!(network_id, index, "Behaviour initialized");
        self.events.push(ServerEvent::BehaviourInitialized { network_id, index });
        self.flush_outbox(router);
    }

    fn tick_behaviours<T: Transport>(&mut self, dt: f32, router: &mut MessageRouter<T>) {
        let local_peer = router.local_peer_id();
        let now = self.now;
        for entity in self.registry.iter_mut() {
            let ServerEntity {
                network_id,
                behaviours,
                transform,
                ..
            } = entity;
            for index in 0..behaviours.len() {
                if !behaviours.is_initialized(index) {
                    continue;
                }
                if let Some(behaviour) = behaviours.get_mut(index) {
                    let mut ctx = BehaviourContext::new(*network_id, index, local_peer, now, dt, transform, &mut self.outbox);
                    behaviour.on_server_tick(&mut ctx);
                }
            }
        }
        self.flush_outbox(router);
    }

    fn replicate<T: Transport>(&mut self, router: &mut MessageRouter<T>) {
        let Some(due) = self.next_tick else {
            return;
        };
        if self.now < due {
            return;
        }
        let interval = self.config.tick_interval();
        let mut next = due + interval;
        if next <= self.now {
            next = self.now + interval;
        }
        self.next_tick = Some(next);

        let refresh = self.next_refresh.is_some_and(|at| self.now >= at);
        let lists = if refresh {
            self.next_refresh = self.config.refresh_secs.map(|secs| self.now + secs.max(0.0));
            self.scheduler.refresh(&mut self.registry, self.now)
        } else {
            self.scheduler.flush(&mut self.registry, self.now)
        };
        for list in &lists {
            let _ = router.send_to_all(
                &list.to_bytes(),
                MessageType::EntityStateList,
                DeliveryMode::UnreliableUnordered,
            );
        }
        trace!(lists = lists.len(), refresh, "Replication tick");
    }

    fn flush_outbox<T: Transport>(&mut self, router: &mut MessageRouter<T>) {
        for message in self.outbox.drain(..) {
            let _ = router.send_behaviour(&message);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::behaviour::InertBehaviour;
    use crate::network::memory::{LinkConditions, MemoryNetwork, MemoryTransport};
    use crate::replication::template::{ChildTemplate, EntityTemplate};
    use glam::Vec3;

    const HOST: PeerId = PeerId(1);
    const GUEST: PeerId = PeerId(2);

    struct Rig {
        net: MemoryNetwork,
        host: MessageRouter<MemoryTransport>,
        guest: MessageRouter<MemoryTransport>,
        server: GameServer,
        guest_inbox: Inbox,
    }

    fn catalog() -> Arc<TemplateCatalog> {
        let templates = vec![
            EntityTemplate::new("Crate").with_id(5),
            EntityTemplate::new("Cart")
                .with_id(6)
                .with_child(ChildTemplate::new("Wheel"))
                .with_behaviour("inert"),
        ];
        Arc::new(TemplateCatalog::build(templates).unwrap())
    }

    fn behaviours() -> Arc<BehaviourRegistry> {
        let mut registry = BehaviourRegistry::new();
        registry.register("inert", |_| Box::new(InertBehaviour));
        Arc::new(registry)
    }

    fn rig(config: ServerConfig) -> Rig {
        let net = MemoryNetwork::new(HOST, LinkConditions::default());
        let mut host = MessageRouter::new(net.join(HOST), false);
        let mut guest = MessageRouter::new(net.join(GUEST), false);
        let server = GameServer::new(config, catalog(), behaviours(), &mut host);
        let guest_inbox = guest.subscribe(Role::Client, &MessageType::ALL);
        Rig {
            net,
            host,
            guest,
            server,
            guest_inbox,
        }
    }

    impl Rig {
        fn poll(&mut self, now: f32) -> Vec<ServerEvent> {
            self.host.pump();
            let events = self.server.poll(now, &mut self.host);
            self.guest.pump();
            events
        }

        fn guest_kinds(&mut self) -> Vec<MessageType> {
            self.guest_inbox.drain().into_iter().map(|m| m.kind).collect()
        }

        fn ready(&mut self, peer: PeerId) {
            let router = if peer == HOST { &mut self.host } else { &mut self.guest };
            router
                .send_to_server(&[], MessageType::Initialization, DeliveryMode::ReliableOrdered)
                .unwrap();
        }
    }

    #[test]
    fn test_server_config_default() {
        let config = ServerConfig::default();
        assert_eq!(config.tick_hz, 16.0);
        assert!(config.only_send_changes);
        assert_eq!(config.barrier_timeout_secs, Some(30.0));
        assert_eq!(config.unreliable_ceiling, UNRELIABLE_MTU);
        assert_eq!(config.refresh_secs, Some(1.0));
    }

    #[test]
    fn test_nothing_replicated_before_barrier() {
        let mut rig = rig(ServerConfig::default());
        rig.server.spawn(5, Transform::IDENTITY, None, &mut rig.host).unwrap();
        rig.ready(GUEST);
        let events = rig.poll(0.0);

        assert_eq!(events, vec![ServerEvent::PeerReady(GUEST)]);
        assert_eq!(rig.server.state(), HandshakeState::AwaitingAllClientsReady);
        assert!(rig.guest_kinds().is_empty());
        rig.poll(5.0);
        assert!(rig.guest_kinds().is_empty());
    }

    #[test]
    fn test_barrier_sends_snapshot_then_echo() {
        let mut rig = rig(ServerConfig::default());
        rig.server.spawn(5, Transform::IDENTITY, None, &mut rig.host).unwrap();
        rig.ready(GUEST);
        rig.ready(HOST);
        let events = rig.poll(0.0);

        assert!(events.contains(&ServerEvent::Running));
        assert_eq!(
            rig.guest_kinds(),
            vec![MessageType::EntityStateList, MessageType::Initialization]
        );
    }

    #[test]
    fn test_register_while_running_announces_once() {
        let mut rig = rig(ServerConfig::default());
        rig.ready(GUEST);
        rig.ready(HOST);
        rig.poll(0.0);
        rig.guest_kinds();

        rig.server.spawn(5, Transform::IDENTITY, None, &mut rig.host).unwrap();
        rig.guest.pump();
        assert_eq!(rig.guest_kinds(), vec![MessageType::EntityState]);
    }

    #[test]
    fn test_ticks_only_send_changes() {
        let mut rig = rig(ServerConfig::default());
        let id = rig.server.spawn(5, Transform::IDENTITY, None, &mut rig.host).unwrap();
        rig.ready(GUEST);
        rig.ready(HOST);
        rig.poll(0.0);
        rig.guest_kinds();

        // First tick after the snapshot primes the change cache.
        rig.poll(0.1);
        assert_eq!(rig.guest_kinds(), vec![MessageType::EntityStateList]);
        rig.poll(0.2);
        assert!(rig.guest_kinds().is_empty());

        rig.server
            .set_transform(id, Transform::from_position(Vec3::X))
            .unwrap();
        rig.poll(0.3);
        assert_eq!(rig.guest_kinds(), vec![MessageType::EntityStateList]);
    }

    #[test]
    fn test_ping_reply_carries_tick_rate() {
        let mut rig = rig(ServerConfig {
            tick_hz: 20.0,
            ..Default::default()
        });
        let request = PingRequest { client_time: 3.5 }.to_bytes();
        rig.guest
            .send_to_server(&request, MessageType::PingPong, DeliveryMode::UnreliableUnordered)
            .unwrap();
        rig.poll(4.0);

        let reply = rig.guest_inbox.try_next().unwrap();
        assert_eq!(reply.kind, MessageType::PingPong);
        assert_eq!(
            PingReply::from_bytes(&reply.payload).unwrap(),
            PingReply {
                echoed_time: 3.5,
                tick_hz: 20.0
            }
        );
    }

    #[test]
    fn test_barrier_timeout_starts_ready_subset() {
        let mut rig = rig(ServerConfig {
            barrier_timeout_secs: Some(2.0),
            ..Default::default()
        });
        rig.server.spawn(5, Transform::IDENTITY, None, &mut rig.host).unwrap();
        rig.ready(GUEST);
        rig.poll(0.0);
        assert!(rig.poll(1.0).is_empty());

        let events = rig.poll(2.5);
        assert_eq!(events[0], ServerEvent::BarrierTimedOut { missing: vec![HOST] });
        assert!(rig.server.is_running());
        assert_eq!(
            rig.guest_kinds(),
            vec![MessageType::EntityStateList, MessageType::Initialization]
        );

        // The host catches up as a late joiner.
        rig.ready(HOST);
        let events = rig.poll(3.0);
        assert!(events.contains(&ServerEvent::LateJoin(HOST)));
    }

    #[test]
    fn test_despawn_deepest_first() {
        let mut rig = rig(ServerConfig::default());
        rig.ready(GUEST);
        rig.ready(HOST);
        rig.poll(0.0);
        rig.guest_kinds();

        let cart = rig.server.spawn(6, Transform::IDENTITY, None, &mut rig.host).unwrap();
        let removed = rig.server.despawn(cart, &mut rig.host).unwrap();
        assert_eq!(removed, vec![cart + 1, cart]);
        assert!(rig.server.registry().is_empty());

        rig.guest.pump();
        let destroyed: Vec<NetworkId> = rig
            .guest_inbox
            .drain()
            .into_iter()
            .filter(|m| m.kind == MessageType::DestroyEntity)
            .map(|m| DestroyEntity::from_bytes(&m.payload).unwrap().network_id)
            .collect();
        assert_eq!(destroyed, vec![cart + 1, cart]);
        assert!(matches!(
            rig.server.despawn(cart, &mut rig.host),
            Err(ReplicationError::UnknownEntityReference(_))
        ));
    }

    #[test]
    fn test_spawn_errors() {
        let mut rig = rig(ServerConfig::default());
        assert_eq!(
            rig.server.spawn(99, Transform::IDENTITY, None, &mut rig.host),
            Err(ReplicationError::UnknownTemplate(99))
        );
        assert_eq!(
            rig.server.spawn(5, Transform::IDENTITY, Some(42), &mut rig.host),
            Err(ReplicationError::UnknownEntityReference(42))
        );
    }

    #[test]
    fn test_spawn_after_runs_when_due() {
        let mut rig = rig(ServerConfig::default());
        rig.poll(0.0);
        rig.server.spawn_after(1.0, 5, Transform::IDENTITY, None);
        rig.poll(0.5);
        assert!(rig.server.registry().is_empty());
        rig.poll(1.0);
        assert_eq!(rig.server.registry().len(), 1);
    }

    #[test]
    fn test_behaviour_initialized_after_all_acks() {
        let mut rig = rig(ServerConfig::default());
        rig.ready(GUEST);
        rig.ready(HOST);
        rig.poll(0.0);
        let cart = rig.server.spawn(6, Transform::IDENTITY, None, &mut rig.host).unwrap();
        rig.guest_kinds();

        let ack = BehaviourInitialized {
            network_id: cart,
            behaviour_index: 0,
        }
        .to_bytes();
        rig.guest
            .send_to_server(&ack, MessageType::EntityBehaviourInitialized, DeliveryMode::ReliableOrdered)
            .unwrap();
        assert!(rig.poll(0.01).is_empty());

        rig.host
            .send_to_server(&ack, MessageType::EntityBehaviourInitialized, DeliveryMode::ReliableOrdered)
            .unwrap();
        let events = rig.poll(0.02);
        assert_eq!(
            events,
            vec![ServerEvent::BehaviourInitialized {
                network_id: cart,
                index: 0
            }]
        );
        assert!(rig
            .guest_kinds()
            .contains(&MessageType::EntityBehaviourInitialized));
        assert!(rig.server.entity(cart).unwrap().behaviours.is_initialized(0));
    }

    #[test]
    fn test_refresh_resends_unchanged_entities() {
        let mut rig = rig(ServerConfig {
            refresh_secs: Some(1.0),
            ..Default::default()
        });
        rig.server.spawn(5, Transform::IDENTITY, None, &mut rig.host).unwrap();
        rig.ready(GUEST);
        rig.ready(HOST);
        rig.poll(0.0);
        rig.poll(0.1);
        rig.guest_kinds();

        rig.poll(0.5);
        assert!(rig.guest_kinds().is_empty());
        rig.poll(1.0);
        assert_eq!(rig.guest_kinds(), vec![MessageType::EntityStateList]);
        rig.poll(1.1);
        assert!(rig.guest_kinds().is_empty());
    }

    #[test]
    fn test_pending_ack_resolves_when_missing_peer_leaves() {
        let mut rig = rig(ServerConfig::default());
        rig.ready(GUEST);
        rig.ready(HOST);
        rig.poll(0.0);
        let cart = rig.server.spawn(6, Transform::IDENTITY, None, &mut rig.host).unwrap();

        let ack = BehaviourInitialized {
            network_id: cart,
            behaviour_index: 0,
        }
        .to_bytes();
        rig.host
            .send_to_server(&ack, MessageType::EntityBehaviourInitialized, DeliveryMode::ReliableOrdered)
            .unwrap();
        assert!(rig.poll(0.01).is_empty());
        assert!(!rig.server.entity(cart).unwrap().behaviours.is_initialized(0));

        // The guest never acks; once it leaves, the host's ack is enough.
        rig.net.disconnect(GUEST);
        let events = rig.poll(0.02);
        assert_eq!(
            events,
            vec![ServerEvent::BehaviourInitialized {
                network_id: cart,
                index: 0
            }]
        );
        assert!(rig.server.entity(cart).unwrap().behaviours.is_initialized(0));
    }

    #[test]
    fn test_unknown_behaviour_message_dropped() {
        let mut rig = rig(ServerConfig::default());
        let id = rig.server.spawn(5, Transform::IDENTITY, None, &mut rig.host).unwrap();
        let message = BehaviourMessage {
            network_id: id,
            behaviour_index: 3,
            payload: vec![1],
        }
        .to_bytes();
        rig.guest
            .send_to_server(&message, MessageType::EntityBehaviourMessage, DeliveryMode::ReliableOrdered)
            .unwrap();
        assert!(rig.poll(0.0).is_empty());
        assert_eq!(rig.net.stats().rejected, 0);
    }
}
