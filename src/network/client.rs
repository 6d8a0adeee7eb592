//! Replication Client
//!
//! Every peer runs one. The client announces itself with Initialization
//! (retried until the server echoes), materializes proxies from entity
//! state, smooths them for rendering and hosts the client half of each
//! behaviour.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, trace, warn};

use super::ping::ClockSync;
use super::protocol::{
    BehaviourInitialized, BehaviourMessage, DeliveryMode, DestroyEntity, EntityState, EntityStateList, MessageType,
    NetworkId, PingReply, PingRequest,
};
use super::router::{Inbound, Inbox, MessageRouter, Role};
use super::server::DEFAULT_SERVER_HZ;
use super::transport::{PeerId, Transport};
use crate::core::codec::{WireDecode, WireEncode};
use crate::core::tasks::{TaskId, TaskQueue};
use crate::core::transform::Transform;
use crate::game::behaviour::{Behaviour, BehaviourContext, BehaviourRegistry, OutgoingMessage};
use crate::game::events::ClientEvent;
use crate::replication::client_registry::{ApplyOutcome, ClientRegistry, LocalId, Proxy};
use crate::replication::template::TemplateCatalog;

/// Client configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Server tick rate assumed until the first ping reply.
    pub expected_server_hz: f32,
    /// Ping requests per second. Zero disables pinging.
    pub pings_per_sec: f32,
    /// Seconds between Initialization retries.
    pub init_retry_secs: f32,
    /// Smooth proxies between snapshots. Off renders the latest snapshot.
    pub interpolate: bool,
    /// Input sampling rate for predicted movement.
    pub input_rate_hz: f32,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            expected_server_hz: DEFAULT_SERVER_HZ,
            pings_per_sec: 1.0,
            init_retry_secs: 0.5,
            interpolate: true,
            input_rate_hz: 30.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ClientTask {
    RetryInitialization,
    Ping,
}

/// The proxy side of a session.
pub struct GameClient {
    config: ClientConfig,
    catalog: Arc<TemplateCatalog>,
    behaviours: Arc<BehaviourRegistry>,
    proxies: ClientRegistry,
    clock: ClockSync,
    inbox: Inbox,
    tasks: TaskQueue<ClientTask>,
    retry_task: Option<TaskId>,
    outbox: Vec<OutgoingMessage>,
    events: Vec<ClientEvent>,
    initialized: bool,
    started: bool,
    now: f32,
    last_poll: Option<f32>,
}

impl GameClient {
    /// Create the client role and subscribe it on `router`'s client table.
    pub fn new<T: Transport>(
        config: ClientConfig,
        catalog: Arc<TemplateCatalog>,
        behaviours: Arc<BehaviourRegistry>,
        router: &mut MessageRouter<T>,
    ) -> Self {
        let inbox = router.subscribe(Role::Client, &MessageType::ALL);
        Self {
            clock: ClockSync::new(config.expected_server_hz),
            config,
            catalog,
            behaviours,
            proxies: ClientRegistry::new(),
            inbox,
            tasks: TaskQueue::new(),
            retry_task: None,
            outbox: Vec::new(),
            events: Vec::new(),
            initialized: false,
            started: false,
            now: 0.0,
            last_poll: None,
        }
    }

    /// Configuration in use.
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// True once the server echoed Initialization.
    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Proxy registry.
    pub fn proxies(&self) -> &ClientRegistry {
        &self.proxies
    }

    /// Proxy by network id.
    pub fn proxy(&self, network_id: NetworkId) -> Option<&Proxy> {
        self.proxies.by_network(network_id)
    }

    /// World-space render transform of a replicated entity.
    pub fn world_transform(&self, network_id: NetworkId) -> Option<Transform> {
        self.proxies.world_transform(self.proxies.local_id(network_id)?)
    }

    /// Clock estimate fed by pings and state timestamps.
    pub fn clock(&self) -> &ClockSync {
        &self.clock
    }

    /// Typed access to one client-side behaviour.
    pub fn behaviour_mut<B: Behaviour>(&mut self, network_id: NetworkId, index: usize) -> Option<&mut B> {
        self.proxies
            .by_network_mut(network_id)?
            .behaviours
            .downcast_mut::<B>(index)
    }

    /// Forget every proxy and start the handshake over on the next poll.
    pub fn reset(&mut self) {
        self.proxies.clear();
        self.tasks = TaskQueue::new();
        self.retry_task = None;
        self.initialized = false;
        self.started = false;
        info!("Client reset");
    }

    /// Handle routed traffic, run due tasks, sample interpolation and tick
    /// behaviours. The caller pumps `router` first.
    pub fn poll<T: Transport>(&mut self, now: f32, router: &mut MessageRouter<T>) -> Vec<ClientEvent> {
        let dt = self.last_poll.map_or(0.0, |last| (now - last).max(0.0));
        self.last_poll = Some(now);
        self.now = now;

        if !self.started {
            self.start(router);
        }

        let server = router.server_peer_id();
        for message in self.inbox.drain() {
            if message.sender != server {
                trace!(sender = %message.sender, kind = ?message.kind, "Ignoring client message from non-server peer");
                continue;
            }
            self.handle(message, router);
        }

        for task in self.tasks.poll(now) {
            match task {
                ClientTask::RetryInitialization => {
                    debug!("Retrying Initialization");
                    self.send_initialization(router);
                }
                ClientTask::Ping => {
                    let request = PingRequest { client_time: now }.to_bytes();
                    let _ = router.send_to_server(&request, MessageType::PingPong, DeliveryMode::UnreliableUnordered);
                }
            }
        }

        self.proxies
            .update_render(dt, self.clock.tick_interval(), self.config.interpolate);

        if self.initialized {
            self.tick_behaviours(dt, router);
        }
        std::mem::take(&mut self.events)
    }

    fn start<T: Transport>(&mut self, router: &mut MessageRouter<T>) {
        self.started = true;
        self.send_initialization(router);
        if self.config.init_retry_secs > 0.0 {
            self.retry_task = Some(self.tasks.schedule_repeating(
                self.now + self.config.init_retry_secs,
                self.config.init_retry_secs,
                ClientTask::RetryInitialization,
            ));
        }
        if self.config.pings_per_sec > 0.0 {
            self.tasks
                .schedule_repeating(self.now, 1.0 / self.config.pings_per_sec, ClientTask::Ping);
        }
        debug!(peer = %router.local_peer_id(), "Client handshake started");
    }

    fn send_initialization<T: Transport>(&mut self, router: &mut MessageRouter<T>) {
        let _ = router.send_to_server(&[], MessageType::Initialization, DeliveryMode::ReliableOrdered);
    }

    fn handle<T: Transport>(&mut self, message: Inbound, router: &mut MessageRouter<T>) {
        let Inbound { kind, sender, payload, .. } = message;
        match kind {
            MessageType::PingPong => self.on_ping_reply(&payload),
            MessageType::StartGame => {
                info!(len = payload.len(), "StartGame received");
                self.events.push(ClientEvent::StartGame(payload));
            }
            MessageType::Initialization => self.on_initialization_echo(router),
            MessageType::EntityState => match EntityState::from_bytes(&payload) {
                Ok(state) => self.apply_state(&state, router),
                Err(e) => warn!(error = %e, "Malformed entity state"),
            },
            MessageType::EntityStateList => match EntityStateList::from_bytes(&payload) {
                Ok(list) => {
                    for state in &list.states {
                        self.apply_state(state, router);
                    }
                }
                Err(e) => warn!(error = %e, "Malformed entity state list"),
            },
            MessageType::DestroyEntity => match DestroyEntity::from_bytes(&payload) {
                Ok(destroy) => self.on_destroy(destroy.network_id),
                Err(e) => warn!(error = %e, "Malformed destroy"),
            },
            MessageType::EntityBehaviourMessage => self.on_behaviour_message(sender, &payload, router),
            MessageType::EntityBehaviourInitialized => self.on_behaviour_initialized(&payload, router),
        }
    }

    fn on_ping_reply(&mut self, payload: &[u8]) {
        let reply = match PingReply::from_bytes(payload) {
            Ok(reply) => reply,
            Err(e) => {
                warn!(error = %e, "Malformed ping reply");
                return;
            }
        };
        if let Some((ping, server_hz)) = self.clock.on_reply(&reply, self.now) {
            trace!(ping, server_hz, "Ping updated");
            self.events.push(ClientEvent::PingUpdated { ping, server_hz });
        }
    }

    fn on_initialization_echo<T: Transport>(&mut self, router: &mut MessageRouter<T>) {
        if self.initialized {
            return;
        }
        self.initialized = true;
        if let Some(id) = self.retry_task.take() {
            self.tasks.cancel(id);
        }
        info!(proxies = self.proxies.bound_len(), "Client initialized");
        self.events.push(ClientEvent::Initialized);

        let bound: Vec<LocalId> = self
            .proxies
            .iter()
            .filter(|p| p.network_id.is_some())
            .map(|p| p.local_id)
            .collect();
        for local_id in bound {
            self.acknowledge_behaviours(local_id, router);
        }
    }

    fn apply_state<T: Transport>(&mut self, state: &EntityState, router: &mut MessageRouter<T>) {
        self.clock.observe_server_time(state.time, self.now);
        let outcome = self.proxies.apply_state(
            state,
            &self.catalog,
            &self.behaviours,
            self.clock.tick_interval(),
        );
        match outcome {
            ApplyOutcome::Spawned(local_id) | ApplyOutcome::Bound(local_id) => {
                self.events.push(ClientEvent::EntitySpawned {
                    network_id: state.instance_id,
                    local_id,
                });
                if self.initialized {
                    self.acknowledge_behaviours(local_id, router);
                }
            }
            ApplyOutcome::Stale(_) => {
                trace!(network_id = state.instance_id, time = state.time, "Stale state ignored");
            }
            ApplyOutcome::Applied(_) | ApplyOutcome::Dropped(_) => {}
        }
    }

    fn on_destroy(&mut self, network_id: NetworkId) {
        match self.proxies.destroy(network_id) {
            Some(_) => self.events.push(ClientEvent::EntityDestroyed { network_id }),
            None => debug!(network_id, "Destroy for unknown entity"),
        }
    }

    /// Send BehaviourInitialized for every behaviour of a bound proxy not yet
    /// acknowledged.
    fn acknowledge_behaviours<T: Transport>(&mut self, local_id: LocalId, router: &mut MessageRouter<T>) {
        let Some(proxy) = self.proxies.get_mut(local_id) else {
            return;
        };
        let Some(network_id) = proxy.network_id else {
            return;
        };
        for index in 0..proxy.behaviours.len() {
            if !proxy.behaviours.mark_acknowledged(index) {
                continue;
            }
            let ack = BehaviourInitialized {
                network_id,
                behaviour_index: index as i32,
            };
            let _ = router.send_to_server(
                &ack.to_bytes(),
                MessageType::EntityBehaviourInitialized,
                DeliveryMode::ReliableOrdered,
            );
        }
    }

    fn on_behaviour_message<T: Transport>(&mut self, sender: PeerId, payload: &[u8], router: &mut MessageRouter<T>) {
        let message = match BehaviourMessage::from_bytes(payload) {
            Ok(message) => message,
            Err(e) => {
                warn!(error = %e, "Malformed behaviour message");
                return;
            }
        };
        let local_peer = router.local_peer_id();
        let Some(proxy) = self.proxies.by_network_mut(message.network_id) else {
            warn!(network_id = message.network_id, "Behaviour message for unknown entity");
            return;
        };
        let Some(index) = proxy.behaviours.ordinal(message.behaviour_index) else {
            warn!(
                network_id = message.network_id,
                index = message.behaviour_index,
                "Behaviour message for unknown behaviour"
            );
            return;
        };

        let Proxy {
            behaviours, render, ..
        } = proxy;
        if let Some(behaviour) = behaviours.get_mut(index) {
            let mut ctx = BehaviourContext::new(message.network_id, index, local_peer, self.now, 0.0, render, &mut self.outbox);
            behaviour.on_client_message(&mut ctx, &message.payload, sender);
        }
        self.flush_outbox(router);
    }

    fn on_behaviour_initialized<T: Transport>(&mut self, payload: &[u8], router: &mut MessageRouter<T>) {
        let init = match BehaviourInitialized::from_bytes(payload) {
            Ok(init) => init,
            Err(e) => {
                warn!(error = %e, "Malformed behaviour initialization");
                return;
            }
        };
        let local_peer = router.local_peer_id();
        let Some(proxy) = self.proxies.by_network_mut(init.network_id) else {
            debug!(network_id = init.network_id, "Behaviour initialization for unknown entity");
            return;
        };
        let Some(index) = proxy.behaviours.ordinal(init.behaviour_index) else {
            warn!(network_id = init.network_id, index = init.behaviour_index, "Unknown behaviour initialized");
            return;
        };
        if !proxy.behaviours.mark_initialized(index) {
            return;
        }

        let Proxy {
            behaviours, render, ..
        } = proxy;
        if let Some(behaviour) = behaviours.get_mut(index) {
            let mut ctx = BehaviourContext::new(init.network_id, index, local_peer, self.now, 0.0, render, &mut self.outbox);
            behaviour.on_initialized_client(&mut ctx);
        }
        debug!(network_id = init.network_id, index, "Client behaviour initialized");
        self.flush_outbox(router);
    }

    fn tick_behaviours<T: Transport>(&mut self, dt: f32, router: &mut MessageRouter<T>) {
        let local_peer = router.local_peer_id();
        let now = self.now;
        for proxy in self.proxies.iter_mut() {
            let Proxy {
                network_id,
                behaviours,
                render,
                ..
            } = proxy;
            let Some(network_id) = *network_id else {
                continue;
            };
            for index in 0..behaviours.len() {
                if !behaviours.is_initialized(index) {
                    continue;
                }
                if let Some(behaviour) = behaviours.get_mut(index) {
                    let mut ctx = BehaviourContext::new(network_id, index, local_peer, now, dt, render, &mut self.outbox);
                    behaviour.on_client_tick(&mut ctx);
                }
            }
        }
        self.flush_outbox(router);
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
    use crate::network::memory::{LinkConditions, MemoryNetwork, MemoryTransport};
    use crate::replication::template::{ChildTemplate, EntityTemplate};
    use glam::Vec3;

    const HOST: PeerId = PeerId(1);
    const GUEST: PeerId = PeerId(2);

    struct Rig {
        host: MessageRouter<MemoryTransport>,
        guest: MessageRouter<MemoryTransport>,
        server_inbox: Inbox,
        client: GameClient,
    }

    fn rig(config: ClientConfig) -> Rig {
        let net = MemoryNetwork::new(HOST, LinkConditions::default());
        let mut host = MessageRouter::new(net.join(HOST), false);
        let mut guest = MessageRouter::new(net.join(GUEST), false);
        let catalog = TemplateCatalog::build(vec![
            EntityTemplate::new("Crate").with_id(5),
            EntityTemplate::new("Cart").with_id(6).with_child(ChildTemplate::new("Wheel")),
        ])
        .unwrap();
        let server_inbox = host.subscribe(Role::Server, &MessageType::ALL);
        let client = GameClient::new(config, Arc::new(catalog), Arc::new(BehaviourRegistry::new()), &mut guest);
        Rig {
            host,
            guest,
            server_inbox,
            client,
        }
    }

    impl Rig {
        fn poll(&mut self, now: f32) -> Vec<ClientEvent> {
            self.guest.pump();
            let events = self.client.poll(now, &mut self.guest);
            self.host.pump();
            events
        }

        fn server_kinds(&mut self) -> Vec<MessageType> {
            self.server_inbox.drain().into_iter().map(|m| m.kind).collect()
        }

        fn send(&mut self, kind: MessageType, bytes: &[u8]) {
            self.host
                .send_to(GUEST, bytes, kind, DeliveryMode::ReliableOrdered)
                .unwrap();
        }
    }

    fn state(id: NetworkId, resource_id: i32, root: NetworkId, parent: Option<NetworkId>, time: f32) -> EntityState {
        EntityState {
            time,
            has_parent: parent.is_some(),
            resource_id,
            instance_id: id,
            root_instance_id: root,
            parent_instance_id: parent.unwrap_or(0),
            transform: Transform::from_position(Vec3::new(time, 0.0, 0.0)),
            name: String::new(),
        }
    }

    #[test]
    fn test_client_config_default() {
        let config = ClientConfig::default();
        assert_eq!(config.expected_server_hz, 16.0);
        assert_eq!(config.pings_per_sec, 1.0);
        assert_eq!(config.init_retry_secs, 0.5);
        assert!(config.interpolate);
    }

    #[test]
    fn test_initialization_retried_until_echo() {
        let mut rig = rig(ClientConfig::default());
        rig.poll(0.0);
        let first = rig.server_kinds();
        assert!(first.contains(&MessageType::Initialization));
        assert!(first.contains(&MessageType::PingPong));

        rig.poll(0.5);
        assert_eq!(rig.server_kinds(), vec![MessageType::Initialization]);

        rig.send(MessageType::Initialization, &[]);
        assert_eq!(rig.poll(0.6), vec![ClientEvent::Initialized]);
        assert!(rig.client.is_initialized());

        rig.poll(1.5);
        let later = rig.server_kinds();
        assert!(!later.contains(&MessageType::Initialization));
    }

    #[test]
    fn test_snapshot_spawns_and_binds() {
        let mut rig = rig(ClientConfig::default());
        let list = EntityStateList::new(vec![
            state(1, 5, 1, None, 1.0),
            state(2, 6, 2, None, 1.0),
            state(3, EntityTemplate::child_resource_id(0), 2, Some(2), 1.0),
        ]);
        rig.send(MessageType::EntityStateList, &list.to_bytes());
        rig.send(MessageType::Initialization, &[]);
        let events = rig.poll(0.0);

        let spawned: Vec<NetworkId> = events.iter().filter_map(ClientEvent::network_id).collect();
        assert_eq!(spawned, vec![1, 2, 3]);
        assert_eq!(events.last(), Some(&ClientEvent::Initialized));
        assert_eq!(rig.client.proxies().bound_len(), 3);
    }

    #[test]
    fn test_destroy_reports_event() {
        let mut rig = rig(ClientConfig::default());
        rig.send(MessageType::EntityState, &state(1, 5, 1, None, 1.0).to_bytes());
        rig.poll(0.0);

        rig.send(MessageType::DestroyEntity, &DestroyEntity { network_id: 1 }.to_bytes());
        rig.send(MessageType::DestroyEntity, &DestroyEntity { network_id: 9 }.to_bytes());
        assert_eq!(rig.poll(0.1), vec![ClientEvent::EntityDestroyed { network_id: 1 }]);
        assert!(rig.client.proxy(1).is_none());
    }

    #[test]
    fn test_ping_reply_updates_clock() {
        let mut rig = rig(ClientConfig::default());
        rig.poll(0.0);
        let reply = PingReply {
            echoed_time: 0.0,
            tick_hz: 20.0,
        };
        rig.host
            .send_to(GUEST, &reply.to_bytes(), MessageType::PingPong, DeliveryMode::UnreliableUnordered)
            .unwrap();
        let events = rig.poll(0.25);
        assert_eq!(
            events,
            vec![ClientEvent::PingUpdated {
                ping: 0.25,
                server_hz: 20.0
            }]
        );
        assert_eq!(rig.client.clock().server_hz(), 20.0);
    }

    #[test]
    fn test_render_follows_latest_without_interpolation() {
        let mut rig = rig(ClientConfig {
            interpolate: false,
            ..Default::default()
        });
        rig.send(MessageType::EntityState, &state(1, 5, 1, None, 1.0).to_bytes());
        rig.poll(0.0);
        rig.send(MessageType::EntityState, &state(1, 5, 1, None, 2.0).to_bytes());
        rig.poll(0.1);
        assert_eq!(rig.client.world_transform(1).unwrap().position, Vec3::new(2.0, 0.0, 0.0));
    }

    #[test]
    fn test_messages_from_non_server_ignored() {
        let mut rig = rig(ClientConfig::default());
        rig.guest
            .send_to(GUEST, &[], MessageType::Initialization, DeliveryMode::ReliableOrdered)
            .unwrap();
        assert!(rig.poll(0.0).is_empty());
        assert!(!rig.client.is_initialized());
    }
}
