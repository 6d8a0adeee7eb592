//! Entity Behaviours
//!
//! Game logic attaches behaviours to replicated entities. Each entity owns a
//! fixed-size table of behaviours indexed by ordinal; the ordinal is what
//! travels on the wire, so both sides must build the table from the same
//! template in the same order.
//!
//! Behaviours never talk to the router directly. They push
//! [`OutgoingMessage`]s into the context outbox and the owning server/client
//! flushes them after the callback returns.

use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;

use tracing::warn;

use crate::core::transform::Transform;
use crate::network::protocol::{DeliveryMode, NetworkId};
use crate::network::router::Role;
use crate::network::transport::PeerId;

/// Downcasting support for boxed behaviours.
pub trait AsAny: Any {
    /// Borrow as [`Any`].
    fn as_any(&self) -> &dyn Any;
    /// Mutably borrow as [`Any`].
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<T: Any> AsAny for T {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// Where a behaviour message goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageTarget {
    /// The same behaviour on the server
    Server,
    /// The same behaviour on one client
    Peer(PeerId),
    /// The same behaviour on every client
    All,
}

/// A behaviour message waiting to be sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingMessage {
    /// Entity the sending behaviour belongs to
    pub network_id: NetworkId,
    /// Ordinal of the sending behaviour
    pub behaviour_index: i32,
    /// Destination
    pub target: MessageTarget,
    /// Delivery semantics
    pub mode: DeliveryMode,
    /// Behaviour-defined bytes
    pub payload: Vec<u8>,
}

/// What a behaviour callback may see and touch.
pub struct BehaviourContext<'a> {
    /// Owning entity
    pub network_id: NetworkId,
    /// Ordinal of this behaviour
    pub index: usize,
    /// This process's peer id
    pub local_peer: PeerId,
    /// Current local time (seconds)
    pub now: f32,
    /// Time since the previous tick (seconds)
    pub dt: f32,
    /// Owning entity's parent-local transform
    pub transform: &'a mut Transform,
    outbox: &'a mut Vec<OutgoingMessage>,
}

impl<'a> BehaviourContext<'a> {
    /// Build a context for one callback.
    pub fn new(
        network_id: NetworkId,
        index: usize,
        local_peer: PeerId,
        now: f32,
        dt: f32,
        transform: &'a mut Transform,
        outbox: &'a mut Vec<OutgoingMessage>,
    ) -> Self {
        Self {
            network_id,
            index,
            local_peer,
            now,
            dt,
            transform,
            outbox,
        }
    }

    fn push(&mut self, target: MessageTarget, payload: Vec<u8>, mode: DeliveryMode) {
        self.outbox.push(OutgoingMessage {
            network_id: self.network_id,
            behaviour_index: self.index as i32,
            target,
            mode,
            payload,
        });
    }

    /// Queue a message for this behaviour on the server.
    pub fn send_to_server(&mut self, payload: Vec<u8>, mode: DeliveryMode) {
        self.push(MessageTarget::Server, payload, mode);
    }

    /// Queue a message for this behaviour on one client.
    pub fn send_to_peer(&mut self, peer: PeerId, payload: Vec<u8>, mode: DeliveryMode) {
        self.push(MessageTarget::Peer(peer), payload, mode);
    }

    /// Queue a message for this behaviour on every client.
    pub fn send_to_all(&mut self, payload: Vec<u8>, mode: DeliveryMode) {
        self.push(MessageTarget::All, payload, mode);
    }
}

/// Per-entity game logic. Every hook defaults to a no-op.
pub trait Behaviour: AsAny + Send {
    /// Server frame while the session is running.
    fn on_server_tick(&mut self, _ctx: &mut BehaviourContext<'_>) {}

    /// Client frame while the client is initialized.
    fn on_client_tick(&mut self, _ctx: &mut BehaviourContext<'_>) {}

    /// Payload sent to this behaviour on the server.
    fn on_server_message(&mut self, _ctx: &mut BehaviourContext<'_>, _payload: &[u8], _sender: PeerId) {}

    /// Payload sent to this behaviour on a client.
    fn on_client_message(&mut self, _ctx: &mut BehaviourContext<'_>, _payload: &[u8], _sender: PeerId) {}

    /// Every session peer has acknowledged this behaviour (server side).
    fn on_initialized_server(&mut self, _ctx: &mut BehaviourContext<'_>) {}

    /// The server announced this behaviour initialized (client side).
    fn on_initialized_client(&mut self, _ctx: &mut BehaviourContext<'_>) {}
}

/// Stand-in for a kind with no registered factory; keeps ordinals aligned.
#[derive(Debug, Default)]
pub struct InertBehaviour;

impl Behaviour for InertBehaviour {}

struct Slot {
    kind: String,
    behaviour: Box<dyn Behaviour>,
    acknowledged: bool,
    initialized: bool,
}

/// Fixed-size, ordinal-indexed behaviours of one entity.
#[derive(Default)]
pub struct BehaviourTable {
    slots: Box<[Slot]>,
}

impl fmt::Debug for BehaviourTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.slots.iter().map(|s| &s.kind))
            .finish()
    }
}

impl BehaviourTable {
    /// Number of ordinals.
    #[inline]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// True if the entity has no behaviours.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Convert a wire index into an ordinal, bounds-checked.
    pub fn ordinal(&self, index: i32) -> Option<usize> {
        usize::try_from(index).ok().filter(|i| *i < self.slots.len())
    }

    /// Kind registered at `index`.
    pub fn kind(&self, index: usize) -> Option<&str> {
        self.slots.get(index).map(|s| s.kind.as_str())
    }

    /// Behaviour at `index`.
    pub fn get_mut(&mut self, index: usize) -> Option<&mut (dyn Behaviour + 'static)> {
        self.slots.get_mut(index).map(|s| &mut *s.behaviour)
    }

    /// Behaviour at `index` as a concrete type.
    pub fn downcast_ref<B: Behaviour>(&self, index: usize) -> Option<&B> {
        self.slots
            .get(index)
            .and_then(|s| (*s.behaviour).as_any().downcast_ref::<B>())
    }

    /// Mutable behaviour at `index` as a concrete type.
    pub fn downcast_mut<B: Behaviour>(&mut self, index: usize) -> Option<&mut B> {
        self.slots
            .get_mut(index)
            .and_then(|s| (*s.behaviour).as_any_mut().downcast_mut::<B>())
    }

    /// Whether the client already sent its acknowledgement for `index`.
    pub fn is_acknowledged(&self, index: usize) -> bool {
        self.slots.get(index).is_some_and(|s| s.acknowledged)
    }

    /// Record the acknowledgement. Returns false if it was already recorded.
    pub fn mark_acknowledged(&mut self, index: usize) -> bool {
        match self.slots.get_mut(index) {
            Some(slot) if !slot.acknowledged => {
                slot.acknowledged = true;
                true
            }
            _ => false,
        }
    }

    /// Whether `index` has been initialized.
    pub fn is_initialized(&self, index: usize) -> bool {
        self.slots.get(index).is_some_and(|s| s.initialized)
    }

    /// Record initialization. Returns false if it was already recorded.
    pub fn mark_initialized(&mut self, index: usize) -> bool {
        match self.slots.get_mut(index) {
            Some(slot) if !slot.initialized => {
                slot.initialized = true;
                true
            }
            _ => false,
        }
    }
}

type Factory = Box<dyn Fn(Role) -> Box<dyn Behaviour> + Send + Sync>;

/// Behaviour factories by kind name.
#[derive(Default)]
pub struct BehaviourRegistry {
    factories: BTreeMap<String, Factory>,
}

impl fmt::Debug for BehaviourRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.factories.keys()).finish()
    }
}

impl BehaviourRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a factory; the role tells it which side it is built for.
    pub fn register<F>(&mut self, kind: impl Into<String>, factory: F)
    where
        F: Fn(Role) -> Box<dyn Behaviour> + Send + Sync + 'static,
    {
        self.factories.insert(kind.into(), Box::new(factory));
    }

    /// True if `kind` has a factory.
    pub fn contains(&self, kind: &str) -> bool {
        self.factories.contains_key(kind)
    }

    /// Build the table for one entity.
    pub fn create_table(&self, kinds: &[String], role: Role) -> BehaviourTable {
        let slots = kinds
            .iter()
            .map(|kind| {
                let behaviour = match self.factories.get(kind) {
                    Some(factory) => factory(role),
                    None => {
                        warn!(%kind, "No factory for behaviour kind; using inert stand-in");
                        Box::new(InertBehaviour)
                    }
                };
                Slot {
                    kind: kind.clone(),
                    behaviour,
                    acknowledged: false,
                    initialized: false,
                }
            })
            .collect();
        BehaviourTable { slots }
    }
}
