//! Player Movement Behaviour
//!
//! Stock behaviour that drives a predicted entity. The server owns the
//! controller assignment and the authoritative transform; the controlling
//! client predicts locally and reconciles on echoes. Every other client just
//! sees the entity through normal replication.
//!
//! Payloads are bincode-encoded [`MovementPayload`] values.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::core::transform::{Desync, Transform};
use crate::game::behaviour::{Behaviour, BehaviourContext, BehaviourRegistry};
use crate::game::input::{InputCommand, RawInput};
use crate::game::movement::MovementModel;
use crate::game::prediction::{ClientPredictor, ServerAuthority};
use crate::network::protocol::DeliveryMode;
use crate::network::router::Role;
use crate::network::transport::PeerId;

/// Kind name the behaviour registers under.
pub const PLAYER_MOVEMENT: &str = "player_movement";

/// Wire payloads.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum MovementPayload {
    /// Server → clients: who drives this entity
    Assign {
        /// Controlling peer id
        controller: u64,
    },
    /// Client → server: ask for the current assignment
    Query,
    /// Controlling client → server
    Command(InputCommand),
    /// Server → controlling client
    Echo {
        /// Sequence id the transform results from
        sequence: u32,
        /// Authoritative transform after applying it
        transform: Transform,
    },
}

impl MovementPayload {
    fn encode(&self) -> Option<Vec<u8>> {
        match bincode::serialize(self) {
            Ok(bytes) => Some(bytes),
            Err(e) => {
                warn!(error = %e, "Failed to encode movement payload");
                None
            }
        }
    }

    fn decode(payload: &[u8]) -> Option<Self> {
        match bincode::deserialize(payload) {
            Ok(p) => Some(p),
            Err(e) => {
                warn!(error = %e, len = payload.len(), "Malformed movement payload");
                None
            }
        }
    }
}

/// Predicted player movement, one instance per side.
#[derive(Debug)]
pub struct PlayerMovement {
    role: Role,
    model: Arc<MovementModel>,
    sample_interval: f32,
    controller: Option<PeerId>,
    announce_pending: bool,
    authority: ServerAuthority,
    predictor: Option<ClientPredictor>,
    next_sample: f32,
}

impl PlayerMovement {
    /// Create a behaviour for `role`, sampling input at `input_rate_hz`.
    pub fn new(role: Role, model: Arc<MovementModel>, input_rate_hz: f32) -> Self {
        Self {
            role,
            model,
            sample_interval: 1.0 / input_rate_hz.max(1.0),
            controller: None,
            announce_pending: false,
            authority: ServerAuthority::default(),
            predictor: None,
            next_sample: 0.0,
        }
    }

    /// Register the factory under [`PLAYER_MOVEMENT`].
    pub fn register(registry: &mut BehaviourRegistry, model: Arc<MovementModel>, input_rate_hz: f32) {
        registry.register(PLAYER_MOVEMENT, move |role| {
            Box::new(PlayerMovement::new(role, model.clone(), input_rate_hz))
        });
    }

    /// Server: hand control to `peer`. Announced to every client on the
    /// next server tick.
    pub fn set_controller(&mut self, peer: PeerId) {
        self.controller = Some(peer);
        self.announce_pending = true;
        self.authority = ServerAuthority::default();
    }

    /// Current controller, as far as this side knows.
    pub fn controller(&self) -> Option<PeerId> {
        self.controller
    }

    /// True on the controlling client once prediction is active.
    pub fn is_predicting(&self) -> bool {
        self.predictor.is_some()
    }

    /// Client: feed one frame of raw input. Ignored unless predicting.
    pub fn accumulate(&mut self, raw: RawInput) {
        if let Some(predictor) = self.predictor.as_mut() {
            predictor.accumulate(raw);
        }
    }

    /// Client predictor, if this peer controls the entity.
    pub fn predictor(&self) -> Option<&ClientPredictor> {
        self.predictor.as_ref()
    }

    /// Desync measured at the latest echo.
    pub fn last_desync(&self) -> Option<Desync> {
        self.predictor.as_ref().and_then(|p| p.last_desync())
    }

    /// Server: last applied sequence id.
    pub fn last_applied(&self) -> Option<u32> {
        self.authority.last_applied()
    }

    fn announce(&mut self, ctx: &mut BehaviourContext<'_>, to: Option<PeerId>) {
        let Some(controller) = self.controller else {
            return;
        };
        let Some(bytes) = (MovementPayload::Assign { controller: controller.0 }).encode() else {
            return;
        };
        match to {
            Some(peer) => ctx.send_to_peer(peer, bytes, DeliveryMode::ReliableOrdered),
            None => ctx.send_to_all(bytes, DeliveryMode::ReliableOrdered),
        }
    }

    fn assign(&mut self, ctx: &mut BehaviourContext<'_>, controller: PeerId) {
        self.controller = Some(controller);
        if controller != ctx.local_peer {
            if self.predictor.take().is_some() {
                debug!(network_id = ctx.network_id, %controller, "Control moved to another peer");
            }
            return;
        }
        if self.predictor.is_none() {
            debug!(network_id = ctx.network_id, "Local peer controls entity; predicting");
            self.predictor = Some(ClientPredictor::new(self.model.clone(), *ctx.transform));
            self.next_sample = ctx.now + self.sample_interval;
        }
    }
}

impl Behaviour for PlayerMovement {
    fn on_server_tick(&mut self, ctx: &mut BehaviourContext<'_>) {
        if self.announce_pending {
            self.announce_pending = false;
            self.announce(ctx, None);
        }
    }

    fn on_client_tick(&mut self, ctx: &mut BehaviourContext<'_>) {
        let Some(predictor) = self.predictor.as_mut() else {
            return;
        };

        // Fell more than a second behind (stalled frame): resync the clock
        // instead of emitting a burst of empty commands.
        if ctx.now - self.next_sample > 1.0 {
            self.next_sample = ctx.now;
        }
        while ctx.now >= self.next_sample {
            let command = predictor.sample();
            if let Some(bytes) = MovementPayload::Command(command).encode() {
                ctx.send_to_server(bytes, DeliveryMode::UnreliableUnordered);
            }
            self.next_sample += self.sample_interval;
        }
        *ctx.transform = *predictor.transform();
    }

    fn on_server_message(&mut self, ctx: &mut BehaviourContext<'_>, payload: &[u8], sender: PeerId) {
        match MovementPayload::decode(payload) {
            Some(MovementPayload::Command(command)) => {
                if self.controller != Some(sender) {
                    warn!(network_id = ctx.network_id, %sender, "Command from non-controller rejected");
                    return;
                }
                if let Err(rejection) = self.authority.apply(&self.model, ctx.transform, &command) {
                    debug!(network_id = ctx.network_id, %rejection, "Dropped command");
                    return;
                }
                let echo = MovementPayload::Echo {
                    sequence: command.sequence,
                    transform: *ctx.transform,
                };
                if let Some(bytes) = echo.encode() {
                    ctx.send_to_peer(sender, bytes, DeliveryMode::UnreliableUnordered);
                }
            }
            Some(MovementPayload::Query) => self.announce(ctx, Some(sender)),
            Some(other) => {
                warn!(network_id = ctx.network_id, ?other, "Unexpected movement payload on server");
            }
            None => {}
        }
    }

    fn on_client_message(&mut self, ctx: &mut BehaviourContext<'_>, payload: &[u8], _sender: PeerId) {
        match MovementPayload::decode(payload) {
            Some(MovementPayload::Assign { controller }) => self.assign(ctx, PeerId(controller)),
            Some(MovementPayload::Echo { sequence, transform }) => {
                if let Some(predictor) = self.predictor.as_mut() {
                    predictor.reconcile(sequence, &transform);
                    *ctx.transform = *predictor.transform();
                }
            }
            Some(other) => {
                warn!(network_id = ctx.network_id, ?other, "Unexpected movement payload on client");
            }
            None => {}
        }
    }

    fn on_initialized_server(&mut self, ctx: &mut BehaviourContext<'_>) {
        if self.announce_pending {
            self.announce_pending = false;
            self.announce(ctx, None);
        }
    }

    fn on_initialized_client(&mut self, ctx: &mut BehaviourContext<'_>) {
        if self.role == Role::Client && self.controller.is_none() {
            if let Some(bytes) = MovementPayload::Query.encode() {
                ctx.send_to_server(bytes, DeliveryMode::ReliableOrdered);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::behaviour::{MessageTarget, OutgoingMessage};
    use crate::game::movement::MovementConfig;
    use crate::game::collision::CollisionWorld;

    const SERVER: PeerId = PeerId(1);
    const ALICE: PeerId = PeerId(2);
    const BOB: PeerId = PeerId(3);

    fn model() -> Arc<MovementModel> {
        Arc::new(MovementModel::new(MovementConfig::default(), CollisionWorld::new()))
    }

    struct Side {
        behaviour: PlayerMovement,
        transform: Transform,
        outbox: Vec<OutgoingMessage>,
        peer: PeerId,
    }

    impl Side {
        fn new(role: Role, peer: PeerId) -> Self {
            Self {
                behaviour: PlayerMovement::new(role, model(), 10.0),
                transform: Transform::IDENTITY,
                outbox: Vec::new(),
                peer,
            }
        }

        fn with_ctx(&mut self, now: f32, f: impl FnOnce(&mut PlayerMovement, &mut BehaviourContext<'_>)) {
            let mut ctx = BehaviourContext::new(1, 0, self.peer, now, 0.1, &mut self.transform, &mut self.outbox);
            f(&mut self.behaviour, &mut ctx);
        }
    }

    fn decode(message: &OutgoingMessage) -> MovementPayload {
        bincode::deserialize(&message.payload).unwrap()
    }

    #[test]
    fn test_server_announces_controller_once() {
        let mut server = Side::new(Role::Server, SERVER);
        server.behaviour.set_controller(ALICE);
        server.with_ctx(0.0, |b, ctx| b.on_initialized_server(ctx));
        server.with_ctx(0.1, |b, ctx| b.on_server_tick(ctx));

        assert_eq!(server.outbox.len(), 1);
        assert_eq!(server.outbox[0].target, MessageTarget::All);
        assert_eq!(decode(&server.outbox[0]), MovementPayload::Assign { controller: ALICE.0 });
    }

    #[test]
    fn test_query_answered_to_sender() {
        let mut server = Side::new(Role::Server, SERVER);
        server.behaviour.set_controller(ALICE);
        let query = bincode::serialize(&MovementPayload::Query).unwrap();
        server.with_ctx(0.0, |b, ctx| b.on_server_message(ctx, &query, BOB));

        assert_eq!(server.outbox[0].target, MessageTarget::Peer(BOB));
        assert_eq!(server.outbox[0].mode, DeliveryMode::ReliableOrdered);
    }

    #[test]
    fn test_non_controller_command_rejected() {
        let mut server = Side::new(Role::Server, SERVER);
        server.behaviour.set_controller(ALICE);
        let command = bincode::serialize(&MovementPayload::Command(InputCommand::forward(1, 1.0))).unwrap();

        server.with_ctx(0.0, |b, ctx| b.on_server_message(ctx, &command, BOB));
        assert_eq!(server.transform, Transform::IDENTITY);
        assert!(server.outbox.is_empty());

        server.with_ctx(0.0, |b, ctx| b.on_server_message(ctx, &command, ALICE));
        assert!((server.transform.position.z - 5.0).abs() < 1e-5);
        assert_eq!(server.outbox[0].target, MessageTarget::Peer(ALICE));

        // Duplicate delivery is not applied twice.
        server.with_ctx(0.0, |b, ctx| b.on_server_message(ctx, &command, ALICE));
        assert!((server.transform.position.z - 5.0).abs() < 1e-5);
        assert_eq!(server.outbox.len(), 1);
    }

    #[test]
    fn test_client_predicts_and_reconciles() {
        let mut server = Side::new(Role::Server, SERVER);
        server.behaviour.set_controller(ALICE);
        let mut alice = Side::new(Role::Client, ALICE);

        let assign = bincode::serialize(&MovementPayload::Assign { controller: ALICE.0 }).unwrap();
        alice.with_ctx(0.0, |b, ctx| b.on_client_message(ctx, &assign, SERVER));
        assert!(alice.behaviour.is_predicting());

        // Two sample intervals of held forward input.
        for step in 1..=2 {
            alice.behaviour.accumulate(RawInput::forward(0.1));
            alice.with_ctx(step as f32 * 0.1, |b, ctx| b.on_client_tick(ctx));
        }
        assert_eq!(alice.outbox.len(), 2);
        assert!((alice.transform.position.z - 1.0).abs() < 1e-5);

        // Deliver both commands to the server and the echoes back.
        for message in std::mem::take(&mut alice.outbox) {
            assert_eq!(message.target, MessageTarget::Server);
            server.with_ctx(0.2, |b, ctx| b.on_server_message(ctx, &message.payload, ALICE));
        }
        for echo in std::mem::take(&mut server.outbox) {
            alice.with_ctx(0.2, |b, ctx| b.on_client_message(ctx, &echo.payload, SERVER));
        }

        let predictor = alice.behaviour.predictor().unwrap();
        assert_eq!(predictor.pending_len(), 0);
        assert!(predictor.transform().bit_eq(&server.transform));
        assert!(alice.behaviour.last_desync().unwrap().within(0.0));
    }

    #[test]
    fn test_other_client_does_not_predict() {
        let mut bob = Side::new(Role::Client, BOB);
        let assign = bincode::serialize(&MovementPayload::Assign { controller: ALICE.0 }).unwrap();
        bob.with_ctx(0.0, |b, ctx| b.on_client_message(ctx, &assign, SERVER));
        assert!(!bob.behaviour.is_predicting());
        assert_eq!(bob.behaviour.controller(), Some(ALICE));

        bob.with_ctx(1.0, |b, ctx| b.on_client_tick(ctx));
        assert!(bob.outbox.is_empty());
    }

    #[test]
    fn test_unassigned_client_queries_on_init() {
        let mut bob = Side::new(Role::Client, BOB);
        bob.with_ctx(0.0, |b, ctx| b.on_initialized_client(ctx));
        assert_eq!(bob.outbox.len(), 1);
        assert_eq!(decode(&bob.outbox[0]), MovementPayload::Query);
    }

    #[test]
    fn test_malformed_payload_ignored() {
        let mut server = Side::new(Role::Server, SERVER);
        server.with_ctx(0.0, |b, ctx| b.on_server_message(ctx, &[0xff, 0xff, 0xff, 0xff, 0xff], ALICE));
        assert!(server.outbox.is_empty());
    }
}
