//! Game Layer
//!
//! Hooks game logic plugs into: behaviours attached to replicated entities,
//! the predicted movement stack, and the events each role reports.
//!
//! ## Module Structure
//!
//! - `behaviour`: Behaviour trait, per-entity tables, factories
//! - `input`: Raw input accumulation into sequenced commands
//! - `movement`: Deterministic movement step shared by both sides
//! - `collision`: Static sphere sweeps
//! - `prediction`: Client predictor and server authority
//! - `player_movement`: Stock behaviour wiring prediction to the network
//! - `events`: Session events for game logic

pub mod behaviour;
pub mod collision;
pub mod events;
pub mod input;
pub mod movement;
pub mod player_movement;
pub mod prediction;

// Re-export key types
pub use behaviour::{
    Behaviour, BehaviourContext, BehaviourRegistry, BehaviourTable, InertBehaviour, MessageTarget, OutgoingMessage,
};
pub use collision::{CollisionWorld, Shape, SweepHit, LAYER_ALL, LAYER_PROPS, LAYER_WORLD};
pub use events::{ClientEvent, ServerEvent};
pub use input::{InputAccumulator, InputCommand, RawInput};
pub use movement::{simulate_movement, MovementConfig, MovementModel};
pub use player_movement::{MovementPayload, PlayerMovement, PLAYER_MOVEMENT};
pub use prediction::{ClientPredictor, CommandRejection, ServerAuthority};
