//! Deterministic Movement
//!
//! The one function both the controlling client and the server run for a
//! predicted entity. It is a pure function of `(transform, command)` and the
//! shared constants, so replaying the same commands from the same transform
//! reproduces the same bits on every peer.
//!
//! ## Steps
//!
//! 1. Yaw/pitch from the mouse deltas, pitch clamped away from inversion
//! 2. Planar direction from the four axes, diagonals capped to single-axis length
//! 3. Optional sphere sweep that stops the move short of the first obstruction

use glam::{EulerRot, Quat, Vec3};
use serde::{Deserialize, Serialize};

use crate::core::hash::{Fingerprint, FingerprintHasher};
use crate::core::transform::Transform;
use crate::game::collision::{CollisionWorld, LAYER_ALL};
use crate::game::input::InputCommand;

// =============================================================================
// CONFIG
// =============================================================================

/// Constants shared by every peer simulating a predicted entity.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MovementConfig {
    /// Units per second of held key
    pub speed: f32,
    /// Highest downward-looking pitch, degrees in `[0, 180)`
    pub pitch_limit_low: f32,
    /// Lowest upward-looking pitch, degrees in `(180, 360]`
    pub pitch_limit_high: f32,
    /// Run the collision sweep
    pub collide: bool,
    /// Radius of the swept sphere
    pub collision_radius: f32,
    /// Gap left in front of an obstruction
    pub skin: f32,
    /// Layers the sweep considers
    pub layer_mask: u32,
}

impl Default for MovementConfig {
    fn default() -> Self {
        Self {
            speed: 5.0,
            pitch_limit_low: 90.0,
            pitch_limit_high: 270.0,
            collide: true,
            collision_radius: 0.5,
            skin: 0.05,
            layer_mask: LAYER_ALL,
        }
    }
}

impl MovementConfig {
    /// SHA-256 over every constant, for comparing peers.
    pub fn fingerprint(&self) -> Fingerprint {
        let mut hasher = FingerprintHasher::for_movement();
        hasher.update_f32(self.speed);
        hasher.update_f32(self.pitch_limit_low);
        hasher.update_f32(self.pitch_limit_high);
        hasher.update_bool(self.collide);
        hasher.update_f32(self.collision_radius);
        hasher.update_f32(self.skin);
        hasher.update_u32(self.layer_mask);
        hasher.finalize()
    }
}

// =============================================================================
// MODEL
// =============================================================================

/// Constants plus static geometry.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MovementModel {
    /// Shared constants
    pub config: MovementConfig,
    /// Static geometry for the sweep
    pub world: CollisionWorld,
}

impl MovementModel {
    /// Bundle constants and geometry.
    pub fn new(config: MovementConfig, world: CollisionWorld) -> Self {
        Self { config, world }
    }

    /// Apply one command.
    pub fn apply(&self, transform: &Transform, command: &InputCommand) -> Transform {
        let world = self.config.collide.then_some(&self.world);
        simulate_movement(transform, command, &self.config, world)
    }

    /// Apply commands in order.
    pub fn replay<'a>(
        &self,
        start: &Transform,
        commands: impl IntoIterator<Item = &'a InputCommand>,
    ) -> Transform {
        commands
            .into_iter()
            .fold(*start, |t, command| self.apply(&t, command))
    }
}

/// Clamp a pitch angle (degrees) out of the inverted band.
///
/// Angles wrap into `[0, 360)`. Anything between the low limit and 180 snaps
/// to the low limit; anything between 180 and the high limit snaps to the
/// high limit.
pub fn clamp_pitch(pitch_degrees: f32, low: f32, high: f32) -> f32 {
    let p = pitch_degrees.rem_euclid(360.0);
    if p > low && p <= 180.0 {
        low
    } else if p > 180.0 && p < high {
        high
    } else {
        p
    }
}

/// Direction from the four axis durations, no longer than the longest axis.
pub fn planar_direction(yaw: f32, command: &InputCommand) -> Vec3 {
    let mx = command.right - command.left;
    let mz = command.forward - command.back;
    if mx == 0.0 && mz == 0.0 {
        return Vec3::ZERO;
    }

    let heading = Quat::from_rotation_y(yaw);
    let right = heading * Vec3::X;
    let forward = heading * Vec3::Z;
    let direction = right * mx + forward * mz;

    let cap = mx.abs().max(mz.abs());
    let length = direction.length();
    if length > cap && length > 0.0 {
        direction * (cap / length)
    } else {
        direction
    }
}

/// The shared movement function.
pub fn simulate_movement(
    transform: &Transform,
    command: &InputCommand,
    config: &MovementConfig,
    world: Option<&CollisionWorld>,
) -> Transform {
    let mut next = *transform;

    let (yaw, pitch, _) = transform.rotation.to_euler(EulerRot::YXZ);
    let yaw = yaw + command.mouse_dx.to_radians();
    let pitch_degrees = clamp_pitch(
        pitch.to_degrees() - command.mouse_dy,
        config.pitch_limit_low,
        config.pitch_limit_high,
    );
    next.rotation = Quat::from_euler(EulerRot::YXZ, yaw, pitch_degrees.to_radians(), 0.0);

    let mut displacement = planar_direction(yaw, command) * config.speed;
    let distance = displacement.length();
    if let (Some(world), true) = (world, distance > 0.0) {
        let direction = displacement / distance;
        if let Some(hit) = world.sweep_sphere(
            transform.position,
            direction,
            distance,
            config.collision_radius,
            config.layer_mask,
        ) {
            displacement = direction * (hit.distance - config.skin).max(0.0);
        }
    }

    next.position += displacement;
    next
}

// =============================================================================
// TESTS
// =============================================================================
