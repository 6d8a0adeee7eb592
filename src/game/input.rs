//! Input Capture and Accumulation
//!
//! Raw per-frame input is folded into an accumulator and emitted as one
//! `InputCommand` per sampling interval. Mouse deltas are summed in degrees;
//! directional keys are summed as seconds held, so the movement function
//! scales distance by how long each key was down during the interval.

use serde::{Deserialize, Serialize};

// =============================================================================
// INPUT TYPES
// =============================================================================

/// One frame of raw control state from the game.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct RawInput {
    /// Frame duration in seconds
    pub dt: f32,
    /// Horizontal mouse motion this frame (degrees of yaw)
    pub mouse_dx: f32,
    /// Vertical mouse motion this frame (degrees of pitch)
    pub mouse_dy: f32,
    /// Forward key held
    pub forward: bool,
    /// Back key held
    pub back: bool,
    /// Strafe-left key held
    pub left: bool,
    /// Strafe-right key held
    pub right: bool,
}

impl RawInput {
    /// No keys, no mouse motion.
    pub fn idle(dt: f32) -> Self {
        Self {
            dt,
            ..Self::default()
        }
    }

    /// Forward held for `dt`.
    pub fn forward(dt: f32) -> Self {
        Self {
            dt,
            forward: true,
            ..Self::default()
        }
    }
}

/// Accumulated control deltas for one sampling interval.
///
/// Sequence ids are assigned by the controlling client, start at 1 and are
/// never reused.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct InputCommand {
    /// Monotonic per controlling client
    pub sequence: u32,
    /// Summed yaw delta in degrees
    pub mouse_dx: f32,
    /// Summed pitch delta in degrees
    pub mouse_dy: f32,
    /// Seconds forward was held
    pub forward: f32,
    /// Seconds back was held
    pub back: f32,
    /// Seconds left was held
    pub left: f32,
    /// Seconds right was held
    pub right: f32,
}

impl InputCommand {
    /// Command with only forward motion, mostly for tests and demos.
    pub fn forward(sequence: u32, seconds: f32) -> Self {
        Self {
            sequence,
            forward: seconds,
            ..Self::default()
        }
    }

    /// True if applying this command cannot change a transform.
    #[inline]
    pub fn is_idle(&self) -> bool {
        self.mouse_dx == 0.0
            && self.mouse_dy == 0.0
            && self.forward == 0.0
            && self.back == 0.0
            && self.left == 0.0
            && self.right == 0.0
    }

    /// True if every field is finite. Non-finite commands are rejected by
    /// the server before they reach the movement function.
    pub fn is_finite(&self) -> bool {
        [
            self.mouse_dx,
            self.mouse_dy,
            self.forward,
            self.back,
            self.left,
            self.right,
        ]
        .iter()
        .all(|v| v.is_finite())
    }
}

// =============================================================================
// ACCUMULATOR
// =============================================================================

/// Folds raw frames into commands and hands out sequence ids.
#[derive(Clone, Debug, Default)]
pub struct InputAccumulator {
    pending: InputCommand,
    last_sequence: u32,
}

impl InputAccumulator {
    /// Create an accumulator whose first command gets sequence 1.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one frame of raw input.
    pub fn accumulate(&mut self, raw: RawInput) {
        let dt = raw.dt.max(0.0);
        let held = |down: bool| if down { dt } else { 0.0 };

        self.pending.mouse_dx += raw.mouse_dx;
        self.pending.mouse_dy += raw.mouse_dy;
        self.pending.forward += held(raw.forward);
        self.pending.back += held(raw.back);
        self.pending.left += held(raw.left);
        self.pending.right += held(raw.right);
    }

    /// Emit everything accumulated since the last call under a fresh
    /// sequence id and reset.
    pub fn take(&mut self) -> InputCommand {
        self.last_sequence = self.last_sequence.wrapping_add(1);
        let mut command = std::mem::take(&mut self.pending);
        command.sequence = self.last_sequence;
        command
    }

    /// Sequence id of the most recent command.
    pub fn last_sequence(&self) -> u32 {
        self.last_sequence
    }

    /// True if nothing has been accumulated since the last `take`.
    pub fn is_idle(&self) -> bool {
        self.pending.is_idle()
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accumulate_sums_held_time() {
        let mut acc = InputAccumulator::new();
        acc.accumulate(RawInput::forward(0.25));
        acc.accumulate(RawInput {
            dt: 0.5,
            mouse_dx: 3.0,
            left: true,
            forward: true,
            ..RawInput::default()
        });
        acc.accumulate(RawInput::idle(1.0));

        let cmd = acc.take();
        assert_eq!(cmd.sequence, 1);
        assert_eq!(cmd.forward, 0.75);
        assert_eq!(cmd.left, 0.5);
        assert_eq!(cmd.right, 0.0);
        assert_eq!(cmd.mouse_dx, 3.0);
    }

    #[test]
    fn test_take_resets_and_increments() {
        let mut acc = InputAccumulator::new();
        acc.accumulate(RawInput::forward(0.1));
        assert!(!acc.is_idle());

        let first = acc.take();
        assert!(acc.is_idle());

        let second = acc.take();
        assert_eq!(first.sequence, 1);
        assert_eq!(second.sequence, 2);
        assert!(second.is_idle());
        assert_eq!(acc.last_sequence(), 2);
    }

    #[test]
    fn test_negative_dt_ignored() {
        let mut acc = InputAccumulator::new();
        acc.accumulate(RawInput::forward(-1.0));
        assert_eq!(acc.take().forward, 0.0);
    }

    #[test]
    fn test_is_finite() {
        assert!(InputCommand::forward(1, 0.1).is_finite());
        let bad = InputCommand {
            mouse_dx: f32::NAN,
            ..InputCommand::default()
        };
        assert!(!bad.is_finite());
    }

    #[test]
    fn test_command_bincode_roundtrip() {
        let cmd = InputCommand {
            sequence: 7,
            mouse_dx: 1.5,
            mouse_dy: -2.0,
            forward: 0.1,
            back: 0.0,
            left: 0.05,
            right: 0.0,
        };
        let bytes = bincode::serialize(&cmd).unwrap();
        let back: InputCommand = bincode::deserialize(&bytes).unwrap();
        assert_eq!(back, cmd);
    }
}
