//! Prediction and Reconciliation
//!
//! The controlling client applies each command locally the moment it is
//! sampled and keeps it until the server echoes a result for that sequence
//! id or a newer one. On an echo it snaps to the authoritative transform and
//! replays every command still outstanding, so the predicted transform is
//! always "authoritative as of the last ack plus every unacknowledged input".
//!
//! The server side only has to guard ordering: commands arrive unreliable and
//! may be duplicated or reordered, and each sequence id is applied at most
//! once.

use std::collections::VecDeque;
use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, trace};

use crate::core::transform::{Desync, Transform};
use crate::game::input::{InputAccumulator, InputCommand, RawInput};
use crate::game::movement::MovementModel;

/// Outstanding predictions kept before the oldest is discarded.
pub const MAX_PENDING_COMMANDS: usize = 256;

/// A command and the transform it produced locally.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PredictedSample {
    /// Command as sent
    pub command: InputCommand,
    /// Local result after applying it
    pub predicted: Transform,
}

// =============================================================================
// CLIENT
// =============================================================================

/// Client-side predictor for one controlled entity.
#[derive(Debug)]
pub struct ClientPredictor {
    model: Arc<MovementModel>,
    accumulator: InputAccumulator,
    pending: VecDeque<PredictedSample>,
    transform: Transform,
    last_acked: Option<u32>,
    last_desync: Option<Desync>,
}

impl ClientPredictor {
    /// Start predicting from `start`.
    pub fn new(model: Arc<MovementModel>, start: Transform) -> Self {
        Self {
            model,
            accumulator: InputAccumulator::new(),
            pending: VecDeque::new(),
            transform: start,
            last_acked: None,
            last_desync: None,
        }
    }

    /// Fold one frame of raw input into the next command.
    pub fn accumulate(&mut self, raw: RawInput) {
        self.accumulator.accumulate(raw);
    }

    /// Close the current sampling interval: build the command, apply it
    /// locally and remember the prediction. The caller ships the command.
    pub fn sample(&mut self) -> InputCommand {
        let command = self.accumulator.take();
        self.predict(command)
    }

    /// Apply an already-built command locally.
    pub fn predict(&mut self, command: InputCommand) -> InputCommand {
        self.transform = self.model.apply(&self.transform, &command);
        self.pending.push_back(PredictedSample {
            command,
            predicted: self.transform,
        });
        if self.pending.len() > MAX_PENDING_COMMANDS {
            self.pending.pop_front();
        }
        command
    }

    /// Accept the server's result for `sequence`.
    ///
    /// Echoes at or below the last acknowledged id are ignored and return
    /// `None`. Otherwise every prediction up to `sequence` is discarded, the
    /// remainder is replayed on top of `authoritative`, and the desync
    /// measured against the local sample for `sequence` is returned (zero if
    /// that sample was already evicted).
    pub fn reconcile(&mut self, sequence: u32, authoritative: &Transform) -> Option<Desync> {
        if self.last_acked.is_some_and(|acked| sequence <= acked) {
            trace!(sequence, "Ignoring superseded echo");
            return None;
        }

        let desync = self
            .pending
            .iter()
            .find(|s| s.command.sequence == sequence)
            .map(|s| Desync::between(authoritative, &s.predicted))
            .unwrap_or_default();

        while self
            .pending
            .front()
            .is_some_and(|s| s.command.sequence <= sequence)
        {
            self.pending.pop_front();
        }

        // Replay in sequence order, refreshing each stored prediction so the
        // next echo is measured against the corrected path.
        let mut transform = *authoritative;
        for sample in self.pending.iter_mut() {
            transform = self.model.apply(&transform, &sample.command);
            sample.predicted = transform;
        }
        self.transform = transform;

        if !desync.within(1e-4) {
            debug!(
                sequence,
                position = desync.position,
                rotation = desync.rotation_degrees,
                replayed = self.pending.len(),
                "Prediction diverged"
            );
        }
        self.last_acked = Some(sequence);
        self.last_desync = Some(desync);
        Some(desync)
    }

    /// Current predicted transform.
    pub fn transform(&self) -> &Transform {
        &self.transform
    }

    /// Commands not yet acknowledged.
    pub fn pending(&self) -> impl Iterator<Item = &PredictedSample> {
        self.pending.iter()
    }

    /// Number of unacknowledged commands.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Highest acknowledged sequence id.
    pub fn last_acked(&self) -> Option<u32> {
        self.last_acked
    }

    /// Desync measured at the most recent accepted echo.
    pub fn last_desync(&self) -> Option<Desync> {
        self.last_desync
    }

    /// Shared movement model.
    pub fn model(&self) -> &MovementModel {
        &self.model
    }
}

// =============================================================================
// SERVER
// =============================================================================

/// Why the server refused a command.
#[derive(Debug, Clone, Copy, PartialEq, Error)]
pub enum CommandRejection {
    /// Sequence id not newer than the last applied one
    #[error("stale command {sequence} (last applied {last})")]
    Stale {
        /// Received id
        sequence: u32,
        /// Last applied id
        last: u32,
    },
    /// NaN or infinite field
    #[error("non-finite command {0}")]
    NonFinite(u32),
}

/// Server-side command gate for one controlled entity.
#[derive(Debug, Default, Clone, Copy)]
pub struct ServerAuthority {
    last_applied: Option<u32>,
}

impl ServerAuthority {
    /// Apply `command` to the authoritative transform if it is newer than
    /// everything applied so far.
    pub fn apply(
        &mut self,
        model: &MovementModel,
        transform: &mut Transform,
        command: &InputCommand,
    ) -> Result<(), CommandRejection> {
        if let Some(last) = self.last_applied {
            if command.sequence <= last {
                return Err(CommandRejection::Stale {
                    sequence: command.sequence,
                    last,
                });
            }
        }
        if !command.is_finite() {
            return Err(CommandRejection::NonFinite(command.sequence));
        }
        *transform = model.apply(transform, command);
        self.last_applied = Some(command.sequence);
        Ok(())
    }

    /// Last applied sequence id.
    pub fn last_applied(&self) -> Option<u32> {
        self.last_applied
    }
}

// =============================================================================
// TESTS
// =============================================================================
