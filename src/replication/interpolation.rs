//! Snapshot Interpolation
//!
//! Each remote proxy keeps its two most recent accepted snapshots and renders
//! between them, one snapshot interval behind the server. When the next
//! snapshot is late the entity coasts on its last velocity for at most one
//! tick interval, then settles on the newest snapshot.

use glam::Vec3;

use crate::core::transform::Transform;

/// A timestamped transform.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Snapshot {
    /// Server time the transform was sampled
    pub time: f32,
    /// Parent-local transform
    pub transform: Transform,
}

/// How the last sample was produced.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SamplePhase {
    /// Fewer than two snapshots, or a degenerate interval
    Holding,
    /// Between `last` and `current`
    Interpolating,
    /// Past `current`, within the extrapolation budget
    Extrapolating,
    /// Budget exhausted; holding `current`
    Settled,
}

/// Two-snapshot buffer for one proxy.
#[derive(Clone, Debug, Default)]
pub struct Interpolator {
    last: Option<Snapshot>,
    current: Option<Snapshot>,
    since_current: f32,
}

impl Interpolator {
    /// Accept a newer snapshot.
    ///
    /// If the gap to the previous snapshot is longer than one tick interval
    /// (the entity sat still and produced no sends), the older snapshot's
    /// time is pulled forward so the next motion interpolates over one tick.
    pub fn push(&mut self, snapshot: Snapshot, tick_interval: f32) {
        let mut last = self.current.take();
        if let Some(last) = last.as_mut() {
            last.time = last.time.max(snapshot.time - tick_interval);
        }
        self.last = last;
        self.current = Some(snapshot);
        self.since_current = 0.0;
    }

    /// Newest snapshot.
    pub fn current(&self) -> Option<&Snapshot> {
        self.current.as_ref()
    }

    /// Previous snapshot.
    pub fn last(&self) -> Option<&Snapshot> {
        self.last.as_ref()
    }

    /// Advance by `dt` and produce the render transform.
    pub fn sample(&mut self, dt: f32, tick_interval: f32) -> Option<(Transform, SamplePhase)> {
        self.since_current += dt;
        let current = self.current?;
        let Some(last) = self.last else {
            return Some((current.transform, SamplePhase::Holding));
        };

        let span = current.time - last.time;
        if span <= 0.0 {
            return Some((current.transform, SamplePhase::Holding));
        }

        let factor = self.since_current / span;
        if factor <= 1.0 {
            let t = last.transform.interpolate(&current.transform, factor.max(0.0));
            return Some((t, SamplePhase::Interpolating));
        }

        let overshoot = self.since_current - span;
        if overshoot <= tick_interval {
            let velocity: Vec3 = (current.transform.position - last.transform.position) / span;
            let mut t = current.transform;
            t.position += velocity * overshoot;
            return Some((t, SamplePhase::Extrapolating));
        }

        Some((current.transform, SamplePhase::Settled))
    }
}
