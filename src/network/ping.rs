//! Clock Synchronisation
//!
//! PingPong gives the client its round trip and the server's tick rate.
//! Entity state timestamps then refine an estimate of the server clock:
//! `offset = server_time + ping / 2 - local_now`, smoothed with an
//! exponential moving average.

use tracing::trace;

use super::protocol::PingReply;

/// Smoothing factor for the clock offset.
pub const OFFSET_SMOOTHING: f32 = 0.1;

/// Client clock estimate.
#[derive(Debug, Clone)]
pub struct ClockSync {
    ping: f32,
    server_hz: Option<f32>,
    offset: Option<f32>,
    fallback_hz: f32,
}

impl ClockSync {
    /// Start with no samples. `fallback_hz` is used until a reply arrives.
    pub fn new(fallback_hz: f32) -> Self {
        Self {
            ping: 0.0,
            server_hz: None,
            offset: None,
            fallback_hz,
        }
    }

    /// Accept a reply received at local time `now`. Returns `(ping, hz)`,
    /// or `None` for a reply that is from the future or otherwise garbage.
    pub fn on_reply(&mut self, reply: &PingReply, now: f32) -> Option<(f32, f32)> {
        let ping = now - reply.echoed_time;
        if !ping.is_finite() || ping < 0.0 {
            trace!(ping, "Discarding ping reply");
            return None;
        }
        self.ping = ping;
        if reply.tick_hz.is_finite() && reply.tick_hz > 0.0 {
            self.server_hz = Some(reply.tick_hz);
        }
        Some((ping, self.server_hz()))
    }

    /// Fold one server timestamp observed at local time `now` into the offset.
    pub fn observe_server_time(&mut self, server_time: f32, now: f32) {
        let sample = server_time + self.ping / 2.0 - now;
        if !sample.is_finite() {
            return;
        }
        self.offset = Some(match self.offset {
            Some(offset) => offset + OFFSET_SMOOTHING * (sample - offset),
            None => sample,
        });
    }

    /// Latest round trip, seconds.
    pub fn ping(&self) -> f32 {
        self.ping
    }

    /// Server tick rate, or the fallback before the first reply.
    pub fn server_hz(&self) -> f32 {
        self.server_hz.unwrap_or(self.fallback_hz)
    }

    /// One server tick, seconds.
    pub fn tick_interval(&self) -> f32 {
        1.0 / self.server_hz().max(f32::EPSILON)
    }

    /// Smoothed clock offset, if any state has been observed.
    pub fn offset(&self) -> Option<f32> {
        self.offset
    }
}
