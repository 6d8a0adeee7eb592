//! Session Handshake
//!
//! The server collects Initialization senders until the set covers every
//! session peer, then goes live. An optional timeout starts the session with
//! whoever is ready; anyone arriving afterwards is handled as a late joiner.

use std::collections::BTreeSet;

use tracing::{debug, info, warn};

use super::transport::PeerId;

/// Server handshake state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeState {
    /// No Initialization received yet
    Connecting,
    /// At least one peer is ready, not all
    AwaitingAllClientsReady,
    /// Replication is live
    Running,
}

/// What a received Initialization means for the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadyOutcome {
    /// Recorded; the barrier still waits on `missing`
    Waiting {
        /// Session peers not yet ready
        missing: Vec<PeerId>,
    },
    /// This peer completed the set; the session is now running
    BarrierPassed,
    /// First Initialization from this peer after the session went live
    LateJoin,
    /// Duplicate from a peer already counted while running
    AlreadyReady,
}

/// Server side of the barrier.
#[derive(Debug, Clone)]
pub struct ServerHandshake {
    state: HandshakeState,
    ready: BTreeSet<PeerId>,
    barrier_timeout: Option<f32>,
    waiting_since: Option<f32>,
}

impl ServerHandshake {
    /// Create a handshake. `barrier_timeout` of `None` waits forever.
    pub fn new(barrier_timeout: Option<f32>) -> Self {
        Self {
            state: HandshakeState::Connecting,
            ready: BTreeSet::new(),
            barrier_timeout,
            waiting_since: None,
        }
    }

    /// Current state.
    pub fn state(&self) -> HandshakeState {
        self.state
    }

    /// True once the barrier has passed.
    pub fn is_running(&self) -> bool {
        self.state == HandshakeState::Running
    }

    /// Peers that have sent Initialization.
    pub fn ready(&self) -> &BTreeSet<PeerId> {
        &self.ready
    }

    /// True if `peer` has sent Initialization.
    pub fn is_ready(&self, peer: PeerId) -> bool {
        self.ready.contains(&peer)
    }

    /// Record an Initialization from `peer` against the current session.
    pub fn record_ready(&mut self, peer: PeerId, session: &BTreeSet<PeerId>, now: f32) -> ReadyOutcome {
        let newly_ready = self.ready.insert(peer);

        if self.state == HandshakeState::Running {
            return if newly_ready {
                info!(%peer, "Late Initialization");
                ReadyOutcome::LateJoin
            } else {
                ReadyOutcome::AlreadyReady
            };
        }

        if self.state == HandshakeState::Connecting {
            self.state = HandshakeState::AwaitingAllClientsReady;
            self.waiting_since = Some(now);
        }

        let missing = self.missing(session);
        if missing.is_empty() && !session.is_empty() {
            info!(ready = self.ready.len(), "All session peers ready");
            self.state = HandshakeState::Running;
            return ReadyOutcome::BarrierPassed;
        }

        if newly_ready {
            debug!(%peer, waiting_on = missing.len(), "Peer ready");
        }
        ReadyOutcome::Waiting { missing }
    }

    /// Start without the stragglers once the barrier timeout has elapsed.
    ///
    /// Returns the peers left out if this call started the session. Nothing
    /// happens while no peer at all is ready.
    pub fn check_timeout(&mut self, session: &BTreeSet<PeerId>, now: f32) -> Option<Vec<PeerId>> {
        if self.state != HandshakeState::AwaitingAllClientsReady {
            return None;
        }
        let (timeout, since) = (self.barrier_timeout?, self.waiting_since?);
        if now - since < timeout {
            return None;
        }
        if !session.iter().any(|p| self.ready.contains(p)) {
            return None;
        }

        let missing = self.missing(session);
        warn!(?missing, timeout, "Barrier timed out; starting with ready peers");
        self.state = HandshakeState::Running;
        Some(missing)
    }

    /// Session peers that have not sent Initialization.
    pub fn missing(&self, session: &BTreeSet<PeerId>) -> Vec<PeerId> {
        session.difference(&self.ready).copied().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(ids: &[u64]) -> BTreeSet<PeerId> {
        ids.iter().map(|id| PeerId(*id)).collect()
    }

    #[test]
    fn test_barrier_requires_every_peer() {
        let peers = session(&[1, 2, 3]);
        let mut hs = ServerHandshake::new(None);
        assert_eq!(hs.state(), HandshakeState::Connecting);

        assert_eq!(
            hs.record_ready(PeerId(2), &peers, 0.0),
            ReadyOutcome::Waiting {
                missing: vec![PeerId(1), PeerId(3)]
            }
        );
        assert_eq!(hs.state(), HandshakeState::AwaitingAllClientsReady);

        // Duplicates are harmless.
        assert!(matches!(hs.record_ready(PeerId(2), &peers, 0.5), ReadyOutcome::Waiting { .. }));
        assert!(matches!(hs.record_ready(PeerId(1), &peers, 1.0), ReadyOutcome::Waiting { .. }));
        assert_eq!(hs.record_ready(PeerId(3), &peers, 1.5), ReadyOutcome::BarrierPassed);
        assert!(hs.is_running());
    }

    #[test]
    fn test_barrier_uses_session_at_time_of_message() {
        let mut hs = ServerHandshake::new(None);
        hs.record_ready(PeerId(1), &session(&[1, 2]), 0.0);
        // Peer 2 left before anyone else reported.
        assert_eq!(hs.record_ready(PeerId(1), &session(&[1]), 1.0), ReadyOutcome::BarrierPassed);
    }

    #[test]
    fn test_late_join_after_running() {
        let mut hs = ServerHandshake::new(None);
        hs.record_ready(PeerId(1), &session(&[1]), 0.0);
        assert!(hs.is_running());

        let grown = session(&[1, 2]);
        assert_eq!(hs.record_ready(PeerId(2), &grown, 5.0), ReadyOutcome::LateJoin);
        assert_eq!(hs.record_ready(PeerId(2), &grown, 5.5), ReadyOutcome::AlreadyReady);
    }

    #[test]
    fn test_timeout_starts_with_ready_subset() {
        let peers = session(&[1, 2, 3]);
        let mut hs = ServerHandshake::new(Some(30.0));
        hs.record_ready(PeerId(1), &peers, 10.0);

        assert_eq!(hs.check_timeout(&peers, 39.0), None);
        assert_eq!(hs.check_timeout(&peers, 40.0), Some(vec![PeerId(2), PeerId(3)]));
        assert!(hs.is_running());
        assert_eq!(hs.check_timeout(&peers, 41.0), None);
    }

    #[test]
    fn test_no_timeout_without_ready_peers_or_limit() {
        let peers = session(&[1, 2]);
        let mut hs = ServerHandshake::new(Some(1.0));
        assert_eq!(hs.check_timeout(&peers, 100.0), None);

        let mut forever = ServerHandshake::new(None);
        forever.record_ready(PeerId(1), &peers, 0.0);
        assert_eq!(forever.check_timeout(&peers, 1.0e6), None);
        assert!(!forever.is_running());
    }
}
