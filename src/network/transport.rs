//! Transport Boundary
//!
//! The peer-to-peer session service is external. The core only needs unicast
//! sends on numbered channels in two delivery modes, a view of who is in the
//! session, and a poll point where received datagrams are handed over.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use super::protocol::DeliveryMode;

/// Session participant identity (platform account id).
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PeerId(pub u64);

impl fmt::Debug for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "peer:{}", self.0)
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A received datagram.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Datagram {
    /// Originating peer
    pub sender: PeerId,
    /// Channel the datagram arrived on
    pub channel: u8,
    /// Receive buffer (may be larger than the payload)
    pub bytes: Vec<u8>,
    /// Reported payload length
    pub len: usize,
}

impl Datagram {
    /// Payload trimmed to the reported length.
    pub fn payload(&self) -> &[u8] {
        &self.bytes[..self.len.min(self.bytes.len())]
    }
}

/// Unicast datagram service shared by the client and server roles.
pub trait Transport {
    /// Send `bytes` to `peer` on `channel`. Returns false on failure.
    fn send_unicast(&mut self, peer: PeerId, bytes: &[u8], channel: u8, mode: DeliveryMode) -> bool;

    /// Next received datagram, if any.
    fn poll_receive(&mut self) -> Option<Datagram>;

    /// Everyone currently in the session, including the local peer.
    fn session_peer_ids(&self) -> BTreeSet<PeerId>;

    /// This process's identity.
    fn local_peer_id(&self) -> PeerId;

    /// The peer hosting the server role.
    fn server_peer_id(&self) -> PeerId;
}
