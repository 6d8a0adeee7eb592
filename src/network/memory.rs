//! In-Memory Transport
//!
//! A session hub shared by any number of in-process endpoints. Reliable
//! datagrams are never dropped and keep their order per sender/receiver pair.
//! Unreliable datagrams are lost or swapped with their predecessor according
//! to seeded [`LinkConditions`], so lossy runs are reproducible.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use super::protocol::DeliveryMode;
use super::transport::{Datagram, PeerId, Transport};
use crate::core::rng::DeterministicRng;

/// Simulated link quality for unreliable sends.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConditions {
    /// Probability an unreliable datagram is lost
    pub unreliable_loss: f32,
    /// Probability an unreliable datagram overtakes the one queued before it
    pub unreliable_reorder: f32,
    /// Seed for the loss/reorder RNG
    pub seed: u64,
}

impl Default for LinkConditions {
    fn default() -> Self {
        Self {
            unreliable_loss: 0.0,
            unreliable_reorder: 0.0,
            seed: 0x5EED,
        }
    }
}

/// Counters for everything that crossed the hub.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkStats {
    /// Datagrams accepted for delivery
    pub delivered: u64,
    /// Unreliable datagrams lost by simulation
    pub dropped: u64,
    /// Sends refused (oversized, unknown peer, sender not in session)
    pub rejected: u64,
    /// Total accepted payload bytes
    pub bytes: u64,
}

#[derive(Debug)]
struct Hub {
    server: PeerId,
    inboxes: BTreeMap<PeerId, VecDeque<Queued>>,
    rng: DeterministicRng,
    conditions: LinkConditions,
    stats: LinkStats,
}

#[derive(Debug)]
struct Queued {
    datagram: Datagram,
    reliable: bool,
}

/// Shared session hub. Cheap to clone.
#[derive(Debug, Clone)]
pub struct MemoryNetwork {
    hub: Arc<Mutex<Hub>>,
}

impl MemoryNetwork {
    /// Create a session whose server role is hosted by `server`.
    pub fn new(server: PeerId, conditions: LinkConditions) -> Self {
        let rng = DeterministicRng::new(conditions.seed);
        Self {
            hub: Arc::new(Mutex::new(Hub {
                server,
                inboxes: BTreeMap::new(),
                rng,
                conditions,
                stats: LinkStats::default(),
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Hub> {
        self.hub.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Add `peer` to the session and return its endpoint.
    pub fn join(&self, peer: PeerId) -> MemoryTransport {
        self.lock().inboxes.entry(peer).or_default();
        debug!(%peer, "Peer joined memory session");
        MemoryTransport {
            peer,
            network: self.clone(),
        }
    }

    /// Remove `peer` from the session, discarding anything queued for it.
    pub fn disconnect(&self, peer: PeerId) {
        if self.lock().inboxes.remove(&peer).is_some() {
            debug!(%peer, "Peer left memory session");
        }
    }

    /// Current session members.
    pub fn members(&self) -> BTreeSet<PeerId> {
        self.lock().inboxes.keys().copied().collect()
    }

    /// Replace the link conditions (the RNG keeps its position).
    pub fn set_conditions(&self, conditions: LinkConditions) {
        self.lock().conditions = conditions;
    }

    /// Snapshot of the hub counters.
    pub fn stats(&self) -> LinkStats {
        self.lock().stats
    }

    /// Datagrams waiting for `peer`.
    pub fn pending(&self, peer: PeerId) -> usize {
        self.lock().inboxes.get(&peer).map_or(0, VecDeque::len)
    }

    fn send(&self, from: PeerId, to: PeerId, bytes: &[u8], channel: u8, mode: DeliveryMode) -> bool {
        let mut hub = self.lock();
        let hub = &mut *hub;

        if bytes.len() > mode.max_payload() || !hub.inboxes.contains_key(&from) {
            hub.stats.rejected += 1;
            return false;
        }
        let Some(inbox) = hub.inboxes.get_mut(&to) else {
            hub.stats.rejected += 1;
            return false;
        };

        let reliable = mode == DeliveryMode::ReliableOrdered;
        if !reliable && hub.rng.chance(hub.conditions.unreliable_loss) {
            hub.stats.dropped += 1;
            trace!(%from, %to, channel, "Simulated loss");
            return true;
        }

        let queued = Queued {
            datagram: Datagram {
                sender: from,
                channel,
                bytes: bytes.to_vec(),
                len: bytes.len(),
            },
            reliable,
        };

        let overtake = !reliable
            && !inbox.is_empty()
            && hub.rng.chance(hub.conditions.unreliable_reorder);
        if overtake {
            inbox.insert(inbox.len() - 1, queued);
        } else {
            inbox.push_back(queued);
        }

        hub.stats.delivered += 1;
        hub.stats.bytes += bytes.len() as u64;
        true
    }

    fn receive(&self, peer: PeerId) -> Option<Datagram> {
        let mut hub = self.lock();
        hub.inboxes
            .get_mut(&peer)?
            .pop_front()
            .map(|queued| queued.datagram)
    }
}

/// One peer's endpoint on a [`MemoryNetwork`].
#[derive(Debug, Clone)]
pub struct MemoryTransport {
    peer: PeerId,
    network: MemoryNetwork,
}

impl MemoryTransport {
    /// The hub this endpoint belongs to.
    pub fn network(&self) -> &MemoryNetwork {
        &self.network
    }
}

impl Transport for MemoryTransport {
    fn send_unicast(&mut self, peer: PeerId, bytes: &[u8], channel: u8, mode: DeliveryMode) -> bool {
        self.network.send(self.peer, peer, bytes, channel, mode)
    }

    fn poll_receive(&mut self) -> Option<Datagram> {
        self.network.receive(self.peer)
    }

    fn session_peer_ids(&self) -> BTreeSet<PeerId> {
        self.network.members()
    }

    fn local_peer_id(&self) -> PeerId {
        self.peer
    }

    fn server_peer_id(&self) -> PeerId {
        self.network.lock().server
    }
}
