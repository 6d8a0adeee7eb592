//! Session Events
//!
//! What the networking core reports back to game logic after each poll.

use serde::{Deserialize, Serialize};

use crate::network::protocol::NetworkId;
use crate::network::transport::PeerId;
use crate::replication::client_registry::LocalId;

/// Server-side notifications.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ServerEvent {
    /// A peer sent its first Initialization
    PeerReady(PeerId),

    /// The barrier passed; replication is live
    Running,

    /// The barrier timed out and the session started without these peers
    BarrierTimedOut {
        /// Peers that never sent Initialization
        missing: Vec<PeerId>,
    },

    /// A peer initialized after the session was already running
    LateJoin(PeerId),

    /// Every session peer acknowledged a behaviour
    BehaviourInitialized {
        /// Owning entity
        network_id: NetworkId,
        /// Behaviour ordinal
        index: usize,
    },
}

/// Client-side notifications.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum ClientEvent {
    /// The server echoed Initialization; the world is populated
    Initialized,

    /// Game-defined start signal
    StartGame(Vec<u8>),

    /// A proxy was created or a template child was bound
    EntitySpawned {
        /// Server identity
        network_id: NetworkId,
        /// Local handle
        local_id: LocalId,
    },

    /// A proxy was removed
    EntityDestroyed {
        /// Server identity
        network_id: NetworkId,
    },

    /// A ping reply arrived
    PingUpdated {
        /// Round trip in seconds
        ping: f32,
        /// Server tick rate
        server_hz: f32,
    },
}

impl ServerEvent {
    /// Peer the event is about, if any.
    pub fn peer(&self) -> Option<PeerId> {
        match self {
            ServerEvent::PeerReady(peer) | ServerEvent::LateJoin(peer) => Some(*peer),
            _ => None,
        }
    }
}

impl ClientEvent {
    /// Entity the event is about, if any.
    pub fn network_id(&self) -> Option<NetworkId> {
        match self {
            ClientEvent::EntitySpawned { network_id, .. } | ClientEvent::EntityDestroyed { network_id } => {
                Some(*network_id)
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_accessors() {
        assert_eq!(ServerEvent::LateJoin(PeerId(4)).peer(), Some(PeerId(4)));
        assert_eq!(ServerEvent::Running.peer(), None);
        assert_eq!(
            ClientEvent::EntitySpawned {
                network_id: 3,
                local_id: 0
            }
            .network_id(),
            Some(3)
        );
        assert_eq!(ClientEvent::Initialized.network_id(), None);
    }

    #[test]
    fn test_events_serialize() {
        let event = ServerEvent::BarrierTimedOut {
            missing: vec![PeerId(2)],
        };
        let json = serde_json::to_string(&event).unwrap();
        let back: ServerEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back, event);
    }
}
