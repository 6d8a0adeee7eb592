//! Network Layer
//!
//! Everything between the transport and the replication core: wire
//! messages, channel routing, the ready barrier, clock sync and the two
//! session roles.
//!
//! ## Module Structure
//!
//! - `protocol`: Message types, delivery modes, binary layouts
//! - `transport`: The boundary the game's networking backend implements
//! - `memory`: In-process transport with simulated loss
//! - `router`: Channel demultiplexing into typed inboxes
//! - `handshake`: Server ready barrier
//! - `ping`: Round trip and server clock estimate
//! - `server` / `client`: The two roles
//! - `peer`: One process hosting a client and maybe the server
//! - `config`: Serde-loadable settings with env overrides

pub mod client;
pub mod config;
pub mod handshake;
pub mod memory;
pub mod peer;
pub mod ping;
pub mod protocol;
pub mod router;
pub mod server;
pub mod transport;

pub use client::{ClientConfig, GameClient};
pub use config::{ConfigError, NetConfig};
pub use handshake::{HandshakeState, ReadyOutcome, ServerHandshake};
pub use memory::{LinkConditions, LinkStats, MemoryNetwork, MemoryTransport};
pub use peer::{Peer, PeerEvents};
pub use ping::ClockSync;
pub use protocol::{
    BehaviourInitialized, BehaviourMessage, DeliveryMode, DestroyEntity, EntityState, EntityStateList, MessageType,
    NetworkId, PingReply, PingRequest, ResourceId, RELIABLE_MTU, UNRELIABLE_MTU,
};
pub use router::{Inbound, Inbox, MessageRouter, Role, RouterError};
pub use server::{GameServer, ServerConfig};
pub use transport::{Datagram, PeerId, Transport};
