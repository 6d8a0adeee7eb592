//! # Replica Net
//!
//! Authoritative entity replication with client-side prediction for
//! peer-hosted sessions.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                          REPLICA NET                             │
//! ├─────────────────────────────────────────────────────────────────┤
//! │  core/              - Leaf primitives                            │
//! │  ├── codec.rs       - Little-endian wire reader/writer           │
//! │  ├── transform.rs   - Position/rotation/scale + desync metric    │
//! │  ├── tasks.rs       - Scheduled continuations                    │
//! │  ├── rng.rs         - Seeded xorshift (simulated loss)           │
//! │  └── hash.rs        - Catalog and constants fingerprints         │
//! │                                                                  │
//! │  replication/       - Server → client entity state               │
//! │  ├── template.rs    - Spawn templates, resource ids              │
//! │  ├── server_registry.rs - Authoritative entities                 │
//! │  ├── scheduler.rs   - Change filter + MTU packing                │
//! │  ├── client_registry.rs - Proxies, lazy spawn, child binding     │
//! │  └── interpolation.rs   - Two-snapshot smoothing                 │
//! │                                                                  │
//! │  game/              - Hooks for game logic                       │
//! │  ├── behaviour.rs   - Per-entity behaviours                      │
//! │  ├── movement.rs    - Deterministic movement step                │
//! │  ├── prediction.rs  - Predict, reconcile, resimulate             │
//! │  └── player_movement.rs - Stock predicted-movement behaviour     │
//! │                                                                  │
//! │  network/           - Session plumbing                           │
//! │  ├── protocol.rs    - Message types and layouts                  │
//! │  ├── router.rs      - Channel → inbox routing                    │
//! │  ├── server.rs      - Barrier, ticks, behaviour dispatch         │
//! │  ├── client.rs      - Handshake, proxies, pings                  │
//! │  └── peer.rs        - One process, one router, both roles        │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Session Flow
//!
//! Every peer sends Initialization to the server peer. Once the senders
//! cover the whole session the server reliably sends a full snapshot and
//! echoes Initialization; from then on it ticks at a fixed rate, sending
//! changed entities unreliably. Clients spawn proxies lazily from the
//! template catalog and smooth them between snapshots.
//!
//! The catalog and the movement constants must be identical on every peer.
//! Both are fingerprinted so peers can compare before a session starts.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod core;
pub mod error;
pub mod game;
pub mod network;
pub mod replication;

// Re-export commonly used types
pub use core::transform::{Desync, Transform};
pub use error::{NetError, NetResult};
pub use game::behaviour::{Behaviour, BehaviourContext, BehaviourRegistry};
pub use game::events::{ClientEvent, ServerEvent};
pub use network::config::NetConfig;
pub use network::memory::{LinkConditions, MemoryNetwork};
pub use network::peer::{Peer, PeerEvents};
pub use network::transport::{PeerId, Transport};
pub use replication::template::{EntityTemplate, TemplateCatalog};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
