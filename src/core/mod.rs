//! Core primitives.
//!
//! Leaf types with no knowledge of sessions or entities: the wire codec,
//! transforms, the scheduled-task queue, fingerprints and the deterministic RNG.

pub mod codec;
pub mod hash;
pub mod rng;
pub mod tasks;
pub mod transform;

// Re-export core types
pub use codec::{CodecError, WireDecode, WireEncode, WireReader, WireWriter};
pub use hash::{Fingerprint, FingerprintHasher};
pub use rng::DeterministicRng;
pub use tasks::{TaskId, TaskQueue};
pub use transform::{Desync, Transform};
