//! Content Fingerprints
//!
//! SHA-256 digests over content that every peer must agree on: the template
//! catalog (routing depends on identical resource ids) and the movement
//! constants (prediction depends on identical simulation). Peers log and
//! compare the fingerprints instead of shipping the content itself.

use sha2::{Digest, Sha256};

/// Fingerprint output (256 bits / 32 bytes)
pub type Fingerprint = [u8; 32];

/// Domain-separated hasher with little-endian field helpers.
///
/// Update order is part of the fingerprint.
pub struct FingerprintHasher {
    hasher: Sha256,
}

impl FingerprintHasher {
    /// Create a new hasher with a domain separator.
    pub fn new(domain: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(domain);
        Self { hasher }
    }

    /// Hasher for template catalogs.
    pub fn for_catalog() -> Self {
        Self::new(b"REPLICA_CATALOG_V1")
    }

    /// Hasher for movement constants.
    pub fn for_movement() -> Self {
        Self::new(b"REPLICA_MOVEMENT_V1")
    }

    /// Update with raw bytes.
    #[inline]
    pub fn update_bytes(&mut self, bytes: &[u8]) {
        self.hasher.update(bytes);
    }

    /// Update with a u32 value (little-endian).
    #[inline]
    pub fn update_u32(&mut self, value: u32) {
        self.hasher.update(value.to_le_bytes());
    }

    /// Update with an i32 value (little-endian).
    #[inline]
    pub fn update_i32(&mut self, value: i32) {
        self.hasher.update(value.to_le_bytes());
    }

    /// Update with the bit pattern of an f32.
    #[inline]
    pub fn update_f32(&mut self, value: f32) {
        self.update_u32(value.to_bits());
    }

    /// Update with a boolean.
    #[inline]
    pub fn update_bool(&mut self, value: bool) {
        self.hasher.update([u8::from(value)]);
    }

    /// Update with a length-prefixed string.
    pub fn update_str(&mut self, value: &str) {
        self.update_u32(value.len() as u32);
        self.hasher.update(value.as_bytes());
    }

    /// Finalize and return the fingerprint.
    pub fn finalize(self) -> Fingerprint {
        self.hasher.finalize().into()
    }
}

/// First eight bytes as lowercase hex, for log lines.
pub fn short_hex(fingerprint: &Fingerprint) -> String {
    hex::encode(&fingerprint[..8])
}

// =============================================================================
// TESTS
// =============================================================================
