//! Little-Endian Wire Codec
//!
//! Fixed-size fields are concatenated in declaration order with no padding.
//! Variable-size fields (strings, byte payloads) carry a 4-byte little-endian
//! length prefix and nothing else. Floats are IEEE-754 single precision and
//! rotations are written as four floats in `x, y, z, w` order (16 bytes).
//!
//! Encoding is total. Decoding never panics: any read past the end of the
//! buffer yields [`CodecError::MalformedMessage`].

use glam::{Quat, Vec3};
use thiserror::Error;

/// Size of a variable-length field's length prefix.
pub const LEN_PREFIX: usize = 4;

/// Encoded size of a [`Vec3`].
pub const VEC3_LEN: usize = 12;

/// Encoded size of a [`Quat`].
pub const QUAT_LEN: usize = 16;

/// Decode failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    /// A fixed field or a declared length would read past the buffer end.
    #[error("malformed message: need {needed} bytes at offset {offset}, buffer holds {len}")]
    MalformedMessage {
        /// Read position when the overrun was detected
        offset: usize,
        /// Bytes the field required
        needed: usize,
        /// Total buffer length
        len: usize,
    },

    /// A string field did not hold UTF-8.
    #[error("malformed message: invalid UTF-8 string at offset {offset}")]
    InvalidUtf8 {
        /// Start of the string bytes
        offset: usize,
    },

    /// A length-delimited record did not consume exactly its declared bytes.
    #[error("malformed message: record declared {declared} bytes but consumed {consumed}")]
    LengthMismatch {
        /// Declared length
        declared: usize,
        /// Bytes actually consumed by the inner decode
        consumed: usize,
    },
}

// =============================================================================
// ENCODE / DECODE TRAITS
// =============================================================================

/// A record with a fixed binary layout.
pub trait WireEncode {
    /// Append the encoded record to `w`.
    fn encode(&self, w: &mut WireWriter);

    /// Exact number of bytes [`WireEncode::encode`] appends.
    fn encoded_len(&self) -> usize;

    /// Encode into a fresh buffer.
    fn to_bytes(&self) -> Vec<u8> {
        let mut w = WireWriter::with_capacity(self.encoded_len());
        self.encode(&mut w);
        w.into_bytes()
    }
}

/// A record that can be read back from its binary layout.
pub trait WireDecode: Sized {
    /// Read one record from the reader's current position.
    fn decode(r: &mut WireReader<'_>) -> Result<Self, CodecError>;

    /// Decode starting at `offset`, returning the record and bytes consumed.
    fn decode_at(bytes: &[u8], offset: usize) -> Result<(Self, usize), CodecError> {
        let mut r = WireReader::at(bytes, offset)?;
        let value = Self::decode(&mut r)?;
        Ok((value, r.position() - offset))
    }

    /// Decode from the start of `bytes`, ignoring trailing bytes.
    fn from_bytes(bytes: &[u8]) -> Result<Self, CodecError> {
        Self::decode_at(bytes, 0).map(|(value, _)| value)
    }
}

// =============================================================================
// WRITER
// =============================================================================

/// Growable little-endian byte writer.
#[derive(Debug, Default, Clone)]
pub struct WireWriter {
    buf: Vec<u8>,
}

impl WireWriter {
    /// Create an empty writer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a writer with preallocated capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: Vec::with_capacity(capacity),
        }
    }

    /// Bytes written so far.
    #[inline]
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// True if nothing has been written.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Borrow the written bytes.
    pub fn as_slice(&self) -> &[u8] {
        &self.buf
    }

    /// Consume the writer.
    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    #[inline]
    pub fn write_u8(&mut self, value: u8) {
        self.buf.push(value);
    }

    /// Booleans occupy one byte, `1` for true.
    #[inline]
    pub fn write_bool(&mut self, value: bool) {
        self.buf.push(u8::from(value));
    }

    #[inline]
    pub fn write_i32(&mut self, value: i32) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    #[inline]
    pub fn write_u32(&mut self, value: u32) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    #[inline]
    pub fn write_f32(&mut self, value: f32) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    /// Write `x, y, z`.
    pub fn write_vec3(&mut self, value: Vec3) {
        self.write_f32(value.x);
        self.write_f32(value.y);
        self.write_f32(value.z);
    }

    /// Write `x, y, z, w`.
    pub fn write_quat(&mut self, value: Quat) {
        self.write_f32(value.x);
        self.write_f32(value.y);
        self.write_f32(value.z);
        self.write_f32(value.w);
    }

    /// Write a 4-byte length prefix followed by the bytes.
    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.write_len(bytes.len());
        self.buf.extend_from_slice(bytes);
    }

    /// Write a length-prefixed UTF-8 string.
    pub fn write_str(&mut self, value: &str) {
        self.write_bytes(value.as_bytes());
    }

    /// Write a 4-byte length prefix.
    pub fn write_len(&mut self, len: usize) {
        // Frames are bounded far below u32::MAX by the transport ceilings.
        self.write_u32(len as u32);
    }

    /// Append raw bytes with no prefix.
    pub fn write_raw(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }
}

// =============================================================================
// READER
// =============================================================================

/// Bounds-checked little-endian reader over a borrowed buffer.
#[derive(Debug, Clone)]
pub struct WireReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> WireReader<'a> {
    /// Read from the start of `buf`.
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    /// Read from `offset`, which must lie within the buffer.
    pub fn at(buf: &'a [u8], offset: usize) -> Result<Self, CodecError> {
        if offset > buf.len() {
            return Err(CodecError::MalformedMessage {
                offset,
                needed: 0,
                len: buf.len(),
            });
        }
        Ok(Self { buf, pos: offset })
    }

    /// Current read position (absolute).
    #[inline]
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Bytes left to read.
    #[inline]
    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], CodecError> {
        if n > self.remaining() {
            return Err(CodecError::MalformedMessage {
                offset: self.pos,
                needed: n,
                len: self.buf.len(),
            });
        }
        let out = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    fn take_array<const N: usize>(&mut self) -> Result<[u8; N], CodecError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    pub fn read_u8(&mut self) -> Result<u8, CodecError> {
        Ok(self.take_array::<1>()?[0])
    }

    /// Any non-zero byte reads as true.
    pub fn read_bool(&mut self) -> Result<bool, CodecError> {
        Ok(self.read_u8()? != 0)
    }

    pub fn read_i32(&mut self) -> Result<i32, CodecError> {
        Ok(i32::from_le_bytes(self.take_array()?))
    }

    pub fn read_u32(&mut self) -> Result<u32, CodecError> {
        Ok(u32::from_le_bytes(self.take_array()?))
    }

    pub fn read_f32(&mut self) -> Result<f32, CodecError> {
        Ok(f32::from_le_bytes(self.take_array()?))
    }

    pub fn read_vec3(&mut self) -> Result<Vec3, CodecError> {
        let x = self.read_f32()?;
        let y = self.read_f32()?;
        let z = self.read_f32()?;
        Ok(Vec3::new(x, y, z))
    }

    pub fn read_quat(&mut self) -> Result<Quat, CodecError> {
        let x = self.read_f32()?;
        let y = self.read_f32()?;
        let z = self.read_f32()?;
        let w = self.read_f32()?;
        Ok(Quat::from_xyzw(x, y, z, w))
    }

    /// Read a 4-byte length prefix.
    pub fn read_len(&mut self) -> Result<usize, CodecError> {
        Ok(self.read_u32()? as usize)
    }

    /// Read a length-prefixed byte slice without copying.
    pub fn read_bytes(&mut self) -> Result<&'a [u8], CodecError> {
        let len = self.read_len()?;
        self.take(len)
    }

    /// Read a length-prefixed UTF-8 string.
    pub fn read_string(&mut self) -> Result<String, CodecError> {
        let start = self.pos + LEN_PREFIX;
        let bytes = self.read_bytes()?;
        std::str::from_utf8(bytes)
            .map(str::to_owned)
            .map_err(|_| CodecError::InvalidUtf8 { offset: start })
    }

    /// Read a length-prefixed record and require it to fill its frame exactly.
    pub fn read_framed<T: WireDecode>(&mut self) -> Result<T, CodecError> {
        let frame = self.read_bytes()?;
        let mut inner = WireReader::new(frame);
        let value = T::decode(&mut inner)?;
        if inner.remaining() != 0 {
            return Err(CodecError::LengthMismatch {
                declared: frame.len(),
                consumed: inner.position(),
            });
        }
        Ok(value)
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_primitives_little_endian() {
        let mut w = WireWriter::new();
        w.write_i32(1);
        w.write_f32(1.0);
        w.write_bool(true);
        assert_eq!(w.as_slice(), &[1, 0, 0, 0, 0x00, 0x00, 0x80, 0x3f, 1]);
    }

    #[test]
    fn test_quat_component_order() {
        let mut w = WireWriter::new();
        w.write_quat(Quat::from_xyzw(1.0, 2.0, 3.0, 4.0));
        assert_eq!(w.len(), QUAT_LEN);

        let mut r = WireReader::new(w.as_slice());
        assert_eq!(r.read_f32().unwrap(), 1.0);
        assert_eq!(r.read_f32().unwrap(), 2.0);
        assert_eq!(r.read_f32().unwrap(), 3.0);
        assert_eq!(r.read_f32().unwrap(), 4.0);
    }

    #[test]
    fn test_string_roundtrip() {
        let mut w = WireWriter::new();
        w.write_str("Wizard ⚡");
        let bytes = w.into_bytes();
        let mut r = WireReader::new(&bytes);
        assert_eq!(r.read_string().unwrap(), "Wizard ⚡");
        assert_eq!(r.remaining(), 0);
    }

    #[test]
    fn test_declared_length_overrun_is_malformed() {
        let mut w = WireWriter::new();
        w.write_len(100);
        w.write_raw(b"short");
        let bytes = w.into_bytes();

        let err = WireReader::new(&bytes).read_bytes().unwrap_err();
        assert!(matches!(err, CodecError::MalformedMessage { needed: 100, .. }));
    }

    #[test]
    fn test_truncated_fixed_field_is_malformed() {
        let err = WireReader::new(&[1, 2]).read_f32().unwrap_err();
        assert_eq!(
            err,
            CodecError::MalformedMessage {
                offset: 0,
                needed: 4,
                len: 2
            }
        );
    }

    #[test]
    fn test_invalid_utf8() {
        let mut w = WireWriter::new();
        w.write_bytes(&[0xff, 0xfe]);
        let bytes = w.into_bytes();
        assert!(matches!(
            WireReader::new(&bytes).read_string(),
            Err(CodecError::InvalidUtf8 { offset: 4 })
        ));
    }

    #[test]
    fn test_reader_offset_out_of_range() {
        assert!(WireReader::at(&[0u8; 4], 4).is_ok());
        assert!(WireReader::at(&[0u8; 4], 5).is_err());
    }
}
