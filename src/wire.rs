//! Primitive wire codecs.
//!
//! Fixed rules, independent of any field:
//! - varint: little-endian base-128, continuation bit 0x80 on all but the last byte
//! - zigzag: `(n << 1) ^ (n >> (bits - 1))` before varint (sint32/sint64 only)
//! - fixed32/fixed64: raw little-endian
//! - length-delimited: varint length + raw bytes
//! - key: varint of `(field << 3) | wire_code`
use bytes::BufMut;

use crate::error::DecodeError;
use crate::schema::WireType;

/// Largest field number a key can carry.
pub const MAX_FIELD_NUMBER: u32 = (1 << 29) - 1;

/// A u64 never needs more than 10 varint bytes.
pub const MAX_VARINT_LEN: usize = 10;

// ————————————————————————————————————————————————————————————————————————————
// KEYS
// ————————————————————————————————————————————————————————————————————————————

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Key {
    pub field: u32,
    pub wire_type: WireType,
}

impl Key {
    pub fn new(field: u32, wire_type: WireType) -> Self {
        Self { field, wire_type }
    }

    pub fn tag(self) -> u64 {
        (u64::from(self.field) << 3) | u64::from(self.wire_type.code())
    }

    /// Encoded form; constant for a given field, so plans compute it once.
    pub fn to_bytes(self) -> Vec<u8> {
        let mut out = Vec::with_capacity(varint_len(self.tag()));
        encode_varint(self.tag(), &mut out);
        out
    }
}

/// A key as read from the wire, before the wire code is validated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawKey {
    pub field: u64,
    pub wire_code: u8,
}

// ————————————————————————————————————————————————————————————————————————————
// ENCODING
// ————————————————————————————————————————————————————————————————————————————

pub fn encode_varint<B: BufMut>(mut n: u64, buf: &mut B) {
    while n >= 0x80 {
        buf.put_u8((n as u8 & 0x7F) | 0x80);
        n >>= 7;
    }
    buf.put_u8(n as u8);
}

/// `ceil(bitlength(n) / 7)`, minimum 1.
pub fn varint_len(n: u64) -> usize {
    let bits = 64 - n.leading_zeros() as usize;
    bits.div_ceil(7).max(1)
}

pub fn zigzag32(n: i32) -> u32 {
    ((n << 1) ^ (n >> 31)) as u32
}

pub fn unzigzag32(n: u32) -> i32 {
    ((n >> 1) as i32) ^ -((n & 1) as i32)
}

pub fn zigzag64(n: i64) -> u64 {
    ((n << 1) ^ (n >> 63)) as u64
}

pub fn unzigzag64(n: u64) -> i64 {
    ((n >> 1) as i64) ^ -((n & 1) as i64)
}

pub fn encode_key<B: BufMut>(key: Key, buf: &mut B) {
    encode_varint(key.tag(), buf);
}

/// Varint length prefix followed by the bytes.
pub fn encode_bytes<B: BufMut>(bytes: &[u8], buf: &mut B) {
    encode_varint(bytes.len() as u64, buf);
    buf.put_slice(bytes);
}

// ————————————————————————————————————————————————————————————————————————————
// DECODING
// ————————————————————————————————————————————————————————————————————————————

/// Forward-only, position-tracked view over an input buffer.
#[derive(Debug, Clone)]
pub struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn is_eof(&self) -> bool {
        self.pos >= self.buf.len()
    }

    pub fn remaining(&self) -> usize {
        self.buf.len().saturating_sub(self.pos)
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], DecodeError> {
        if self.remaining() < n {
            return Err(DecodeError::UnexpectedEof {
                position: self.pos,
                needed: n - self.remaining(),
            });
        }
        let out = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    pub fn read_varint(&mut self) -> Result<u64, DecodeError> {
        let start = self.pos;
        let mut out = 0u64;
        for i in 0..MAX_VARINT_LEN {
            let b = self.take(1)?[0];
            if i == MAX_VARINT_LEN - 1 && b > 1 {
                return Err(DecodeError::VarintOverflow { position: start });
            }
            out |= u64::from(b & 0x7F) << (7 * i);
            if b & 0x80 == 0 {
                return Ok(out);
            }
        }
        Err(DecodeError::VarintOverflow { position: start })
    }

    pub fn read_fixed32(&mut self) -> Result<u32, DecodeError> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn read_fixed64(&mut self) -> Result<u64, DecodeError> {
        let b = self.take(8)?;
        let mut arr = [0u8; 8];
        arr.copy_from_slice(b);
        Ok(u64::from_le_bytes(arr))
    }

    /// Reads a varint length prefix and returns the payload it frames.
    pub fn read_length_delimited(&mut self) -> Result<&'a [u8], DecodeError> {
        let len = self.read_length()?;
        self.take(len)
    }

    pub fn read_length(&mut self) -> Result<usize, DecodeError> {
        let position = self.pos;
        let len = self.read_varint()?;
        usize::try_from(len).map_err(|_| DecodeError::UnexpectedEof {
            position,
            needed: usize::MAX,
        })
    }

    pub fn read_key(&mut self) -> Result<RawKey, DecodeError> {
        let tag = self.read_varint()?;
        Ok(RawKey {
            field: tag >> 3,
            wire_code: (tag & 0x7) as u8,
        })
    }

    /// Discards one value of the given wire type.
    pub fn skip(&mut self, wire_type: WireType) -> Result<(), DecodeError> {
        self.read_value_bytes(wire_type).map(|_| ())
    }

    /// Raw bytes of one value exactly as on the wire, including the length
    /// prefix for length-delimited values. Writing the key followed by these
    /// bytes reproduces the original encoding.
    pub fn read_value_bytes(&mut self, wire_type: WireType) -> Result<&'a [u8], DecodeError> {
        let start = self.pos;
        match wire_type {
            WireType::Varint => {
                self.read_varint()?;
            }
            WireType::Fixed32 => {
                self.take(4)?;
            }
            WireType::Fixed64 => {
                self.take(8)?;
            }
            WireType::LengthDelimited => {
                self.read_length_delimited()?;
            }
        }
        Ok(&self.buf[start..self.pos])
    }
}

// ————————————————————————————————————————————————————————————————————————————
// TESTS
// ————————————————————————————————————————————————————————————————————————————

#[cfg(test)]
mod tests {
    use super::*;

    fn varint(n: u64) -> Vec<u8> {
        let mut out = Vec::new();
        encode_varint(n, &mut out);
        out
    }

    #[test]
    fn varint_known_encodings() {
        assert_eq!(varint(0), vec![0x00]);
        assert_eq!(varint(1), vec![0x01]);
        assert_eq!(varint(127), vec![0x7F]);
        assert_eq!(varint(128), vec![0x80, 0x01]);
        assert_eq!(varint(300), vec![0xAC, 0x02]);
        assert_eq!(varint(u64::MAX).len(), 10);
    }

    #[test]
    fn varint_length_matches_bit_length() {
        let samples = [
            0u64,
            1,
            127,
            128,
            16_383,
            16_384,
            1 << 35,
            (1 << 56) - 1,
            1 << 63,
            u64::MAX,
        ];
        for n in samples {
            let bytes = varint(n);
            let bits = 64 - n.leading_zeros() as usize;
            assert_eq!(bytes.len(), bits.div_ceil(7).max(1), "n = {n}");
            assert_eq!(varint_len(n), bytes.len());
            assert_eq!(Reader::new(&bytes).read_varint().unwrap(), n);
        }
    }

    #[test]
    fn zigzag_sign_and_inverse() {
        assert_eq!(zigzag32(0), 0);
        assert_eq!(zigzag32(-1), 1);
        assert_eq!(zigzag32(1), 2);
        assert_eq!(zigzag32(i32::MIN), u32::MAX);
        for n in [0i64, 1, -1, 2, -2, 1 << 40, -(1 << 40), i64::MAX, i64::MIN] {
            let z = zigzag64(n);
            assert_eq!(unzigzag64(z), n);
            assert_eq!(z % 2 == 0, n >= 0, "n = {n}");
        }
        for n in [0i32, 7, -7, i32::MAX, i32::MIN] {
            assert_eq!(unzigzag32(zigzag32(n)), n);
        }
    }

    #[test]
    fn key_layout() {
        assert_eq!(Key::new(1, WireType::Varint).to_bytes(), vec![0x08]);
        assert_eq!(Key::new(2, WireType::LengthDelimited).to_bytes(), vec![0x12]);
        assert_eq!(Key::new(16, WireType::Varint).to_bytes(), vec![0x80, 0x01]);
        let raw = Reader::new(&[0x80, 0x01]).read_key().unwrap();
        assert_eq!(raw, RawKey { field: 16, wire_code: 0 });
    }

    #[test]
    fn overlong_varint_is_rejected() {
        let bytes = [0xFFu8; 11];
        assert!(matches!(
            Reader::new(&bytes).read_varint(),
            Err(DecodeError::VarintOverflow { position: 0 })
        ));
    }

    #[test]
    fn truncated_input_reports_eof() {
        let mut r = Reader::new(&[0x05, 0x01, 0x02]);
        assert!(matches!(r.read_length_delimited(), Err(DecodeError::UnexpectedEof { .. })));
        assert!(matches!(
            Reader::new(&[0x01]).read_fixed32(),
            Err(DecodeError::UnexpectedEof { .. })
        ));
    }

    #[test]
    fn value_bytes_keep_length_prefix() {
        let mut r = Reader::new(&[0x03, b'a', b'b', b'c', 0x96, 0x01]);
        assert_eq!(
            r.read_value_bytes(WireType::LengthDelimited).unwrap(),
            &[0x03, b'a', b'b', b'c']
        );
        assert_eq!(r.read_value_bytes(WireType::Varint).unwrap(), &[0x96, 0x01]);
        assert!(r.is_eof());
    }
}
