//! Byte-aligned message reader and writer.
//!
//! Fixed-width integers are little-endian. Variable-width integers use
//! LEB128, with zigzag mapping for signed values. Strings and byte blobs are
//! prefixed with a varint length.

use crate::error::{DecodeError, EncodeError, LimitKind, WireResult};

/// A bounded reader over one message payload.
#[derive(Debug, Clone)]
pub struct MsgReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> MsgReader<'a> {
    /// Creates a reader over `data`.
    #[must_use]
    pub const fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// Bytes consumed so far.
    #[must_use]
    pub const fn position(&self) -> usize {
        self.pos
    }

    /// Bytes left to read.
    #[must_use]
    pub const fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    /// Returns `true` if every byte has been consumed.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    pub fn read_u8(&mut self) -> WireResult<u8> {
        let [byte] = self.read_array::<1>()?;
        Ok(byte)
    }

    pub fn read_u16(&mut self) -> WireResult<u16> {
        Ok(u16::from_le_bytes(self.read_array::<2>()?))
    }

    pub fn read_i32(&mut self) -> WireResult<i32> {
        Ok(i32::from_le_bytes(self.read_array::<4>()?))
    }

    /// Reads a LEB128 `u32`.
    pub fn read_varu32(&mut self) -> WireResult<u32> {
        let mut result = 0u32;
        for shift in (0..35).step_by(7) {
            let byte = self.read_u8()?;
            result |= u32::from(byte & 0x7F) << shift;
            if byte & 0x80 == 0 {
                return Ok(result);
            }
        }
        Err(DecodeError::InvalidVarint)
    }

    /// Reads a zigzag LEB128 `i32`.
    pub fn read_vars32(&mut self) -> WireResult<i32> {
        let value = self.read_varu32()?;
        #[allow(clippy::cast_possible_wrap)]
        let decoded = ((value >> 1) as i32) ^ (-((value & 1) as i32));
        Ok(decoded)
    }

    /// Reads a length-prefixed byte blob of at most `max` bytes.
    pub fn read_blob(&mut self, kind: LimitKind, max: usize) -> WireResult<&'a [u8]> {
        let len = self.read_varu32()? as usize;
        if len > max {
            return Err(DecodeError::LimitsExceeded {
                kind,
                limit: max,
                actual: len,
            });
        }
        self.read_bytes(len)
    }

    /// Reads a length-prefixed UTF-8 string of at most `max` bytes.
    pub fn read_string(&mut self, max: usize) -> WireResult<String> {
        let bytes = self.read_blob(LimitKind::StringLength, max)?;
        std::str::from_utf8(bytes)
            .map(str::to_owned)
            .map_err(|_| DecodeError::InvalidUtf8)
    }

    pub fn read_bytes(&mut self, len: usize) -> WireResult<&'a [u8]> {
        self.ensure(len)?;
        let out = &self.data[self.pos..self.pos + len];
        self.pos += len;
        Ok(out)
    }

    fn ensure(&self, needed: usize) -> WireResult<()> {
        let available = self.remaining();
        if needed > available {
            return Err(DecodeError::UnexpectedEnd { needed, available });
        }
        Ok(())
    }

    fn read_array<const N: usize>(&mut self) -> WireResult<[u8; N]> {
        let bytes = self.read_bytes(N)?;
        let mut out = [0u8; N];
        out.copy_from_slice(bytes);
        Ok(out)
    }
}

/// An append-only message writer.
#[derive(Debug, Default)]
pub struct MsgWriter {
    bytes: Vec<u8>,
}

impl MsgWriter {
    /// Creates a new empty `MsgWriter`.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a new `MsgWriter` with pre-allocated capacity.
    #[must_use]
    pub fn with_capacity(bytes: usize) -> Self {
        Self {
            bytes: Vec::with_capacity(bytes),
        }
    }

    /// Bytes written so far.
    #[must_use]
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn write_u8(&mut self, value: u8) {
        self.bytes.push(value);
    }

    pub fn write_u16(&mut self, value: u16) {
        self.bytes.extend_from_slice(&value.to_le_bytes());
    }

    pub fn write_i32(&mut self, value: i32) {
        self.bytes.extend_from_slice(&value.to_le_bytes());
    }

    pub fn write_varu32(&mut self, mut value: u32) {
        loop {
            #[allow(clippy::cast_possible_truncation)]
            let byte = (value & 0x7F) as u8;
            value >>= 7;
            if value == 0 {
                self.bytes.push(byte);
                return;
            }
            self.bytes.push(byte | 0x80);
        }
    }

    pub fn write_vars32(&mut self, value: i32) {
        #[allow(clippy::cast_sign_loss)]
        let encoded = ((value << 1) ^ (value >> 31)) as u32;
        self.write_varu32(encoded);
    }

    /// Writes a length-prefixed byte blob.
    pub fn write_blob(&mut self, field: &'static str, bytes: &[u8]) -> Result<(), EncodeError> {
        let len = u32::try_from(bytes.len()).map_err(|_| EncodeError::FieldTooLarge {
            field,
            len: bytes.len(),
        })?;
        self.write_varu32(len);
        self.bytes.extend_from_slice(bytes);
        Ok(())
    }

    pub fn write_string(&mut self, value: &str) -> Result<(), EncodeError> {
        self.write_blob("string", value.as_bytes())
    }

    /// Finishes writing and returns the byte buffer.
    #[must_use]
    pub fn finish(self) -> Vec<u8> {
        self.bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_reader() {
        let reader = MsgReader::new(&[]);
        assert!(reader.is_empty());
        assert_eq!(reader.position(), 0);
    }

    #[test]
    fn read_from_empty_fails() {
        let mut reader = MsgReader::new(&[]);
        let err = reader.read_u8().unwrap_err();
        assert_eq!(
            err,
            DecodeError::UnexpectedEnd {
                needed: 1,
                available: 0
            }
        );
    }

    #[test]
    fn read_fixed_width_le() {
        let mut reader = MsgReader::new(&[0x34, 0x12, 0x78, 0x56, 0x34, 0x12]);
        assert_eq!(reader.read_u16().unwrap(), 0x1234);
        assert_eq!(reader.read_i32().unwrap(), 0x1234_5678);
        assert!(reader.is_empty());
    }

    #[test]
    fn read_varu32() {
        let mut reader = MsgReader::new(&[0xAC, 0x02]);
        assert_eq!(reader.read_varu32().unwrap(), 300);
    }

    #[test]
    fn read_vars32_negative() {
        let mut reader = MsgReader::new(&[0x01]);
        assert_eq!(reader.read_vars32().unwrap(), -1);
    }

    #[test]
    fn read_varu32_invalid() {
        let mut reader = MsgReader::new(&[0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0x01]);
        assert_eq!(reader.read_varu32().unwrap_err(), DecodeError::InvalidVarint);
    }

    #[test]
    fn writer_matches_reader() {
        let mut writer = MsgWriter::new();
        writer.write_vars32(i32::MIN);
        writer.write_vars32(-30);
        writer.write_u16(1023);
        writer.write_string("cs 1 \"hello\"").unwrap();
        let bytes = writer.finish();

        let mut reader = MsgReader::new(&bytes);
        assert_eq!(reader.read_vars32().unwrap(), i32::MIN);
        assert_eq!(reader.read_vars32().unwrap(), -30);
        assert_eq!(reader.read_u16().unwrap(), 1023);
        assert_eq!(reader.read_string(64).unwrap(), "cs 1 \"hello\"");
        assert!(reader.is_empty());
    }

    #[test]
    fn string_over_limit_rejected() {
        let mut writer = MsgWriter::new();
        writer.write_string("abcdef").unwrap();
        let bytes = writer.finish();
        let mut reader = MsgReader::new(&bytes);
        let err = reader.read_string(4).unwrap_err();
        assert!(matches!(
            err,
            DecodeError::LimitsExceeded {
                kind: LimitKind::StringLength,
                limit: 4,
                actual: 6
            }
        ));
    }

    #[test]
    fn invalid_utf8_rejected() {
        let mut reader = MsgReader::new(&[2, 0xC3, 0x28]);
        assert_eq!(reader.read_string(16).unwrap_err(), DecodeError::InvalidUtf8);
    }
}
