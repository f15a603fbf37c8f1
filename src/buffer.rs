//! Growable byte buffer shared by the socket hub, TCP client and MQTT codec.
//!
//! Generalizes the free functions the MQTT codec used internally
//! (`read_variable_int`, `read_string`, ...) into a stateful cursor so every
//! component can append network reads and incrementally parse out of the
//! same backing store instead of slicing raw `&[u8]` by hand.

use bytes::{Buf, BufMut, BytesMut};

use crate::error::ErrorKind;

/// Maximum MQTT variable-length integer value (2^28 - 1).
pub const MAX_VARINT: u32 = 268_435_455;

/// A growable, position-tracked byte buffer.
///
/// Bytes are appended at the tail (`extend`) and consumed from a read
/// cursor that advances as fields are parsed. `reset()` rewinds the cursor
/// without discarding unread bytes; `compact()` drops already-consumed
/// bytes so the buffer doesn't grow unbounded across many small reads.
#[derive(Debug, Default)]
pub struct ByteBuffer {
    inner: BytesMut,
    pos: usize,
}

impl ByteBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(cap: usize) -> Self {
        Self {
            inner: BytesMut::with_capacity(cap),
            pos: 0,
        }
    }

    /// Append bytes read from the network to the tail of the buffer.
    pub fn extend(&mut self, data: &[u8]) {
        self.inner.put_slice(data);
    }

    /// Bytes available to read from the current cursor position.
    pub fn remaining(&self) -> &[u8] {
        &self.inner[self.pos..]
    }

    pub fn remaining_len(&self) -> usize {
        self.inner.len() - self.pos
    }

    pub fn is_empty(&self) -> bool {
        self.remaining_len() == 0
    }

    /// Rewind the read cursor to the start without discarding bytes.
    pub fn reset(&mut self) {
        self.pos = 0;
    }

    /// Drop already-consumed bytes, sliding unread bytes to the front.
    pub fn compact(&mut self) {
        if self.pos > 0 {
            self.inner.advance(self.pos);
            self.pos = 0;
        }
    }

    /// Advance the cursor past `n` bytes without interpreting them.
    pub fn consume(&mut self, n: usize) -> Result<(), ErrorKind> {
        if self.remaining_len() < n {
            return Err(ErrorKind::Malformed);
        }
        self.pos += n;
        Ok(())
    }

    fn take(&mut self, n: usize) -> Result<&[u8], ErrorKind> {
        if self.remaining_len() < n {
            return Err(ErrorKind::Malformed);
        }
        let start = self.pos;
        self.pos += n;
        Ok(&self.inner[start..self.pos])
    }

    pub fn read_u8(&mut self) -> Result<u8, ErrorKind> {
        Ok(self.take(1)?[0])
    }

    pub fn read_u16(&mut self) -> Result<u16, ErrorKind> {
        let b = self.take(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    pub fn read_u32(&mut self) -> Result<u32, ErrorKind> {
        let b = self.take(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn read_u64(&mut self) -> Result<u64, ErrorKind> {
        let b = self.take(8)?;
        Ok(u64::from_be_bytes(b.try_into().unwrap()))
    }

    /// Read a u16 length-prefixed UTF-8 string.
    pub fn read_string(&mut self) -> Result<String, ErrorKind> {
        let len = self.read_u16()? as usize;
        let bytes = self.take(len)?;
        std::str::from_utf8(bytes)
            .map(str::to_owned)
            .map_err(|_| ErrorKind::Malformed)
    }

    /// Read a u16 length-prefixed binary blob.
    pub fn read_binary(&mut self) -> Result<Vec<u8>, ErrorKind> {
        let len = self.read_u16()? as usize;
        Ok(self.take(len)?.to_vec())
    }

    /// Read an MQTT variable-length integer: 7 data bits per byte, high bit
    /// is the continuation flag, at most 4 bytes, value capped at
    /// `MAX_VARINT`.
    pub fn read_varint(&mut self) -> Result<u32, ErrorKind> {
        let mut multiplier: u32 = 1;
        let mut value: u32 = 0;
        for i in 0..4 {
            if self.remaining_len() == 0 {
                return Err(ErrorKind::Malformed);
            }
            let byte = self.take(1)?[0];
            value += (byte & 0x7F) as u32 * multiplier;
            if byte & 0x80 == 0 {
                return Ok(value);
            }
            if i == 3 {
                return Err(ErrorKind::Malformed);
            }
            multiplier *= 128;
        }
        Err(ErrorKind::Malformed)
    }
}

/// Write an MQTT variable-length integer. Fails if `value` exceeds
/// `MAX_VARINT`.
pub fn write_varint(buf: &mut BytesMut, mut value: u32) -> Result<usize, ErrorKind> {
    if value > MAX_VARINT {
        return Err(ErrorKind::Malformed);
    }
    let mut count = 0;
    loop {
        let mut byte = (value % 128) as u8;
        value /= 128;
        if value > 0 {
            byte |= 0x80;
        }
        buf.put_u8(byte);
        count += 1;
        if value == 0 {
            break;
        }
    }
    Ok(count)
}

/// Number of bytes `encode` would use for `value`.
pub fn varint_len(value: u32) -> usize {
    match value {
        0..=127 => 1,
        128..=16_383 => 2,
        16_384..=2_097_151 => 3,
        _ => 4,
    }
}

pub fn write_string(buf: &mut BytesMut, s: &str) -> Result<(), ErrorKind> {
    if s.len() > u16::MAX as usize {
        return Err(ErrorKind::Malformed);
    }
    buf.put_u16(s.len() as u16);
    buf.put_slice(s.as_bytes());
    Ok(())
}

pub fn write_binary(buf: &mut BytesMut, data: &[u8]) -> Result<(), ErrorKind> {
    if data.len() > u16::MAX as usize {
        return Err(ErrorKind::Malformed);
    }
    buf.put_u16(data.len() as u16);
    buf.put_slice(data);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn varint_boundaries() {
        let mut buf = BytesMut::new();
        write_varint(&mut buf, 127).unwrap();
        assert_eq!(&buf[..], &[0x7F]);

        let mut buf = BytesMut::new();
        write_varint(&mut buf, 128).unwrap();
        assert_eq!(&buf[..], &[0x80, 0x01]);

        let mut buf = BytesMut::new();
        write_varint(&mut buf, 16_383).unwrap();
        assert_eq!(&buf[..], &[0xFF, 0x7F]);

        let mut buf = BytesMut::new();
        write_varint(&mut buf, 16_384).unwrap();
        assert_eq!(&buf[..], &[0x80, 0x80, 0x01]);

        let mut buf = BytesMut::new();
        write_varint(&mut buf, 268_435_455).unwrap();
        assert_eq!(&buf[..], &[0xFF, 0xFF, 0xFF, 0x7F]);
    }

    #[test]
    fn varint_len_matches_boundaries() {
        assert_eq!(varint_len(0), 1);
        assert_eq!(varint_len(127), 1);
        assert_eq!(varint_len(128), 2);
        assert_eq!(varint_len(16_383), 2);
        assert_eq!(varint_len(16_384), 3);
        assert_eq!(varint_len(2_097_151), 3);
        assert_eq!(varint_len(2_097_152), 4);
        assert_eq!(varint_len(268_435_455), 4);
    }

    #[test]
    fn varint_over_four_bytes_is_malformed() {
        let bytes = [0xFF, 0xFF, 0xFF, 0xFF, 0x7F];
        let mut buf = ByteBuffer::new();
        buf.extend(&bytes);
        assert_eq!(buf.read_varint(), Err(ErrorKind::Malformed));
    }

    #[test]
    fn string_round_trip() {
        let mut buf = BytesMut::new();
        write_string(&mut buf, "hello").unwrap();
        let mut rb = ByteBuffer::new();
        rb.extend(&buf);
        assert_eq!(rb.read_string().unwrap(), "hello");
    }

    #[test]
    fn under_read_is_malformed() {
        let mut rb = ByteBuffer::new();
        rb.extend(&[0x00, 0x05, b'h', b'i']);
        assert_eq!(rb.read_string(), Err(ErrorKind::Malformed));
    }

    proptest! {
        #[test]
        fn varint_round_trip(v in 0u32..=MAX_VARINT) {
            let mut buf = BytesMut::new();
            let written = write_varint(&mut buf, v).unwrap();
            prop_assert_eq!(written, varint_len(v));
            let mut rb = ByteBuffer::new();
            rb.extend(&buf);
            prop_assert_eq!(rb.read_varint().unwrap(), v);
        }

        #[test]
        fn big_endian_ints_round_trip(a in any::<u8>(), b in any::<u16>(), c in any::<u32>(), d in any::<u64>()) {
            let mut buf = BytesMut::new();
            buf.put_u8(a);
            buf.put_u16(b);
            buf.put_u32(c);
            buf.put_u64(d);
            let mut rb = ByteBuffer::new();
            rb.extend(&buf);
            prop_assert_eq!(rb.read_u8().unwrap(), a);
            prop_assert_eq!(rb.read_u16().unwrap(), b);
            prop_assert_eq!(rb.read_u32().unwrap(), c);
            prop_assert_eq!(rb.read_u64().unwrap(), d);
        }
    }
}
