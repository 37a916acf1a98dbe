//! Length-prefixed packet framing and typed field access.
//!
//! Wire format (big-endian):
//! ```text
//! ┌─────────────┬──────┬───────────┐
//! │ length      │ u16  │  2 bytes  │
//! ├─────────────┼──────┼───────────┤
//! │ payload     │ [u8] │  N bytes  │
//! └─────────────┴──────┴───────────┘
//! ```
//! The payload begins with a one-byte opcode. Integers are fixed-width
//! big-endian, booleans are one byte, strings are a `u16` length followed
//! by UTF-8 bytes.

use crate::error::{PacketError, PacketResult as Result};
use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Size of the frame length prefix in bytes
pub const LENGTH_PREFIX_SIZE: usize = 2;

/// Maximum payload length expressible by the `u16` length prefix
pub const MAX_PAYLOAD_SIZE: usize = u16::MAX as usize;

/// Append-only packet builder
///
/// A packet is a payload under construction; [`Packet::into_frame`] seals it
/// with the length prefix for the wire.
#[derive(Debug, Clone)]
pub struct Packet {
    buf: BytesMut,
}

impl Packet {
    /// Creates an empty packet beginning with `opcode`
    pub fn new(opcode: u8) -> Self {
        let mut buf = BytesMut::with_capacity(16);
        buf.put_u8(opcode);
        Self { buf }
    }

    pub fn put_u8(&mut self, value: u8) -> &mut Self {
        self.buf.put_u8(value);
        self
    }

    pub fn put_i8(&mut self, value: i8) -> &mut Self {
        self.buf.put_i8(value);
        self
    }

    pub fn put_u16(&mut self, value: u16) -> &mut Self {
        self.buf.put_u16(value);
        self
    }

    pub fn put_u32(&mut self, value: u32) -> &mut Self {
        self.buf.put_u32(value);
        self
    }

    pub fn put_i32(&mut self, value: i32) -> &mut Self {
        self.buf.put_i32(value);
        self
    }

    pub fn put_u64(&mut self, value: u64) -> &mut Self {
        self.buf.put_u64(value);
        self
    }

    pub fn put_bool(&mut self, value: bool) -> &mut Self {
        self.buf.put_u8(value as u8);
        self
    }

    /// Appends a `u16` length followed by the UTF-8 bytes of `value`
    ///
    /// Strings longer than 65535 bytes cannot be expressed on the wire.
    pub fn put_string(&mut self, value: &str) -> &mut Self {
        let len = value.len().min(MAX_PAYLOAD_SIZE) as u16;
        self.buf.put_u16(len);
        self.buf.put_slice(&value.as_bytes()[..len as usize]);
        self
    }

    /// Current payload length in bytes
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Returns the bare payload without the length prefix
    pub fn freeze(self) -> Bytes {
        self.buf.freeze()
    }

    /// Seals the packet into a wire frame: `u16` length prefix + payload
    pub fn into_frame(self) -> Result<Bytes> {
        if self.buf.len() > MAX_PAYLOAD_SIZE {
            return Err(PacketError::Oversize(self.buf.len()));
        }
        let mut frame = BytesMut::with_capacity(LENGTH_PREFIX_SIZE + self.buf.len());
        frame.put_u16(self.buf.len() as u16);
        frame.put_slice(&self.buf);
        Ok(frame.freeze())
    }
}

/// Cursor over a received payload with checked typed extraction
///
/// Every getter fails with [`PacketError::Truncated`] instead of panicking
/// when the cursor would overrun the payload.
#[derive(Debug, Clone)]
pub struct PacketReader {
    buf: Bytes,
}

impl PacketReader {
    pub fn new(payload: Bytes) -> Self {
        Self { buf: payload }
    }

    fn check(&self, need: usize) -> Result<()> {
        if self.buf.remaining() < need {
            return Err(PacketError::Truncated {
                need,
                have: self.buf.remaining(),
            });
        }
        Ok(())
    }

    pub fn get_u8(&mut self) -> Result<u8> {
        self.check(1)?;
        Ok(self.buf.get_u8())
    }

    pub fn get_i8(&mut self) -> Result<i8> {
        self.check(1)?;
        Ok(self.buf.get_i8())
    }

    pub fn get_u16(&mut self) -> Result<u16> {
        self.check(2)?;
        Ok(self.buf.get_u16())
    }

    pub fn get_u32(&mut self) -> Result<u32> {
        self.check(4)?;
        Ok(self.buf.get_u32())
    }

    pub fn get_i32(&mut self) -> Result<i32> {
        self.check(4)?;
        Ok(self.buf.get_i32())
    }

    pub fn get_u64(&mut self) -> Result<u64> {
        self.check(8)?;
        Ok(self.buf.get_u64())
    }

    pub fn get_bool(&mut self) -> Result<bool> {
        Ok(self.get_u8()? != 0)
    }

    /// Extracts a `u16`-length-prefixed UTF-8 string
    pub fn get_string(&mut self) -> Result<String> {
        let len = self.get_u16()? as usize;
        self.check(len)?;
        let bytes = self.buf.copy_to_bytes(len);
        String::from_utf8(bytes.to_vec()).map_err(|_| PacketError::InvalidUtf8)
    }

    /// Bytes not yet consumed
    pub fn remaining(&self) -> usize {
        self.buf.remaining()
    }
}

/// Incremental frame decoder for a length-prefixed byte stream
///
/// Bytes are pushed in whatever chunks the transport delivers; complete
/// payloads pop out in order. Partial frames stay buffered until the rest
/// arrives, so feeding the stream one byte at a time yields the same frames
/// as feeding it all at once.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buf: BytesMut,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends raw bytes from the transport
    pub fn push(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Buffer to read into directly, avoiding a copy on the hot path
    pub fn buffer_mut(&mut self) -> &mut BytesMut {
        &mut self.buf
    }

    /// Pops the next complete payload, or `None` if more bytes are needed
    pub fn next_frame(&mut self) -> Option<Bytes> {
        if self.buf.len() < LENGTH_PREFIX_SIZE {
            return None;
        }
        let len = u16::from_be_bytes([self.buf[0], self.buf[1]]) as usize;
        if self.buf.len() < LENGTH_PREFIX_SIZE + len {
            return None;
        }
        self.buf.advance(LENGTH_PREFIX_SIZE);
        Some(self.buf.split_to(len).freeze())
    }
}
