//! Primitive field encoding/decoding
//!
//! Request payloads are sequences of three field kinds:
//! - uint32: 4 bytes, big-endian
//! - string: uint32 length followed by UTF-8 bytes (text fields such as
//!   the terminal name)
//! - binary: uint32 length followed by raw bytes
//!
//! Field lengths are bounded only by the payload, which the transport has
//! already size-checked.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::ProtocolError;

/// Cursor over a request payload
#[derive(Debug)]
pub struct WireReader<'a> {
    buf: &'a [u8],
}

impl<'a> WireReader<'a> {
    /// Create a reader over a payload
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    /// Bytes not yet consumed
    pub fn remaining(&self) -> usize {
        self.buf.remaining()
    }

    fn ensure(&self, needed: usize) -> Result<(), ProtocolError> {
        if self.buf.remaining() < needed {
            return Err(ProtocolError::Truncated {
                needed,
                remaining: self.buf.remaining(),
            });
        }
        Ok(())
    }

    /// Read a big-endian uint32
    pub fn read_u32(&mut self) -> Result<u32, ProtocolError> {
        self.ensure(4)?;
        Ok(self.buf.get_u32())
    }

    /// Read a length-prefixed byte field
    pub fn read_binary(&mut self) -> Result<&'a [u8], ProtocolError> {
        let len = self.read_u32()? as usize;
        self.ensure(len)?;

        let (field, rest) = self.buf.split_at(len);
        self.buf = rest;
        Ok(field)
    }

    /// Read a length-prefixed UTF-8 string
    pub fn read_string(&mut self) -> Result<&'a str, ProtocolError> {
        let raw = self.read_binary()?;
        std::str::from_utf8(raw).map_err(|_| ProtocolError::InvalidUtf8)
    }
}

/// Builder for request payloads
#[derive(Debug, Default)]
pub struct WireWriter {
    buf: BytesMut,
}

impl WireWriter {
    /// Create an empty writer
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a big-endian uint32
    pub fn put_u32(&mut self, value: u32) -> &mut Self {
        self.buf.put_u32(value);
        self
    }

    /// Append a length-prefixed byte field
    pub fn put_binary(&mut self, value: &[u8]) -> &mut Self {
        self.buf.reserve(4 + value.len());
        self.buf.put_u32(value.len() as u32);
        self.buf.put_slice(value);
        self
    }

    /// Append a length-prefixed string
    pub fn put_string(&mut self, value: &str) -> &mut Self {
        self.put_binary(value.as_bytes())
    }

    /// Finish and return the encoded payload
    pub fn finish(self) -> Bytes {
        self.buf.freeze()
    }
}
