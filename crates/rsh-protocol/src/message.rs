//! Typed request payloads
//!
//! Each payload type knows how to decode itself from the raw bytes carried
//! by a [`ChannelRequest`](crate::ChannelRequest) and how to encode itself
//! back, so transports that hand over already-parsed fields can rebuild the
//! exact bytes a peer would have sent.
//!
//! Layouts:
//!
//! | request | fields |
//! |---|---|
//! | `pty-req` | term string, cols, rows, pixel width, pixel height, modes binary |
//! | `window-change` | cols, rows, pixel width, pixel height |
//! | `exec` | command string |
//!
//! Bytes after the last field are ignored.

use bytes::Bytes;

use crate::error::ProtocolError;
use crate::wire::{WireReader, WireWriter};

/// Terminal dimensions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TerminalSize {
    /// Number of columns
    pub cols: u16,
    /// Number of rows
    pub rows: u16,
}

impl TerminalSize {
    /// Create a new terminal size
    pub fn new(cols: u16, rows: u16) -> Self {
        Self { cols, rows }
    }

    /// Build a size from 32-bit wire values, clamping to `u16::MAX`
    pub fn from_wire(cols: u32, rows: u32) -> Self {
        Self {
            cols: cols.min(u16::MAX as u32) as u16,
            rows: rows.min(u16::MAX as u32) as u16,
        }
    }

    /// True when either dimension is zero (the peer left it unspecified)
    pub fn is_unset(&self) -> bool {
        self.cols == 0 || self.rows == 0
    }
}

impl std::fmt::Display for TerminalSize {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.cols, self.rows)
    }
}

/// `pty-req` payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PtyRequest {
    /// Value for the TERM environment variable
    pub term: String,
    /// Requested character geometry
    pub size: TerminalSize,
    /// Width in pixels (informational)
    pub pixel_width: u32,
    /// Height in pixels (informational)
    pub pixel_height: u32,
    /// Encoded terminal modes, passed through untouched
    pub modes: Bytes,
}

impl PtyRequest {
    /// Decode from a request payload
    pub fn decode(payload: &[u8]) -> Result<Self, ProtocolError> {
        let mut reader = WireReader::new(payload);
        let term = reader.read_string()?.to_string();
        let cols = reader.read_u32()?;
        let rows = reader.read_u32()?;
        let pixel_width = reader.read_u32()?;
        let pixel_height = reader.read_u32()?;
        let modes = Bytes::copy_from_slice(reader.read_binary()?);

        Ok(Self {
            term,
            size: TerminalSize::from_wire(cols, rows),
            pixel_width,
            pixel_height,
            modes,
        })
    }

    /// Encode into a request payload
    pub fn encode(&self) -> Bytes {
        let mut writer = WireWriter::new();
        writer
            .put_string(&self.term)
            .put_u32(self.size.cols as u32)
            .put_u32(self.size.rows as u32)
            .put_u32(self.pixel_width)
            .put_u32(self.pixel_height)
            .put_binary(&self.modes);
        writer.finish()
    }
}

/// `window-change` payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowChange {
    /// New character geometry
    pub size: TerminalSize,
    /// Width in pixels (informational)
    pub pixel_width: u32,
    /// Height in pixels (informational)
    pub pixel_height: u32,
}

impl WindowChange {
    /// Decode from a request payload
    pub fn decode(payload: &[u8]) -> Result<Self, ProtocolError> {
        let mut reader = WireReader::new(payload);
        let cols = reader.read_u32()?;
        let rows = reader.read_u32()?;
        let pixel_width = reader.read_u32()?;
        let pixel_height = reader.read_u32()?;

        Ok(Self {
            size: TerminalSize::from_wire(cols, rows),
            pixel_width,
            pixel_height,
        })
    }

    /// Encode into a request payload
    pub fn encode(&self) -> Bytes {
        let mut writer = WireWriter::new();
        writer
            .put_u32(self.size.cols as u32)
            .put_u32(self.size.rows as u32)
            .put_u32(self.pixel_width)
            .put_u32(self.pixel_height);
        writer.finish()
    }
}

/// `exec` payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecRequest {
    /// Command line handed to the system shell, as sent by the peer.
    /// Not necessarily UTF-8.
    pub command: Bytes,
}

impl ExecRequest {
    /// Decode from a request payload
    pub fn decode(payload: &[u8]) -> Result<Self, ProtocolError> {
        let mut reader = WireReader::new(payload);
        let command = Bytes::copy_from_slice(reader.read_binary()?);
        Ok(Self { command })
    }

    /// Encode into a request payload
    pub fn encode(&self) -> Bytes {
        let mut writer = WireWriter::new();
        writer.put_binary(&self.command);
        writer.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pty_request_fields() {
        let mut writer = WireWriter::new();
        writer
            .put_string("xterm-256color")
            .put_u32(120)
            .put_u32(40)
            .put_u32(640)
            .put_u32(480)
            .put_binary(&[0]);
        let payload = writer.finish();

        let req = PtyRequest::decode(&payload).unwrap();
        assert_eq!(req.term, "xterm-256color");
        assert_eq!(req.size, TerminalSize::new(120, 40));
        assert_eq!(req.pixel_width, 640);
        assert_eq!(req.modes.as_ref(), &[0]);
        assert_eq!(req.encode(), payload);
    }

    #[test]
    fn test_pty_request_missing_modes() {
        let mut writer = WireWriter::new();
        writer.put_string("vt100").put_u32(80).put_u32(24).put_u32(0);
        let payload = writer.finish();

        assert!(matches!(
            PtyRequest::decode(&payload),
            Err(ProtocolError::Truncated { .. })
        ));
    }

    #[test]
    fn test_window_change_decode() {
        let payload = [0, 0, 0, 80, 0, 0, 0, 24, 0, 0, 0, 0, 0, 0, 0, 0];
        let wc = WindowChange::decode(&payload).unwrap();
        assert_eq!(wc.size, TerminalSize::new(80, 24));
    }

    #[test]
    fn test_window_change_clamps_oversized_geometry() {
        let wc = WindowChange {
            size: TerminalSize::new(10, 10),
            pixel_width: 0,
            pixel_height: 0,
        };
        let mut payload = wc.encode().to_vec();
        payload[0..4].copy_from_slice(&100_000u32.to_be_bytes());

        let decoded = WindowChange::decode(&payload).unwrap();
        assert_eq!(decoded.size.cols, u16::MAX);
        assert_eq!(decoded.size.rows, 10);
    }

    #[test]
    fn test_exec_request() {
        let req = ExecRequest {
            command: Bytes::from_static(b"exit 7"),
        };
        let payload = req.encode();
        assert_eq!(&payload[..4], &[0, 0, 0, 6]);
        assert_eq!(ExecRequest::decode(&payload).unwrap(), req);
    }

    #[test]
    fn test_exec_request_keeps_raw_bytes() {
        let mut writer = WireWriter::new();
        writer.put_binary(b"printf '\xff'; exit 3");
        let req = ExecRequest::decode(&writer.finish()).unwrap();
        assert_eq!(req.command.as_ref(), b"printf '\xff'; exit 3");
    }

    #[test]
    fn test_exec_request_empty_payload() {
        assert!(ExecRequest::decode(&[]).is_err());
    }

    #[test]
    fn test_terminal_size_unset() {
        assert!(TerminalSize::default().is_unset());
        assert!(TerminalSize::new(80, 0).is_unset());
        assert!(!TerminalSize::new(80, 24).is_unset());
        assert_eq!(TerminalSize::new(80, 24).to_string(), "80x24");
    }
}
