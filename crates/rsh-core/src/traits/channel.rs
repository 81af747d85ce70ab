//! Channel traits

use async_trait::async_trait;

use crate::error::TransportError;

/// Extended data type code for standard error output
pub const EXTENDED_DATA_STDERR: u32 = 1;

/// Outbound half of one session channel.
///
/// Implemented by the transport for each accepted channel. All methods may
/// be called concurrently from the relay tasks and the owning controller;
/// the transport is responsible for flow control, so `data` may wait until
/// the peer has window space.
///
/// Request replies are not sent through the sink: each request carries its
/// own reply slot, answered while the transport is still handling it.
#[async_trait]
pub trait ChannelSink: Send + Sync {
    /// Send bytes on the channel's data stream
    async fn data(&self, data: &[u8]) -> Result<(), TransportError>;

    /// Send bytes on an extended data stream (stderr is code 1)
    async fn extended_data(&self, code: u32, data: &[u8]) -> Result<(), TransportError>;

    /// Signal that no more data will be sent
    async fn eof(&self) -> Result<(), TransportError>;

    /// Send the one-way `exit-status` notification
    async fn exit_status(&self, status: u32) -> Result<(), TransportError>;

    /// Close the channel
    async fn close(&self) -> Result<(), TransportError>;
}
