//! Channel sink backed by a russh session handle

use async_trait::async_trait;
use russh::server::Handle;
use russh::{ChannelId, CryptoVec};

use rsh_core::error::TransportError;
use rsh_core::traits::ChannelSink;

/// Outbound half of one russh channel
pub struct RusshChannelSink {
    handle: Handle,
    channel: ChannelId,
}

impl RusshChannelSink {
    pub fn new(handle: Handle, channel: ChannelId) -> Self {
        Self { handle, channel }
    }
}

#[async_trait]
impl ChannelSink for RusshChannelSink {
    async fn data(&self, data: &[u8]) -> Result<(), TransportError> {
        self.handle
            .data(self.channel, CryptoVec::from_slice(data))
            .await
            .map_err(|_| TransportError::ChannelClosed)
    }

    async fn extended_data(&self, code: u32, data: &[u8]) -> Result<(), TransportError> {
        self.handle
            .extended_data(self.channel, code, CryptoVec::from_slice(data))
            .await
            .map_err(|_| TransportError::ChannelClosed)
    }

    async fn eof(&self) -> Result<(), TransportError> {
        self.handle
            .eof(self.channel)
            .await
            .map_err(|_| TransportError::ChannelClosed)
    }

    async fn exit_status(&self, status: u32) -> Result<(), TransportError> {
        self.handle
            .exit_status_request(self.channel, status)
            .await
            .map_err(|_| TransportError::ChannelClosed)
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.handle
            .close(self.channel)
            .await
            .map_err(|_| TransportError::ChannelClosed)
    }
}
