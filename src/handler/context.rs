//! Channel context passed to message handlers.

use bytes::Bytes;

use crate::error::Result;
use crate::writer::{OutboundMessage, WriterHandle};

/// Context handed to a handler along with a completed message.
///
/// Identifies which channel the message arrived on and provides a way to
/// send messages back on that same channel.
///
/// # Thread Safety
///
/// `ChannelContext` is `Clone` and can be safely moved into spawned tasks.
/// Replies go through the channel's single writer task, so they never
/// interleave with other in-progress sends.
#[derive(Clone)]
pub struct ChannelContext {
    /// Stable identifier of the channel the message arrived on.
    channel_id: u64,
    /// Writer for the same channel.
    writer: WriterHandle,
}

impl ChannelContext {
    /// Create a new context for a channel.
    pub fn new(channel_id: u64, writer: WriterHandle) -> Self {
        Self { channel_id, writer }
    }

    /// The channel this message arrived on.
    #[inline]
    pub fn channel_id(&self) -> u64 {
        self.channel_id
    }

    /// Send a message back on the originating channel.
    pub fn reply(&self, msg_type: u16, payload: Bytes) -> Result<()> {
        self.writer
            .send(OutboundMessage::from_payload(msg_type, payload))
    }

    /// Access the channel's writer handle.
    pub fn writer(&self) -> &WriterHandle {
        &self.writer
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{msg_type, HEADER_SIZE};
    use crate::writer::spawn_writer_task;
    use std::sync::atomic::AtomicU64;
    use std::sync::Arc;
    use tokio::io::duplex;

    #[tokio::test]
    async fn test_reply_goes_out_on_channel() {
        let (client, mut server) = duplex(4096);
        let (writer, _task) = spawn_writer_task(client, Arc::new(AtomicU64::new(0)));

        let ctx = ChannelContext::new(7, writer);
        assert_eq!(ctx.channel_id(), 7);

        ctx.reply(msg_type::RESULT, Bytes::from_static(b"ok"))
            .unwrap();

        let mut buf = vec![0u8; 64];
        let n = tokio::io::AsyncReadExt::read(&mut server, &mut buf)
            .await
            .unwrap();
        assert_eq!(n, HEADER_SIZE + 2);
    }
}
