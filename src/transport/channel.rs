use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::Framed;

use crate::core::codec::PacketCodec;
use crate::error::{DimError, Result};
use crate::protocol::message::Message;

/// Message-level view of a framed connection.
pub struct Channel<S> {
    framed: Framed<S, PacketCodec>,
}

impl<S> Channel<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(stream: S) -> Self {
        Self {
            framed: Framed::new(stream, PacketCodec),
        }
    }

    pub async fn send(&mut self, message: &Message) -> Result<()> {
        self.framed.send(message.to_packet()?).await
    }

    /// Next message from the peer; [`DimError::ConnectionClosed`] at end of stream.
    pub async fn recv(&mut self) -> Result<Message> {
        match self.framed.next().await {
            Some(Ok(packet)) => Message::from_packet(&packet),
            Some(Err(e)) => Err(e),
            None => Err(DimError::ConnectionClosed),
        }
    }
}
