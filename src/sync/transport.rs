use async_trait::async_trait;
use tokio::sync::mpsc;

use passlink_protocol::Frame;

use crate::error::{Result, TransportError};

/// User-implemented socket layer. Frames travel as JSON text.
#[async_trait]
pub trait FrameTransport: Send {
    async fn send(&mut self, frame: Frame) -> Result<()>;

    /// Next inbound frame. `Ok(None)` once the peer has disconnected.
    /// Must be cancel-safe.
    async fn recv(&mut self) -> Result<Option<Frame>>;
}

/// In-process transport over a pair of channels carrying serialized frames.
#[derive(Debug)]
pub struct ChannelTransport {
    tx: mpsc::UnboundedSender<String>,
    rx: mpsc::UnboundedReceiver<String>,
}

impl ChannelTransport {
    /// Two connected ends.
    pub fn pair() -> (Self, Self) {
        let (a_tx, b_rx) = mpsc::unbounded_channel();
        let (b_tx, a_rx) = mpsc::unbounded_channel();
        (
            Self { tx: a_tx, rx: a_rx },
            Self { tx: b_tx, rx: b_rx },
        )
    }

    /// Push raw text, bypassing frame serialization.
    pub fn send_raw(&self, text: impl Into<String>) -> Result<()> {
        self.tx
            .send(text.into())
            .map_err(|_| TransportError::Closed.into())
    }
}

#[async_trait]
impl FrameTransport for ChannelTransport {
    async fn send(&mut self, frame: Frame) -> Result<()> {
        let text = frame.to_json()?;
        self.tx.send(text).map_err(|_| TransportError::Closed)?;
        Ok(())
    }

    async fn recv(&mut self) -> Result<Option<Frame>> {
        match self.rx.recv().await {
            Some(text) => Ok(Some(Frame::from_json(&text)?)),
            None => Ok(None),
        }
    }
}
