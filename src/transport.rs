//! Transport trait for moving encoded frames between peers

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;
use tracing::trace;

use crate::{Result, StreamingError};

/// Ordered, reliable carrier of encoded buffers.
///
/// Each frame is one encoded [`crate::PacketBuffer`]. Implementations must
/// preserve order and never split or merge frames; reference resolution on the
/// receiving side relies on both.
#[async_trait]
pub trait Transport: Send + 'static {
    /// Send one frame
    async fn send(&mut self, frame: Bytes) -> Result<()>;

    /// Receive the next frame
    ///
    /// Returns:
    /// - `Ok(Some(frame))` - Frame received
    /// - `Ok(None)` - Peer closed the transport (normal termination)
    /// - `Err(e)` - Transport failure
    async fn recv(&mut self) -> Result<Option<Bytes>>;
}

/// In-process transport backed by a pair of bounded tokio channels.
#[derive(Debug)]
pub struct MemoryTransport {
    tx: mpsc::Sender<Bytes>,
    rx: mpsc::Receiver<Bytes>,
}

impl MemoryTransport {
    /// Two connected endpoints; frames sent on one are received on the other.
    pub fn pair(capacity: usize) -> (Self, Self) {
        let (a_tx, a_rx) = mpsc::channel(capacity);
        let (b_tx, b_rx) = mpsc::channel(capacity);
        (Self { tx: a_tx, rx: b_rx }, Self { tx: b_tx, rx: a_rx })
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn send(&mut self, frame: Bytes) -> Result<()> {
        trace!(len = frame.len(), "Sending frame");
        self.tx
            .send(frame)
            .await
            .map_err(|_| StreamingError::transport("Peer endpoint dropped"))
    }

    async fn recv(&mut self) -> Result<Option<Bytes>> {
        Ok(self.rx.recv().await)
    }
}
