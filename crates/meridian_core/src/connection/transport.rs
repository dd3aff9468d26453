//! Transport seam.
//!
//! A transport is split into a sink and a source so that a driver can write
//! while it waits for the next inbound frame. The network crate implements
//! these traits over WebSockets; [`memory_pair`] provides an in-process pair
//! used by tests and by hosts embedded in the same process.

use crate::error::{CoreError, Result};
use async_trait::async_trait;
use tokio::sync::mpsc;

#[async_trait]
pub trait FrameSink: Send + 'static {
    async fn send_frame(&mut self, frame: String) -> Result<()>;

    /// Closes the write half. Closing twice is not an error.
    async fn close(&mut self) -> Result<()>;
}

#[async_trait]
pub trait FrameSource: Send + 'static {
    /// Next complete frame, or `None` once the transport has ended.
    async fn next_frame(&mut self) -> Option<Result<String>>;
}

/// Write half of an in-memory transport.
#[derive(Debug)]
pub struct MemorySink {
    tx: Option<mpsc::UnboundedSender<String>>,
}

/// Read half of an in-memory transport.
#[derive(Debug)]
pub struct MemorySource {
    rx: mpsc::UnboundedReceiver<String>,
}

/// One end of an in-memory transport.
pub type MemoryTransport = (MemorySink, MemorySource);

/// Creates two connected in-memory transport ends.
pub fn memory_pair() -> (MemoryTransport, MemoryTransport) {
    let (a_tx, b_rx) = mpsc::unbounded_channel();
    let (b_tx, a_rx) = mpsc::unbounded_channel();
    (
        (MemorySink { tx: Some(a_tx) }, MemorySource { rx: a_rx }),
        (MemorySink { tx: Some(b_tx) }, MemorySource { rx: b_rx }),
    )
}

#[async_trait]
impl FrameSink for MemorySink {
    async fn send_frame(&mut self, frame: String) -> Result<()> {
        let tx = self
            .tx
            .as_ref()
            .ok_or_else(|| CoreError::Transport("memory sink closed".to_string()))?;
        tx.send(frame)
            .map_err(|_| CoreError::Transport("memory peer dropped".to_string()))
    }

    async fn close(&mut self) -> Result<()> {
        self.tx = None;
        Ok(())
    }
}

#[async_trait]
impl FrameSource for MemorySource {
    async fn next_frame(&mut self) -> Option<Result<String>> {
        self.rx.recv().await.map(Ok)
    }
}
