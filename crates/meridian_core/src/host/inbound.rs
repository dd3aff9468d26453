//! Inbound queue between I/O tasks and the simulation thread.

use crate::connection::{CloseReason, ConnectionHandle, LinkId};
use crate::error::{CoreError, Result};
use crate::types::PeerId;
use crate::utils::current_timestamp_millis;
use tokio::sync::mpsc;

/// Everything that can reach a host from outside its tick.
#[derive(Debug)]
pub enum Inbound {
    /// A link finished its handshake.
    Opened(ConnectionHandle),
    /// A raw frame arrived on `link` from `from`.
    Frame {
        link: LinkId,
        from: PeerId,
        frame: String,
        received_at: u64,
    },
    /// A link ended.
    Closed {
        link: LinkId,
        peer: PeerId,
        reason: CloseReason,
    },
}

/// Cloneable producer side of a host's inbound queue.
///
/// Connection drivers hold one of these; the host itself holds another for
/// loopback delivery.
#[derive(Debug, Clone)]
pub struct HostSender {
    tx: mpsc::UnboundedSender<Inbound>,
}

impl HostSender {
    pub(crate) fn channel() -> (Self, mpsc::UnboundedReceiver<Inbound>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    fn push(&self, item: Inbound) -> Result<()> {
        self.tx.send(item).map_err(|_| CoreError::NotRunning)
    }

    pub(crate) fn link_opened(&self, handle: ConnectionHandle) -> Result<()> {
        self.push(Inbound::Opened(handle))
    }

    pub(crate) fn deliver_frame(&self, link: LinkId, from: PeerId, frame: String) -> Result<()> {
        self.push(Inbound::Frame {
            link,
            from,
            frame,
            received_at: current_timestamp_millis(),
        })
    }

    pub(crate) fn link_closed(&self, link: LinkId, peer: PeerId, reason: CloseReason) -> Result<()> {
        self.push(Inbound::Closed { link, peer, reason })
    }

    /// True once the host has stopped and dropped its receiver.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}
