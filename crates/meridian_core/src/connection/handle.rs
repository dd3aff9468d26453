use crate::error::{CoreError, Result};
use crate::host::HostSender;
use crate::types::{PeerId, Role};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;

static NEXT_LINK: AtomicU64 = AtomicU64::new(1);

/// Identity of one link instance, unique for the life of the process.
///
/// Two links to the same peer id never share a `LinkId`, so anything a
/// driver reports about its link cannot be mistaken for another link's.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LinkId(u64);

impl LinkId {
    /// The link from a host to itself.
    pub const LOOPBACK: LinkId = LinkId(0);

    pub(crate) fn next() -> Self {
        LinkId(NEXT_LINK.fetch_add(1, Ordering::Relaxed))
    }

    pub fn is_loopback(self) -> bool {
        self == Self::LOOPBACK
    }
}

impl fmt::Display for LinkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "link#{}", self.0)
    }
}

/// Instructions from the host to a connection driver.
#[derive(Debug)]
pub enum LinkCommand {
    Frame(String),
    Close,
}

#[derive(Debug, Clone)]
enum Outbound {
    Remote(mpsc::UnboundedSender<LinkCommand>),
    Loopback(HostSender),
}

/// Handle to one open link.
///
/// The local role is fixed when the handshake completes and never changes.
/// Sending is a non-blocking queue push; a frame sent on a link that has
/// since closed is reported as a transport error and otherwise dropped.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    link_id: LinkId,
    remote_id: PeerId,
    local_role: Role,
    outbound: Outbound,
}

impl ConnectionHandle {
    pub(crate) fn remote(
        remote_id: PeerId,
        local_role: Role,
        tx: mpsc::UnboundedSender<LinkCommand>,
    ) -> Self {
        Self {
            link_id: LinkId::next(),
            remote_id,
            local_role,
            outbound: Outbound::Remote(tx),
        }
    }

    /// A link from a host to itself. Frames go straight to its inbound queue.
    pub(crate) fn loopback(local_id: PeerId, local_role: Role, host: HostSender) -> Self {
        Self {
            link_id: LinkId::LOOPBACK,
            remote_id: local_id,
            local_role,
            outbound: Outbound::Loopback(host),
        }
    }

    pub fn link_id(&self) -> LinkId {
        self.link_id
    }

    pub fn remote_id(&self) -> PeerId {
        self.remote_id
    }

    /// Role of this host on the link.
    pub fn local_role(&self) -> Role {
        self.local_role
    }

    /// Role of the other end of the link.
    pub fn remote_role(&self) -> Role {
        self.local_role.opposite()
    }

    /// Whether this host is the authoritative side of the link.
    pub fn is_authoritative(&self) -> bool {
        self.local_role.is_authoritative()
    }

    pub fn is_loopback(&self) -> bool {
        self.link_id.is_loopback()
    }

    /// Queues an encoded frame for delivery.
    pub fn send_frame(&self, frame: String) -> Result<()> {
        match &self.outbound {
            Outbound::Remote(tx) => tx
                .send(LinkCommand::Frame(frame))
                .map_err(|_| CoreError::Transport(format!("link to {} is closed", self.remote_id))),
            Outbound::Loopback(host) => host.deliver_frame(self.link_id, self.remote_id, frame),
        }
    }

    /// Asks the driver to send a close notification and end the link.
    pub fn close(&self) {
        if let Outbound::Remote(tx) = &self.outbound {
            let _ = tx.send(LinkCommand::Close);
        }
    }

    pub fn is_closed(&self) -> bool {
        match &self.outbound {
            Outbound::Remote(tx) => tx.is_closed(),
            Outbound::Loopback(host) => host.is_closed(),
        }
    }

    /// Creates a handle whose outbound queue is observable, for driving
    /// services in tests without a transport.
    #[cfg(test)]
    pub(crate) fn detached(
        remote_id: PeerId,
        local_role: Role,
    ) -> (Self, mpsc::UnboundedReceiver<LinkCommand>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::remote(remote_id, local_role, tx), rx)
    }
}
