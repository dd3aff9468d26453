use crate::codec;
use crate::connection::ConnectionHandle;
use crate::error::{CoreError, Result};
use crate::events::Event;
use crate::host::HostCommand;
use crate::message::{Message, RpcTarget};
use crate::system::EventBus;
use crate::types::{PeerId, Role};
use crate::utils::current_timestamp_millis;
use std::cell::RefCell;
use std::collections::HashMap;
use tracing::{debug, trace};

/// Encodes an RPC and queues it on `link`. Fire-and-forget.
pub fn call(link: &ConnectionHandle, target: &RpcTarget, args: Vec<String>) -> Result<()> {
    let frame = codec::encode(
        target.service(),
        target.method(),
        current_timestamp_millis(),
        &args,
    )?;
    trace!("📤 {} -> {}", target, link.remote_id());
    link.send_frame(frame)
}

/// Borrowed view of a host, handed to hooks and handlers.
///
/// Everything a service needs from its host goes through here: sending
/// RPCs, publishing events and asking the host to drop a link or stop.
/// Disconnects and stop requests are deferred until the current unit of work
/// finishes.
pub struct HostContext<'a> {
    pub(crate) local_id: PeerId,
    pub(crate) role: Role,
    pub(crate) bus: &'a EventBus,
    pub(crate) links: &'a HashMap<PeerId, ConnectionHandle>,
    pub(crate) loopback: &'a ConnectionHandle,
    pub(crate) commands: &'a RefCell<Vec<HostCommand>>,
}

impl<'a> HostContext<'a> {
    /// Id of the host running this context.
    pub fn local_id(&self) -> PeerId {
        self.local_id
    }

    /// Default role of the host.
    pub fn role(&self) -> Role {
        self.role
    }

    /// Publishes an event on the host's bus.
    ///
    /// Handler errors are logged by the bus; the first fatal one is returned
    /// after every handler has run.
    pub fn publish<E: Event>(&self, event: &E) -> Result<usize> {
        self.bus.publish(self, event).into_result()
    }

    /// Sends an RPC over `link`.
    pub fn call(&self, link: &ConnectionHandle, target: &RpcTarget, args: Vec<String>) -> Result<()> {
        call(link, target, args)
    }

    /// Sends an RPC to a connected peer by id.
    pub fn call_peer(&self, peer: PeerId, target: &RpcTarget, args: Vec<String>) -> Result<()> {
        let link = self
            .link(peer)
            .ok_or_else(|| CoreError::Transport(format!("no open link to {}", peer)))?;
        call(link, target, args)
    }

    /// Sends an RPC to this host itself through the loopback link.
    ///
    /// The message is handled on a later pass of the inbound queue, never
    /// re-entrantly.
    pub fn hurl(&self, target: &RpcTarget, args: Vec<String>) -> Result<()> {
        call(self.loopback, target, args)
    }

    /// Sends an RPC to every open link. Returns how many accepted it.
    pub fn broadcast(&self, target: &RpcTarget, args: Vec<String>) -> usize {
        self.links
            .values()
            .filter(|link| call(link, target, args.clone()).is_ok())
            .count()
    }

    pub fn link(&self, peer: PeerId) -> Option<&'a ConnectionHandle> {
        if peer == self.local_id {
            return Some(self.loopback);
        }
        self.links.get(&peer)
    }

    /// Open links, excluding loopback.
    pub fn links(&self) -> impl Iterator<Item = &'a ConnectionHandle> {
        self.links.values()
    }

    pub fn loopback(&self) -> &'a ConnectionHandle {
        self.loopback
    }

    /// Closes the link to `peer` once the current handler returns.
    pub fn disconnect(&self, peer: PeerId) {
        debug!("🔌 Disconnect of {} requested", peer);
        self.commands.borrow_mut().push(HostCommand::Disconnect(peer));
    }

    /// Stops the host once the current handler returns.
    pub fn request_stop(&self) {
        debug!("🛑 Host stop requested");
        self.commands.borrow_mut().push(HostCommand::Stop);
    }
}

/// An RPC being handled.
///
/// Only exists for the duration of a handler call, which is what makes
/// [`Rpc::reply`] impossible outside one.
pub struct Rpc<'a> {
    ctx: &'a HostContext<'a>,
    message: &'a Message,
    link: &'a ConnectionHandle,
}

impl<'a> Rpc<'a> {
    pub(crate) fn new(
        ctx: &'a HostContext<'a>,
        message: &'a Message,
        link: &'a ConnectionHandle,
    ) -> Self {
        Self { ctx, message, link }
    }

    pub fn ctx(&self) -> &'a HostContext<'a> {
        self.ctx
    }

    pub fn message(&self) -> &'a Message {
        self.message
    }

    /// The link the message arrived on.
    pub fn link(&self) -> &'a ConnectionHandle {
        self.link
    }

    pub fn sender_id(&self) -> PeerId {
        self.message.sender_id()
    }

    /// Replies to the sender on the same service.
    pub fn reply(&self, method: &str, args: Vec<String>) -> Result<()> {
        let target = RpcTarget::owned(self.message.service(), method);
        call(self.link, &target, args)
    }
}
