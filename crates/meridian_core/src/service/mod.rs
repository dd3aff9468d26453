//! # Services
//!
//! A service is a unit of server or client behaviour attached to a host. It
//! exposes RPC methods and event handlers through an explicit
//! [`Registrar`] table and receives lifecycle hooks from the host.
//!
//! ## Hook Order
//!
//! * `on_enable` when attached, `on_start` once when the host starts
//! * `on_tick` every host tick, in attach order
//! * for a new link: `on_began_connected` on every service, then
//!   `on_connected` on every service
//! * for a closed link: `on_disconnected` on every service, then
//!   `on_finished_disconnected` on every service
//! * `on_disable` when detached or when the host stops

mod context;
mod registry;

pub use context::{call, HostContext, Rpc};
pub use registry::Registrar;
pub(crate) use registry::RpcTable;

use crate::connection::{CloseReason, ConnectionHandle};
use crate::error::Result;
use crate::types::PeerId;
use std::time::Duration;

/// Identifies an attached service inside its host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ServiceSlot(pub(crate) usize);

impl ServiceSlot {
    /// Slot for handlers registered by the host owner rather than a service.
    pub(crate) const HOST: ServiceSlot = ServiceSlot(usize::MAX);
}

/// Behaviour attached to a [`Host`](crate::host::Host).
///
/// Hooks take `&self`; services keep mutable state behind interior
/// mutability because the host shares them with their own RPC and event
/// handlers. Every hook defaults to doing nothing.
pub trait Service: Send + Sync + 'static {
    /// Name used to route RPCs to this service.
    fn name(&self) -> &str;

    /// Declares RPC methods and event handlers. Called once on attach.
    fn register(registrar: &mut Registrar<'_, Self>) -> Result<()>
    where
        Self: Sized,
    {
        let _ = registrar;
        Ok(())
    }

    fn on_enable(&self, _ctx: &HostContext<'_>) -> Result<()> {
        Ok(())
    }

    fn on_start(&self, _ctx: &HostContext<'_>) -> Result<()> {
        Ok(())
    }

    fn on_disable(&self, _ctx: &HostContext<'_>) -> Result<()> {
        Ok(())
    }

    fn on_tick(&self, _ctx: &HostContext<'_>, _delta: Duration) -> Result<()> {
        Ok(())
    }

    fn on_began_connected(&self, _ctx: &HostContext<'_>, _link: &ConnectionHandle) -> Result<()> {
        Ok(())
    }

    fn on_connected(&self, _ctx: &HostContext<'_>, _link: &ConnectionHandle) -> Result<()> {
        Ok(())
    }

    fn on_disconnected(
        &self,
        _ctx: &HostContext<'_>,
        _peer: PeerId,
        _reason: CloseReason,
    ) -> Result<()> {
        Ok(())
    }

    fn on_finished_disconnected(
        &self,
        _ctx: &HostContext<'_>,
        _peer: PeerId,
        _reason: CloseReason,
    ) -> Result<()> {
        Ok(())
    }
}
