//! # Event Traits and Core Events
//!
//! This module defines the event infrastructure for the in-process bus and
//! the events the runtime itself publishes.
//!
//! ## Event Categories
//!
//! ### Link Events
//! Published by the host after every service has seen the matching lifecycle
//! hook: [`PeerConnectedEvent`] and [`PeerDisconnectedEvent`].
//!
//! ### Host Events
//! [`HostStartedEvent`] and [`HostStoppedEvent`].
//!
//! ### Replication Events
//! Published on the subordinate side when replicated state arrives:
//! [`EntityReplicatedEvent`], [`ComponentReplicatedEvent`],
//! [`EntityDespawnedEvent`] and [`SyncUpdatedEvent`].

use crate::connection::CloseReason;
use crate::error::Result;
use crate::service::HostContext;
use crate::types::{EntityId, PeerId, Role};
use serde::{Deserialize, Serialize};
use std::any::{Any, TypeId};
use std::fmt::Debug;
use std::marker::PhantomData;
use tracing::warn;

// ============================================================================
// Event Traits and Core Infrastructure
// ============================================================================

/// Marker trait for anything that can travel on the event bus.
///
/// Events are routed by their concrete type, so there is nothing to
/// implement: every `Send + Sync + Debug + 'static` type is an event through
/// the blanket implementation below.
pub trait Event: Send + Sync + Any + Debug {
    /// Returns the type name of this event for logging.
    fn type_name() -> &'static str
    where
        Self: Sized;

    fn as_any(&self) -> &dyn Any;
}

impl<T> Event for T
where
    T: Send + Sync + Any + Debug + 'static,
{
    fn type_name() -> &'static str {
        std::any::type_name::<T>()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Type-erased event handler stored by the bus.
///
/// Most users never implement this directly; [`Registrar::on_event`]
/// wraps a typed closure in a [`TypedEventHandler`].
///
/// [`Registrar::on_event`]: crate::service::Registrar::on_event
pub trait EventHandler: Send + Sync + 'static {
    /// Handles one event, passed as `&dyn Any`.
    fn handle(&self, ctx: &HostContext<'_>, event: &dyn Any) -> Result<()>;

    /// The `TypeId` of the event type this handler expects.
    fn expected_type_id(&self) -> TypeId;

    /// Human-readable name for logs.
    fn handler_name(&self) -> &str;
}

/// Bridges a typed closure to [`EventHandler`].
///
/// # Type Parameters
///
/// * `T` - The event type this handler processes
/// * `F` - The function that handles the event
pub struct TypedEventHandler<T, F>
where
    T: Event,
    F: Fn(&HostContext<'_>, &T) -> Result<()> + Send + Sync,
{
    handler: F,
    name: String,
    _phantom: PhantomData<fn(&T)>,
}

impl<T, F> TypedEventHandler<T, F>
where
    T: Event,
    F: Fn(&HostContext<'_>, &T) -> Result<()> + Send + Sync,
{
    /// Creates a new typed event handler.
    ///
    /// # Arguments
    ///
    /// * `name` - Human-readable name for debugging
    /// * `handler` - Function to handle events of type T
    pub fn new(name: String, handler: F) -> Self {
        Self {
            handler,
            name,
            _phantom: PhantomData,
        }
    }
}

impl<T, F> Debug for TypedEventHandler<T, F>
where
    T: Event,
    F: Fn(&HostContext<'_>, &T) -> Result<()> + Send + Sync,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TypedEventHandler")
            .field("name", &self.name)
            .finish()
    }
}

impl<T, F> EventHandler for TypedEventHandler<T, F>
where
    T: Event,
    F: Fn(&HostContext<'_>, &T) -> Result<()> + Send + Sync + 'static,
{
    fn handle(&self, ctx: &HostContext<'_>, event: &dyn Any) -> Result<()> {
        match event.downcast_ref::<T>() {
            Some(event) => (self.handler)(ctx, event),
            None => {
                warn!(
                    "⚠️ Handler '{}' received an event that is not a {}",
                    self.name,
                    T::type_name()
                );
                Ok(())
            }
        }
    }

    fn expected_type_id(&self) -> TypeId {
        TypeId::of::<T>()
    }

    fn handler_name(&self) -> &str {
        &self.name
    }
}

// ============================================================================
// Link and Host Events
// ============================================================================

/// A link finished its handshake and every service ran `on_connected`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerConnectedEvent {
    pub peer_id: PeerId,
    /// This host's role on the link.
    pub role: Role,
    pub timestamp: u64,
}

/// A link closed and every service ran `on_finished_disconnected`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerDisconnectedEvent {
    pub peer_id: PeerId,
    pub reason: CloseReason,
    pub timestamp: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostStartedEvent {
    pub host_id: PeerId,
    pub role: Role,
    pub timestamp: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostStoppedEvent {
    pub host_id: PeerId,
    pub timestamp: u64,
}

// ============================================================================
// Replication Events
// ============================================================================

/// The authoritative side started replicating an entity to this host.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityReplicatedEvent {
    pub entity: EntityId,
    /// Whether this host's connection owns the entity.
    pub owned: bool,
}

/// A replicated component changed or was removed (`value` is `None`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentReplicatedEvent {
    pub entity: EntityId,
    pub component: String,
    pub value: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityDespawnedEvent {
    pub entity: EntityId,
}

/// A sync context key was pushed to this host. `value` is `None` when the
/// key was removed from the context.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncUpdatedEvent {
    pub context: String,
    pub key: String,
    pub value: Option<serde_json::Value>,
}
