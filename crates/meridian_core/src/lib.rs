//! # Meridian Core
//!
//! The runtime shared by Meridian servers and clients: message framing, the
//! link handshake that assigns authority roles, a typed event bus, the
//! service host with its RPC dispatcher, entity/component replication and
//! sync-context replication.
//!
//! ## Core Components
//!
//! - **[`codec`]**: text framing for RPC messages and streamed batches
//! - **[`connection`]**: handshake state machine, link handles, transport
//!   seam and the per-link driver task
//! - **[`host`]**: owns services and links, drains the inbound queue each tick
//! - **[`service`]**: the [`Service`] trait, registration and handler context
//! - **[`system`]**: the typed [`EventBus`]
//! - **[`entity`]**: authoritative entity store and subordinate mirror
//! - **[`sync`]**: whole-key JSON replication for named contexts
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use meridian_core::prelude::*;
//!
//! # async fn example() -> meridian_core::Result<()> {
//! let mut host = Host::new(Role::Master, HostConfig::default());
//! let entities = host.attach(EntityService::new(Role::Master))?;
//! host.attach(SyncService::new())?;
//!
//! let shutdown = ShutdownState::new();
//! // Hand `host.sender()` to whatever accepts connections, then:
//! host.run(&shutdown).await?;
//! # drop(entities);
//! # Ok(())
//! # }
//! ```

pub mod codec;
pub mod config;
pub mod connection;
pub mod entity;
pub mod error;
pub mod events;
pub mod guard;
pub mod host;
pub mod message;
pub mod service;
pub mod shutdown;
pub mod sync;
pub mod system;
pub mod types;
pub mod utils;

#[cfg(test)]
mod tests;

pub use config::HostConfig;
pub use connection::{
    drive_connection, memory_pair, CloseReason, ConnectionHandle, ConnectionState, FrameSink,
    FrameSource, LinkId, LinkOptions,
};
pub use entity::{Component, ComponentRef, EntityService, InterestPolicy};
pub use error::{ComponentMisuse, CoreError, Result};
pub use events::Event;
pub use guard::InFlight;
pub use host::{Host, HostSender, HostState, TickReport};
pub use message::{Message, RpcTarget};
pub use service::{HostContext, Registrar, Rpc, Service};
pub use shutdown::ShutdownState;
pub use sync::SyncService;
pub use system::{EventBus, EventBusStats};
pub use types::{EntityId, PeerId, Role};
pub use utils::{current_timestamp, current_timestamp_millis};

/// Everything a service implementation usually needs.
pub mod prelude {
    pub use crate::args;
    pub use crate::config::HostConfig;
    pub use crate::connection::{
        drive_connection, memory_pair, CloseReason, ConnectionHandle, FrameSink, FrameSource,
        LinkOptions,
    };
    pub use crate::entity::{Component, ComponentRef, EntityService, EntityView, InterestPolicy};
    pub use crate::error::{ComponentMisuse, CoreError, Result};
    pub use crate::events::{
        ComponentReplicatedEvent, EntityDespawnedEvent, EntityReplicatedEvent, Event,
        HostStartedEvent, HostStoppedEvent, PeerConnectedEvent, PeerDisconnectedEvent,
        SyncUpdatedEvent,
    };
    pub use crate::guard::InFlight;
    pub use crate::host::{Host, HostSender, HostState};
    pub use crate::message::{Message, RpcTarget};
    pub use crate::service::{HostContext, Registrar, Rpc, Service};
    pub use crate::shutdown::ShutdownState;
    pub use crate::sync::SyncService;
    pub use crate::types::{EntityId, PeerId, Role};
    pub use crate::utils::{current_timestamp, current_timestamp_millis};
}
