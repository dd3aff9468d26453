//! # Connections
//!
//! Links between hosts: the handshake that fixes each side's authority role,
//! the handle services use to send on a link, the transport seam and the
//! driver task that joins them to a host.

mod driver;
mod handle;
mod handshake;
mod transport;

pub use driver::{drive_connection, LinkOptions};
pub use handle::{ConnectionHandle, LinkCommand, LinkId};
pub use handshake::{
    is_close_notification, CloseReason, ConnectionState, ControlMessage, Handshake,
    HandshakeOutcome, HandshakeSide, CONTROL_SERVICE,
};
pub use transport::{memory_pair, FrameSink, FrameSource, MemorySink, MemorySource, MemoryTransport};
