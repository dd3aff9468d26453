//! Server lifecycle and per-socket connection handling.

pub mod core;
pub mod handlers;

pub use core::MeridianServer;
