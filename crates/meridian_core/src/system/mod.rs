//! # Event Bus
//!
//! The typed bus services use to notify each other inside one host, plus the
//! counters the application monitor reads.

mod bus;
mod stats;

#[cfg(test)]
mod tests;

pub use bus::{Dispatch, EventBus};
pub use stats::{EventBusCounters, EventBusStats};
