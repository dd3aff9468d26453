//! Event bus statistics.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Statistics snapshot for monitoring the event bus.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventBusStats {
    /// Currently registered handlers across all event types.
    pub total_handlers: u64,
    /// Publish calls, including ones with no listeners.
    pub events_published: u64,
    /// Individual handler invocations.
    pub handler_invocations: u64,
    /// Handler invocations that returned an error.
    pub handler_failures: u64,
}

/// Live counters behind [`EventBusStats`].
#[derive(Debug, Default)]
pub struct EventBusCounters {
    total_handlers: AtomicU64,
    events_published: AtomicU64,
    handler_invocations: AtomicU64,
    handler_failures: AtomicU64,
}

impl EventBusCounters {
    pub(crate) fn record_registration(&self, count: usize) {
        self.total_handlers.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_removal(&self, count: usize) {
        self.total_handlers.fetch_sub(count as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_publish(&self) {
        self.events_published.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_invocation(&self) {
        self.handler_invocations.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_failure(&self) {
        self.handler_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> EventBusStats {
        EventBusStats {
            total_handlers: self.total_handlers.load(Ordering::Relaxed),
            events_published: self.events_published.load(Ordering::Relaxed),
            handler_invocations: self.handler_invocations.load(Ordering::Relaxed),
            handler_failures: self.handler_failures.load(Ordering::Relaxed),
        }
    }
}
