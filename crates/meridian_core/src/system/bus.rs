//! Event bus implementation.

use super::stats::{EventBusCounters, EventBusStats};
use crate::error::{CoreError, Result};
use crate::events::{Event, EventHandler};
use crate::service::{HostContext, ServiceSlot};
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{trace, warn};

struct Subscription {
    slot: ServiceSlot,
    handler: Arc<dyn EventHandler>,
}

/// Result of one publish call.
#[derive(Debug, Default)]
pub struct Dispatch {
    /// Handlers that ran to completion without error.
    pub handled: usize,
    /// Errors returned by handlers, in handler order.
    pub errors: Vec<CoreError>,
}

impl Dispatch {
    /// Folds the dispatch into a result: the first fatal error wins, anything
    /// else counts as delivered.
    pub fn into_result(self) -> Result<usize> {
        match self.errors.into_iter().find(CoreError::is_fatal) {
            Some(fatal) => Err(fatal),
            None => Ok(self.handled),
        }
    }
}

/// Typed in-process event bus.
///
/// Handlers are keyed by the concrete event type and run synchronously, on
/// the caller's thread, in the order they were registered. Publishing a type
/// nobody listens to is a no-op.
///
/// The bus is owned by its host and only mutated while services are attached
/// or detached, so publishing needs no locking.
pub struct EventBus {
    handlers: HashMap<TypeId, Vec<Subscription>>,
    stats: Arc<EventBusCounters>,
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
            stats: Arc::new(EventBusCounters::default()),
        }
    }

    /// Appends a handler for event type `E`, owned by `slot`.
    pub(crate) fn subscribe<E: Event>(&mut self, slot: ServiceSlot, handler: Arc<dyn EventHandler>) {
        debug_assert_eq!(handler.expected_type_id(), TypeId::of::<E>());
        trace!(
            "📝 Handler '{}' subscribed to {}",
            handler.handler_name(),
            E::type_name()
        );
        self.handlers
            .entry(TypeId::of::<E>())
            .or_default()
            .push(Subscription { slot, handler });
        self.stats.record_registration(1);
    }

    /// Drops every handler owned by `slot`.
    pub(crate) fn remove_slot(&mut self, slot: ServiceSlot) {
        let mut removed = 0;
        self.handlers.retain(|_, subscriptions| {
            let before = subscriptions.len();
            subscriptions.retain(|s| s.slot != slot);
            removed += before - subscriptions.len();
            !subscriptions.is_empty()
        });
        self.stats.record_removal(removed);
    }

    /// Delivers `event` to every handler registered for `E`.
    ///
    /// A failing handler does not stop later handlers; its error is logged
    /// and collected in the returned [`Dispatch`].
    pub fn publish<E: Event>(&self, ctx: &HostContext<'_>, event: &E) -> Dispatch {
        self.stats.record_publish();
        let mut dispatch = Dispatch::default();
        let Some(subscriptions) = self.handlers.get(&TypeId::of::<E>()) else {
            return dispatch;
        };

        let payload: &dyn Any = event;
        for subscription in subscriptions {
            self.stats.record_invocation();
            match subscription.handler.handle(ctx, payload) {
                Ok(()) => dispatch.handled += 1,
                Err(e) => {
                    warn!(
                        "❌ Handler '{}' failed for {}: {}",
                        subscription.handler.handler_name(),
                        E::type_name(),
                        e
                    );
                    self.stats.record_failure();
                    dispatch.errors.push(e);
                }
            }
        }
        dispatch
    }

    /// Number of handlers registered for `E`.
    pub fn handler_count<E: Event>(&self) -> usize {
        self.handlers
            .get(&TypeId::of::<E>())
            .map(Vec::len)
            .unwrap_or(0)
    }

    /// Snapshot of the bus counters.
    pub fn stats(&self) -> EventBusStats {
        self.stats.snapshot()
    }

    /// Shared counters, readable from other tasks while the host runs.
    pub fn stats_handle(&self) -> Arc<EventBusCounters> {
        self.stats.clone()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
