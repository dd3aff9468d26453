use super::context::{HostContext, Rpc};
use super::{Service, ServiceSlot};
use crate::error::{CoreError, Result};
use crate::events::{Event, TypedEventHandler};
use crate::system::EventBus;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

pub(crate) type RpcHandler = Arc<dyn Fn(&Rpc<'_>) -> Result<()> + Send + Sync>;

struct RpcEntry {
    slot: ServiceSlot,
    handler: RpcHandler,
}

/// Dispatch table keyed by service name, then method name.
#[derive(Default)]
pub(crate) struct RpcTable {
    services: HashMap<String, HashMap<String, RpcEntry>>,
}

impl RpcTable {
    pub(crate) fn insert(
        &mut self,
        slot: ServiceSlot,
        service: &str,
        method: &str,
        handler: RpcHandler,
    ) -> Result<()> {
        let methods = self.services.entry(service.to_string()).or_default();
        if let Some(existing) = methods.get(method) {
            let owner = if existing.slot == slot {
                "the same service"
            } else {
                "another service"
            };
            return Err(CoreError::ServiceConfiguration(format!(
                "RPC '{}.{}' is already registered by {}",
                service, method, owner
            )));
        }
        methods.insert(method.to_string(), RpcEntry { slot, handler });
        Ok(())
    }

    pub(crate) fn lookup(&self, service: &str, method: &str) -> Result<RpcHandler> {
        self.services
            .get(service)
            .and_then(|methods| methods.get(method))
            .map(|entry| entry.handler.clone())
            .ok_or_else(|| CoreError::UnknownTarget {
                service: service.to_string(),
                method: method.to_string(),
            })
    }

    pub(crate) fn remove_slot(&mut self, slot: ServiceSlot) {
        self.services.retain(|_, methods| {
            methods.retain(|_, entry| entry.slot != slot);
            !methods.is_empty()
        });
    }

    pub(crate) fn method_count(&self) -> usize {
        self.services.values().map(HashMap::len).sum()
    }
}

/// Registration surface handed to [`Service::register`].
///
/// Handlers are plain methods on the service:
///
/// ```rust,ignore
/// fn register(reg: &mut Registrar<'_, Self>) -> Result<()> {
///     reg.rpc("Ping", Self::ping)?;
///     reg.on_event(Self::on_peer_connected);
///     Ok(())
/// }
/// ```
pub struct Registrar<'a, S: Service> {
    service: Arc<S>,
    slot: ServiceSlot,
    name: String,
    rpc: &'a mut RpcTable,
    bus: &'a mut EventBus,
}

impl<'a, S: Service> Registrar<'a, S> {
    pub(crate) fn new(
        service: Arc<S>,
        slot: ServiceSlot,
        rpc: &'a mut RpcTable,
        bus: &'a mut EventBus,
    ) -> Self {
        let name = service.name().to_string();
        Self {
            service,
            slot,
            name,
            rpc,
            bus,
        }
    }

    /// The service being registered.
    pub fn service(&self) -> &Arc<S> {
        &self.service
    }

    /// Routes `<service name>.<method>` to `handler`.
    ///
    /// # Errors
    ///
    /// [`CoreError::ServiceConfiguration`] if the method is already taken.
    pub fn rpc<F>(&mut self, method: &str, handler: F) -> Result<()>
    where
        F: Fn(&S, &Rpc<'_>) -> Result<()> + Send + Sync + 'static,
    {
        let service = self.service.clone();
        self.rpc.insert(
            self.slot,
            &self.name,
            method,
            Arc::new(move |rpc: &Rpc<'_>| handler(&service, rpc)),
        )?;
        debug!("📝 Registered RPC {}.{}", self.name, method);
        Ok(())
    }

    /// Adds `handler` to the bus for events of type `E`.
    pub fn on_event<E, F>(&mut self, handler: F)
    where
        E: Event,
        F: Fn(&S, &HostContext<'_>, &E) -> Result<()> + Send + Sync + 'static,
    {
        let service = self.service.clone();
        let name = format!("{}::{}", self.name, E::type_name());
        let typed = TypedEventHandler::new(name, move |ctx: &HostContext<'_>, event: &E| {
            handler(&service, ctx, event)
        });
        self.bus.subscribe::<E>(self.slot, Arc::new(typed));
    }
}
