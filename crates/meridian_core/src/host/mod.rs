//! # Host
//!
//! A host owns a set of services, the RPC dispatch table, the event bus and
//! every open link. It is driven from a single simulation task: I/O tasks
//! only ever talk to it through its inbound queue, and all service code runs
//! inside [`Host::tick`].
//!
//! ## Lifecycle
//!
//! 1. [`Host::new`] and [`Host::attach`] for each service
//! 2. [`Host::start`] (or [`Host::run`], which starts implicitly)
//! 3. [`Host::tick`] repeatedly
//! 4. [`Host::stop`], which closes every link and disables every service

mod inbound;

#[cfg(test)]
mod tests;

pub use inbound::{HostSender, Inbound};

use crate::codec;
use crate::config::HostConfig;
use crate::connection::{CloseReason, ConnectionHandle, LinkId, LinkOptions, CONTROL_SERVICE};
use crate::error::{CoreError, Result};
use crate::events::{Event, HostStartedEvent, HostStoppedEvent, PeerConnectedEvent, PeerDisconnectedEvent, TypedEventHandler};
use crate::message::Message;
use crate::service::{HostContext, Registrar, Rpc, RpcTable, Service, ServiceSlot};
use crate::shutdown::ShutdownState;
use crate::system::{EventBus, EventBusCounters, EventBusStats};
use crate::types::{PeerId, Role};
use crate::utils::current_timestamp;
use std::any::{type_name, Any, TypeId};
use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, trace, warn};

/// Work deferred until the current handler returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum HostCommand {
    Disconnect(PeerId),
    Stop,
}

/// Lifecycle state of a host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostState {
    /// Accepting services, not yet started.
    Idle,
    Running,
    /// Closing links and disabling services.
    Stopping,
    Stopped,
}

/// What one tick did.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TickReport {
    pub links_opened: usize,
    pub links_closed: usize,
    pub messages_handled: usize,
    pub messages_dropped: usize,
}

struct AttachedService {
    slot: ServiceSlot,
    type_id: TypeId,
    name: String,
    service: Arc<dyn Service>,
    any: Arc<dyn Any + Send + Sync>,
}

/// A Meridian host.
pub struct Host {
    id: PeerId,
    role: Role,
    config: HostConfig,
    state: HostState,
    services: Vec<AttachedService>,
    next_slot: usize,
    rpc: RpcTable,
    bus: EventBus,
    links: HashMap<PeerId, ConnectionHandle>,
    loopback: ConnectionHandle,
    sender: HostSender,
    inbound: mpsc::UnboundedReceiver<Inbound>,
    commands: RefCell<Vec<HostCommand>>,
    tick_count: u64,
}

impl Host {
    /// Creates a host with a fresh id.
    ///
    /// # Arguments
    ///
    /// * `role` - Default role of this host on the links it opens or accepts
    /// * `config` - Tick and handshake settings
    pub fn new(role: Role, config: HostConfig) -> Self {
        Self::with_id(PeerId::new(), role, config)
    }

    pub fn with_id(id: PeerId, role: Role, config: HostConfig) -> Self {
        let (sender, inbound) = HostSender::channel();
        let loopback = ConnectionHandle::loopback(id, role, sender.clone());
        Self {
            id,
            role,
            config,
            state: HostState::Idle,
            services: Vec::new(),
            next_slot: 0,
            rpc: RpcTable::default(),
            bus: EventBus::new(),
            links: HashMap::new(),
            loopback,
            sender,
            inbound,
            commands: RefCell::new(Vec::new()),
            tick_count: 0,
        }
    }

    pub fn id(&self) -> PeerId {
        self.id
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn config(&self) -> &HostConfig {
        &self.config
    }

    pub fn state(&self) -> HostState {
        self.state
    }

    pub fn is_running(&self) -> bool {
        self.state == HostState::Running
    }

    /// Producer handle for connection drivers.
    pub fn sender(&self) -> HostSender {
        self.sender.clone()
    }

    /// Link options for a driver attached to this host.
    pub fn acceptor_options(&self) -> LinkOptions {
        LinkOptions::acceptor(self.id, self.role, self.config.handshake_timeout())
    }

    pub fn initiator_options(&self) -> LinkOptions {
        LinkOptions::initiator(self.id, self.role, self.config.handshake_timeout())
    }

    pub fn link_count(&self) -> usize {
        self.links.len()
    }

    pub fn link(&self, peer: PeerId) -> Option<&ConnectionHandle> {
        self.links.get(&peer)
    }

    pub fn peers(&self) -> Vec<PeerId> {
        self.links.keys().copied().collect()
    }

    pub fn tick_count(&self) -> u64 {
        self.tick_count
    }

    pub fn bus_stats(&self) -> EventBusStats {
        self.bus.stats()
    }

    pub fn bus_stats_handle(&self) -> Arc<EventBusCounters> {
        self.bus.stats_handle()
    }

    pub fn rpc_method_count(&self) -> usize {
        self.rpc.method_count()
    }

    /// Looks up an attached service by type.
    pub fn service<S: Service>(&self) -> Option<Arc<S>> {
        self.services
            .iter()
            .find(|attached| attached.type_id == TypeId::of::<S>())
            .and_then(|attached| attached.any.clone().downcast::<S>().ok())
    }

    pub fn context(&self) -> HostContext<'_> {
        HostContext {
            local_id: self.id,
            role: self.role,
            bus: &self.bus,
            links: &self.links,
            loopback: &self.loopback,
            commands: &self.commands,
        }
    }

    /// Attaches a service, registers its RPCs and event handlers and enables
    /// it. A service attached to a running host is started immediately.
    ///
    /// # Returns
    ///
    /// The shared service instance, for wiring it into other services.
    ///
    /// # Errors
    ///
    /// [`CoreError::ServiceConfiguration`] if a service of the same type or
    /// name is attached already, or registration fails.
    pub fn attach<S: Service>(&mut self, service: S) -> Result<Arc<S>> {
        if matches!(self.state, HostState::Stopping | HostState::Stopped) {
            return Err(CoreError::NotRunning);
        }
        if self.services.iter().any(|s| s.type_id == TypeId::of::<S>()) {
            return Err(CoreError::ServiceConfiguration(format!(
                "service {} is already attached",
                type_name::<S>()
            )));
        }
        if self.services.iter().any(|s| s.name == service.name()) {
            return Err(CoreError::ServiceConfiguration(format!(
                "a service named '{}' is already attached",
                service.name()
            )));
        }

        let service = Arc::new(service);
        let slot = ServiceSlot(self.next_slot);
        self.next_slot += 1;

        let registered = {
            let mut registrar = Registrar::new(service.clone(), slot, &mut self.rpc, &mut self.bus);
            S::register(&mut registrar)
        };
        if let Err(e) = registered {
            self.rpc.remove_slot(slot);
            self.bus.remove_slot(slot);
            return Err(e);
        }

        let name = service.name().to_string();
        self.services.push(AttachedService {
            slot,
            type_id: TypeId::of::<S>(),
            name: name.clone(),
            service: service.clone(),
            any: service.clone(),
        });
        info!("🔌 Attached service '{}'", name);

        let ctx = self.context();
        absorb(&name, "on_enable", service.on_enable(&ctx))?;
        if self.state == HostState::Running {
            absorb(&name, "on_start", service.on_start(&ctx))?;
        }
        Ok(service)
    }

    /// Disables and removes the service of type `S`.
    ///
    /// # Returns
    ///
    /// `false` if no such service was attached.
    pub fn detach<S: Service>(&mut self) -> Result<bool> {
        let Some(index) = self
            .services
            .iter()
            .position(|s| s.type_id == TypeId::of::<S>())
        else {
            return Ok(false);
        };

        let attached = self.services.remove(index);
        let result = {
            let ctx = self.context();
            attached.service.on_disable(&ctx)
        };
        self.rpc.remove_slot(attached.slot);
        self.bus.remove_slot(attached.slot);
        info!("🔌 Detached service '{}'", attached.name);
        absorb(&attached.name, "on_disable", result)?;
        Ok(true)
    }

    /// Subscribes a host-level handler, outside any service.
    pub fn on_event<E, F>(&mut self, name: &str, handler: F)
    where
        E: Event,
        F: Fn(&HostContext<'_>, &E) -> Result<()> + Send + Sync + 'static,
    {
        let typed = TypedEventHandler::new(name.to_string(), handler);
        self.bus.subscribe::<E>(ServiceSlot::HOST, Arc::new(typed));
    }

    /// Publishes an event from outside any handler.
    pub fn publish<E: Event>(&self, event: &E) -> Result<usize> {
        self.context().publish(event)
    }

    /// Runs `on_start` on every service.
    pub fn start(&mut self) -> Result<()> {
        match self.state {
            HostState::Idle => {}
            HostState::Running => return Ok(()),
            HostState::Stopping | HostState::Stopped => return Err(CoreError::NotRunning),
        }
        self.state = HostState::Running;
        info!(
            "🚀 Host {} starting as {} with {} services",
            self.id,
            self.role,
            self.services.len()
        );

        let ctx = self.context();
        for attached in &self.services {
            absorb(&attached.name, "on_start", attached.service.on_start(&ctx))?;
        }
        ctx.publish(&HostStartedEvent {
            host_id: self.id,
            role: self.role,
            timestamp: current_timestamp(),
        })?;
        Ok(())
    }

    /// Advances the host by one step.
    ///
    /// Drains the inbound queue completely (including loopback messages
    /// produced while draining), applies deferred commands, then runs
    /// `on_tick` on every service in attach order.
    ///
    /// # Errors
    ///
    /// [`CoreError::NotRunning`] if the host is not running, or the first
    /// fatal error raised by a service. Recoverable errors are logged and the
    /// failing message is dropped.
    pub fn tick(&mut self, delta: Duration) -> Result<TickReport> {
        if self.state != HostState::Running {
            return Err(CoreError::NotRunning);
        }
        let mut report = TickReport::default();

        while self.state == HostState::Running {
            let Ok(item) = self.inbound.try_recv() else {
                break;
            };
            self.process(item, &mut report)?;
            self.apply_commands()?;
        }

        if self.state == HostState::Running {
            let ctx = self.context();
            for attached in &self.services {
                absorb(&attached.name, "on_tick", attached.service.on_tick(&ctx, delta))?;
            }
            self.apply_commands()?;
        }

        self.tick_count += 1;
        Ok(report)
    }

    /// Ticks at the configured interval until the host stops or `shutdown`
    /// is initiated, then stops the host.
    ///
    /// A fatal service error stops the host and is returned.
    pub async fn run(&mut self, shutdown: &ShutdownState) -> Result<()> {
        if self.state == HostState::Idle {
            self.start()?;
        }

        let mut ticker = tokio::time::interval(self.config.tick_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut last = Instant::now();

        while self.state == HostState::Running {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = shutdown.initiated() => {
                    info!("🛑 Shutdown signal received by host {}", self.id);
                    break;
                }
            }

            let now = Instant::now();
            let delta = now.duration_since(last);
            last = now;

            if let Err(e) = self.tick(delta) {
                if matches!(e, CoreError::NotRunning) {
                    break;
                }
                error!("💥 Fatal error on host {}: {}", self.id, e);
                self.stop()?;
                return Err(e);
            }
        }

        self.stop()
    }

    /// Closes every link and disables every service. Idempotent.
    ///
    /// Every service sees `on_disconnected` and `on_finished_disconnected`
    /// for each open link, then `on_disable`, before this returns. Errors are
    /// logged; the first fatal one is returned once everything has run.
    pub fn stop(&mut self) -> Result<()> {
        if matches!(self.state, HostState::Stopping | HostState::Stopped) {
            return Ok(());
        }
        info!("🛑 Stopping host {} ({} links)", self.id, self.links.len());
        self.state = HostState::Stopping;

        let mut first_fatal = None;
        for peer in self.peers() {
            if let Err(e) = self.finish_link(peer, CloseReason::HostStopped) {
                first_fatal.get_or_insert(e);
            }
        }

        {
            let ctx = self.context();
            if let Err(e) = ctx.publish(&HostStoppedEvent {
                host_id: self.id,
                timestamp: current_timestamp(),
            }) {
                first_fatal.get_or_insert(e);
            }
            for attached in &self.services {
                if let Err(e) = absorb(&attached.name, "on_disable", attached.service.on_disable(&ctx)) {
                    first_fatal.get_or_insert(e);
                }
            }
        }

        self.commands.borrow_mut().clear();
        self.inbound.close();
        self.state = HostState::Stopped;
        info!("✅ Host {} stopped", self.id);

        match first_fatal {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn process(&mut self, item: Inbound, report: &mut TickReport) -> Result<()> {
        match item {
            Inbound::Opened(handle) => {
                report.links_opened += 1;
                self.open_link(handle)
            }
            Inbound::Frame {
                link,
                from,
                frame,
                received_at,
            } => {
                if self.dispatch(link, from, &frame, received_at)? {
                    report.messages_handled += 1;
                } else {
                    report.messages_dropped += 1;
                }
                Ok(())
            }
            Inbound::Closed { link, peer, reason } => {
                if self.registered(link, peer).is_none() {
                    trace!("Ignoring close of {} for {}: not the registered link", link, peer);
                    return Ok(());
                }
                report.links_closed += 1;
                self.finish_link(peer, reason)
            }
        }
    }

    /// The open link registered for `peer`, if it is the one named `link`.
    fn registered(&self, link: LinkId, peer: PeerId) -> Option<&ConnectionHandle> {
        self.links
            .get(&peer)
            .filter(|handle| handle.link_id() == link)
    }

    fn open_link(&mut self, handle: ConnectionHandle) -> Result<()> {
        let peer = handle.remote_id();
        if peer == self.id || handle.is_loopback() || self.links.contains_key(&peer) {
            warn!("⚠️ Rejecting duplicate link to {} ({})", peer, handle.link_id());
            handle.close();
            return Ok(());
        }

        info!("🔗 Peer {} connected ({} side)", peer, handle.local_role());
        self.links.insert(peer, handle.clone());

        let ctx = self.context();
        for attached in &self.services {
            absorb(
                &attached.name,
                "on_began_connected",
                attached.service.on_began_connected(&ctx, &handle),
            )?;
        }
        for attached in &self.services {
            absorb(
                &attached.name,
                "on_connected",
                attached.service.on_connected(&ctx, &handle),
            )?;
        }
        ctx.publish(&PeerConnectedEvent {
            peer_id: peer,
            role: handle.local_role(),
            timestamp: current_timestamp(),
        })?;
        Ok(())
    }

    /// Routes one raw frame. Returns whether a handler ran successfully.
    ///
    /// Only frames from the loopback link count as this host's own; a frame
    /// is accepted from a peer only on the link registered for that peer.
    fn dispatch(&self, via: LinkId, from: PeerId, raw: &str, received_at: u64) -> Result<bool> {
        let link = if via.is_loopback() && from == self.id {
            &self.loopback
        } else {
            match self.registered(via, from) {
                Some(link) => link,
                None => {
                    trace!("🗑️ Dropping frame from {} on unregistered {}", from, via);
                    return Ok(false);
                }
            }
        };

        let frame = match codec::decode(raw) {
            Ok(frame) => frame,
            Err(e) => {
                warn!("⚠️ Dropping frame from {}: {}", from, e);
                return Ok(false);
            }
        };
        if frame.service == CONTROL_SERVICE {
            debug!("🗑️ Ignoring stray control frame '{}' from {}", frame.method, from);
            return Ok(false);
        }

        let handler = match self.rpc.lookup(&frame.service, &frame.method) {
            Ok(handler) => handler,
            Err(e) => {
                warn!("❓ {} (from {})", e, from);
                return Ok(false);
            }
        };

        let message = Message::from_frame(frame, from, received_at);
        let ctx = self.context();
        let rpc = Rpc::new(&ctx, &message, link);
        match handler(&rpc) {
            Ok(()) => Ok(true),
            Err(e) if e.is_fatal() => Err(e),
            Err(e) => {
                warn!(
                    "⚠️ RPC {}.{} from {} failed: {}",
                    message.service(),
                    message.method(),
                    from,
                    e
                );
                Ok(false)
            }
        }
    }

    /// Runs the disconnect hooks for `peer` and releases its link.
    fn finish_link(&mut self, peer: PeerId, reason: CloseReason) -> Result<()> {
        let Some(handle) = self.links.get(&peer).cloned() else {
            trace!("Link to {} already released", peer);
            return Ok(());
        };
        info!("❌ Peer {} disconnected: {:?}", peer, reason);

        let mut first_fatal = None;
        {
            let ctx = self.context();
            for attached in &self.services {
                if let Err(e) = absorb(
                    &attached.name,
                    "on_disconnected",
                    attached.service.on_disconnected(&ctx, peer, reason),
                ) {
                    first_fatal.get_or_insert(e);
                }
            }
            for attached in &self.services {
                if let Err(e) = absorb(
                    &attached.name,
                    "on_finished_disconnected",
                    attached.service.on_finished_disconnected(&ctx, peer, reason),
                ) {
                    first_fatal.get_or_insert(e);
                }
            }
            if let Err(e) = ctx.publish(&PeerDisconnectedEvent {
                peer_id: peer,
                reason,
                timestamp: current_timestamp(),
            }) {
                first_fatal.get_or_insert(e);
            }
        }

        self.links.remove(&peer);
        handle.close();

        if !handle.is_authoritative() && self.state == HostState::Running {
            info!("🛑 Upstream {} is gone, stopping host {}", peer, self.id);
            self.stop()?;
        }

        match first_fatal {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn apply_commands(&mut self) -> Result<()> {
        loop {
            let pending: Vec<HostCommand> = self.commands.borrow_mut().drain(..).collect();
            if pending.is_empty() {
                return Ok(());
            }
            for command in pending {
                match command {
                    HostCommand::Disconnect(peer) => {
                        self.finish_link(peer, CloseReason::ClosedLocally)?
                    }
                    HostCommand::Stop => self.stop()?,
                }
            }
        }
    }
}

impl Drop for Host {
    fn drop(&mut self) {
        if self.state == HostState::Running {
            if let Err(e) = self.stop() {
                error!("💥 Error while stopping host {} on drop: {}", self.id, e);
            }
        }
    }
}

/// Logs recoverable hook errors; passes fatal ones through.
fn absorb(service: &str, hook: &str, result: Result<()>) -> Result<()> {
    match result {
        Ok(()) => Ok(()),
        Err(e) if e.is_fatal() => {
            error!("💥 {} failed in {}: {}", service, hook, e);
            Err(e)
        }
        Err(e) => {
            warn!("⚠️ {} failed in {}: {}", service, hook, e);
            Ok(())
        }
    }
}
