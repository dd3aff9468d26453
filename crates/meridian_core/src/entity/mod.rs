//! # Entities and Components
//!
//! [`EntityService`] stores entities and their components on the
//! authoritative side and replicates them to interested connections. On the
//! subordinate side the same service keeps a read-only mirror of whatever it
//! is sent.
//!
//! ## Wire Methods
//!
//! All under the `EntityService` service name:
//!
//! | method | args |
//! |---|---|
//! | `Spawned` | entity id, owned-by-you flag |
//! | `ComponentUpdate` | entity id, component name, JSON object |
//! | `ComponentRemoved` | entity id, component name |
//! | `Despawned` | entity id |

mod component;
mod interest;

#[cfg(test)]
mod tests;

pub use component::{Component, ComponentRef};
pub use interest::{EntityView, Everyone, InterestPolicy, OwnerOnly};

use crate::connection::{CloseReason, ConnectionHandle};
use crate::error::{ComponentMisuse, Result};
use crate::events::{ComponentReplicatedEvent, EntityDespawnedEvent, EntityReplicatedEvent};
use crate::message::RpcTarget;
use crate::service::{call, HostContext, Registrar, Rpc, Service};
use crate::types::{EntityId, PeerId, Role};
use component::Binding;
use dashmap::DashMap;
use serde_json::Value;
use std::any::TypeId;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, trace, warn};

pub const ENTITY_SERVICE: &str = "EntityService";
pub const SPAWNED: RpcTarget = RpcTarget::new(ENTITY_SERVICE, "Spawned");
pub const COMPONENT_UPDATE: RpcTarget = RpcTarget::new(ENTITY_SERVICE, "ComponentUpdate");
pub const COMPONENT_REMOVED: RpcTarget = RpcTarget::new(ENTITY_SERVICE, "ComponentRemoved");
pub const DESPAWNED: RpcTarget = RpcTarget::new(ENTITY_SERVICE, "Despawned");

struct EntityRecord {
    owner: Option<PeerId>,
    components: HashMap<TypeId, Binding>,
    subscribers: HashSet<PeerId>,
}

impl EntityRecord {
    fn view(&self, id: EntityId) -> EntityView {
        EntityView {
            id,
            owner: self.owner,
        }
    }
}

/// Subordinate-side copy of one replicated entity.
#[derive(Debug, Clone, Default)]
struct Replica {
    owned: bool,
    components: HashMap<String, Value>,
}

/// Entity store and replicator.
pub struct EntityService {
    role: Role,
    entities: DashMap<EntityId, EntityRecord>,
    peers: DashMap<PeerId, ConnectionHandle>,
    interest: Box<dyn InterestPolicy>,
    next_serial: AtomicU64,
    replicas: DashMap<EntityId, Replica>,
}

impl EntityService {
    /// Creates the service for a host playing `role`. Every connection
    /// observes every entity.
    pub fn new(role: Role) -> Self {
        Self::with_interest(role, Everyone)
    }

    pub fn with_interest(role: Role, interest: impl InterestPolicy) -> Self {
        Self {
            role,
            entities: DashMap::new(),
            peers: DashMap::new(),
            interest: Box::new(interest),
            next_serial: AtomicU64::new(1),
            replicas: DashMap::new(),
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    fn require_authority(&self, operation: &'static str) -> Result<()> {
        if self.role.is_authoritative() {
            Ok(())
        } else {
            Err(ComponentMisuse::NotAuthoritative { operation }.into())
        }
    }

    // ------------------------------------------------------------------
    // Authoritative store
    // ------------------------------------------------------------------

    /// Creates an entity, optionally owned by a connection, and announces it
    /// to every interested connection.
    pub fn spawn(&self, owner: Option<PeerId>) -> Result<EntityId> {
        self.require_authority("spawn")?;
        let id = EntityId::new();
        let view = EntityView { id, owner };
        self.entities.insert(
            id,
            EntityRecord {
                owner,
                components: HashMap::new(),
                subscribers: HashSet::new(),
            },
        );

        let observers: Vec<(PeerId, ConnectionHandle)> = self
            .links()
            .into_iter()
            .filter(|(peer, _)| self.interest.is_interested(*peer, &view))
            .collect();
        if let Some(mut record) = self.entities.get_mut(&id) {
            for (peer, link) in &observers {
                record.subscribers.insert(*peer);
                send(link, &SPAWNED, crate::args![id, owner == Some(*peer)]);
            }
        }

        debug!(
            "✨ Spawned entity {} (owner: {:?}, {} observers)",
            id,
            owner,
            observers.len()
        );
        Ok(id)
    }

    /// Removes an entity and invalidates all of its components.
    ///
    /// # Returns
    ///
    /// `false` if the entity did not exist, for example on a second despawn.
    pub fn despawn(&self, id: EntityId) -> Result<bool> {
        self.require_authority("despawn")?;
        let Some((_, record)) = self.entities.remove(&id) else {
            debug!("Entity {} already despawned", id);
            return Ok(false);
        };
        for subscriber in &record.subscribers {
            if let Some(link) = self.peers.get(subscriber) {
                send(&link, &DESPAWNED, crate::args![id]);
            }
        }
        debug!("💀 Despawned entity {}", id);
        Ok(true)
    }

    pub fn exists(&self, id: EntityId) -> bool {
        self.entities.contains_key(&id)
    }

    pub fn owner(&self, id: EntityId) -> Option<PeerId> {
        self.entities.get(&id).and_then(|record| record.owner)
    }

    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }

    pub fn entities_owned_by(&self, peer: PeerId) -> Vec<EntityId> {
        self.entities
            .iter()
            .filter(|record| record.owner == Some(peer))
            .map(|record| *record.key())
            .collect()
    }

    /// Binds a default-initialised `T` to the entity.
    ///
    /// # Errors
    ///
    /// [`ComponentMisuse::UnknownEntity`] if the entity does not exist and
    /// [`ComponentMisuse::AlreadyBound`] if it already has a `T`.
    pub fn add_component<T: Component>(&self, id: EntityId) -> Result<ComponentRef<T>> {
        self.require_authority("add_component")?;
        let mut record = self
            .entities
            .get_mut(&id)
            .ok_or(ComponentMisuse::UnknownEntity(id))?;
        if record.components.contains_key(&TypeId::of::<T>()) {
            return Err(ComponentMisuse::AlreadyBound {
                entity: id,
                component: T::NAME,
            }
            .into());
        }

        let serial = self.next_serial.fetch_add(1, Ordering::Relaxed);
        record.components.insert(
            TypeId::of::<T>(),
            Binding {
                serial,
                value: Box::new(T::default()),
            },
        );
        trace!("➕ Bound {} to entity {}", T::NAME, id);
        Ok(ComponentRef::new(id, serial))
    }

    /// Current binding of `T` on the entity, if any.
    pub fn get_component<T: Component>(&self, id: EntityId) -> Option<ComponentRef<T>> {
        let record = self.entities.get(&id)?;
        let binding = record.components.get(&TypeId::of::<T>())?;
        Some(ComponentRef::new(id, binding.serial))
    }

    /// Unbinds `T` from the entity. Outstanding refs become invalid.
    pub fn remove_component<T: Component>(&self, id: EntityId) -> Result<bool> {
        self.require_authority("remove_component")?;
        let Some(mut record) = self.entities.get_mut(&id) else {
            return Ok(false);
        };
        if record.components.remove(&TypeId::of::<T>()).is_none() {
            return Ok(false);
        }
        for subscriber in &record.subscribers {
            if let Some(link) = self.peers.get(subscriber) {
                send(&link, &COMPONENT_REMOVED, crate::args![id, T::NAME]);
            }
        }
        trace!("➖ Removed {} from entity {}", T::NAME, id);
        Ok(true)
    }

    /// Whether `component` still refers to a live binding.
    pub fn is_bound<T: Component>(&self, component: &ComponentRef<T>) -> bool {
        self.with(component, |_| ()).is_ok()
    }

    /// Runs `f` with shared access to the component.
    ///
    /// The entity's store entry stays locked while `f` runs, so `f` must not
    /// call back into this service.
    pub fn with<T: Component, R>(&self, component: &ComponentRef<T>, f: impl FnOnce(&T) -> R) -> Result<R> {
        let record = self
            .entities
            .get(&component.entity())
            .ok_or_else(|| component.invalidated())?;
        let value = record
            .components
            .get(&TypeId::of::<T>())
            .filter(|binding| binding.serial == component.serial())
            .and_then(|binding| binding.value.as_any().downcast_ref::<T>())
            .ok_or_else(|| component.invalidated())?;
        Ok(f(value))
    }

    /// Runs `f` with exclusive access to the component.
    ///
    /// The entity's store entry is write-locked while `f` runs: calling
    /// [`send`](Self::send) or any other method of this service from inside
    /// `f` deadlocks. Mutate, return, then send:
    ///
    /// ```ignore
    /// entities.with_mut(&health, |h| h.hp -= 1)?;
    /// entities.send(&health)?;
    /// ```
    pub fn with_mut<T: Component, R>(
        &self,
        component: &ComponentRef<T>,
        f: impl FnOnce(&mut T) -> R,
    ) -> Result<R> {
        self.require_authority("with_mut")?;
        let mut record = self
            .entities
            .get_mut(&component.entity())
            .ok_or_else(|| component.invalidated())?;
        let value = record
            .components
            .get_mut(&TypeId::of::<T>())
            .filter(|binding| binding.serial == component.serial())
            .and_then(|binding| binding.value.as_any_mut().downcast_mut::<T>())
            .ok_or_else(|| component.invalidated())?;
        Ok(f(value))
    }

    /// Clones the component out of the store.
    pub fn read<T: Component + Clone>(&self, component: &ComponentRef<T>) -> Result<T> {
        self.with(component, T::clone)
    }

    /// Replicates the component's current value to every subscriber of its
    /// entity. The owner receives every field; other subscribers receive the
    /// public view.
    ///
    /// # Returns
    ///
    /// Number of connections the update was queued for.
    pub fn send<T: Component>(&self, component: &ComponentRef<T>) -> Result<usize> {
        self.require_authority("send")?;
        let record = self
            .entities
            .get(&component.entity())
            .ok_or_else(|| component.invalidated())?;
        let binding = record
            .components
            .get(&TypeId::of::<T>())
            .filter(|binding| binding.serial == component.serial())
            .ok_or_else(|| component.invalidated())?;

        let (full, public) = binding.views()?;
        let mut delivered = 0;
        for subscriber in &record.subscribers {
            let Some(link) = self.peers.get(subscriber) else {
                continue;
            };
            let body = if record.owner == Some(*subscriber) {
                &full
            } else {
                &public
            };
            if send(&link, &COMPONENT_UPDATE, crate::args![component.entity(), T::NAME, body]) {
                delivered += 1;
            }
        }
        Ok(delivered)
    }

    // ------------------------------------------------------------------
    // Interest management
    // ------------------------------------------------------------------

    /// Connections currently observing the entity.
    pub fn observers(&self, id: EntityId) -> Vec<PeerId> {
        self.entities
            .get(&id)
            .map(|record| record.subscribers.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Re-evaluates the interest policy for every entity and connection,
    /// announcing entities that became visible and retracting ones that did
    /// not stay visible.
    pub fn refresh_interest(&self) -> Result<()> {
        self.require_authority("refresh_interest")?;
        let peers = self.links();
        for view in self.views() {
            let wanted: Vec<bool> = peers
                .iter()
                .map(|(peer, _)| self.interest.is_interested(*peer, &view))
                .collect();
            let Some(mut entry) = self.entities.get_mut(&view.id) else {
                continue;
            };
            for ((peer, link), wanted) in peers.iter().zip(wanted) {
                let present = entry.subscribers.contains(peer);
                if wanted && !present {
                    entry.subscribers.insert(*peer);
                    announce(view.id, &entry, *peer, link)?;
                } else if !wanted && present {
                    entry.subscribers.remove(peer);
                    send(link, &DESPAWNED, crate::args![view.id]);
                }
            }
        }
        Ok(())
    }

    fn links(&self) -> Vec<(PeerId, ConnectionHandle)> {
        self.peers
            .iter()
            .map(|entry| (*entry.key(), entry.value().clone()))
            .collect()
    }

    /// Snapshot of every entity as the interest policy sees it. Policies run
    /// against this copy so they can query the store themselves.
    fn views(&self) -> Vec<EntityView> {
        self.entities
            .iter()
            .map(|entry| entry.view(*entry.key()))
            .collect()
    }

    // ------------------------------------------------------------------
    // Subordinate mirror
    // ------------------------------------------------------------------

    /// Replicated value of `T` for an entity seen from the subordinate side.
    pub fn replica<T: Component>(&self, id: EntityId) -> Option<T> {
        let replica = self.replicas.get(&id)?;
        let value = replica.components.get(T::NAME)?;
        match serde_json::from_value(value.clone()) {
            Ok(component) => Some(component),
            Err(e) => {
                warn!("⚠️ Replica of {} on {} does not decode: {}", T::NAME, id, e);
                None
            }
        }
    }

    pub fn replica_json(&self, id: EntityId, component: &str) -> Option<Value> {
        self.replicas
            .get(&id)
            .and_then(|replica| replica.components.get(component).cloned())
    }

    pub fn replica_ids(&self) -> Vec<EntityId> {
        self.replicas.iter().map(|entry| *entry.key()).collect()
    }

    /// Whether the upstream said this host's connection owns the entity.
    pub fn is_owned_replica(&self, id: EntityId) -> bool {
        self.replicas.get(&id).map(|r| r.owned).unwrap_or(false)
    }

    fn replication_allowed(&self, rpc: &Rpc<'_>) -> bool {
        if rpc.link().is_authoritative() {
            warn!(
                "⚠️ Ignoring {} from {}: it is not authoritative on this link",
                rpc.message().method(),
                rpc.sender_id()
            );
            return false;
        }
        true
    }

    fn on_spawned(&self, rpc: &Rpc<'_>) -> Result<()> {
        if !self.replication_allowed(rpc) {
            return Ok(());
        }
        let entity: EntityId = rpc.message().arg(0)?;
        let owned: bool = rpc.message().arg(1)?;
        self.replicas.insert(
            entity,
            Replica {
                owned,
                components: HashMap::new(),
            },
        );
        rpc.ctx().publish(&EntityReplicatedEvent { entity, owned })?;
        Ok(())
    }

    fn on_component_update(&self, rpc: &Rpc<'_>) -> Result<()> {
        if !self.replication_allowed(rpc) {
            return Ok(());
        }
        let entity: EntityId = rpc.message().arg(0)?;
        let component = rpc.message().arg_str(1)?.to_string();
        let value: Value = rpc.message().arg_json(2)?;
        {
            let Some(mut replica) = self.replicas.get_mut(&entity) else {
                debug!("Update for unknown replica {}", entity);
                return Ok(());
            };
            replica.components.insert(component.clone(), value.clone());
        }
        rpc.ctx().publish(&ComponentReplicatedEvent {
            entity,
            component,
            value: Some(value),
        })?;
        Ok(())
    }

    fn on_component_removed(&self, rpc: &Rpc<'_>) -> Result<()> {
        if !self.replication_allowed(rpc) {
            return Ok(());
        }
        let entity: EntityId = rpc.message().arg(0)?;
        let component = rpc.message().arg_str(1)?.to_string();
        let removed = self
            .replicas
            .get_mut(&entity)
            .and_then(|mut replica| replica.components.remove(&component))
            .is_some();
        if removed {
            rpc.ctx().publish(&ComponentReplicatedEvent {
                entity,
                component,
                value: None,
            })?;
        }
        Ok(())
    }

    fn on_despawned(&self, rpc: &Rpc<'_>) -> Result<()> {
        if !self.replication_allowed(rpc) {
            return Ok(());
        }
        let entity: EntityId = rpc.message().arg(0)?;
        if self.replicas.remove(&entity).is_some() {
            rpc.ctx().publish(&EntityDespawnedEvent { entity })?;
        }
        Ok(())
    }
}

impl Service for EntityService {
    fn name(&self) -> &str {
        ENTITY_SERVICE
    }

    fn register(registrar: &mut Registrar<'_, Self>) -> Result<()> {
        registrar.rpc("Spawned", Self::on_spawned)?;
        registrar.rpc("ComponentUpdate", Self::on_component_update)?;
        registrar.rpc("ComponentRemoved", Self::on_component_removed)?;
        registrar.rpc("Despawned", Self::on_despawned)?;
        Ok(())
    }

    fn on_connected(&self, _ctx: &HostContext<'_>, link: &ConnectionHandle) -> Result<()> {
        if !self.role.is_authoritative() || !link.is_authoritative() {
            return Ok(());
        }
        let peer = link.remote_id();
        self.peers.insert(peer, link.clone());

        let visible: Vec<EntityId> = self
            .views()
            .into_iter()
            .filter(|view| self.interest.is_interested(peer, view))
            .map(|view| view.id)
            .collect();
        let mut announced = 0;
        for id in visible {
            if let Some(mut entry) = self.entities.get_mut(&id) {
                entry.subscribers.insert(peer);
                announce(id, &entry, peer, link)?;
                announced += 1;
            }
        }
        debug!("📡 Replicating {} entities to {}", announced, peer);
        Ok(())
    }

    fn on_disconnected(&self, _ctx: &HostContext<'_>, peer: PeerId, _reason: CloseReason) -> Result<()> {
        if self.peers.remove(&peer).is_none() {
            // Lost our upstream: the mirror is stale.
            if !self.role.is_authoritative() {
                self.replicas.clear();
            }
            return Ok(());
        }

        for mut entry in self.entities.iter_mut() {
            entry.subscribers.remove(&peer);
        }
        for id in self.entities_owned_by(peer) {
            self.despawn(id)?;
        }
        Ok(())
    }

    fn on_disable(&self, _ctx: &HostContext<'_>) -> Result<()> {
        self.peers.clear();
        Ok(())
    }
}

/// Queues an RPC on a link, logging instead of failing when it is closed.
fn send(link: &ConnectionHandle, target: &RpcTarget, args: Vec<String>) -> bool {
    match call(link, target, args) {
        Ok(()) => true,
        Err(e) => {
            debug!("Dropped {} to {}: {}", target, link.remote_id(), e);
            false
        }
    }
}

/// Sends `Spawned` and a snapshot of every component to one new observer.
fn announce(id: EntityId, record: &EntityRecord, peer: PeerId, link: &ConnectionHandle) -> Result<()> {
    let owned = record.owner == Some(peer);
    send(link, &SPAWNED, crate::args![id, owned]);
    for binding in record.components.values() {
        let (full, public) = binding.views()?;
        let body = if owned { full } else { public };
        send(link, &COMPONENT_UPDATE, crate::args![id, binding.value.name(), body]);
    }
    Ok(())
}
