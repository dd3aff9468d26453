use crate::error::{ComponentMisuse, Result};
use crate::types::EntityId;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::any::Any;
use std::fmt;
use std::marker::PhantomData;

/// Data attached to an entity and replicated by value.
///
/// `NAME` identifies the component on the wire. Fields listed in
/// `OWNER_ONLY` are sent only to the connection that owns the entity;
/// everyone else receives the object with those fields removed, so they
/// should be `#[serde(default)]` for the public view to deserialize.
pub trait Component: Default + Serialize + DeserializeOwned + Send + Sync + 'static {
    const NAME: &'static str;
    const OWNER_ONLY: &'static [&'static str] = &[];
}

/// Object-safe view of a stored component.
pub(crate) trait StoredComponent: Send + Sync {
    fn name(&self) -> &'static str;
    fn owner_only(&self) -> &'static [&'static str];
    fn to_json(&self) -> Result<Value>;
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<T: Component> StoredComponent for T {
    fn name(&self) -> &'static str {
        T::NAME
    }

    fn owner_only(&self) -> &'static [&'static str] {
        T::OWNER_ONLY
    }

    fn to_json(&self) -> Result<Value> {
        Ok(serde_json::to_value(self)?)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// A component bound to an entity, with the serial of that binding.
pub(crate) struct Binding {
    pub(crate) serial: u64,
    pub(crate) value: Box<dyn StoredComponent>,
}

impl Binding {
    /// Full JSON for the owner and the public subset for everyone else.
    pub(crate) fn views(&self) -> Result<(Value, Value)> {
        let full = self.value.to_json()?;
        let public = public_view(&full, self.value.owner_only());
        Ok((full, public))
    }
}

pub(crate) fn public_view(full: &Value, owner_only: &[&str]) -> Value {
    match full {
        Value::Object(map) if !owner_only.is_empty() => Value::Object(
            map.iter()
                .filter(|(key, _)| !owner_only.contains(&key.as_str()))
                .map(|(key, value)| (key.clone(), value.clone()))
                .collect(),
        ),
        other => other.clone(),
    }
}

/// Handle to one component binding.
///
/// The handle holds no pointer into the store. Every access resolves
/// `(entity, serial)` again, so once the component is removed or the entity
/// despawned the handle reports [`ComponentMisuse::Invalidated`] forever,
/// even if a component of the same type is bound again later.
pub struct ComponentRef<T> {
    entity: EntityId,
    serial: u64,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Component> ComponentRef<T> {
    pub(crate) fn new(entity: EntityId, serial: u64) -> Self {
        Self {
            entity,
            serial,
            _marker: PhantomData,
        }
    }

    pub fn entity(&self) -> EntityId {
        self.entity
    }

    pub fn name(&self) -> &'static str {
        T::NAME
    }

    pub(crate) fn serial(&self) -> u64 {
        self.serial
    }

    pub(crate) fn invalidated(&self) -> ComponentMisuse {
        ComponentMisuse::Invalidated {
            entity: self.entity,
            component: T::NAME,
        }
    }
}

impl<T> Clone for ComponentRef<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for ComponentRef<T> {}

impl<T> PartialEq for ComponentRef<T> {
    fn eq(&self, other: &Self) -> bool {
        self.entity == other.entity && self.serial == other.serial
    }
}

impl<T> Eq for ComponentRef<T> {}

impl<T: Component> fmt::Debug for ComponentRef<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComponentRef")
            .field("component", &T::NAME)
            .field("entity", &self.entity)
            .field("serial", &self.serial)
            .finish()
    }
}
