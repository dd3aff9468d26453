use crate::types::{EntityId, PeerId};

/// What an interest policy may look at when deciding visibility.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntityView {
    pub id: EntityId,
    pub owner: Option<PeerId>,
}

/// Decides which connections observe which entities.
///
/// Closures `Fn(PeerId, &EntityView) -> bool` implement this directly. The
/// entity store is not locked while a policy runs, so a policy may read from
/// the [`EntityService`](super::EntityService) it belongs to.
pub trait InterestPolicy: Send + Sync + 'static {
    fn is_interested(&self, observer: PeerId, entity: &EntityView) -> bool;
}

/// Every connection observes every entity.
#[derive(Debug, Default, Clone, Copy)]
pub struct Everyone;

impl InterestPolicy for Everyone {
    fn is_interested(&self, _observer: PeerId, _entity: &EntityView) -> bool {
        true
    }
}

/// A connection observes only the entities it owns.
#[derive(Debug, Default, Clone, Copy)]
pub struct OwnerOnly;

impl InterestPolicy for OwnerOnly {
    fn is_interested(&self, observer: PeerId, entity: &EntityView) -> bool {
        entity.owner == Some(observer)
    }
}

impl<F> InterestPolicy for F
where
    F: Fn(PeerId, &EntityView) -> bool + Send + Sync + 'static,
{
    fn is_interested(&self, observer: PeerId, entity: &EntityView) -> bool {
        self(observer, entity)
    }
}
