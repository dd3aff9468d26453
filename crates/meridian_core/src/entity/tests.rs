use super::*;
use crate::codec::{self, Frame};
use crate::config::HostConfig;
use crate::connection::{LinkCommand, LinkId};
use crate::error::CoreError;
use crate::host::Host;
use serde::{Deserialize, Serialize};
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, OnceLock, Weak};
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
struct Health {
    hp: i32,
}

impl Component for Health {
    const NAME: &'static str = "Health";
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
struct Wallet {
    coins: u32,
    #[serde(default)]
    secret: String,
}

impl Component for Wallet {
    const NAME: &'static str = "Wallet";
    const OWNER_ONLY: &'static [&'static str] = &["secret"];
}

fn drain(rx: &mut UnboundedReceiver<LinkCommand>) -> Vec<Frame> {
    let mut frames = Vec::new();
    while let Ok(command) = rx.try_recv() {
        if let LinkCommand::Frame(raw) = command {
            frames.push(codec::decode(&raw).unwrap());
        }
    }
    frames
}

fn methods(frames: &[Frame]) -> Vec<&str> {
    frames.iter().map(|f| f.method.as_str()).collect()
}

/// A running master host with the entity service and `n` observed peers.
fn master_with_peers(
    service: EntityService,
    n: usize,
) -> (
    Host,
    Arc<EntityService>,
    Vec<(PeerId, UnboundedReceiver<LinkCommand>, LinkId)>,
) {
    let mut host = Host::new(Role::Master, HostConfig::default());
    let entities = host.attach(service).unwrap();
    host.start().unwrap();

    let mut peers = Vec::new();
    for _ in 0..n {
        let peer = PeerId::new();
        let (handle, rx) = ConnectionHandle::detached(peer, Role::Master);
        let link = handle.link_id();
        host.sender().link_opened(handle).unwrap();
        peers.push((peer, rx, link));
    }
    host.tick(Duration::ZERO).unwrap();
    (host, entities, peers)
}

#[test]
fn component_refs_go_stale_after_removal() {
    let entities = EntityService::new(Role::Master);
    let id = entities.spawn(None).unwrap();
    let health = entities.add_component::<Health>(id).unwrap();

    entities.with_mut(&health, |h| h.hp = 7).unwrap();
    assert_eq!(entities.read(&health).unwrap(), Health { hp: 7 });
    assert_eq!(entities.get_component::<Health>(id), Some(health));

    assert!(entities.remove_component::<Health>(id).unwrap());
    assert!(entities.get_component::<Health>(id).is_none());
    assert!(!entities.remove_component::<Health>(id).unwrap());

    match entities.read(&health) {
        Err(CoreError::ComponentMisuse(ComponentMisuse::Invalidated { entity, component })) => {
            assert_eq!(entity, id);
            assert_eq!(component, "Health");
        }
        other => panic!("expected invalidated ref, got {:?}", other),
    }

    let rebound = entities.add_component::<Health>(id).unwrap();
    assert_ne!(rebound, health);
    assert!(entities.is_bound(&rebound));
    assert!(!entities.is_bound(&health));
}

#[test]
fn binding_the_same_type_twice_is_fatal_misuse() {
    let entities = EntityService::new(Role::Master);
    let id = entities.spawn(None).unwrap();
    entities.add_component::<Health>(id).unwrap();

    let err = entities.add_component::<Health>(id).unwrap_err();
    assert!(err.is_fatal());
    assert!(matches!(
        err,
        CoreError::ComponentMisuse(ComponentMisuse::AlreadyBound { .. })
    ));
    assert!(entities.add_component::<Wallet>(id).is_ok());
}

#[test]
fn unknown_entities_are_reported() {
    let entities = EntityService::new(Role::Master);
    let ghost = EntityId::new();
    assert!(matches!(
        entities.add_component::<Health>(ghost),
        Err(CoreError::ComponentMisuse(ComponentMisuse::UnknownEntity(id))) if id == ghost
    ));
}

#[test]
fn double_despawn_is_a_no_op() {
    let entities = EntityService::new(Role::Master);
    let id = entities.spawn(None).unwrap();
    let health = entities.add_component::<Health>(id).unwrap();

    assert!(entities.despawn(id).unwrap());
    assert!(!entities.despawn(id).unwrap());
    assert!(!entities.exists(id));
    assert!(entities.read(&health).is_err());
}

#[test]
fn subordinate_side_cannot_mutate() {
    let entities = EntityService::new(Role::Slave);
    assert!(matches!(
        entities.spawn(None),
        Err(CoreError::ComponentMisuse(ComponentMisuse::NotAuthoritative { operation: "spawn" }))
    ));
    assert!(entities.despawn(EntityId::new()).is_err());
}

#[test]
fn owner_receives_private_fields_and_others_the_public_view() {
    let (_host, entities, mut peers) = master_with_peers(EntityService::new(Role::Master), 2);
    let owner = peers[0].0;

    let id = entities.spawn(Some(owner)).unwrap();
    let wallet = entities.add_component::<Wallet>(id).unwrap();
    entities
        .with_mut(&wallet, |w| {
            w.coins = 12;
            w.secret = "hunter2".to_string();
        })
        .unwrap();
    assert_eq!(entities.send(&wallet).unwrap(), 2);

    let owner_frames = drain(&mut peers[0].1);
    let other_frames = drain(&mut peers[1].1);
    assert_eq!(methods(&owner_frames), vec!["Spawned", "ComponentUpdate"]);
    assert_eq!(methods(&other_frames), vec!["Spawned", "ComponentUpdate"]);

    assert_eq!(owner_frames[0].args[1], "true");
    assert_eq!(other_frames[0].args[1], "false");

    let full: serde_json::Value = serde_json::from_str(&owner_frames[1].args[2]).unwrap();
    let public: serde_json::Value = serde_json::from_str(&other_frames[1].args[2]).unwrap();
    assert_eq!(full["secret"], "hunter2");
    assert_eq!(public["coins"], 12);
    assert!(public.get("secret").is_none());
}

#[test]
fn late_joiners_receive_a_snapshot() {
    let (mut host, entities, _) = master_with_peers(EntityService::new(Role::Master), 0);
    let id = entities.spawn(None).unwrap();
    let health = entities.add_component::<Health>(id).unwrap();
    entities.with_mut(&health, |h| h.hp = 3).unwrap();

    let (handle, mut rx) = ConnectionHandle::detached(PeerId::new(), Role::Master);
    host.sender().link_opened(handle).unwrap();
    host.tick(Duration::ZERO).unwrap();

    let frames = drain(&mut rx);
    assert_eq!(methods(&frames), vec!["Spawned", "ComponentUpdate"]);
    assert_eq!(frames[1].args[1], "Health");
    assert_eq!(frames[1].args[2], r#"{"hp":3}"#);
}

#[test]
fn disconnect_despawns_only_the_leavers_entities() {
    let (mut host, entities, mut peers) = master_with_peers(EntityService::new(Role::Master), 2);
    let (leaver, leaver_link, stayer) = (peers[0].0, peers[0].2, peers[1].0);
    let leaver_entity = entities.spawn(Some(leaver)).unwrap();
    let stayer_entity = entities.spawn(Some(stayer)).unwrap();
    let world_entity = entities.spawn(None).unwrap();
    drain(&mut peers[1].1);

    host.sender()
        .link_closed(leaver_link, leaver, CloseReason::ClosedByPeer)
        .unwrap();
    host.tick(Duration::ZERO).unwrap();

    assert!(!entities.exists(leaver_entity));
    assert!(entities.exists(stayer_entity));
    assert!(entities.exists(world_entity));
    assert_eq!(entities.observers(world_entity), vec![stayer]);

    let frames = drain(&mut peers[1].1);
    assert_eq!(methods(&frames), vec!["Despawned"]);
    assert_eq!(frames[0].args[0], leaver_entity.to_string());
}

#[test]
fn interest_changes_are_applied_on_refresh() {
    let visible = Arc::new(AtomicBool::new(false));
    let policy = {
        let visible = visible.clone();
        move |_observer: PeerId, _entity: &EntityView| visible.load(Ordering::SeqCst)
    };
    let (_host, entities, mut peers) =
        master_with_peers(EntityService::with_interest(Role::Master, policy), 1);

    let id = entities.spawn(None).unwrap();
    assert!(drain(&mut peers[0].1).is_empty());

    visible.store(true, Ordering::SeqCst);
    entities.refresh_interest().unwrap();
    assert_eq!(methods(&drain(&mut peers[0].1)), vec!["Spawned"]);
    assert_eq!(entities.observers(id), vec![peers[0].0]);

    visible.store(false, Ordering::SeqCst);
    entities.refresh_interest().unwrap();
    assert_eq!(methods(&drain(&mut peers[0].1)), vec!["Despawned"]);
    assert!(entities.observers(id).is_empty());
}

#[test]
fn owner_only_policy_hides_foreign_entities() {
    let (_host, entities, mut peers) =
        master_with_peers(EntityService::with_interest(Role::Master, OwnerOnly), 2);
    entities.spawn(Some(peers[0].0)).unwrap();

    assert_eq!(methods(&drain(&mut peers[0].1)), vec!["Spawned"]);
    assert!(drain(&mut peers[1].1).is_empty());
}

#[test]
fn interest_policy_may_query_the_store() {
    let store: Arc<OnceLock<Weak<EntityService>>> = Arc::new(OnceLock::new());
    let policy = {
        let store = store.clone();
        move |observer: PeerId, entity: &EntityView| {
            store
                .get()
                .and_then(Weak::upgrade)
                .is_some_and(|entities| entities.owner(entity.id) == Some(observer))
        }
    };
    let (_host, entities, mut peers) =
        master_with_peers(EntityService::with_interest(Role::Master, policy), 2);
    assert!(store.set(Arc::downgrade(&entities)).is_ok());

    let id = entities.spawn(Some(peers[0].0)).unwrap();
    assert_eq!(methods(&drain(&mut peers[0].1)), vec!["Spawned"]);
    assert!(drain(&mut peers[1].1).is_empty());

    entities.refresh_interest().unwrap();
    assert!(drain(&mut peers[0].1).is_empty());
    assert_eq!(entities.observers(id), vec![peers[0].0]);
}

#[test]
fn mutate_then_send_replicates_the_new_value() {
    let (_host, entities, mut peers) = master_with_peers(EntityService::new(Role::Master), 1);
    let id = entities.spawn(None).unwrap();
    let health = entities.add_component::<Health>(id).unwrap();
    drain(&mut peers[0].1);

    let hp = entities
        .with_mut(&health, |h| {
            h.hp = 9;
            h.hp
        })
        .unwrap();
    assert_eq!(hp, 9);
    assert_eq!(entities.send(&health).unwrap(), 1);

    let frames = drain(&mut peers[0].1);
    assert_eq!(methods(&frames), vec!["ComponentUpdate"]);
    assert_eq!(frames[0].args[2], r#"{"hp":9}"#);
}
