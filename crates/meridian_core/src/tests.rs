//! End-to-end tests: two hosts joined by an in-memory transport.

use crate::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
struct Position {
    x: f32,
    y: f32,
}

impl Component for Position {
    const NAME: &'static str = "Position";
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
struct Inventory {
    slots: u8,
    #[serde(default)]
    items: Vec<String>,
}

impl Component for Inventory {
    const NAME: &'static str = "Inventory";
    const OWNER_ONLY: &'static [&'static str] = &["items"];
}

struct Pair {
    server: Host,
    client: Host,
    server_entities: Arc<EntityService>,
    client_entities: Arc<EntityService>,
    server_sync: Arc<SyncService>,
    client_sync: Arc<SyncService>,
}

impl Pair {
    async fn connect() -> Self {
        let mut server = Host::new(Role::Master, HostConfig::default());
        let mut client = Host::new(Role::Slave, HostConfig::default());
        let server_entities = server.attach(EntityService::new(Role::Master)).unwrap();
        let client_entities = client.attach(EntityService::new(Role::Slave)).unwrap();
        let server_sync = server.attach(SyncService::new()).unwrap();
        let client_sync = client.attach(SyncService::new()).unwrap();
        server.start().unwrap();
        client.start().unwrap();

        let ((server_sink, server_source), (client_sink, client_source)) = memory_pair();
        tokio::spawn(drive_connection(
            server_sink,
            server_source,
            server.acceptor_options(),
            server.sender(),
        ));
        tokio::spawn(drive_connection(
            client_sink,
            client_source,
            client.initiator_options(),
            client.sender(),
        ));

        let mut pair = Self {
            server,
            client,
            server_entities,
            client_entities,
            server_sync,
            client_sync,
        };
        pair.settle(|p| p.server.link_count() == 1 && p.client.link_count() == 1)
            .await;
        pair
    }

    async fn settle(&mut self, done: impl Fn(&Self) -> bool) {
        for _ in 0..200 {
            if self.server.is_running() {
                self.server.tick(Duration::from_millis(1)).unwrap();
            }
            if self.client.is_running() {
                self.client.tick(Duration::from_millis(1)).unwrap();
            }
            if done(self) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        panic!("hosts did not settle");
    }
}

#[tokio::test]
async fn entities_replicate_to_the_client_mirror() {
    let mut pair = Pair::connect().await;
    let client_id = pair.client.id();

    let id = pair.server_entities.spawn(Some(client_id)).unwrap();
    let position = pair.server_entities.add_component::<Position>(id).unwrap();
    pair.server_entities
        .with_mut(&position, |p| {
            p.x = 1.5;
            p.y = -2.0;
        })
        .unwrap();
    pair.server_entities.send(&position).unwrap();

    pair.settle(|p| p.client_entities.replica::<Position>(id).is_some())
        .await;
    assert_eq!(
        pair.client_entities.replica::<Position>(id),
        Some(Position { x: 1.5, y: -2.0 })
    );
    assert!(pair.client_entities.is_owned_replica(id));

    pair.server_entities.despawn(id).unwrap();
    pair.settle(|p| p.client_entities.replica_ids().is_empty()).await;
}

#[tokio::test]
async fn private_fields_reach_only_the_owner() {
    let mut pair = Pair::connect().await;

    let foreign = pair.server_entities.spawn(None).unwrap();
    let inventory = pair.server_entities.add_component::<Inventory>(foreign).unwrap();
    pair.server_entities
        .with_mut(&inventory, |inv| {
            inv.slots = 4;
            inv.items = vec!["sword".into()];
        })
        .unwrap();
    pair.server_entities.send(&inventory).unwrap();

    pair.settle(|p| p.client_entities.replica::<Inventory>(foreign).is_some())
        .await;
    assert_eq!(
        pair.client_entities.replica::<Inventory>(foreign),
        Some(Inventory {
            slots: 4,
            items: vec![]
        })
    );
}

#[tokio::test]
async fn replication_events_reach_client_services() {
    let mut pair = Pair::connect().await;
    let seen = Arc::new(Mutex::new(Vec::new()));
    {
        let seen = seen.clone();
        pair.client.on_event(
            "test::replicated",
            move |_ctx: &HostContext<'_>, event: &EntityReplicatedEvent| {
                seen.lock().unwrap().push(event.entity);
                Ok(())
            },
        );
    }

    let id = pair.server_entities.spawn(None).unwrap();
    pair.settle(|_| !seen.lock().unwrap().is_empty()).await;
    assert_eq!(*seen.lock().unwrap(), vec![id]);
}

#[tokio::test]
async fn sync_keys_reach_subscribers_only() {
    let mut pair = Pair::connect().await;
    let client_id = pair.client.id();

    assert!(pair.server_sync.subscribe_to(client_id, "match", "score"));
    pair.server_sync
        .set_data(
            "match",
            json!({"score": {"red": 2, "blue": 1}, "secret_plan": {"attack": "left"}}),
        )
        .unwrap();

    pair.settle(|p| p.client_sync.value("match", "score").is_some())
        .await;
    assert_eq!(
        pair.client_sync.value("match", "score"),
        Some(json!({"red": 2, "blue": 1}))
    );
    assert_eq!(pair.client_sync.value("match", "secret_plan"), None);
}

#[tokio::test]
async fn server_stop_tears_down_the_client() {
    let mut pair = Pair::connect().await;
    let id = pair.server_entities.spawn(None).unwrap();
    pair.settle(|p| p.client_entities.replica_ids() == vec![id]).await;

    pair.server.stop().unwrap();
    pair.settle(|p| !p.client.is_running()).await;
    assert_eq!(pair.client.state(), HostState::Stopped);
    assert!(pair.client_entities.replica_ids().is_empty());
}
