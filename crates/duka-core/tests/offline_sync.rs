//! End-to-end offline/online scenarios against the in-process remote authority.

use std::sync::Arc;
use std::time::Duration;

use duka_core::models::{OperationAction, TypedEntity};
use duka_core::{
    ClientConfig, ConflictResolution, Customer, DukaClient, Entity, EntityKind, LineItem,
    LocalStore, MemoryRemote, MutationStatus, NetworkMonitor, Product, RemoteApi, Sale, ServerId,
};
use pretty_assertions::assert_eq;

struct Harness {
    client: DukaClient<MemoryRemote>,
    remote: Arc<MemoryRemote>,
}

impl Harness {
    async fn offline() -> Self {
        let store = LocalStore::open_in_memory().await.unwrap();
        let remote = Arc::new(MemoryRemote::new());
        let client = DukaClient::new(
            store,
            Arc::clone(&remote),
            NetworkMonitor::new(false),
            &ClientConfig::default(),
        );
        Self { client, remote }
    }

    fn go_online(&self) {
        self.client.network().set_online(true);
    }

    fn go_offline(&self) {
        self.client.network().set_online(false);
    }

    async fn sync_to_quiescence(&self) {
        for _ in 0..5 {
            let result = self.client.coordinator().sync_now().await;
            assert!(result.conflicts.is_empty(), "unexpected conflicts: {result:?}");
            if self.client.store().pending_count() == 0 {
                return;
            }
        }
        panic!("queue did not drain");
    }
}

fn milk() -> Product {
    Product::new("Milk", 60.0, 20)
}

#[tokio::test(flavor = "multi_thread")]
async fn offline_create_then_sync_maps_identity() {
    let harness = Harness::offline().await;
    let mutation = harness.client.products.create(milk()).await.unwrap();
    let local_id = mutation.record.local_id;

    let listed = harness.client.products.list().await;
    assert_eq!(listed.len(), 1);
    assert!(!listed[0].synced);
    assert_eq!(harness.client.store().pending_count(), 1);

    harness.go_online();
    let result = harness.client.coordinator().sync_now().await;
    assert!(result.success);
    assert_eq!(result.synced, 1);
    assert_eq!(result.failed, 0);
    assert!(result.conflicts.is_empty());

    let record = harness.client.products.get(local_id).await.unwrap();
    assert_eq!(record.server_id, Some(ServerId::new(501)));
    assert!(record.synced);
    assert_eq!(harness.client.store().pending_count(), 0);

    let status = harness.client.coordinator().status().await;
    assert_eq!(status.pending_count, 0);
    assert!(status.last_sync_time.is_some());
}

#[tokio::test(flavor = "multi_thread")]
async fn offline_history_converges_with_remote() {
    let harness = Harness::offline().await;
    let products = &harness.client.products;

    let kept = products.create(milk()).await.unwrap().record.local_id;
    products
        .update(kept, Product::new("Milk 500ml", 35.0, 40))
        .await
        .unwrap();
    let dropped = products
        .create(Product::new("Bread", 55.0, 10))
        .await
        .unwrap()
        .record
        .local_id;
    products.delete(dropped).await.unwrap();
    let customer = harness
        .client
        .customers
        .create(Customer::new("Wanjiru", "+254700000001"))
        .await
        .unwrap()
        .record
        .local_id;
    harness
        .client
        .sales
        .create(Sale {
            items: vec![LineItem {
                product_name: "Milk 500ml".into(),
                quantity: 2,
                unit_price: 35.0,
            }],
            total: 70.0,
            payment_method: "mpesa".into(),
            customer_phone: Some("+254700000001".into()),
        })
        .await
        .unwrap();

    harness.go_online();
    harness.sync_to_quiescence().await;

    for kind in EntityKind::ALL {
        let local = harness.client.store().list(kind).await.unwrap();
        let remote = harness.remote.records(kind).await;
        assert_eq!(local.len(), remote.len(), "{kind} count differs");
        for record in local {
            assert!(record.synced);
            let server_id = record.server_id.unwrap();
            let server = harness.remote.record(kind, server_id).await.unwrap();
            assert_eq!(server.data, record.payload);
        }
    }
    assert!(harness.client.products.get(dropped).await.is_none());
    assert!(harness.client.customers.get(customer).await.unwrap().synced);
}

#[tokio::test(flavor = "multi_thread")]
async fn no_duplicate_creation_across_passes() {
    let harness = Harness::offline().await;
    harness.client.products.create(milk()).await.unwrap();

    harness.go_online();
    assert!(harness.client.engine().sync_all().await.success);
    let again = harness.client.engine().sync_all().await;
    assert!(again.success);
    assert_eq!(again.synced, 0);

    assert_eq!(harness.remote.create_calls(), 1);
    assert_eq!(harness.remote.records(EntityKind::Product).await.len(), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn lost_create_response_is_deduplicated_by_idempotency_key() {
    let harness = Harness::offline().await;
    harness.client.products.create(milk()).await.unwrap();

    harness.go_online();
    harness.remote.lose_next_response().await;
    let first = harness.client.engine().sync_all().await;
    assert_eq!(first.failed, 1);

    let second = harness.client.engine().sync_all().await;
    assert!(second.success);
    assert_eq!(harness.remote.create_calls(), 2);
    assert_eq!(harness.remote.records(EntityKind::Product).await.len(), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn per_record_order_is_preserved() {
    let harness = Harness::offline().await;
    let products = &harness.client.products;
    let local_id = products.create(milk()).await.unwrap().record.local_id;
    products
        .update(local_id, Product::new("Milk", 62.0, 20))
        .await
        .unwrap();
    let last = Product::new("Milk", 65.0, 18);
    products.update(local_id, last.clone()).await.unwrap();

    harness.go_online();
    let result = harness.client.engine().sync_all().await;
    assert!(result.success, "{result:?}");
    assert_eq!(result.synced, 3);

    let remote = harness.remote.records(EntityKind::Product).await;
    assert_eq!(remote.len(), 1);
    assert_eq!(remote[0].data, last.clone().into_entity());

    let record = products.get(local_id).await.unwrap();
    assert_eq!(record.payload, last);
    assert!(record.synced);
}

#[tokio::test(flavor = "multi_thread")]
async fn stale_update_surfaces_conflict_without_overwriting() {
    let harness = Harness::offline().await;
    harness.go_online();
    let created = harness.client.products.create(milk()).await.unwrap();
    let local_id = created.record.local_id;
    assert_eq!(created.wait().await, MutationStatus::Synced);
    let server_id = harness
        .client
        .products
        .get(local_id)
        .await
        .unwrap()
        .server_id
        .unwrap();

    // Another till changes the price while this one is offline.
    let server_version = Product::new("Milk", 70.0, 20).into_entity();
    harness
        .remote
        .edit(EntityKind::Product, server_id, server_version.clone())
        .await
        .unwrap();
    harness.go_offline();
    harness
        .client
        .products
        .update(local_id, Product::new("Milk", 58.0, 20))
        .await
        .unwrap();

    harness.go_online();
    let result = harness.client.coordinator().sync_now().await;
    assert!(!result.success);
    assert_eq!(result.conflicts.len(), 1);
    let conflict = &result.conflicts[0];
    assert_eq!(conflict.id, server_id);
    assert_eq!(conflict.server_data.as_ref(), Some(&server_version));

    let remote = harness
        .remote
        .record(EntityKind::Product, server_id)
        .await
        .unwrap();
    assert_eq!(remote.data, server_version);

    // Conflicted operations are not retried automatically.
    let updates_before = harness.remote.update_calls();
    let again = harness.client.engine().sync_all().await;
    assert_eq!(again.deferred, 1);
    assert_eq!(harness.remote.update_calls(), updates_before);
    assert_eq!(harness.client.coordinator().status().await.conflicts.len(), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn resolving_local_overwrites_server() {
    let harness = Harness::offline().await;
    harness.go_online();
    let created = harness.client.products.create(milk()).await.unwrap();
    let local_id = created.record.local_id;
    created.wait().await;
    let server_id = harness
        .client
        .products
        .get(local_id)
        .await
        .unwrap()
        .server_id
        .unwrap();

    harness
        .remote
        .edit(
            EntityKind::Product,
            server_id,
            Product::new("Milk", 70.0, 20).into_entity(),
        )
        .await
        .unwrap();
    harness.go_offline();
    let local_version = Product::new("Milk", 58.0, 20);
    harness
        .client
        .products
        .update(local_id, local_version.clone())
        .await
        .unwrap();
    harness.go_online();
    assert_eq!(
        harness.client.engine().sync_all().await.conflicts.len(),
        1
    );

    harness
        .client
        .coordinator()
        .resolve_conflict(EntityKind::Product, server_id, ConflictResolution::Local)
        .await
        .unwrap();
    let result = harness.client.engine().sync_all().await;
    assert!(result.success, "{result:?}");

    let remote = harness
        .remote
        .record(EntityKind::Product, server_id)
        .await
        .unwrap();
    assert_eq!(remote.data, local_version.clone().into_entity());
    assert!(harness.client.products.get(local_id).await.unwrap().synced);
    assert!(harness.client.engine().conflicts().await.unwrap().is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn customer_phone_clash_resolves_to_server_record() {
    let harness = Harness::offline().await;
    let existing = harness
        .remote
        .insert(Customer::new("Asha Mwangi", "0712000111").into_entity())
        .await;
    let local_id = harness
        .client
        .customers
        .create(Customer::new("Asha", "0712000111"))
        .await
        .unwrap()
        .record
        .local_id;

    harness.go_online();
    let result = harness.client.engine().sync_all().await;
    assert_eq!(result.conflicts.len(), 1);
    assert_eq!(result.conflicts[0].id, existing.id);

    harness
        .client
        .engine()
        .resolve_conflict_manual(EntityKind::Customer, existing.id, ConflictResolution::Server)
        .await
        .unwrap();
    let record = harness.client.customers.get(local_id).await.unwrap();
    assert_eq!(record.server_id, Some(existing.id));
    assert_eq!(record.payload.name, "Asha Mwangi");
    assert!(record.synced);
    assert_eq!(harness.client.store().pending_count(), 0);
    assert_eq!(harness.remote.records(EntityKind::Customer).await.len(), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn customers_colliding_with_one_server_record_are_tracked_separately() {
    let harness = Harness::offline().await;
    let existing = harness
        .remote
        .insert(Customer::new("Asha Mwangi", "0712000111").into_entity())
        .await;
    let mut local_ids = Vec::new();
    for name in ["Asha", "Asha M"] {
        let mutation = harness
            .client
            .customers
            .create(Customer::new(name, "0712000111"))
            .await
            .unwrap();
        local_ids.push(mutation.record.local_id);
    }

    harness.go_online();
    let first = harness.client.engine().sync_all().await;
    assert_eq!(first.conflicts.len(), 2);
    assert_eq!(harness.client.store().conflicts().await.unwrap().len(), 2);

    // Both creates wait for resolution instead of hitting the server again.
    let second = harness.client.engine().sync_all().await;
    assert_eq!(second.deferred, 2);
    assert!(second.conflicts.is_empty());
    assert_eq!(harness.remote.create_calls(), 2);

    let ambiguous = harness
        .client
        .engine()
        .resolve_conflict_manual(EntityKind::Customer, existing.id, ConflictResolution::Server)
        .await;
    assert!(ambiguous.is_err());
    assert_eq!(harness.client.store().conflicts().await.unwrap().len(), 2);

    for local_id in &local_ids {
        harness
            .client
            .engine()
            .resolve_record_conflict(EntityKind::Customer, *local_id, ConflictResolution::Server)
            .await
            .unwrap();
    }
    let kept = harness.client.customers.get(local_ids[0]).await.unwrap();
    assert_eq!(kept.server_id, Some(existing.id));
    assert!(harness.client.customers.get(local_ids[1]).await.is_none());
    assert_eq!(harness.client.customers.list().await.len(), 1);
    assert!(harness.client.store().conflicts().await.unwrap().is_empty());
    assert_eq!(harness.client.store().pending_count(), 0);
    assert_eq!(harness.remote.records(EntityKind::Customer).await.len(), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn delete_is_idempotent_after_lost_response() {
    let harness = Harness::offline().await;
    harness.go_online();
    let created = harness.client.products.create(milk()).await.unwrap();
    let local_id = created.record.local_id;
    created.wait().await;

    harness.remote.lose_next_response().await;
    let status = harness
        .client
        .products
        .delete(local_id)
        .await
        .unwrap()
        .wait()
        .await;
    assert!(matches!(status, MutationStatus::Queued(_)));
    assert!(harness.remote.records(EntityKind::Product).await.is_empty());

    let result = harness.client.engine().sync_all().await;
    assert!(result.success, "{result:?}");
    assert_eq!(harness.remote.delete_calls(), 2);
    assert!(harness
        .client
        .store()
        .get_any(EntityKind::Product, local_id)
        .await
        .unwrap()
        .is_none());
}

#[tokio::test(flavor = "multi_thread")]
async fn delete_queued_behind_unconfirmed_create() {
    let harness = Harness::offline().await;
    let local_id = harness
        .client
        .products
        .create(milk())
        .await
        .unwrap()
        .record
        .local_id;
    harness.client.products.delete(local_id).await.unwrap();
    let actions: Vec<_> = harness
        .client
        .store()
        .operations()
        .await
        .unwrap()
        .into_iter()
        .map(|op| op.action)
        .collect();
    assert_eq!(actions, vec![OperationAction::Create, OperationAction::Delete]);

    harness.go_online();
    let result = harness.client.engine().sync_all().await;
    assert!(result.success);
    assert_eq!(result.synced, 2);
    assert!(harness.remote.records(EntityKind::Product).await.is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn concurrent_sync_is_single_flight() {
    let harness = Harness::offline().await;
    harness.client.products.create(milk()).await.unwrap();
    harness
        .client
        .products
        .create(Product::new("Bread", 55.0, 10))
        .await
        .unwrap();
    harness.remote.set_latency(Duration::from_millis(100));
    harness.go_online();

    let coordinator = harness.client.coordinator().clone();
    let first = tokio::spawn(async move { coordinator.sync_now().await });
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert!(harness.client.engine().is_syncing());
    let second = harness.client.coordinator().sync_now().await;

    assert!(!second.success);
    assert_eq!(second.errors, vec!["sync already in progress".to_string()]);
    let first = first.await.unwrap();
    assert!(first.success);
    assert_eq!(first.synced, 2);
    assert_eq!(harness.remote.create_calls(), 2);
}

#[tokio::test(flavor = "multi_thread")]
async fn queue_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("duka.db");
    let config = ClientConfig::default();
    let remote = Arc::new(MemoryRemote::new());

    let local_id = {
        let store = LocalStore::open_path(&path).await.unwrap();
        let client = DukaClient::new(store, Arc::clone(&remote), NetworkMonitor::new(false), &config);
        client.products.create(milk()).await.unwrap().record.local_id
    };

    let store = LocalStore::open_path(&path).await.unwrap();
    let client = DukaClient::new(store, Arc::clone(&remote), NetworkMonitor::new(true), &config);
    assert_eq!(client.store().pending_count(), 1);
    assert!(client.engine().sync_all().await.success);
    assert!(client.products.get(local_id).await.unwrap().synced);
    assert!(remote.ping().await.is_ok());
}

#[tokio::test(flavor = "multi_thread")]
async fn entity_payloads_round_trip_through_remote() {
    let harness = Harness::offline().await;
    harness.go_online();
    let created = harness
        .client
        .customers
        .create(Customer::new("Otieno", "0722000222"))
        .await
        .unwrap();
    created.wait().await;
    let stored = harness.remote.records(EntityKind::Customer).await;
    assert_eq!(
        stored[0].data,
        Entity::Customer(Customer::new("Otieno", "0722000222"))
    );
}
