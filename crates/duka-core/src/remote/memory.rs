//! In-process remote authority.
//!
//! Behaves like the REST server: strictly-newer `updatedAt` on the server is a conflict
//! (equal timestamps let the client win), deletes are idempotent, creates honour
//! idempotency keys, and customers are unique by phone number.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use tokio::sync::Mutex;

use super::{RemoteApi, RemoteError, RemoteRecord, RemoteResult};
use crate::models::{Entity, EntityKind, ServerId};
use crate::util::unix_millis_now;

const FIRST_SERVER_ID: i64 = 501;

enum InjectedFailure {
    /// Fail before the request reaches the server
    Before(RemoteError),
    /// Apply the request, then lose the response
    LostResponse,
}

struct MemoryState {
    records: BTreeMap<(EntityKind, ServerId), RemoteRecord>,
    idempotency: HashMap<String, (EntityKind, ServerId)>,
    failures: VecDeque<InjectedFailure>,
    read_failures: VecDeque<RemoteError>,
    next_id: i64,
    last_stamp: i64,
}

impl MemoryState {
    fn next_stamp(&mut self) -> i64 {
        self.last_stamp = unix_millis_now().max(self.last_stamp + 1);
        self.last_stamp
    }

    fn natural_key_clash(&self, entity: &Entity) -> Option<&RemoteRecord> {
        let Entity::Customer(customer) = entity else {
            return None;
        };
        self.records.values().find(|record| {
            matches!(&record.data, Entity::Customer(existing) if existing.phone == customer.phone)
        })
    }
}

pub struct MemoryRemote {
    state: Mutex<MemoryState>,
    online: AtomicBool,
    latency_ms: AtomicU64,
    creates: AtomicUsize,
    updates: AtomicUsize,
    deletes: AtomicUsize,
    fetches: AtomicUsize,
}

impl Default for MemoryRemote {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryRemote {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MemoryState {
                records: BTreeMap::new(),
                idempotency: HashMap::new(),
                failures: VecDeque::new(),
                read_failures: VecDeque::new(),
                next_id: FIRST_SERVER_ID,
                last_stamp: 0,
            }),
            online: AtomicBool::new(true),
            latency_ms: AtomicU64::new(0),
            creates: AtomicUsize::new(0),
            updates: AtomicUsize::new(0),
            deletes: AtomicUsize::new(0),
            fetches: AtomicUsize::new(0),
        }
    }

    /// Unreachable servers answer every call with a network error.
    pub fn set_reachable(&self, reachable: bool) {
        self.online.store(reachable, Ordering::SeqCst);
    }

    /// Delay applied before every mutating call.
    pub fn set_latency(&self, latency: Duration) {
        let millis = u64::try_from(latency.as_millis()).unwrap_or(u64::MAX);
        self.latency_ms.store(millis, Ordering::SeqCst);
    }

    /// Fail the next mutating call with `error` without applying it.
    pub async fn fail_next(&self, error: RemoteError) {
        self.state
            .lock()
            .await
            .failures
            .push_back(InjectedFailure::Before(error));
    }

    /// Fail the next `fetch` with `error`.
    pub async fn fail_next_fetch(&self, error: RemoteError) {
        self.state.lock().await.read_failures.push_back(error);
    }

    /// Apply the next mutating call but answer it with a network error.
    pub async fn lose_next_response(&self) {
        self.state
            .lock()
            .await
            .failures
            .push_back(InjectedFailure::LostResponse);
    }

    pub fn create_calls(&self) -> usize {
        self.creates.load(Ordering::SeqCst)
    }

    pub fn update_calls(&self) -> usize {
        self.updates.load(Ordering::SeqCst)
    }

    pub fn delete_calls(&self) -> usize {
        self.deletes.load(Ordering::SeqCst)
    }

    pub fn fetch_calls(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    pub async fn record(&self, kind: EntityKind, id: ServerId) -> Option<RemoteRecord> {
        self.state.lock().await.records.get(&(kind, id)).cloned()
    }

    pub async fn records(&self, kind: EntityKind) -> Vec<RemoteRecord> {
        self.state
            .lock()
            .await
            .records
            .iter()
            .filter(|((record_kind, _), _)| *record_kind == kind)
            .map(|(_, record)| record.clone())
            .collect()
    }

    /// Create a record directly on the server, as another device would.
    pub async fn insert(&self, entity: Entity) -> RemoteRecord {
        let mut state = self.state.lock().await;
        let id = ServerId::new(state.next_id);
        state.next_id += 1;
        let record = RemoteRecord {
            id,
            updated_at: state.next_stamp(),
            data: entity,
        };
        state
            .records
            .insert((record.data.kind(), id), record.clone());
        record
    }

    /// Modify a record directly on the server, bumping its `updatedAt`.
    pub async fn edit(&self, kind: EntityKind, id: ServerId, entity: Entity) -> Option<RemoteRecord> {
        let mut state = self.state.lock().await;
        let updated_at = state.next_stamp();
        let record = state.records.get_mut(&(kind, id))?;
        record.data = entity;
        record.updated_at = updated_at;
        Some(record.clone())
    }

    /// Delete a record directly on the server.
    pub async fn remove(&self, kind: EntityKind, id: ServerId) -> Option<RemoteRecord> {
        self.state.lock().await.records.remove(&(kind, id))
    }

    /// Shared prelude of every mutating call; `Ok(true)` means the response must be lost.
    async fn enter(&self, counter: &AtomicUsize) -> RemoteResult<bool> {
        counter.fetch_add(1, Ordering::SeqCst);

        let latency = self.latency_ms.load(Ordering::SeqCst);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }
        if !self.online.load(Ordering::SeqCst) {
            return Err(RemoteError::Network("server unreachable".to_string()));
        }

        match self.state.lock().await.failures.pop_front() {
            Some(InjectedFailure::Before(error)) => Err(error),
            Some(InjectedFailure::LostResponse) => Ok(true),
            None => Ok(false),
        }
    }
}

fn lost_response<T>(lose: bool, value: T) -> RemoteResult<T> {
    if lose {
        Err(RemoteError::Network("connection reset".to_string()))
    } else {
        Ok(value)
    }
}

impl RemoteApi for MemoryRemote {
    async fn create(&self, entity: &Entity, idempotency_key: &str) -> RemoteResult<RemoteRecord> {
        let lose = self.enter(&self.creates).await?;
        let mut state = self.state.lock().await;

        if let Some(key) = state.idempotency.get(idempotency_key).copied() {
            if let Some(record) = state.records.get(&key) {
                return lost_response(lose, record.clone());
            }
        }
        if let Some(existing) = state.natural_key_clash(entity) {
            return Err(RemoteError::Conflict {
                current: Some(Box::new(existing.clone())),
            });
        }

        let id = ServerId::new(state.next_id);
        state.next_id += 1;
        let record = RemoteRecord {
            id,
            updated_at: state.next_stamp(),
            data: entity.clone(),
        };
        let key = (entity.kind(), id);
        state.records.insert(key, record.clone());
        state.idempotency.insert(idempotency_key.to_string(), key);
        lost_response(lose, record)
    }

    async fn update(
        &self,
        id: ServerId,
        entity: &Entity,
        base_updated_at: Option<i64>,
    ) -> RemoteResult<RemoteRecord> {
        let lose = self.enter(&self.updates).await?;
        let mut state = self.state.lock().await;
        let updated_at = state.next_stamp();

        let record = state
            .records
            .get_mut(&(entity.kind(), id))
            .ok_or(RemoteError::NotFound)?;
        if base_updated_at.is_some_and(|base| record.updated_at > base) {
            return Err(RemoteError::Conflict {
                current: Some(Box::new(record.clone())),
            });
        }

        record.data = entity.clone();
        record.updated_at = updated_at;
        let record = record.clone();
        lost_response(lose, record)
    }

    async fn delete(&self, kind: EntityKind, id: ServerId) -> RemoteResult<()> {
        let lose = self.enter(&self.deletes).await?;
        self.state.lock().await.records.remove(&(kind, id));
        lost_response(lose, ())
    }

    async fn fetch(&self, kind: EntityKind, id: ServerId) -> RemoteResult<Option<RemoteRecord>> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if !self.online.load(Ordering::SeqCst) {
            return Err(RemoteError::Network("server unreachable".to_string()));
        }
        if let Some(error) = self.state.lock().await.read_failures.pop_front() {
            return Err(error);
        }
        Ok(self.record(kind, id).await)
    }

    async fn ping(&self) -> RemoteResult<()> {
        if self.online.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(RemoteError::Network("server unreachable".to_string()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Customer, Product};
    use pretty_assertions::assert_eq;

    fn milk() -> Entity {
        Entity::Product(Product::new("Milk", 60.0, 20))
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_create_assigns_ids_and_honours_idempotency_key() {
        let remote = MemoryRemote::new();
        let first = remote.create(&milk(), "key-1").await.unwrap();
        assert_eq!(first.id, ServerId::new(FIRST_SERVER_ID));

        let replayed = remote.create(&milk(), "key-1").await.unwrap();
        assert_eq!(replayed.id, first.id);
        assert_eq!(remote.records(EntityKind::Product).await.len(), 1);
        assert_eq!(remote.create_calls(), 2);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_update_conflicts_only_on_strictly_newer_server_state() {
        let remote = MemoryRemote::new();
        let created = remote.create(&milk(), "key-1").await.unwrap();

        let same_base = remote
            .update(created.id, &milk(), Some(created.updated_at))
            .await
            .unwrap();
        assert!(same_base.updated_at > created.updated_at);

        let stale = remote
            .update(created.id, &milk(), Some(created.updated_at))
            .await
            .unwrap_err();
        let RemoteError::Conflict { current } = stale else {
            panic!("expected conflict");
        };
        assert_eq!(current.unwrap().updated_at, same_base.updated_at);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_delete_is_idempotent() {
        let remote = MemoryRemote::new();
        let created = remote.create(&milk(), "key-1").await.unwrap();
        remote.delete(EntityKind::Product, created.id).await.unwrap();
        remote.delete(EntityKind::Product, created.id).await.unwrap();
        assert!(remote.records(EntityKind::Product).await.is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_customer_phone_is_a_natural_key() {
        let remote = MemoryRemote::new();
        let existing = remote
            .insert(Entity::Customer(Customer::new("Asha", "0712")))
            .await;
        let error = remote
            .create(&Entity::Customer(Customer::new("Asha K", "0712")), "key-2")
            .await
            .unwrap_err();
        let RemoteError::Conflict { current } = error else {
            panic!("expected conflict");
        };
        assert_eq!(current.unwrap().id, existing.id);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_fetch_reads_current_state() {
        let remote = MemoryRemote::new();
        let created = remote.create(&milk(), "key-1").await.unwrap();

        let found = remote.fetch(EntityKind::Product, created.id).await.unwrap();
        assert_eq!(found, Some(created.clone()));
        remote.remove(EntityKind::Product, created.id).await;
        assert_eq!(remote.fetch(EntityKind::Product, created.id).await.unwrap(), None);

        remote.fail_next_fetch(RemoteError::Timeout).await;
        assert!(matches!(
            remote.fetch(EntityKind::Product, created.id).await,
            Err(RemoteError::Timeout)
        ));
        assert_eq!(remote.fetch_calls(), 3);
        // Read failures never leak into mutating calls
        remote.create(&milk(), "key-2").await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_injected_failures_and_reachability() {
        let remote = MemoryRemote::new();
        remote.fail_next(RemoteError::Timeout).await;
        assert!(matches!(
            remote.create(&milk(), "a").await,
            Err(RemoteError::Timeout)
        ));

        remote.lose_next_response().await;
        assert!(remote.create(&milk(), "b").await.is_err());
        assert_eq!(remote.records(EntityKind::Product).await.len(), 1);

        remote.set_reachable(false);
        assert!(remote.ping().await.is_err());
        assert!(remote.create(&milk(), "c").await.is_err());
    }
}
