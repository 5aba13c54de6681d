//! Queue replay against the remote authority.

mod backoff;
mod coordinator;

use std::collections::HashSet;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::Mutex;

use crate::models::{
    ConflictInfo, ConflictResolution, Entity, EntityKind, LocalId, LocalRecord, OperationAction,
    OperationId, PendingOperation, ServerId, SyncResult,
};
use crate::network::NetworkMonitor;
use crate::remote::{RemoteApi, RemoteError, RemoteRecord, RemoteResult};
use crate::services::LocalStore;
use crate::util::unix_millis_now;
use crate::Result;

pub use backoff::Backoff;
pub use coordinator::SyncCoordinator;

/// What happened to one replayed operation.
#[derive(Debug, Clone, PartialEq)]
pub enum ReplayOutcome {
    /// Confirmed by the remote authority and removed from the queue
    Synced,
    /// Left queued with its attempt counter incremented
    Failed(String),
    /// Left queued; the divergence is recorded for manual resolution
    Conflict(ConflictInfo),
    /// Left queued but skipped until an operator retries it
    Parked(String),
    /// Not attempted; an earlier operation for the same record is still outstanding
    Deferred,
}

/// Why a sync pass did not run at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SyncRejected {
    #[error("device is offline")]
    Offline,
    #[error("sync already in progress")]
    InProgress,
}

/// Drains the pending operation queue.
///
/// Clones share the single-flight flag and the replay lock.
pub struct SyncEngine<R> {
    store: LocalStore,
    remote: Arc<R>,
    network: NetworkMonitor,
    request_timeout: Duration,
    syncing: Arc<AtomicBool>,
    replay_lock: Arc<Mutex<()>>,
}

impl<R> Clone for SyncEngine<R> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            remote: Arc::clone(&self.remote),
            network: self.network.clone(),
            request_timeout: self.request_timeout,
            syncing: Arc::clone(&self.syncing),
            replay_lock: Arc::clone(&self.replay_lock),
        }
    }
}

struct SyncingGuard<'a>(&'a AtomicBool);

impl Drop for SyncingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl<R: RemoteApi> SyncEngine<R> {
    pub fn new(
        store: LocalStore,
        remote: Arc<R>,
        network: NetworkMonitor,
        request_timeout: Duration,
    ) -> Self {
        Self {
            store,
            remote,
            network,
            request_timeout,
            syncing: Arc::new(AtomicBool::new(false)),
            replay_lock: Arc::new(Mutex::new(())),
        }
    }

    pub const fn store(&self) -> &LocalStore {
        &self.store
    }

    pub const fn network(&self) -> &NetworkMonitor {
        &self.network
    }

    pub const fn remote(&self) -> &Arc<R> {
        &self.remote
    }

    pub fn is_syncing(&self) -> bool {
        self.syncing.load(Ordering::SeqCst)
    }

    /// Replay every queued operation once, in enqueue order.
    ///
    /// Rejected immediately (`success = false`) when offline or when another pass is running.
    pub async fn sync_all(&self) -> SyncResult {
        self.try_sync_all()
            .await
            .unwrap_or_else(|rejected| SyncResult::rejected(rejected.to_string()))
    }

    /// Like [`sync_all`](Self::sync_all), but tells a pass that never started apart from one
    /// that ran and failed.
    pub async fn try_sync_all(&self) -> std::result::Result<SyncResult, SyncRejected> {
        if !self.network.is_online() {
            return Err(SyncRejected::Offline);
        }
        if self
            .syncing
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(SyncRejected::InProgress);
        }
        let _syncing = SyncingGuard(&self.syncing);
        let _replay = self.replay_lock.lock().await;

        let operations = match self.store.operations().await {
            Ok(operations) => operations,
            Err(error) => {
                tracing::error!("Failed to read pending operations: {error}");
                return Ok(SyncResult::rejected(format!(
                    "failed to read pending operations: {error}"
                )));
            }
        };
        let conflicted: HashSet<OperationId> = match self.store.conflicts().await {
            Ok(conflicts) => conflicts.into_iter().map(|conflict| conflict.op_id).collect(),
            Err(error) => {
                tracing::warn!("Failed to read outstanding conflicts: {error}");
                HashSet::new()
            }
        };

        tracing::debug!(queued = operations.len(), "Starting sync pass");
        let mut result = SyncResult::default();
        let mut blocked = HashSet::new();

        for op in operations {
            let key = op.record_key();
            if blocked.contains(&key) || op.parked || conflicted.contains(&op.id) {
                blocked.insert(key);
                result.deferred += 1;
                continue;
            }

            match self.replay(&op).await {
                ReplayOutcome::Synced => result.synced += 1,
                ReplayOutcome::Failed(message) | ReplayOutcome::Parked(message) => {
                    blocked.insert(key);
                    result.failed += 1;
                    result.errors.push(message);
                }
                ReplayOutcome::Conflict(conflict) => {
                    blocked.insert(key);
                    result.conflicts.push(conflict);
                }
                ReplayOutcome::Deferred => {
                    blocked.insert(key);
                    result.deferred += 1;
                }
            }
        }

        let result = result.finish();
        tracing::info!(
            synced = result.synced,
            failed = result.failed,
            deferred = result.deferred,
            conflicts = result.conflicts.len(),
            "Sync pass finished"
        );
        Ok(result)
    }

    /// Replay a single operation if it is at the head of its record's queue.
    ///
    /// Used for the immediate attempt after an optimistic write; shares the replay lock with
    /// `sync_all` so the two never submit the same operation concurrently.
    pub async fn replay_operation(&self, op_id: OperationId) -> ReplayOutcome {
        if !self.network.is_online() {
            return ReplayOutcome::Deferred;
        }
        let _replay = self.replay_lock.lock().await;

        let op = match self.store.operation(op_id).await {
            Ok(Some(op)) => op,
            // Already settled by a sync pass
            Ok(None) => return ReplayOutcome::Synced,
            Err(error) => {
                tracing::warn!(op_id = op_id.get(), "Failed to load queued operation: {error}");
                return ReplayOutcome::Deferred;
            }
        };
        match self.is_head_of_line(&op).await {
            Ok(true) => self.replay(&op).await,
            Ok(false) => ReplayOutcome::Deferred,
            Err(error) => {
                tracing::warn!(op_id = op_id.get(), "Failed to inspect record queue: {error}");
                ReplayOutcome::Deferred
            }
        }
    }

    async fn is_head_of_line(&self, op: &PendingOperation) -> Result<bool> {
        if op.parked {
            return Ok(false);
        }
        let queued = self.store.operations_for_record(op.kind, op.local_id).await?;
        if queued.first().map(|head| head.id) != Some(op.id) {
            return Ok(false);
        }
        Ok(self
            .store
            .conflict_for_record(op.kind, op.local_id)
            .await?
            .is_none())
    }

    /// Outstanding conflicts, newest first.
    pub async fn conflicts(&self) -> Result<Vec<ConflictInfo>> {
        self.store.conflicts().await
    }

    /// Settle a conflict: `Local` queues the local payload to overwrite the server, `Server`
    /// discards local intent and adopts the server payload.
    pub async fn resolve_conflict_manual(
        &self,
        kind: EntityKind,
        id: ServerId,
        resolution: ConflictResolution,
    ) -> Result<Option<LocalRecord<Entity>>> {
        let _replay = self.replay_lock.lock().await;
        let record = self
            .store
            .resolve_conflict(kind, id, resolution, unix_millis_now())
            .await?;
        tracing::info!(kind = %kind, server_id = id.get(), %resolution, "Conflict resolved");
        Ok(record)
    }

    /// Settle the conflict attached to one local record, for server records that several local
    /// records collided with.
    pub async fn resolve_record_conflict(
        &self,
        kind: EntityKind,
        local_id: LocalId,
        resolution: ConflictResolution,
    ) -> Result<Option<LocalRecord<Entity>>> {
        let _replay = self.replay_lock.lock().await;
        let record = self
            .store
            .resolve_record_conflict(kind, local_id, resolution, unix_millis_now())
            .await?;
        tracing::info!(kind = %kind, local_id = local_id.get(), %resolution, "Conflict resolved");
        Ok(record)
    }

    async fn call<T>(&self, request: impl Future<Output = RemoteResult<T>>) -> RemoteResult<T> {
        tokio::time::timeout(self.request_timeout, request)
            .await
            .unwrap_or(Err(RemoteError::Timeout))
    }

    async fn replay(&self, op: &PendingOperation) -> ReplayOutcome {
        tracing::debug!(
            op_id = op.id.get(),
            kind = %op.kind,
            action = %op.action,
            local_id = op.local_id.get(),
            attempts = op.attempts,
            "Replaying operation"
        );
        let replayed = match op.action {
            OperationAction::Create => self.replay_create(op).await,
            OperationAction::Update => self.replay_update(op).await,
            OperationAction::Delete => self.replay_delete(op).await,
        };

        match replayed {
            Ok(outcome) => outcome,
            Err(error) => {
                tracing::error!(op_id = op.id.get(), "Local store failed during replay: {error}");
                let message = format!("{}: {error}", describe(op));
                if let Err(error) = self.store.record_failure(op.id, &message).await {
                    tracing::warn!(op_id = op.id.get(), "Failed to count replay attempt: {error}");
                }
                ReplayOutcome::Failed(message)
            }
        }
    }

    async fn replay_create(&self, op: &PendingOperation) -> Result<ReplayOutcome> {
        let Some(record) = self.store.get_any(op.kind, op.local_id).await? else {
            self.store.discard_operation(op.id).await?;
            return Ok(ReplayOutcome::Synced);
        };
        if record.server_id.is_some() {
            // Identity already mapped; never create twice
            self.store.discard_operation(op.id).await?;
            return Ok(ReplayOutcome::Synced);
        }

        let data = op.data.clone().unwrap_or_else(|| record.payload.clone());
        match self.call(self.remote.create(&data, &op.op_key)).await {
            Ok(remote) => {
                self.store.confirm_create(op, &remote).await?;
                tracing::debug!(
                    op_id = op.id.get(),
                    local_id = op.local_id.get(),
                    server_id = remote.id.get(),
                    "Create confirmed"
                );
                Ok(ReplayOutcome::Synced)
            }
            Err(error) => self.settle_failure(op, None, Some(data), error).await,
        }
    }

    async fn replay_update(&self, op: &PendingOperation) -> Result<ReplayOutcome> {
        let Some(record) = self.store.get_any(op.kind, op.local_id).await? else {
            self.store.discard_operation(op.id).await?;
            return Ok(ReplayOutcome::Synced);
        };
        let Some(server_id) = record.server_id.or(op.server_id) else {
            let message = format!("{}: record has no server id yet", describe(op));
            self.store.record_failure(op.id, &message).await?;
            return Ok(ReplayOutcome::Failed(message));
        };

        // Earlier replays of this record advance the server timestamp past the snapshot.
        let base = match (op.base_updated_at, record.server_updated_at) {
            (Some(snapshot), Some(known)) => Some(snapshot.max(known)),
            (snapshot, known) => snapshot.or(known),
        };
        let data = op.data.clone().unwrap_or_else(|| record.payload.clone());
        match self.call(self.remote.update(server_id, &data, base)).await {
            Ok(remote) => {
                self.store.confirm_update(op, &remote).await?;
                Ok(ReplayOutcome::Synced)
            }
            Err(error) => {
                self.settle_failure(op, Some(server_id), Some(data), error)
                    .await
            }
        }
    }

    async fn replay_delete(&self, op: &PendingOperation) -> Result<ReplayOutcome> {
        let record = self.store.get_any(op.kind, op.local_id).await?;
        let server_id = record
            .as_ref()
            .and_then(|record| record.server_id)
            .or(op.server_id);
        let Some(server_id) = server_id else {
            // Never reached the server
            self.store.confirm_delete(op).await?;
            return Ok(ReplayOutcome::Synced);
        };

        match self.call(self.remote.delete(op.kind, server_id)).await {
            Ok(()) | Err(RemoteError::NotFound) => {
                self.store.confirm_delete(op).await?;
                Ok(ReplayOutcome::Synced)
            }
            Err(error) => self.settle_failure(op, Some(server_id), None, error).await,
        }
    }

    /// Server state a rejected replay diverged from.
    ///
    /// `Some(None)` means the record is gone on the server; `None` means the rejection is not a
    /// divergence at all.
    async fn diverged_state(
        &self,
        op: &PendingOperation,
        server_id: Option<ServerId>,
        error: &RemoteError,
    ) -> RemoteResult<Option<Option<RemoteRecord>>> {
        match error {
            RemoteError::Conflict {
                current: Some(record),
            } => Ok(Some(Some((**record).clone()))),
            RemoteError::Conflict { current: None } => {
                let Some(id) = server_id else {
                    return Ok(None);
                };
                // A bare rejection says nothing about the server copy; read it.
                match self.call(self.remote.fetch(op.kind, id)).await {
                    Ok(found) => Ok(Some(found)),
                    Err(RemoteError::NotFound) => Ok(Some(None)),
                    Err(read_error) => Err(read_error),
                }
            }
            RemoteError::NotFound if op.action == OperationAction::Update => Ok(Some(None)),
            _ => Ok(None),
        }
    }

    async fn settle_failure(
        &self,
        op: &PendingOperation,
        server_id: Option<ServerId>,
        local_data: Option<Entity>,
        error: RemoteError,
    ) -> Result<ReplayOutcome> {
        let current = match self.diverged_state(op, server_id, &error).await {
            Ok(current) => current,
            Err(read_error) => {
                let message = format!(
                    "{}: {error}; reading the server copy failed: {read_error}",
                    describe(op)
                );
                self.store.record_failure(op.id, &message).await?;
                tracing::warn!(op_id = op.id.get(), "Replay failed, will retry: {message}");
                return Ok(ReplayOutcome::Failed(message));
            }
        };

        if let Some(current) = current {
            let id = current.as_ref().map(|record| record.id).or(server_id);
            if let (Some(id), Some(local_data)) = (id, local_data) {
                let conflict = conflict_info(op, id, local_data, current);
                self.store.save_conflict(&conflict).await?;
                tracing::warn!(
                    op_id = op.id.get(),
                    kind = %op.kind,
                    local_id = op.local_id.get(),
                    server_id = id.get(),
                    "Replay conflicts with server state"
                );
                return Ok(ReplayOutcome::Conflict(conflict));
            }
        }

        let message = format!("{}: {error}", describe(op));
        if matches!(error, RemoteError::Unauthorized(_)) {
            self.store.park_operation(op.id, &message).await?;
            tracing::warn!(op_id = op.id.get(), "Operation parked: {message}");
            return Ok(ReplayOutcome::Parked(message));
        }

        self.store.record_failure(op.id, &message).await?;
        if error.is_transient() {
            tracing::warn!(
                op_id = op.id.get(),
                attempts = op.attempts + 1,
                "Replay failed, will retry: {message}"
            );
        } else {
            tracing::warn!(op_id = op.id.get(), "Replay rejected: {message}");
        }
        Ok(ReplayOutcome::Failed(message))
    }
}

fn describe(op: &PendingOperation) -> String {
    format!("{} {} #{}", op.action, op.kind, op.local_id)
}

fn conflict_info(
    op: &PendingOperation,
    id: ServerId,
    local_data: Entity,
    current: Option<RemoteRecord>,
) -> ConflictInfo {
    let (server_data, server_updated_at) = match current {
        Some(record) => (Some(record.data), Some(record.updated_at)),
        None => (None, None),
    };
    ConflictInfo {
        kind: op.kind,
        id,
        local_id: op.local_id,
        op_id: op.id,
        local_data,
        server_data,
        server_updated_at,
        detected_at: unix_millis_now(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Product;
    use crate::remote::MemoryRemote;
    use pretty_assertions::assert_eq;

    async fn engine(online: bool) -> (SyncEngine<MemoryRemote>, Arc<MemoryRemote>) {
        let store = LocalStore::open_in_memory().await.unwrap();
        let remote = Arc::new(MemoryRemote::new());
        let engine = SyncEngine::new(
            store,
            Arc::clone(&remote),
            NetworkMonitor::new(online),
            Duration::from_secs(2),
        );
        (engine, remote)
    }

    fn milk() -> Entity {
        Entity::Product(Product::new("Milk", 60.0, 20))
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_offline_pass_is_rejected() {
        let (engine, remote) = engine(false).await;
        engine.store().record_create(&milk(), 1).await.unwrap();

        let result = engine.sync_all().await;
        assert!(!result.success);
        assert_eq!(result.errors, vec!["device is offline".to_string()]);
        assert_eq!(remote.create_calls(), 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_transient_failure_increments_attempts_and_blocks_record() {
        let (engine, remote) = engine(true).await;
        let (record, _) = engine.store().record_create(&milk(), 1).await.unwrap();
        engine
            .store()
            .record_update(EntityKind::Product, record.local_id, &milk(), 2)
            .await
            .unwrap();
        remote
            .fail_next(RemoteError::Server {
                status: 503,
                message: "busy".into(),
            })
            .await;

        let result = engine.sync_all().await;
        assert_eq!(result.failed, 1);
        assert_eq!(result.deferred, 1);
        assert!(!result.success);
        assert_eq!(remote.update_calls(), 0);

        let ops = engine.store().operations().await.unwrap();
        assert_eq!(ops[0].attempts, 1);
        assert!(ops[0].last_error.as_deref().unwrap().contains("busy"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_unauthorized_parks_operation() {
        let (engine, remote) = engine(true).await;
        engine.store().record_create(&milk(), 1).await.unwrap();
        remote
            .fail_next(RemoteError::Unauthorized("token expired (401)".into()))
            .await;

        let first = engine.sync_all().await;
        assert_eq!(first.failed, 1);
        let second = engine.sync_all().await;
        assert_eq!(second.deferred, 1);
        assert_eq!(remote.create_calls(), 1);

        let op = engine.store().operations().await.unwrap().remove(0);
        assert!(op.parked);
        engine.store().retry_operation(op.id).await.unwrap();
        let third = engine.sync_all().await;
        assert!(third.success);
        assert_eq!(third.synced, 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_replay_operation_skips_non_head_operations() {
        let (engine, remote) = engine(true).await;
        let (record, _) = engine.store().record_create(&milk(), 1).await.unwrap();
        let (_, update) = engine
            .store()
            .record_update(EntityKind::Product, record.local_id, &milk(), 2)
            .await
            .unwrap();

        assert_eq!(
            engine.replay_operation(update.id).await,
            ReplayOutcome::Deferred
        );
        assert_eq!(remote.update_calls(), 0);
        assert_eq!(remote.create_calls(), 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_update_404_is_reported_as_conflict() {
        let (engine, remote) = engine(true).await;
        let (record, _) = engine.store().record_create(&milk(), 1).await.unwrap();
        assert!(engine.sync_all().await.success);
        let server_id = engine
            .store()
            .get(EntityKind::Product, record.local_id)
            .await
            .unwrap()
            .unwrap()
            .server_id
            .unwrap();
        remote.remove(EntityKind::Product, server_id).await;

        engine
            .store()
            .record_update(EntityKind::Product, record.local_id, &milk(), 2)
            .await
            .unwrap();
        let result = engine.sync_all().await;
        assert_eq!(result.conflicts.len(), 1);
        assert_eq!(result.conflicts[0].server_data, None);

        engine
            .resolve_conflict_manual(EntityKind::Product, server_id, ConflictResolution::Server)
            .await
            .unwrap();
        assert!(engine
            .store()
            .get_any(EntityKind::Product, record.local_id)
            .await
            .unwrap()
            .is_none());
        assert_eq!(engine.store().pending_count(), 0);
    }

    /// Sync one product, edit it locally, then have the server reject the update with a bare 409.
    async fn bare_conflict(
        engine: &SyncEngine<MemoryRemote>,
        remote: &MemoryRemote,
    ) -> (LocalId, ServerId, SyncResult) {
        let (record, _) = engine.store().record_create(&milk(), 1).await.unwrap();
        assert!(engine.sync_all().await.success);
        let server_id = engine
            .store()
            .get(EntityKind::Product, record.local_id)
            .await
            .unwrap()
            .unwrap()
            .server_id
            .unwrap();

        engine
            .store()
            .record_update(EntityKind::Product, record.local_id, &dear_milk(), 2)
            .await
            .unwrap();
        remote
            .fail_next(RemoteError::Conflict { current: None })
            .await;
        let result = engine.sync_all().await;
        (record.local_id, server_id, result)
    }

    fn dear_milk() -> Entity {
        Entity::Product(Product::new("Milk", 65.0, 20))
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_bodyless_conflict_reads_server_copy_before_resolving_local() {
        let (engine, remote) = engine(true).await;
        let (_, server_id, result) = bare_conflict(&engine, &remote).await;

        assert_eq!(result.conflicts.len(), 1);
        assert_eq!(result.conflicts[0].server_data, Some(milk()));
        assert_eq!(remote.fetch_calls(), 1);

        engine
            .resolve_conflict_manual(EntityKind::Product, server_id, ConflictResolution::Local)
            .await
            .unwrap();
        let result = engine.sync_all().await;
        assert!(result.success);
        assert_eq!(remote.create_calls(), 1);
        let products = remote.records(EntityKind::Product).await;
        assert_eq!(products.len(), 1);
        assert_eq!(products[0].id, server_id);
        assert_eq!(products[0].data, dear_milk());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_bodyless_conflict_resolved_to_server_keeps_local_row() {
        let (engine, remote) = engine(true).await;
        let (local_id, server_id, _) = bare_conflict(&engine, &remote).await;

        let record = engine
            .resolve_conflict_manual(EntityKind::Product, server_id, ConflictResolution::Server)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.local_id, local_id);
        assert_eq!(record.payload, milk());
        assert!(record.synced);
        assert_eq!(engine.store().pending_count(), 0);
        assert!(remote.record(EntityKind::Product, server_id).await.is_some());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_bodyless_conflict_with_unreadable_server_copy_is_retried() {
        let (engine, remote) = engine(true).await;
        remote
            .fail_next_fetch(RemoteError::Network("connection reset".into()))
            .await;
        let (_, _, result) = bare_conflict(&engine, &remote).await;

        assert_eq!(result.failed, 1);
        assert!(result.conflicts.is_empty());
        assert!(engine.store().conflicts().await.unwrap().is_empty());
        let ops = engine.store().operations().await.unwrap();
        assert_eq!(ops[0].attempts, 1);

        let retried = engine.sync_all().await;
        assert!(retried.success);
        assert_eq!(retried.synced, 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_local_store_failure_during_replay_counts_attempt() {
        let (engine, remote) = engine(true).await;
        let (_, first) = engine.store().record_create(&milk(), 1).await.unwrap();
        engine.store().record_create(&dear_milk(), 2).await.unwrap();
        // The id the server hands out next is already linked locally.
        engine
            .store()
            .confirm_create(
                &first,
                &RemoteRecord {
                    id: ServerId::new(501),
                    updated_at: 1,
                    data: milk(),
                },
            )
            .await
            .unwrap();

        let result = engine.sync_all().await;
        assert_eq!(result.failed, 1);
        assert_eq!(remote.create_calls(), 1);
        let ops = engine.store().operations().await.unwrap();
        assert_eq!(ops.len(), 1);
        assert_eq!(ops[0].attempts, 1);
        assert!(ops[0].last_error.is_some());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_request_timeout_counts_as_failure() {
        let store = LocalStore::open_in_memory().await.unwrap();
        let remote = Arc::new(MemoryRemote::new());
        remote.set_latency(Duration::from_millis(200));
        let engine = SyncEngine::new(
            store,
            Arc::clone(&remote),
            NetworkMonitor::new(true),
            Duration::from_millis(20),
        );
        engine.store().record_create(&milk(), 1).await.unwrap();

        let result = engine.sync_all().await;
        assert_eq!(result.failed, 1);
        assert!(result.errors[0].contains("timed out"));
        assert_eq!(engine.store().pending_count(), 1);
    }
}
