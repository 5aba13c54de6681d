//! Shared local store used by entity services and the sync engine.
//!
//! Every compound mutation (local row + queue entry, confirmation, resolution) runs inside
//! one transaction while holding the database mutex, so readers never observe a row
//! without its queued operation or vice versa.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use libsql::Connection;
use tokio::sync::{watch, Mutex};

use crate::db::{
    ConflictRepository, Database, EntityRepository, LibSqlConflictRepository,
    LibSqlEntityRepository, LibSqlQueueRepository, QueueRepository,
};
use crate::models::{
    ConflictInfo, ConflictResolution, Entity, EntityKind, LocalId, LocalRecord, NewOperation,
    OperationAction, OperationId, PendingOperation, ServerId,
};
use crate::remote::RemoteRecord;
use crate::{Error, Result};

/// Thread-safe handle to the local entity tables, the pending queue and outstanding conflicts.
#[derive(Clone)]
pub struct LocalStore {
    db: Arc<Mutex<Database>>,
    db_path: Option<PathBuf>,
    pending: Arc<watch::Sender<usize>>,
}

impl LocalStore {
    /// Open a store at the given filesystem path.
    pub async fn open_path(db_path: impl Into<PathBuf>) -> Result<Self> {
        let db_path = db_path.into();
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let db = Self::open_database(&db_path).await?;
        Self::from_database(db, Some(db_path)).await
    }

    /// Open an in-memory store (tests, or when no durable storage is available).
    pub async fn open_in_memory() -> Result<Self> {
        let db = Database::open_in_memory().await?;
        Self::from_database(db, None).await
    }

    /// Open the durable store, falling back to memory so the till keeps working.
    pub async fn open_path_or_in_memory(db_path: impl Into<PathBuf>) -> Result<Self> {
        let db_path = db_path.into();
        match Self::open_path(&db_path).await {
            Ok(store) => Ok(store),
            Err(error) => {
                tracing::warn!(
                    "Could not open local store at {}: {}. Continuing with an in-memory store; \
                     mutations will not survive a restart.",
                    db_path.display(),
                    error
                );
                Self::open_in_memory().await
            }
        }
    }

    async fn from_database(db: Database, db_path: Option<PathBuf>) -> Result<Self> {
        let count = LibSqlQueueRepository::new(db.connection()).count().await?;
        let (pending, _) = watch::channel(count);
        Ok(Self {
            db: Arc::new(Mutex::new(db)),
            db_path,
            pending: Arc::new(pending),
        })
    }

    async fn open_database(db_path: &Path) -> Result<Database> {
        match Database::open(db_path).await {
            Ok(db) => Ok(db),
            Err(error) if Self::is_corrupted_db_error(&error) => {
                tracing::warn!(
                    "Detected invalid local DB file at {}: {}. Quarantining it and retrying once.",
                    db_path.display(),
                    error
                );
                Self::quarantine_corrupted_db_files(db_path)?;
                Database::open(db_path).await
            }
            Err(error) => Err(error),
        }
    }

    fn is_corrupted_db_error(error: &Error) -> bool {
        let message = error.to_string().to_ascii_lowercase();
        message.contains("file is not a database") || message.contains("malformed")
    }

    fn quarantine_corrupted_db_files(db_path: &Path) -> Result<()> {
        let Some(base_name) = db_path.file_name().and_then(|name| name.to_str()) else {
            return Ok(());
        };

        if db_path.exists() {
            let timestamp = chrono::Utc::now().timestamp_millis();
            let backup_path = db_path.with_file_name(format!("{base_name}.corrupt-{timestamp}"));
            std::fs::rename(db_path, &backup_path)?;
            tracing::warn!(
                "Moved corrupted local DB file from {} to {}",
                db_path.display(),
                backup_path.display()
            );
        }

        for suffix in ["-wal", "-shm", "-journal"] {
            let sidecar = db_path.with_file_name(format!("{base_name}{suffix}"));
            if sidecar.exists() {
                std::fs::remove_file(&sidecar)?;
                tracing::warn!("Removed stale local DB file {}", sidecar.display());
            }
        }
        Ok(())
    }

    /// Filesystem location, `None` for in-memory stores.
    pub fn path(&self) -> Option<&Path> {
        self.db_path.as_deref()
    }

    /// Cached number of queued operations.
    pub fn pending_count(&self) -> usize {
        *self.pending.borrow()
    }

    /// Observe changes of the pending count.
    pub fn subscribe_pending(&self) -> watch::Receiver<usize> {
        self.pending.subscribe()
    }

    async fn publish_pending(&self, conn: &Connection) {
        match LibSqlQueueRepository::new(conn).count().await {
            Ok(count) => {
                self.pending.send_if_modified(|current| {
                    let changed = *current != count;
                    *current = count;
                    changed
                });
            }
            Err(error) => tracing::warn!("Failed to refresh pending count: {error}"),
        }
    }

    // ----- reads ---------------------------------------------------------------------------

    /// Fetch a live record.
    pub async fn get(&self, kind: EntityKind, local_id: LocalId) -> Result<Option<LocalRecord<Entity>>> {
        let db = self.db.lock().await;
        LibSqlEntityRepository::new(db.connection())
            .get(kind, local_id)
            .await
    }

    /// Fetch a record including tombstones awaiting remote deletion.
    pub async fn get_any(
        &self,
        kind: EntityKind,
        local_id: LocalId,
    ) -> Result<Option<LocalRecord<Entity>>> {
        let db = self.db.lock().await;
        LibSqlEntityRepository::new(db.connection())
            .get_any(kind, local_id)
            .await
    }

    pub async fn get_by_server_id(
        &self,
        kind: EntityKind,
        server_id: ServerId,
    ) -> Result<Option<LocalRecord<Entity>>> {
        let db = self.db.lock().await;
        LibSqlEntityRepository::new(db.connection())
            .get_by_server_id(kind, server_id)
            .await
    }

    pub async fn list(&self, kind: EntityKind) -> Result<Vec<LocalRecord<Entity>>> {
        let db = self.db.lock().await;
        LibSqlEntityRepository::new(db.connection()).list(kind).await
    }

    /// Remove every record of a kind, with its queued operations and conflicts.
    pub async fn clear(&self, kind: EntityKind) -> Result<()> {
        let db = self.db.lock().await;
        let conn = db.connection();
        begin(conn).await?;
        let outcome = async {
            let queue = LibSqlQueueRepository::new(conn);
            let conflicts = LibSqlConflictRepository::new(conn);
            for op in queue.list().await?.into_iter().filter(|op| op.kind == kind) {
                queue.remove(op.id).await?;
                conflicts.remove_for_record(kind, op.local_id).await?;
            }
            LibSqlEntityRepository::new(conn).clear(kind).await
        }
        .await;
        finish(conn, outcome).await?;
        self.publish_pending(conn).await;
        Ok(())
    }

    /// All queued operations in replay order.
    pub async fn operations(&self) -> Result<Vec<PendingOperation>> {
        let db = self.db.lock().await;
        LibSqlQueueRepository::new(db.connection()).list().await
    }

    pub async fn operation(&self, id: OperationId) -> Result<Option<PendingOperation>> {
        let db = self.db.lock().await;
        LibSqlQueueRepository::new(db.connection()).get(id).await
    }

    pub async fn operations_for_record(
        &self,
        kind: EntityKind,
        local_id: LocalId,
    ) -> Result<Vec<PendingOperation>> {
        let db = self.db.lock().await;
        LibSqlQueueRepository::new(db.connection())
            .list_for_record(kind, local_id)
            .await
    }

    /// Outstanding conflicts, newest first.
    pub async fn conflicts(&self) -> Result<Vec<ConflictInfo>> {
        let db = self.db.lock().await;
        LibSqlConflictRepository::new(db.connection()).list().await
    }

    pub async fn conflict_for_record(
        &self,
        kind: EntityKind,
        local_id: LocalId,
    ) -> Result<Option<ConflictInfo>> {
        let db = self.db.lock().await;
        LibSqlConflictRepository::new(db.connection())
            .get_for_record(kind, local_id)
            .await
    }

    // ----- optimistic writes ---------------------------------------------------------------

    /// Insert a new unsynced row and queue its create.
    pub async fn record_create(
        &self,
        payload: &Entity,
        now: i64,
    ) -> Result<(LocalRecord<Entity>, PendingOperation)> {
        let db = self.db.lock().await;
        let conn = db.connection();
        begin(conn).await?;
        let outcome = async {
            let record = LibSqlEntityRepository::new(conn).add(payload, now).await?;
            let op = LibSqlQueueRepository::new(conn)
                .add(NewOperation::create(&record), now)
                .await?;
            Ok::<_, Error>((record, op))
        }
        .await;
        let outcome = finish(conn, outcome).await?;
        self.publish_pending(conn).await;
        Ok(outcome)
    }

    /// Patch a live row and queue an update carrying the pre-mutation server timestamp.
    pub async fn record_update(
        &self,
        kind: EntityKind,
        local_id: LocalId,
        payload: &Entity,
        now: i64,
    ) -> Result<(LocalRecord<Entity>, PendingOperation)> {
        if payload.kind() != kind {
            return Err(Error::InvalidInput(format!(
                "cannot store a {} payload in {}",
                payload.kind(),
                kind.collection()
            )));
        }

        let db = self.db.lock().await;
        let conn = db.connection();
        begin(conn).await?;
        let outcome = async {
            let entities = LibSqlEntityRepository::new(conn);
            let mut record = entities
                .get(kind, local_id)
                .await?
                .ok_or_else(|| Error::NotFound(format!("{kind} {local_id}")))?;
            supersede_conflict(conn, kind, local_id).await?;

            let base_updated_at = record.server_updated_at;
            record.payload = payload.clone();
            record.updated_at = now;
            record.synced = false;
            entities.update(&record).await?;

            let op = LibSqlQueueRepository::new(conn)
                .add(NewOperation::update(&record, base_updated_at), now)
                .await?;
            Ok::<_, Error>((record, op))
        }
        .await;
        let outcome = finish(conn, outcome).await?;
        self.publish_pending(conn).await;
        Ok(outcome)
    }

    /// Tombstone a live row and queue its delete.
    pub async fn record_delete(
        &self,
        kind: EntityKind,
        local_id: LocalId,
        now: i64,
    ) -> Result<(LocalRecord<Entity>, PendingOperation)> {
        let db = self.db.lock().await;
        let conn = db.connection();
        begin(conn).await?;
        let outcome = async {
            let entities = LibSqlEntityRepository::new(conn);
            let mut record = entities
                .get(kind, local_id)
                .await?
                .ok_or_else(|| Error::NotFound(format!("{kind} {local_id}")))?;
            supersede_conflict(conn, kind, local_id).await?;

            entities.mark_deleted(kind, local_id, now).await?;
            record.is_deleted = true;
            record.synced = false;
            record.updated_at = now;

            let op = LibSqlQueueRepository::new(conn)
                .add(NewOperation::delete(kind, local_id, record.server_id), now)
                .await?;
            Ok::<_, Error>((record, op))
        }
        .await;
        let outcome = finish(conn, outcome).await?;
        self.publish_pending(conn).await;
        Ok(outcome)
    }

    // ----- replay bookkeeping --------------------------------------------------------------

    /// Identity mapping: record the server id of a confirmed create and dequeue it.
    pub async fn confirm_create(&self, op: &PendingOperation, remote: &RemoteRecord) -> Result<()> {
        self.confirm(op, Some(remote)).await
    }

    /// Dequeue a confirmed update and advance the record's server timestamp.
    pub async fn confirm_update(&self, op: &PendingOperation, remote: &RemoteRecord) -> Result<()> {
        self.confirm(op, Some(remote)).await
    }

    /// Dequeue a confirmed delete and purge the tombstone once nothing else refers to it.
    pub async fn confirm_delete(&self, op: &PendingOperation) -> Result<()> {
        self.confirm(op, None).await
    }

    async fn confirm(&self, op: &PendingOperation, remote: Option<&RemoteRecord>) -> Result<()> {
        let db = self.db.lock().await;
        let conn = db.connection();
        begin(conn).await?;
        let outcome = async {
            let queue = LibSqlQueueRepository::new(conn);
            let entities = LibSqlEntityRepository::new(conn);
            queue.remove(op.id).await?;
            let settled = queue.list_for_record(op.kind, op.local_id).await?.is_empty();

            let Some(remote) = remote else {
                if settled {
                    entities.delete(op.kind, op.local_id).await?;
                    LibSqlConflictRepository::new(conn)
                        .remove_for_record(op.kind, op.local_id)
                        .await?;
                }
                return Ok(());
            };

            let Some(mut record) = entities.get_any(op.kind, op.local_id).await? else {
                return Ok(());
            };
            record.server_id = Some(remote.id);
            record.server_updated_at = Some(
                record
                    .server_updated_at
                    .map_or(remote.updated_at, |known| known.max(remote.updated_at)),
            );
            if settled && !record.is_deleted {
                record.payload = remote.data.clone();
                record.synced = true;
            } else {
                record.synced = false;
            }
            entities.update(&record).await
        }
        .await;
        finish(conn, outcome).await?;
        self.publish_pending(conn).await;
        Ok(())
    }

    /// Count a failed replay attempt.
    pub async fn record_failure(&self, op_id: OperationId, error: &str) -> Result<()> {
        let db = self.db.lock().await;
        LibSqlQueueRepository::new(db.connection())
            .increment_attempts(op_id, error)
            .await
    }

    /// Keep an operation queued but skip it until an operator retries it.
    pub async fn park_operation(&self, op_id: OperationId, error: &str) -> Result<()> {
        let db = self.db.lock().await;
        LibSqlQueueRepository::new(db.connection())
            .set_parked(op_id, true, Some(error))
            .await
    }

    /// Unpark an operation and reset its attempt counter.
    pub async fn retry_operation(&self, op_id: OperationId) -> Result<()> {
        let db = self.db.lock().await;
        LibSqlQueueRepository::new(db.connection())
            .set_parked(op_id, false, None)
            .await
    }

    /// Remove an operation (operator purge); returns whether it existed.
    pub async fn discard_operation(&self, op_id: OperationId) -> Result<bool> {
        let db = self.db.lock().await;
        let conn = db.connection();
        begin(conn).await?;
        let outcome = async {
            let queue = LibSqlQueueRepository::new(conn);
            let Some(op) = queue.get(op_id).await? else {
                return Ok(false);
            };
            queue.remove(op_id).await?;

            let conflicts = LibSqlConflictRepository::new(conn);
            if let Some(conflict) = conflicts.get_for_record(op.kind, op.local_id).await? {
                if conflict.op_id == op_id {
                    conflicts.remove_for_record(op.kind, op.local_id).await?;
                }
            }
            Ok::<_, Error>(true)
        }
        .await;
        let existed = finish(conn, outcome).await?;
        self.publish_pending(conn).await;
        Ok(existed)
    }

    pub async fn save_conflict(&self, conflict: &ConflictInfo) -> Result<()> {
        let db = self.db.lock().await;
        LibSqlConflictRepository::new(db.connection())
            .upsert(conflict)
            .await
    }

    /// Apply a manual resolution to the conflict reported under a server id; returns the
    /// resulting local record, if any remains.
    ///
    /// Fails when several local records collide with that server record; settle those one at a
    /// time with [`Self::resolve_record_conflict`].
    pub async fn resolve_conflict(
        &self,
        kind: EntityKind,
        id: ServerId,
        resolution: ConflictResolution,
        now: i64,
    ) -> Result<Option<LocalRecord<Entity>>> {
        self.resolve(kind, ConflictKey::Server(id), resolution, now)
            .await
    }

    /// Apply a manual resolution to the conflict attached to one local record.
    pub async fn resolve_record_conflict(
        &self,
        kind: EntityKind,
        local_id: LocalId,
        resolution: ConflictResolution,
        now: i64,
    ) -> Result<Option<LocalRecord<Entity>>> {
        self.resolve(kind, ConflictKey::Local(local_id), resolution, now)
            .await
    }

    async fn resolve(
        &self,
        kind: EntityKind,
        key: ConflictKey,
        resolution: ConflictResolution,
        now: i64,
    ) -> Result<Option<LocalRecord<Entity>>> {
        let db = self.db.lock().await;
        let conn = db.connection();
        begin(conn).await?;
        let outcome = async {
            let conflicts = LibSqlConflictRepository::new(conn);
            let conflict = find_conflict(&conflicts, kind, key).await?;
            let resolved = match resolution {
                ConflictResolution::Local => keep_local(conn, &conflict, now).await?,
                ConflictResolution::Server => accept_server(conn, &conflict, now).await?,
            };
            conflicts.remove_for_record(kind, conflict.local_id).await?;
            Ok::<_, Error>(resolved)
        }
        .await;
        let resolved = finish(conn, outcome).await?;
        self.publish_pending(conn).await;
        Ok(resolved)
    }
}

#[derive(Debug, Clone, Copy)]
enum ConflictKey {
    Server(ServerId),
    Local(LocalId),
}

async fn find_conflict(
    conflicts: &LibSqlConflictRepository<'_>,
    kind: EntityKind,
    key: ConflictKey,
) -> Result<ConflictInfo> {
    match key {
        ConflictKey::Local(local_id) => conflicts
            .get_for_record(kind, local_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("conflict for local {kind} #{local_id}"))),
        ConflictKey::Server(id) => {
            let mut matching = conflicts.list_for_server(kind, id).await?;
            match matching.len() {
                0 => Err(Error::NotFound(format!("conflict for {kind} {id}"))),
                1 => Ok(matching.remove(0)),
                _ => {
                    let local_ids = matching
                        .iter()
                        .map(|conflict| format!("#{}", conflict.local_id))
                        .collect::<Vec<_>>()
                        .join(", ");
                    Err(Error::InvalidInput(format!(
                        "{kind} {id} conflicts with local records {local_ids}; resolve them by local id"
                    )))
                }
            }
        }
    }
}

async fn begin(conn: &Connection) -> Result<()> {
    conn.execute("BEGIN IMMEDIATE", ()).await?;
    Ok(())
}

async fn finish<T>(conn: &Connection, outcome: Result<T>) -> Result<T> {
    match outcome {
        Ok(value) => {
            conn.execute("COMMIT", ()).await?;
            Ok(value)
        }
        Err(error) => {
            conn.execute("ROLLBACK", ()).await.ok();
            Err(error)
        }
    }
}

/// A newer local edit replaces the conflicted operation; a conflicted create stays queued.
async fn supersede_conflict(conn: &Connection, kind: EntityKind, local_id: LocalId) -> Result<()> {
    let conflicts = LibSqlConflictRepository::new(conn);
    let Some(conflict) = conflicts.get_for_record(kind, local_id).await? else {
        return Ok(());
    };

    let queue = LibSqlQueueRepository::new(conn);
    if let Some(op) = queue.get(conflict.op_id).await? {
        if op.action != OperationAction::Create {
            queue.remove(op.id).await?;
        }
    }
    conflicts.remove_for_record(kind, local_id).await?;
    tracing::info!(
        kind = %kind,
        local_id = local_id.get(),
        server_id = conflict.id.get(),
        "Local edit superseded an outstanding conflict"
    );
    Ok(())
}

async fn ensure_server_id_free(
    entities: &LibSqlEntityRepository<'_>,
    kind: EntityKind,
    id: ServerId,
    local_id: LocalId,
) -> Result<()> {
    match entities.get_by_server_id(kind, id).await? {
        Some(other) if other.local_id != local_id => Err(Error::InvalidInput(format!(
            "{kind} {id} is already linked to local record {}",
            other.local_id
        ))),
        _ => Ok(()),
    }
}

/// Keep the local payload and queue it so the next pass overwrites the server.
async fn keep_local(
    conn: &Connection,
    conflict: &ConflictInfo,
    now: i64,
) -> Result<Option<LocalRecord<Entity>>> {
    let queue = LibSqlQueueRepository::new(conn);
    let entities = LibSqlEntityRepository::new(conn);
    queue.remove(conflict.op_id).await?;

    let Some(mut record) = entities.get_any(conflict.kind, conflict.local_id).await? else {
        return Ok(None);
    };
    record.updated_at = now;
    record.synced = false;

    let op = if conflict.server_data.is_some() {
        ensure_server_id_free(&entities, conflict.kind, conflict.id, record.local_id).await?;
        record.server_id = Some(conflict.id);
        record.server_updated_at = conflict.server_updated_at;
        NewOperation::update(&record, conflict.server_updated_at)
    } else {
        // Gone on the server: recreate it.
        record.server_id = None;
        record.server_updated_at = None;
        NewOperation::create(&record)
    };
    entities.update(&record).await?;
    queue.add(op, now).await?;
    Ok(Some(record))
}

/// Drop local intent for the record and adopt the server's state.
async fn accept_server(
    conn: &Connection,
    conflict: &ConflictInfo,
    now: i64,
) -> Result<Option<LocalRecord<Entity>>> {
    let queue = LibSqlQueueRepository::new(conn);
    let entities = LibSqlEntityRepository::new(conn);
    for op in queue
        .list_for_record(conflict.kind, conflict.local_id)
        .await?
    {
        queue.remove(op.id).await?;
    }

    let Some(mut record) = entities.get_any(conflict.kind, conflict.local_id).await? else {
        return Ok(None);
    };
    let Some(server_data) = conflict.server_data.clone() else {
        entities.delete(conflict.kind, record.local_id).await?;
        return Ok(None);
    };

    if let Some(owner) = entities.get_by_server_id(conflict.kind, conflict.id).await? {
        if owner.local_id != record.local_id {
            // Another local record already stands for this server record.
            entities.delete(conflict.kind, record.local_id).await?;
            tracing::info!(
                kind = %conflict.kind,
                local_id = record.local_id.get(),
                kept_local_id = owner.local_id.get(),
                "Dropped duplicate local record in favour of the server copy"
            );
            return Ok(Some(owner));
        }
    }
    record.server_id = Some(conflict.id);
    record.payload = server_data;
    record.server_updated_at = conflict.server_updated_at;
    record.updated_at = now;
    record.synced = true;
    record.is_deleted = false;
    entities.update(&record).await?;
    Ok(Some(record))
}
