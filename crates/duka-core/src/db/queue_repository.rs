//! Pending operation queue repository

use crate::error::{Error, Result};
use crate::models::{
    Entity, EntityKind, LocalId, NewOperation, OperationId, PendingOperation, ServerId,
};
use libsql::{params, Connection, Row};
use uuid::Uuid;

const COLUMNS: &str = "id, kind, action, local_id, server_id, data, base_updated_at, attempts, \
                       created_at, op_key, last_error, parked";

/// Trait for durable queue operations (async)
#[allow(async_fn_in_trait)]
pub trait QueueRepository {
    /// Append an operation; enqueue time is taken from `created_at`
    async fn add(&self, op: NewOperation, created_at: i64) -> Result<PendingOperation>;

    /// Get one operation by id
    async fn get(&self, id: OperationId) -> Result<Option<PendingOperation>>;

    /// All operations, oldest first
    async fn list(&self) -> Result<Vec<PendingOperation>>;

    /// Operations for one record, oldest first
    async fn list_for_record(
        &self,
        kind: EntityKind,
        local_id: LocalId,
    ) -> Result<Vec<PendingOperation>>;

    /// Remove a confirmed or discarded operation
    async fn remove(&self, id: OperationId) -> Result<()>;

    /// Count a failed replay and remember why
    async fn increment_attempts(&self, id: OperationId, error: &str) -> Result<()>;

    /// Park or unpark an operation
    async fn set_parked(&self, id: OperationId, parked: bool, error: Option<&str>) -> Result<()>;

    /// Number of queued operations
    async fn count(&self) -> Result<usize>;
}

/// libSQL implementation of `QueueRepository`
pub struct LibSqlQueueRepository<'a> {
    conn: &'a Connection,
}

impl<'a> LibSqlQueueRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Parse an operation from a database row
    fn parse_operation(row: &Row) -> Result<PendingOperation> {
        let kind: EntityKind = row.get::<String>(1)?.parse()?;
        let data = row
            .get::<Option<String>>(5)?
            .map(|raw| -> Result<Entity> { Entity::from_wire(kind, serde_json::from_str(&raw)?) })
            .transpose()?;

        Ok(PendingOperation {
            id: OperationId::new(row.get(0)?),
            kind,
            action: row.get::<String>(2)?.parse()?,
            local_id: LocalId::new(row.get(3)?),
            server_id: row.get::<Option<i64>>(4)?.and_then(ServerId::from_raw),
            data,
            base_updated_at: row.get::<Option<i64>>(6)?,
            attempts: u32::try_from(row.get::<i64>(7)?).unwrap_or(u32::MAX),
            created_at: row.get(8)?,
            op_key: row.get(9)?,
            last_error: row.get::<Option<String>>(10)?,
            parked: row.get::<i64>(11)? != 0,
        })
    }

    async fn collect(&self, mut rows: libsql::Rows) -> Result<Vec<PendingOperation>> {
        let mut operations = Vec::new();
        while let Some(row) = rows.next().await? {
            operations.push(Self::parse_operation(&row)?);
        }
        Ok(operations)
    }
}

impl QueueRepository for LibSqlQueueRepository<'_> {
    async fn add(&self, op: NewOperation, created_at: i64) -> Result<PendingOperation> {
        let op_key = Uuid::now_v7().to_string();
        let data = op
            .data
            .as_ref()
            .map(|entity| -> Result<String> { Ok(serde_json::to_string(&entity.to_wire()?)?) })
            .transpose()?;

        self.conn
            .execute(
                "INSERT INTO pending_operations
                    (kind, action, local_id, server_id, data, base_updated_at, attempts, created_at, op_key, last_error, parked)
                 VALUES (?, ?, ?, ?, ?, ?, 0, ?, ?, NULL, 0)",
                params![
                    op.kind.as_str(),
                    op.action.as_str(),
                    op.local_id.get(),
                    op.server_id.map(ServerId::get),
                    data,
                    op.base_updated_at,
                    created_at,
                    op_key.clone()
                ],
            )
            .await?;

        Ok(PendingOperation {
            id: OperationId::new(self.conn.last_insert_rowid()),
            kind: op.kind,
            action: op.action,
            local_id: op.local_id,
            server_id: op.server_id,
            data: op.data,
            base_updated_at: op.base_updated_at,
            attempts: 0,
            created_at,
            op_key,
            last_error: None,
            parked: false,
        })
    }

    async fn get(&self, id: OperationId) -> Result<Option<PendingOperation>> {
        let sql = format!("SELECT {COLUMNS} FROM pending_operations WHERE id = ?");
        let mut rows = self.conn.query(&sql, [id.get()]).await?;
        match rows.next().await? {
            Some(row) => Ok(Some(Self::parse_operation(&row)?)),
            None => Ok(None),
        }
    }

    async fn list(&self) -> Result<Vec<PendingOperation>> {
        let sql = format!("SELECT {COLUMNS} FROM pending_operations ORDER BY created_at ASC, id ASC");
        let rows = self.conn.query(&sql, ()).await?;
        self.collect(rows).await
    }

    async fn list_for_record(
        &self,
        kind: EntityKind,
        local_id: LocalId,
    ) -> Result<Vec<PendingOperation>> {
        let sql = format!(
            "SELECT {COLUMNS} FROM pending_operations
             WHERE kind = ? AND local_id = ?
             ORDER BY created_at ASC, id ASC"
        );
        let rows = self
            .conn
            .query(&sql, params![kind.as_str(), local_id.get()])
            .await?;
        self.collect(rows).await
    }

    async fn remove(&self, id: OperationId) -> Result<()> {
        self.conn
            .execute("DELETE FROM pending_operations WHERE id = ?", [id.get()])
            .await?;
        Ok(())
    }

    async fn increment_attempts(&self, id: OperationId, error: &str) -> Result<()> {
        let rows = self
            .conn
            .execute(
                "UPDATE pending_operations SET attempts = attempts + 1, last_error = ? WHERE id = ?",
                params![error, id.get()],
            )
            .await?;

        if rows == 0 {
            return Err(Error::NotFound(format!("operation {id}")));
        }
        Ok(())
    }

    async fn set_parked(&self, id: OperationId, parked: bool, error: Option<&str>) -> Result<()> {
        let rows = if parked {
            self.conn
                .execute(
                    "UPDATE pending_operations SET parked = 1, attempts = attempts + 1, last_error = ?
                     WHERE id = ?",
                    params![error, id.get()],
                )
                .await?
        } else {
            self.conn
                .execute(
                    "UPDATE pending_operations SET parked = 0, attempts = 0, last_error = NULL
                     WHERE id = ?",
                    [id.get()],
                )
                .await?
        };

        if rows == 0 {
            return Err(Error::NotFound(format!("operation {id}")));
        }
        Ok(())
    }

    async fn count(&self) -> Result<usize> {
        let mut rows = self
            .conn
            .query("SELECT COUNT(*) FROM pending_operations", ())
            .await?;
        let count = match rows.next().await? {
            Some(row) => row.get::<i64>(0)?,
            None => 0,
        };
        Ok(usize::try_from(count).unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{Database, EntityRepository, LibSqlEntityRepository};
    use crate::models::{OperationAction, Product};
    use pretty_assertions::assert_eq;

    async fn setup() -> Database {
        Database::open_in_memory().await.unwrap()
    }

    async fn seed_record(db: &Database) -> crate::models::LocalRecord<Entity> {
        LibSqlEntityRepository::new(db.connection())
            .add(&Entity::Product(Product::new("Milk", 60.0, 20)), 1)
            .await
            .unwrap()
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_fifo_by_created_at_then_insertion() {
        let db = setup().await;
        let record = seed_record(&db).await;
        let repo = LibSqlQueueRepository::new(db.connection());

        let late = repo.add(NewOperation::create(&record), 20).await.unwrap();
        let early = repo
            .add(NewOperation::update(&record, None), 10)
            .await
            .unwrap();
        let same_time = repo
            .add(
                NewOperation::delete(EntityKind::Product, record.local_id, None),
                20,
            )
            .await
            .unwrap();

        let ids: Vec<_> = repo.list().await.unwrap().into_iter().map(|op| op.id).collect();
        assert_eq!(ids, vec![early.id, late.id, same_time.id]);
        assert_eq!(repo.count().await.unwrap(), 3);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_roundtrip_preserves_payload_and_keys() {
        let db = setup().await;
        let record = seed_record(&db).await;
        let repo = LibSqlQueueRepository::new(db.connection());

        let added = repo
            .add(NewOperation::update(&record, Some(42)), 7)
            .await
            .unwrap();
        let fetched = repo.get(added.id).await.unwrap().unwrap();
        assert_eq!(fetched, added);
        assert_eq!(fetched.action, OperationAction::Update);
        assert_eq!(fetched.base_updated_at, Some(42));
        assert!(!fetched.op_key.is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_increment_attempts_and_remove() {
        let db = setup().await;
        let record = seed_record(&db).await;
        let repo = LibSqlQueueRepository::new(db.connection());

        let op = repo.add(NewOperation::create(&record), 1).await.unwrap();
        repo.increment_attempts(op.id, "timeout").await.unwrap();
        repo.increment_attempts(op.id, "HTTP 503").await.unwrap();

        let fetched = repo.get(op.id).await.unwrap().unwrap();
        assert_eq!(fetched.attempts, 2);
        assert_eq!(fetched.last_error.as_deref(), Some("HTTP 503"));

        repo.remove(op.id).await.unwrap();
        assert!(repo.get(op.id).await.unwrap().is_none());
        assert_eq!(repo.count().await.unwrap(), 0);
        assert!(matches!(
            repo.increment_attempts(op.id, "gone").await,
            Err(Error::NotFound(_))
        ));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_park_and_unpark() {
        let db = setup().await;
        let record = seed_record(&db).await;
        let repo = LibSqlQueueRepository::new(db.connection());

        let op = repo.add(NewOperation::create(&record), 1).await.unwrap();
        repo.set_parked(op.id, true, Some("HTTP 401")).await.unwrap();
        let parked = repo.get(op.id).await.unwrap().unwrap();
        assert!(parked.parked);
        assert_eq!(parked.attempts, 1);

        repo.set_parked(op.id, false, None).await.unwrap();
        let unparked = repo.get(op.id).await.unwrap().unwrap();
        assert!(!unparked.parked);
        assert_eq!(unparked.attempts, 0);
        assert_eq!(unparked.last_error, None);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_list_for_record_filters_by_kind_and_local_id() {
        let db = setup().await;
        let record = seed_record(&db).await;
        let repo = LibSqlQueueRepository::new(db.connection());

        repo.add(NewOperation::create(&record), 1).await.unwrap();
        repo.add(
            NewOperation::delete(EntityKind::Customer, record.local_id, None),
            2,
        )
        .await
        .unwrap();

        let ops = repo
            .list_for_record(EntityKind::Product, record.local_id)
            .await
            .unwrap();
        assert_eq!(ops.len(), 1);
        assert_eq!(ops[0].action, OperationAction::Create);
    }
}
