//! Local entity store: one durable table per entity kind

use crate::error::{Error, Result};
use crate::models::{Entity, EntityKind, LocalId, LocalRecord, ServerId};
use libsql::{params, Connection, Row};

const COLUMNS: &str =
    "local_id, server_id, payload, updated_at, server_updated_at, synced, is_deleted";

/// Trait for local entity storage operations (async)
#[allow(async_fn_in_trait)]
pub trait EntityRepository {
    /// Get a live record by local id
    async fn get(&self, kind: EntityKind, local_id: LocalId) -> Result<Option<LocalRecord<Entity>>>;

    /// Get a record by local id, including records deleted locally but not yet remotely
    async fn get_any(
        &self,
        kind: EntityKind,
        local_id: LocalId,
    ) -> Result<Option<LocalRecord<Entity>>>;

    /// Resolve a live record through its server id
    async fn get_by_server_id(
        &self,
        kind: EntityKind,
        server_id: ServerId,
    ) -> Result<Option<LocalRecord<Entity>>>;

    /// List live records in local id order
    async fn list(&self, kind: EntityKind) -> Result<Vec<LocalRecord<Entity>>>;

    /// Insert a new unsynced record, assigning a fresh local id
    async fn add(&self, payload: &Entity, updated_at: i64) -> Result<LocalRecord<Entity>>;

    /// Overwrite every column of an existing record
    async fn update(&self, record: &LocalRecord<Entity>) -> Result<()>;

    /// Hide a record pending remote deletion
    async fn mark_deleted(&self, kind: EntityKind, local_id: LocalId, updated_at: i64)
        -> Result<()>;

    /// Remove a record row permanently
    async fn delete(&self, kind: EntityKind, local_id: LocalId) -> Result<()>;

    /// Remove every record of a kind
    async fn clear(&self, kind: EntityKind) -> Result<()>;
}

/// libSQL implementation of `EntityRepository`
pub struct LibSqlEntityRepository<'a> {
    conn: &'a Connection,
}

impl<'a> LibSqlEntityRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Parse a record from a database row
    fn parse_record(kind: EntityKind, row: &Row) -> Result<LocalRecord<Entity>> {
        let payload: String = row.get(2)?;
        let payload = Entity::from_wire(kind, serde_json::from_str(&payload)?)?;
        Ok(LocalRecord {
            local_id: LocalId::new(row.get(0)?),
            server_id: row.get::<Option<i64>>(1)?.and_then(ServerId::from_raw),
            payload,
            updated_at: row.get(3)?,
            server_updated_at: row.get::<Option<i64>>(4)?,
            synced: row.get::<i64>(5)? != 0,
            is_deleted: row.get::<i64>(6)? != 0,
        })
    }

    async fn query_one(
        &self,
        kind: EntityKind,
        sql: &str,
        param: i64,
    ) -> Result<Option<LocalRecord<Entity>>> {
        let mut rows = self.conn.query(sql, [param]).await?;
        match rows.next().await? {
            Some(row) => Ok(Some(Self::parse_record(kind, &row)?)),
            None => Ok(None),
        }
    }
}

impl EntityRepository for LibSqlEntityRepository<'_> {
    async fn get(&self, kind: EntityKind, local_id: LocalId) -> Result<Option<LocalRecord<Entity>>> {
        let sql = format!(
            "SELECT {COLUMNS} FROM {} WHERE local_id = ? AND is_deleted = 0",
            kind.collection()
        );
        self.query_one(kind, &sql, local_id.get()).await
    }

    async fn get_any(
        &self,
        kind: EntityKind,
        local_id: LocalId,
    ) -> Result<Option<LocalRecord<Entity>>> {
        let sql = format!(
            "SELECT {COLUMNS} FROM {} WHERE local_id = ?",
            kind.collection()
        );
        self.query_one(kind, &sql, local_id.get()).await
    }

    async fn get_by_server_id(
        &self,
        kind: EntityKind,
        server_id: ServerId,
    ) -> Result<Option<LocalRecord<Entity>>> {
        let sql = format!(
            "SELECT {COLUMNS} FROM {} WHERE server_id = ? AND is_deleted = 0",
            kind.collection()
        );
        self.query_one(kind, &sql, server_id.get()).await
    }

    async fn list(&self, kind: EntityKind) -> Result<Vec<LocalRecord<Entity>>> {
        let sql = format!(
            "SELECT {COLUMNS} FROM {} WHERE is_deleted = 0 ORDER BY local_id ASC",
            kind.collection()
        );
        let mut rows = self.conn.query(&sql, ()).await?;

        let mut records = Vec::new();
        while let Some(row) = rows.next().await? {
            records.push(Self::parse_record(kind, &row)?);
        }
        Ok(records)
    }

    async fn add(&self, payload: &Entity, updated_at: i64) -> Result<LocalRecord<Entity>> {
        let kind = payload.kind();
        let sql = format!(
            "INSERT INTO {} (server_id, payload, updated_at, server_updated_at, synced, is_deleted)
             VALUES (NULL, ?, ?, NULL, 0, 0)",
            kind.collection()
        );
        let raw = serde_json::to_string(&payload.to_wire()?)?;
        self.conn.execute(&sql, params![raw, updated_at]).await?;

        Ok(LocalRecord {
            local_id: LocalId::new(self.conn.last_insert_rowid()),
            server_id: None,
            payload: payload.clone(),
            updated_at,
            server_updated_at: None,
            synced: false,
            is_deleted: false,
        })
    }

    async fn update(&self, record: &LocalRecord<Entity>) -> Result<()> {
        if !record.is_consistent() {
            return Err(Error::InvalidInput(format!(
                "{} {} cannot be synced without a server id",
                record.kind(),
                record.local_id
            )));
        }

        let sql = format!(
            "UPDATE {} SET server_id = ?, payload = ?, updated_at = ?, server_updated_at = ?,
                 synced = ?, is_deleted = ?
             WHERE local_id = ?",
            record.kind().collection()
        );
        let raw = serde_json::to_string(&record.payload.to_wire()?)?;
        let rows = self
            .conn
            .execute(
                &sql,
                params![
                    record.server_id.map(ServerId::get),
                    raw,
                    record.updated_at,
                    record.server_updated_at,
                    i64::from(record.synced),
                    i64::from(record.is_deleted),
                    record.local_id.get()
                ],
            )
            .await?;

        if rows == 0 {
            return Err(Error::NotFound(format!(
                "{} {}",
                record.kind(),
                record.local_id
            )));
        }
        Ok(())
    }

    async fn mark_deleted(
        &self,
        kind: EntityKind,
        local_id: LocalId,
        updated_at: i64,
    ) -> Result<()> {
        let sql = format!(
            "UPDATE {} SET is_deleted = 1, synced = 0, updated_at = ?
             WHERE local_id = ? AND is_deleted = 0",
            kind.collection()
        );
        let rows = self
            .conn
            .execute(&sql, params![updated_at, local_id.get()])
            .await?;

        if rows == 0 {
            return Err(Error::NotFound(format!("{kind} {local_id}")));
        }
        Ok(())
    }

    async fn delete(&self, kind: EntityKind, local_id: LocalId) -> Result<()> {
        let sql = format!("DELETE FROM {} WHERE local_id = ?", kind.collection());
        self.conn.execute(&sql, [local_id.get()]).await?;
        Ok(())
    }

    async fn clear(&self, kind: EntityKind) -> Result<()> {
        let sql = format!("DELETE FROM {}", kind.collection());
        self.conn.execute(&sql, ()).await?;
        Ok(())
    }
}
