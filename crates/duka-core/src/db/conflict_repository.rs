//! Persisted sync conflicts

use crate::error::Result;
use crate::models::{ConflictInfo, Entity, EntityKind, LocalId, OperationId, ServerId};
use libsql::params::IntoParams;
use libsql::{params, Connection, Row};

const COLUMNS: &str =
    "kind, server_id, local_id, op_id, local_data, server_data, server_updated_at, detected_at";

/// Trait for conflict storage operations (async)
#[allow(async_fn_in_trait)]
pub trait ConflictRepository {
    /// Insert or replace the conflict for `(kind, local_id)`
    async fn upsert(&self, conflict: &ConflictInfo) -> Result<()>;

    /// All outstanding conflicts, newest first
    async fn list(&self) -> Result<Vec<ConflictInfo>>;

    /// Conflicts reported against a server record; several local records may collide with one
    async fn list_for_server(&self, kind: EntityKind, id: ServerId) -> Result<Vec<ConflictInfo>>;

    /// Look up the conflict attached to a local record
    async fn get_for_record(
        &self,
        kind: EntityKind,
        local_id: LocalId,
    ) -> Result<Option<ConflictInfo>>;

    /// Drop the conflict attached to a local record; returns whether one existed
    async fn remove_for_record(&self, kind: EntityKind, local_id: LocalId) -> Result<bool>;
}

/// libSQL implementation of `ConflictRepository`
pub struct LibSqlConflictRepository<'a> {
    conn: &'a Connection,
}

impl<'a> LibSqlConflictRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    fn parse_conflict(row: &Row) -> Result<ConflictInfo> {
        let kind: EntityKind = row.get::<String>(0)?.parse()?;
        let local_data: String = row.get(4)?;
        let server_data = row
            .get::<Option<String>>(5)?
            .map(|raw| -> Result<Entity> { Entity::from_wire(kind, serde_json::from_str(&raw)?) })
            .transpose()?;

        Ok(ConflictInfo {
            kind,
            id: ServerId::new(row.get(1)?),
            local_id: LocalId::new(row.get(2)?),
            op_id: OperationId::new(row.get(3)?),
            local_data: Entity::from_wire(kind, serde_json::from_str(&local_data)?)?,
            server_data,
            server_updated_at: row.get::<Option<i64>>(6)?,
            detected_at: row.get(7)?,
        })
    }

    async fn query(&self, sql: &str, args: impl IntoParams) -> Result<Vec<ConflictInfo>> {
        let mut rows = self.conn.query(sql, args).await?;

        let mut conflicts = Vec::new();
        while let Some(row) = rows.next().await? {
            conflicts.push(Self::parse_conflict(&row)?);
        }
        Ok(conflicts)
    }
}

impl ConflictRepository for LibSqlConflictRepository<'_> {
    async fn upsert(&self, conflict: &ConflictInfo) -> Result<()> {
        let local_data = serde_json::to_string(&conflict.local_data.to_wire()?)?;
        let server_data = conflict
            .server_data
            .as_ref()
            .map(|entity| -> Result<String> { Ok(serde_json::to_string(&entity.to_wire()?)?) })
            .transpose()?;

        self.conn
            .execute(
                "INSERT OR REPLACE INTO sync_conflicts
                    (kind, server_id, local_id, op_id, local_data, server_data, server_updated_at, detected_at)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
                params![
                    conflict.kind.as_str(),
                    conflict.id.get(),
                    conflict.local_id.get(),
                    conflict.op_id.get(),
                    local_data,
                    server_data,
                    conflict.server_updated_at,
                    conflict.detected_at
                ],
            )
            .await?;
        Ok(())
    }

    async fn list(&self) -> Result<Vec<ConflictInfo>> {
        let sql = format!(
            "SELECT {COLUMNS} FROM sync_conflicts ORDER BY detected_at DESC, kind, server_id, local_id"
        );
        self.query(&sql, ()).await
    }

    async fn list_for_server(&self, kind: EntityKind, id: ServerId) -> Result<Vec<ConflictInfo>> {
        let sql = format!(
            "SELECT {COLUMNS} FROM sync_conflicts WHERE kind = ? AND server_id = ? ORDER BY local_id"
        );
        self.query(&sql, params![kind.as_str(), id.get()]).await
    }

    async fn get_for_record(
        &self,
        kind: EntityKind,
        local_id: LocalId,
    ) -> Result<Option<ConflictInfo>> {
        let sql = format!("SELECT {COLUMNS} FROM sync_conflicts WHERE kind = ? AND local_id = ?");
        Ok(self
            .query(&sql, params![kind.as_str(), local_id.get()])
            .await?
            .into_iter()
            .next())
    }

    async fn remove_for_record(&self, kind: EntityKind, local_id: LocalId) -> Result<bool> {
        let rows = self
            .conn
            .execute(
                "DELETE FROM sync_conflicts WHERE kind = ? AND local_id = ?",
                params![kind.as_str(), local_id.get()],
            )
            .await?;
        Ok(rows > 0)
    }
}
