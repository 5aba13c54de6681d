//! Database migrations

use crate::error::Result;
use crate::models::EntityKind;
use libsql::Connection;

/// Current schema version
const CURRENT_VERSION: i32 = 3;

/// Run all pending migrations
pub async fn run(conn: &Connection) -> Result<()> {
    let version = get_version(conn).await?;

    if version < 1 {
        migrate_v1(conn).await?;
    }
    if version < 2 {
        migrate_v2(conn).await?;
    }
    if version < 3 {
        migrate_v3(conn).await?;
    }

    Ok(())
}

/// Get the current schema version
async fn get_version(conn: &Connection) -> Result<i32> {
    // Check if schema_version table exists
    let mut rows = conn
        .query(
            "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type='table' AND name='schema_version')",
            (),
        )
        .await?;

    let exists: bool = if let Some(row) = rows.next().await? {
        row.get::<i32>(0)? != 0
    } else {
        false
    };

    if !exists {
        return Ok(0);
    }

    let mut rows = conn
        .query("SELECT COALESCE(MAX(version), 0) FROM schema_version", ())
        .await?;

    let version: i32 = if let Some(row) = rows.next().await? {
        row.get(0)?
    } else {
        0
    };

    Ok(version)
}

/// Run a batch of statements inside one transaction.
///
/// libsql doesn't have execute_batch, so each statement runs separately.
async fn apply(conn: &Connection, version: i32, statements: &[String]) -> Result<()> {
    conn.execute("BEGIN TRANSACTION", ()).await?;

    for stmt in statements {
        if let Err(e) = conn.execute(stmt.as_str(), ()).await {
            conn.execute("ROLLBACK", ()).await.ok();
            return Err(e.into());
        }
    }

    if let Err(e) = conn
        .execute("INSERT INTO schema_version (version) VALUES (?)", [i64::from(version)])
        .await
    {
        conn.execute("ROLLBACK", ()).await.ok();
        return Err(e.into());
    }

    if let Err(e) = conn.execute("COMMIT", ()).await {
        conn.execute("ROLLBACK", ()).await.ok();
        return Err(e.into());
    }

    tracing::info!("Migrated database to version {version} (latest {CURRENT_VERSION})");
    Ok(())
}

/// Migration to version 1: entity tables and the pending operation queue
async fn migrate_v1(conn: &Connection) -> Result<()> {
    let mut statements = vec![
        // Schema version tracking
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY
        )"
        .to_string(),
    ];

    // One table per entity kind. AUTOINCREMENT keeps local ids from ever being reused,
    // and the UNIQUE server_id doubles as the serverId -> localId index.
    for kind in EntityKind::ALL {
        let table = kind.collection();
        statements.push(format!(
            "CREATE TABLE IF NOT EXISTS {table} (
                local_id INTEGER PRIMARY KEY AUTOINCREMENT,
                server_id INTEGER UNIQUE,
                payload TEXT NOT NULL,
                updated_at INTEGER NOT NULL,
                server_updated_at INTEGER,
                synced INTEGER NOT NULL DEFAULT 0,
                is_deleted INTEGER NOT NULL DEFAULT 0
            )"
        ));
        statements.push(format!(
            "CREATE INDEX IF NOT EXISTS idx_{table}_deleted ON {table}(is_deleted)"
        ));
    }

    statements.extend([
        "CREATE TABLE IF NOT EXISTS pending_operations (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            kind TEXT NOT NULL,
            action TEXT NOT NULL,
            local_id INTEGER NOT NULL,
            server_id INTEGER,
            data TEXT,
            base_updated_at INTEGER,
            attempts INTEGER NOT NULL DEFAULT 0,
            created_at INTEGER NOT NULL,
            op_key TEXT NOT NULL UNIQUE,
            last_error TEXT,
            parked INTEGER NOT NULL DEFAULT 0
        )"
        .to_string(),
        "CREATE INDEX IF NOT EXISTS idx_pending_operations_record ON pending_operations(kind, local_id)"
            .to_string(),
        "CREATE INDEX IF NOT EXISTS idx_pending_operations_order ON pending_operations(created_at, id)"
            .to_string(),
    ]);

    apply(conn, 1, &statements).await
}

/// Migration to version 2: outstanding sync conflicts
async fn migrate_v2(conn: &Connection) -> Result<()> {
    let statements = [
        "CREATE TABLE IF NOT EXISTS sync_conflicts (
            kind TEXT NOT NULL,
            server_id INTEGER NOT NULL,
            local_id INTEGER NOT NULL,
            op_id INTEGER NOT NULL,
            local_data TEXT NOT NULL,
            server_data TEXT,
            server_updated_at INTEGER,
            detected_at INTEGER NOT NULL,
            PRIMARY KEY (kind, server_id)
        )"
        .to_string(),
        "CREATE INDEX IF NOT EXISTS idx_sync_conflicts_record ON sync_conflicts(kind, local_id)"
            .to_string(),
        "CREATE INDEX IF NOT EXISTS idx_sync_conflicts_detected_at ON sync_conflicts(detected_at DESC)"
            .to_string(),
    ];

    apply(conn, 2, &statements).await
}

/// Migration to version 3: key conflicts by local record.
///
/// Several local records can collide with the same server record (e.g. two offline customers
/// sharing a phone number), so `server_id` becomes a plain indexed column.
async fn migrate_v3(conn: &Connection) -> Result<()> {
    let statements = [
        "CREATE TABLE sync_conflicts_v3 (
            kind TEXT NOT NULL,
            server_id INTEGER NOT NULL,
            local_id INTEGER NOT NULL,
            op_id INTEGER NOT NULL,
            local_data TEXT NOT NULL,
            server_data TEXT,
            server_updated_at INTEGER,
            detected_at INTEGER NOT NULL,
            PRIMARY KEY (kind, local_id)
        )"
        .to_string(),
        "INSERT OR REPLACE INTO sync_conflicts_v3
            SELECT kind, server_id, local_id, op_id, local_data, server_data, server_updated_at, detected_at
            FROM sync_conflicts ORDER BY detected_at"
            .to_string(),
        "DROP TABLE sync_conflicts".to_string(),
        "ALTER TABLE sync_conflicts_v3 RENAME TO sync_conflicts".to_string(),
        "CREATE INDEX IF NOT EXISTS idx_sync_conflicts_server ON sync_conflicts(kind, server_id)"
            .to_string(),
        "CREATE INDEX IF NOT EXISTS idx_sync_conflicts_detected_at ON sync_conflicts(detected_at DESC)"
            .to_string(),
    ];

    apply(conn, 3, &statements).await
}
