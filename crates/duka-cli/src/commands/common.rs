use std::env;
use std::io::{self, IsTerminal, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use duka_core::{
    ClientConfig, ConflictInfo, DukaClient, Entity, EntityKind, HttpRemote, LocalRecord,
    LocalStore, Mutation, NetworkMonitor, PendingOperation, RemoteApi, SyncResult, SyncStatus,
};
use serde::Serialize;

use crate::auth::TokenStore;
use crate::config_profiles::{normalize_text_option, CliProfilesConfig};
use crate::error::CliError;

/// Flags shared by every subcommand.
#[derive(Debug, Clone, Default)]
pub struct GlobalArgs {
    pub db_path: Option<PathBuf>,
    pub profile: Option<String>,
    pub api_url: Option<String>,
    pub offline: bool,
}

impl GlobalArgs {
    pub fn db_path(&self) -> Result<PathBuf, CliError> {
        resolve_db_path(self.db_path.clone())
    }
}

#[derive(Debug, Serialize)]
pub struct RecordListItem {
    pub local_id: i64,
    pub server_id: Option<i64>,
    pub synced: bool,
    pub summary: String,
    pub updated_at: i64,
    pub relative_time: String,
    pub payload: serde_json::Value,
}

pub fn record_to_list_item(record: &LocalRecord<Entity>) -> Result<RecordListItem, CliError> {
    Ok(RecordListItem {
        local_id: record.local_id.get(),
        server_id: record.server_id.map(|id| id.get()),
        synced: record.synced,
        summary: entity_summary(&record.payload),
        updated_at: record.updated_at,
        relative_time: format_relative_time(record.updated_at, Utc::now().timestamp_millis()),
        payload: record.payload.to_wire()?,
    })
}

pub fn format_record_lines(records: &[LocalRecord<Entity>]) -> Vec<String> {
    let now_ms = Utc::now().timestamp_millis();
    records
        .iter()
        .map(|record| {
            let server = record
                .server_id
                .map_or_else(|| "-".to_string(), |id| id.to_string());
            let marker = if record.synced { " " } else { "*" };
            let summary = entity_summary(&record.payload);
            let relative_time = format_relative_time(record.updated_at, now_ms);
            format!(
                "{marker}{:<6} {server:<8} {summary:<48}  {relative_time}",
                record.local_id.get()
            )
        })
        .collect()
}

/// One-line human description of a payload.
pub fn entity_summary(entity: &Entity) -> String {
    match entity {
        Entity::Product(product) => format!(
            "{}  {:.2}  stock {}",
            product.name, product.price, product.stock
        ),
        Entity::Customer(customer) => format!("{}  {}", customer.name, customer.phone),
        Entity::Order(order) => format!(
            "{} item(s)  {:.2}  {}",
            order.items.len(),
            order.total,
            order.status
        ),
        Entity::Sale(sale) => format!(
            "{} item(s)  {:.2}  {}",
            sale.items.len(),
            sale.total,
            sale.payment_method
        ),
    }
}

pub fn format_conflict_lines(conflicts: &[ConflictInfo]) -> Vec<String> {
    conflicts
        .iter()
        .map(|conflict| {
            let server = conflict
                .server_data
                .as_ref()
                .map_or_else(|| "(deleted on server)".to_string(), entity_summary);
            format!(
                "{}  {} {}  local #{}  op {}\n    local:  {}\n    server: {}",
                format_sync_timestamp(conflict.detected_at),
                conflict.kind,
                conflict.id,
                conflict.local_id,
                conflict.op_id,
                entity_summary(&conflict.local_data),
                server
            )
        })
        .collect()
}

pub fn format_operation_lines(operations: &[PendingOperation]) -> Vec<String> {
    operations
        .iter()
        .map(|op| {
            let mut line = format!(
                "{:<6} {:<6} {:<8} local #{:<6} attempts={}",
                op.id.get(),
                op.action.as_str(),
                op.kind.as_str(),
                op.local_id.get(),
                op.attempts
            );
            if op.parked {
                line.push_str("  [parked]");
            }
            if let Some(error) = op.last_error.as_deref() {
                line.push_str("  last error: ");
                line.push_str(error);
            }
            line
        })
        .collect()
}

pub fn format_sync_result_lines(result: &SyncResult) -> Vec<String> {
    let mut lines = vec![format!(
        "{}: {} synced, {} failed, {} deferred, {} conflict(s)",
        if result.success {
            "Sync completed"
        } else {
            "Sync incomplete"
        },
        result.synced,
        result.failed,
        result.deferred,
        result.conflicts.len()
    )];
    lines.extend(result.errors.iter().map(|error| format!("  error: {error}")));
    lines.extend(result.conflicts.iter().map(|conflict| {
        let shared = result
            .conflicts
            .iter()
            .filter(|other| other.kind == conflict.kind && other.id == conflict.id)
            .count()
            > 1;
        let target = if shared {
            format!("--local {} {}", conflict.kind, conflict.local_id)
        } else {
            format!("{} {}", conflict.kind, conflict.id)
        };
        format!(
            "  conflict: {} {} (local #{}); run `duka resolve {target} local|server`",
            conflict.kind, conflict.id, conflict.local_id
        )
    }));
    lines
}

pub fn format_status_lines(status: &SyncStatus) -> Vec<String> {
    let last_sync = status
        .last_sync_time
        .map_or_else(|| "never".to_string(), format_sync_timestamp);
    let mut lines = vec![
        format!("state:     {:?}", status.state()),
        format!("online:    {}", status.is_online),
        format!("pending:   {}", status.pending_count),
        format!("conflicts: {}", status.conflicts.len()),
        format!("last sync: {last_sync}"),
    ];
    if let Some(error) = status.sync_error.as_deref() {
        lines.push(format!("error:     {error}"));
    }
    lines
}

pub fn format_sync_timestamp(timestamp_ms: i64) -> String {
    chrono::DateTime::from_timestamp_millis(timestamp_ms).map_or_else(
        || timestamp_ms.to_string(),
        |date_time| date_time.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
    )
}

pub fn format_relative_time(timestamp_ms: i64, now_ms: i64) -> String {
    let diff = now_ms.saturating_sub(timestamp_ms);
    let minute = 60_000;
    let hour = 60 * minute;
    let day = 24 * hour;
    let week = 7 * day;

    if diff < minute {
        "just now".to_string()
    } else if diff < hour {
        format!("{}m ago", diff / minute)
    } else if diff < day {
        format!("{}h ago", diff / hour)
    } else if diff < week {
        format!("{}d ago", diff / day)
    } else {
        format!("{}w ago", diff / week)
    }
}

/// Parse a JSON payload for `kind`, taken from the argument or piped stdin.
pub fn resolve_payload(kind: EntityKind, data: Option<&str>) -> Result<Entity, CliError> {
    let raw = match normalize_text_option(data.map(ToString::to_string)) {
        Some(raw) => raw,
        None => read_piped_stdin()?.ok_or(CliError::EmptyPayload)?,
    };
    parse_payload(kind, &raw)
}

pub fn parse_payload(kind: EntityKind, raw: &str) -> Result<Entity, CliError> {
    let invalid = |message: String| CliError::InvalidPayload {
        kind: kind.to_string(),
        message,
    };
    let value = serde_json::from_str::<serde_json::Value>(raw)
        .map_err(|error| invalid(error.to_string()))?;
    if !value.is_object() {
        return Err(invalid("expected a JSON object".to_string()));
    }
    let entity = Entity::from_wire(kind, value).map_err(|error| invalid(error.to_string()))?;
    entity
        .validate()
        .map_err(|error| invalid(error.to_string()))?;
    Ok(entity)
}

pub fn read_piped_stdin() -> Result<Option<String>, CliError> {
    let stdin = io::stdin();
    if stdin.is_terminal() {
        return Ok(None);
    }

    let mut buffer = String::new();
    stdin.lock().read_to_string(&mut buffer)?;
    Ok(normalize_text_option(Some(buffer)))
}

pub fn resolve_db_path(cli_db_path: Option<PathBuf>) -> Result<PathBuf, CliError> {
    if let Some(path) = cli_db_path.or_else(|| env::var_os("DUKA_DB_PATH").map(PathBuf::from)) {
        return Ok(path);
    }
    default_db_path()
}

pub fn default_db_path() -> Result<PathBuf, CliError> {
    dirs::data_dir()
        .map(|dir| dir.join("duka").join("duka.db"))
        .ok_or_else(|| CliError::Config("Failed to resolve CLI data directory".to_string()))
}

pub async fn open_store(path: &Path) -> Result<LocalStore, CliError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    Ok(LocalStore::open_path(path).await?)
}

/// Profile file, then `DUKA_*` environment, then keychain token, then flags.
pub fn resolve_client_config(globals: &GlobalArgs) -> Result<ClientConfig, CliError> {
    let profiles = CliProfilesConfig::load().map_err(CliError::Config)?;
    let profile_name = profiles.resolve_profile_name(globals.profile.as_deref());
    let mut config = profiles
        .profile(&profile_name)
        .map(|profile| profile.client_config())
        .unwrap_or_default();
    config
        .apply_env(|key| env::var(key).ok())
        .map_err(CliError::Config)?;

    if config.api_token.is_none() {
        config.api_token = TokenStore::new(&profile_name)
            .load()
            .map_err(CliError::Auth)?;
    }
    if let Some(url) = normalize_text_option(globals.api_url.clone()) {
        config.api_base_url = Some(url);
    }
    config.validate().map_err(CliError::Config)
}

/// Open the local store and connect it to the configured server.
///
/// The server is probed once; an unreachable server leaves the client offline so writes
/// are queued instead of attempted.
pub async fn connect(globals: &GlobalArgs) -> Result<(DukaClient<HttpRemote>, ClientConfig), CliError> {
    let config = resolve_client_config(globals)?;
    if config.api_base_url.is_none() {
        return Err(CliError::SyncNotConfigured);
    }
    let remote = Arc::new(config.http_remote()?);
    let store = open_store(&globals.db_path()?).await?;

    let online = !globals.offline && probe(remote.as_ref(), config.request_timeout()).await;
    let client = DukaClient::new(store, remote, NetworkMonitor::new(online), &config);
    Ok((client, config))
}

/// Connect when a server is configured, otherwise fall back to the local store alone.
pub async fn open_session(globals: &GlobalArgs) -> Result<Session, CliError> {
    match connect(globals).await {
        Ok((client, _)) => Ok(Session::Connected(client)),
        Err(CliError::SyncNotConfigured) => {
            let store = open_store(&globals.db_path()?).await?;
            Ok(Session::Local(store))
        }
        Err(error) => Err(error),
    }
}

pub enum Session {
    Connected(DukaClient<HttpRemote>),
    Local(LocalStore),
}

impl Session {
    pub fn store(&self) -> &LocalStore {
        match self {
            Self::Connected(client) => client.store(),
            Self::Local(store) => store,
        }
    }
}

async fn probe<R: RemoteApi>(remote: &R, timeout: Duration) -> bool {
    match tokio::time::timeout(timeout, remote.ping()).await {
        Ok(Ok(())) => true,
        Ok(Err(error)) => {
            tracing::info!("Server unreachable, working offline: {error}");
            false
        }
        Err(_) => {
            tracing::info!("Server probe timed out, working offline");
            false
        }
    }
}

/// Wait for the background remote attempt of a CLI write and describe where it ended up.
pub async fn settle_mutation<T>(kind: EntityKind, mutation: Mutation<T>) -> String {
    let local_id = mutation.record.local_id;
    let status = mutation.wait().await;
    format!("{kind} #{local_id}: {status}")
}
