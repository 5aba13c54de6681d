use duka_core::{ConflictResolution, EntityKind, LocalId, ServerId};

use crate::commands::common::{entity_summary, open_session, GlobalArgs, Session};
use crate::error::CliError;

/// Which conflict a resolution applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictTarget {
    /// The conflict reported under a server id
    Server(ServerId),
    /// The conflict attached to one local record
    Local(LocalId),
}

pub async fn run_resolve(
    kind: EntityKind,
    target: ConflictTarget,
    resolution: ConflictResolution,
    globals: &GlobalArgs,
) -> Result<(), CliError> {
    let session = open_session(globals).await?;
    let record = match (&session, target) {
        (Session::Connected(client), ConflictTarget::Server(id)) => {
            client
                .coordinator()
                .resolve_conflict(kind, id, resolution)
                .await?
        }
        (Session::Connected(client), ConflictTarget::Local(local_id)) => {
            client
                .coordinator()
                .resolve_record_conflict(kind, local_id, resolution)
                .await?
        }
        (Session::Local(store), ConflictTarget::Server(id)) => {
            store
                .resolve_conflict(kind, id, resolution, duka_core::util::unix_millis_now())
                .await?
        }
        (Session::Local(store), ConflictTarget::Local(local_id)) => {
            let now = duka_core::util::unix_millis_now();
            store
                .resolve_record_conflict(kind, local_id, resolution, now)
                .await?
        }
    };

    match record {
        Some(record) => println!(
            "{kind} #{} now {}: {}",
            record.local_id,
            if record.synced { "matches the server" } else { "queued to overwrite the server" },
            entity_summary(&record.payload)
        ),
        None => match target {
            ConflictTarget::Server(id) => println!("{kind} {id}: local copy removed"),
            ConflictTarget::Local(local_id) => println!("{kind} #{local_id}: local copy removed"),
        },
    }

    // Push a kept local version straight away when the server is reachable.
    if let (ConflictResolution::Local, Session::Connected(client)) = (resolution, &session) {
        if client.network().is_online() {
            let result = client.coordinator().sync_now().await;
            println!(
                "Sync {}: {} synced, {} failed",
                if result.success { "completed" } else { "incomplete" },
                result.synced,
                result.failed
            );
        }
    }
    Ok(())
}
