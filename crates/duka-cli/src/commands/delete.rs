use duka_core::{DukaClient, EntityKind, HttpRemote, LocalId};

use crate::commands::common::{open_session, settle_mutation, GlobalArgs, Session};
use crate::error::CliError;

pub async fn run_delete(kind: EntityKind, id: i64, globals: &GlobalArgs) -> Result<(), CliError> {
    let local_id = LocalId::new(id);
    let line = match open_session(globals).await? {
        Session::Connected(client) => delete_connected(&client, kind, local_id).await,
        Session::Local(store) => store
            .record_delete(kind, local_id, duka_core::util::unix_millis_now())
            .await
            .map(|_| format!("{kind} #{local_id}: deleted, queued for sync (no server configured)")),
    }
    .map_err(|error| match error {
        duka_core::Error::NotFound(_) => CliError::RecordNotFound {
            kind: kind.to_string(),
            id,
        },
        other => CliError::Core(other),
    })?;
    println!("{line}");
    Ok(())
}

async fn delete_connected(
    client: &DukaClient<HttpRemote>,
    kind: EntityKind,
    local_id: LocalId,
) -> duka_core::Result<String> {
    let line = match kind {
        EntityKind::Product => settle_mutation(kind, client.products.delete(local_id).await?).await,
        EntityKind::Customer => {
            settle_mutation(kind, client.customers.delete(local_id).await?).await
        }
        EntityKind::Order => settle_mutation(kind, client.orders.delete(local_id).await?).await,
        EntityKind::Sale => settle_mutation(kind, client.sales.delete(local_id).await?).await,
    };
    Ok(line)
}
