use duka_core::{DukaClient, Entity, HttpRemote, LocalId};

use crate::commands::common::{open_session, resolve_payload, settle_mutation, GlobalArgs, Session};
use crate::error::CliError;

pub async fn run_update(
    kind: duka_core::EntityKind,
    id: i64,
    data: Option<&str>,
    globals: &GlobalArgs,
) -> Result<(), CliError> {
    let entity = resolve_payload(kind, data)?;
    let local_id = LocalId::new(id);

    let line = match open_session(globals).await? {
        Session::Connected(client) => update_connected(&client, local_id, entity).await,
        Session::Local(store) => store
            .record_update(kind, local_id, &entity, duka_core::util::unix_millis_now())
            .await
            .map(|(record, _)| {
                format!(
                    "{kind} #{}: saved, queued for sync (no server configured)",
                    record.local_id
                )
            }),
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

async fn update_connected(
    client: &DukaClient<HttpRemote>,
    local_id: LocalId,
    entity: Entity,
) -> duka_core::Result<String> {
    let kind = entity.kind();
    let line = match entity {
        Entity::Product(payload) => {
            settle_mutation(kind, client.products.update(local_id, payload).await?).await
        }
        Entity::Customer(payload) => {
            settle_mutation(kind, client.customers.update(local_id, payload).await?).await
        }
        Entity::Order(payload) => {
            settle_mutation(kind, client.orders.update(local_id, payload).await?).await
        }
        Entity::Sale(payload) => {
            settle_mutation(kind, client.sales.update(local_id, payload).await?).await
        }
    };
    Ok(line)
}
