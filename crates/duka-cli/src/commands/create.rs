use duka_core::{DukaClient, Entity, EntityKind, HttpRemote, LocalStore};

use crate::commands::common::{open_session, resolve_payload, settle_mutation, GlobalArgs, Session};
use crate::error::CliError;

pub async fn run_create(
    kind: EntityKind,
    data: Option<&str>,
    globals: &GlobalArgs,
) -> Result<(), CliError> {
    let entity = resolve_payload(kind, data)?;
    let line = match open_session(globals).await? {
        Session::Connected(client) => create_connected(&client, entity).await?,
        Session::Local(store) => create_local(&store, &entity).await?,
    };
    println!("{line}");
    Ok(())
}

async fn create_connected(
    client: &DukaClient<HttpRemote>,
    entity: Entity,
) -> Result<String, CliError> {
    let kind = entity.kind();
    let line = match entity {
        Entity::Product(payload) => settle_mutation(kind, client.products.create(payload).await?).await,
        Entity::Customer(payload) => {
            settle_mutation(kind, client.customers.create(payload).await?).await
        }
        Entity::Order(payload) => settle_mutation(kind, client.orders.create(payload).await?).await,
        Entity::Sale(payload) => settle_mutation(kind, client.sales.create(payload).await?).await,
    };
    Ok(line)
}

async fn create_local(store: &LocalStore, entity: &Entity) -> Result<String, CliError> {
    let (record, _) = store
        .record_create(entity, duka_core::util::unix_millis_now())
        .await?;
    Ok(format!(
        "{} #{}: saved, queued for sync (no server configured)",
        record.kind(),
        record.local_id
    ))
}
