//! Optimistic-write entity services.

use std::fmt;
use std::marker::PhantomData;

use tokio::task::JoinHandle;

use super::LocalStore;
use crate::models::{
    ConflictInfo, Customer, Entity, EntityKind, LocalId, LocalRecord, OperationId, Order, Product, Sale,
    ServerId, TypedEntity,
};
use crate::remote::RemoteApi;
use crate::sync::{ReplayOutcome, SyncEngine};
use crate::util::unix_millis_now;
use crate::{Error, Result};

/// Sync status of a mutation as seen by the caller. Never an error.
#[derive(Debug, Clone, PartialEq)]
pub enum MutationStatus {
    /// Confirmed by the remote authority
    Synced,
    /// Saved locally, remote attempt running in the background
    Syncing,
    /// Saved locally, waiting for the next sync pass
    Queued(String),
    /// Saved locally, the server diverged and needs a manual decision
    Conflicted(ConflictInfo),
}

impl MutationStatus {
    fn from_outcome(outcome: ReplayOutcome) -> Self {
        match outcome {
            ReplayOutcome::Synced => Self::Synced,
            ReplayOutcome::Failed(reason) | ReplayOutcome::Parked(reason) => Self::Queued(reason),
            ReplayOutcome::Conflict(conflict) => Self::Conflicted(conflict),
            ReplayOutcome::Deferred => Self::Queued("waiting for earlier changes".to_string()),
        }
    }
}

impl fmt::Display for MutationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Synced => f.write_str("saved and synced"),
            Self::Syncing => f.write_str("saved, syncing"),
            Self::Queued(reason) => write!(f, "saved, queued for sync ({reason})"),
            Self::Conflicted(conflict) => write!(
                f,
                "saved, conflicts with server {} {}",
                conflict.kind, conflict.id
            ),
        }
    }
}

/// Result of an optimistic write: the local record plus the pending remote attempt.
#[derive(Debug)]
pub struct Mutation<T> {
    pub record: LocalRecord<T>,
    pub op_id: OperationId,
    pub status: MutationStatus,
    task: Option<JoinHandle<MutationStatus>>,
}

impl<T> Mutation<T> {
    /// Wait for the background remote attempt, if one was started.
    pub async fn wait(self) -> MutationStatus {
        match self.task {
            Some(task) => task.await.unwrap_or_else(|error| {
                MutationStatus::Queued(format!("background sync interrupted: {error}"))
            }),
            None => self.status,
        }
    }
}

/// Optimistic-write façade for one entity kind.
pub struct EntityService<T, R> {
    engine: SyncEngine<R>,
    _kind: PhantomData<fn() -> T>,
}

impl<T, R> Clone for EntityService<T, R> {
    fn clone(&self) -> Self {
        Self {
            engine: self.engine.clone(),
            _kind: PhantomData,
        }
    }
}

pub type ProductService<R> = EntityService<Product, R>;
pub type CustomerService<R> = EntityService<Customer, R>;
pub type OrderService<R> = EntityService<Order, R>;
pub type SaleService<R> = EntityService<Sale, R>;

impl<T: TypedEntity, R: RemoteApi> EntityService<T, R> {
    pub const fn new(engine: SyncEngine<R>) -> Self {
        Self {
            engine,
            _kind: PhantomData,
        }
    }

    fn store(&self) -> &LocalStore {
        self.engine.store()
    }

    /// Save locally and return at once; the remote create runs in the background when online.
    ///
    /// Only invalid payloads and local write failures are errors.
    pub async fn create(&self, payload: T) -> Result<Mutation<T>> {
        let entity = payload.into_entity();
        entity.validate()?;

        let (record, op) = self
            .store()
            .record_create(&entity, unix_millis_now())
            .await
            .inspect_err(|error| tracing::error!(kind = %T::KIND, "Local create failed: {error}"))?;
        self.dispatch(record, op.id)
    }

    pub async fn update(&self, local_id: LocalId, payload: T) -> Result<Mutation<T>> {
        let entity = payload.into_entity();
        entity.validate()?;

        let (record, op) = self
            .store()
            .record_update(T::KIND, local_id, &entity, unix_millis_now())
            .await
            .inspect_err(|error| {
                tracing::error!(kind = %T::KIND, local_id = local_id.get(), "Local update failed: {error}");
            })?;
        self.dispatch(record, op.id)
    }

    /// Hide the record at once; it is purged after the server confirms the delete.
    pub async fn delete(&self, local_id: LocalId) -> Result<Mutation<T>> {
        let (record, op) = self
            .store()
            .record_delete(T::KIND, local_id, unix_millis_now())
            .await
            .inspect_err(|error| {
                tracing::error!(kind = %T::KIND, local_id = local_id.get(), "Local delete failed: {error}");
            })?;
        self.dispatch(record, op.id)
    }

    /// Read a live record; storage failures degrade to `None`.
    pub async fn get(&self, local_id: LocalId) -> Option<LocalRecord<T>> {
        match self.store().get(T::KIND, local_id).await {
            Ok(record) => record.and_then(LocalRecord::into_typed),
            Err(error) => {
                tracing::warn!(kind = %T::KIND, local_id = local_id.get(), "Local read failed: {error}");
                None
            }
        }
    }

    pub async fn get_by_server_id(&self, server_id: ServerId) -> Option<LocalRecord<T>> {
        match self.store().get_by_server_id(T::KIND, server_id).await {
            Ok(record) => record.and_then(LocalRecord::into_typed),
            Err(error) => {
                tracing::warn!(kind = %T::KIND, server_id = server_id.get(), "Local read failed: {error}");
                None
            }
        }
    }

    /// All live records; storage failures degrade to an empty list.
    pub async fn list(&self) -> Vec<LocalRecord<T>> {
        match self.store().list(T::KIND).await {
            Ok(records) => records
                .into_iter()
                .filter_map(LocalRecord::into_typed)
                .collect(),
            Err(error) => {
                tracing::warn!(kind = %T::KIND, "Local list failed: {error}");
                Vec::new()
            }
        }
    }

    pub const fn kind(&self) -> EntityKind {
        T::KIND
    }

    fn dispatch(&self, record: LocalRecord<Entity>, op_id: OperationId) -> Result<Mutation<T>> {
        let local_id = record.local_id;
        let record = record.into_typed::<T>().ok_or_else(|| {
            Error::Database(format!("{} {local_id} holds a payload of another kind", T::KIND))
        })?;

        if !self.engine.network().is_online() {
            return Ok(Mutation {
                record,
                op_id,
                status: MutationStatus::Queued("offline".to_string()),
                task: None,
            });
        }

        let engine = self.engine.clone();
        let task = tokio::spawn(async move {
            MutationStatus::from_outcome(engine.replay_operation(op_id).await)
        });
        Ok(Mutation {
            record,
            op_id,
            status: MutationStatus::Syncing,
            task: Some(task),
        })
    }
}
