//! Sync triggers: reconnection, periodic timer, foreground, manual.

use std::sync::{Arc, PoisonError};
use std::time::{Duration, Instant};

use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use super::{Backoff, SyncEngine, SyncRejected};
use crate::models::{
    ConflictResolution, Entity, EntityKind, LocalId, LocalRecord, ServerId, SyncResult,
};
use crate::remote::RemoteApi;
use crate::state::SyncStatus;
use crate::util::unix_millis_now;
use crate::Result;

struct Shared {
    status: watch::Sender<SyncStatus>,
    backoff: Mutex<Backoff>,
    task: std::sync::Mutex<Option<JoinHandle<()>>>,
}

/// Owns no data; derives [`SyncStatus`] and decides when to run [`SyncEngine::sync_all`].
pub struct SyncCoordinator<R> {
    engine: SyncEngine<R>,
    interval: Duration,
    shared: Arc<Shared>,
}

impl<R> Clone for SyncCoordinator<R> {
    fn clone(&self) -> Self {
        Self {
            engine: self.engine.clone(),
            interval: self.interval,
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<R: RemoteApi> SyncCoordinator<R> {
    pub fn new(engine: SyncEngine<R>, interval: Duration) -> Self {
        let initial = SyncStatus {
            is_online: engine.network().is_online(),
            pending_count: engine.store().pending_count(),
            ..SyncStatus::default()
        };
        let (status, _) = watch::channel(initial);
        Self {
            engine,
            interval,
            shared: Arc::new(Shared {
                status,
                backoff: Mutex::new(Backoff::new(interval)),
                task: std::sync::Mutex::new(None),
            }),
        }
    }

    pub const fn engine(&self) -> &SyncEngine<R> {
        &self.engine
    }

    /// Run a pass now, ignoring backoff.
    pub async fn sync_now(&self) -> SyncResult {
        if self.engine.network().is_online() {
            self.shared
                .status
                .send_modify(|status| status.is_syncing = true);
        }

        let outcome = self.engine.try_sync_all().await;
        let result = match outcome {
            Ok(result) => {
                self.record_pass(&result).await;
                result
            }
            Err(rejected) => {
                if rejected == SyncRejected::Offline {
                    tracing::debug!("Sync skipped while offline");
                }
                SyncResult::rejected(rejected.to_string())
            }
        };
        self.refresh().await;
        result
    }

    async fn record_pass(&self, result: &SyncResult) {
        {
            let mut backoff = self.shared.backoff.lock().await;
            if result.failed > 0 {
                backoff.record_failure(Instant::now());
            } else {
                backoff.reset();
            }
        }
        let error = if result.success {
            None
        } else {
            result.errors.first().cloned()
        };
        self.shared.status.send_modify(|status| {
            status.last_sync_time = Some(unix_millis_now());
            status.sync_error = error;
        });
    }

    /// Start reacting to connectivity and pending-count changes, plus the periodic timer.
    ///
    /// Replaces any previously started loop.
    pub fn start_auto_sync(&self) {
        let mut slot = self
            .shared
            .task
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(previous) = slot.take() {
            previous.abort();
        }

        // Subscribe before spawning so no transition between now and the first poll is missed.
        let online_rx = self.engine.network().subscribe();
        let pending_rx = self.engine.store().subscribe_pending();
        let coordinator = self.clone();
        *slot = Some(tokio::spawn(async move {
            coordinator.run(online_rx, pending_rx).await;
        }));
        tracing::info!(interval_secs = self.interval.as_secs(), "Auto-sync started");
    }

    pub fn stop_auto_sync(&self) {
        let previous = self
            .shared
            .task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(task) = previous {
            task.abort();
            tracing::info!("Auto-sync stopped");
        }
    }

    pub fn is_auto_syncing(&self) -> bool {
        self.shared
            .task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }

    /// The host application came back to the foreground.
    pub async fn on_foreground(&self) -> Option<SyncResult> {
        if self.engine.network().is_online() && self.engine.store().pending_count() > 0 {
            Some(self.sync_now().await)
        } else {
            None
        }
    }

    pub async fn resolve_conflict(
        &self,
        kind: EntityKind,
        id: ServerId,
        resolution: ConflictResolution,
    ) -> Result<Option<LocalRecord<Entity>>> {
        let record = self
            .engine
            .resolve_conflict_manual(kind, id, resolution)
            .await?;
        self.refresh().await;
        Ok(record)
    }

    pub async fn resolve_record_conflict(
        &self,
        kind: EntityKind,
        local_id: LocalId,
        resolution: ConflictResolution,
    ) -> Result<Option<LocalRecord<Entity>>> {
        let record = self
            .engine
            .resolve_record_conflict(kind, local_id, resolution)
            .await?;
        self.refresh().await;
        Ok(record)
    }

    /// Fresh status snapshot.
    pub async fn status(&self) -> SyncStatus {
        self.refresh().await;
        self.shared.status.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SyncStatus> {
        self.shared.status.subscribe()
    }

    async fn refresh(&self) {
        let conflicts = match self.engine.conflicts().await {
            Ok(conflicts) => Some(conflicts),
            Err(error) => {
                tracing::warn!("Failed to read conflicts for status: {error}");
                None
            }
        };
        let is_online = self.engine.network().is_online();
        let is_syncing = self.engine.is_syncing();
        let pending_count = self.engine.store().pending_count();

        self.shared.status.send_if_modified(|status| {
            let before = status.clone();
            status.is_online = is_online;
            status.is_syncing = is_syncing;
            status.pending_count = pending_count;
            if let Some(conflicts) = conflicts {
                status.conflicts = conflicts;
            }
            *status != before
        });
    }

    async fn periodic_tick(&self) {
        if !self.engine.network().is_online() || self.engine.store().pending_count() == 0 {
            return;
        }
        if !self.shared.backoff.lock().await.should_retry(Instant::now()) {
            tracing::debug!("Periodic sync waiting for backoff");
            return;
        }
        self.sync_now().await;
    }

    async fn run(
        self,
        mut online_rx: watch::Receiver<bool>,
        mut pending_rx: watch::Receiver<usize>,
    ) {
        let mut was_online = *online_rx.borrow_and_update();
        pending_rx.borrow_and_update();

        let mut ticker = tokio::time::interval_at(
            tokio::time::Instant::now() + self.interval,
            self.interval,
        );
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        self.refresh().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => self.periodic_tick().await,
                changed = online_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let online = *online_rx.borrow_and_update();
                    let reconnected = online && !was_online;
                    was_online = online;
                    if reconnected {
                        tracing::info!("Connectivity restored, syncing");
                        self.sync_now().await;
                    } else {
                        self.refresh().await;
                    }
                }
                changed = pending_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    pending_rx.borrow_and_update();
                    self.refresh().await;
                }
            }
        }
    }
}
