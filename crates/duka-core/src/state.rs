//! Status surface shared with UI and CLI collaborators.

use serde::Serialize;

use crate::models::ConflictInfo;

/// Coarse sync indicator.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncState {
    Offline,
    Syncing,
    Synced,
    Pending,
    Conflicted,
    Error,
}

/// Snapshot of everything the application shows about synchronization.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct SyncStatus {
    pub is_online: bool,
    pub is_syncing: bool,
    pub pending_count: usize,
    /// Completion time of the last pass that ran (Unix ms)
    pub last_sync_time: Option<i64>,
    /// First error of the last pass, if it did not succeed
    pub sync_error: Option<String>,
    pub conflicts: Vec<ConflictInfo>,
}

impl SyncStatus {
    pub fn state(&self) -> SyncState {
        if !self.is_online {
            SyncState::Offline
        } else if self.is_syncing {
            SyncState::Syncing
        } else if !self.conflicts.is_empty() {
            SyncState::Conflicted
        } else if self.sync_error.is_some() {
            SyncState::Error
        } else if self.pending_count > 0 {
            SyncState::Pending
        } else {
            SyncState::Synced
        }
    }
}
