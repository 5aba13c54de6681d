//! Outcome of one sync pass

use serde::{Deserialize, Serialize};

use super::sync_conflict::ConflictInfo;

/// Aggregated per-operation outcomes of a `sync_all` pass
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SyncResult {
    pub success: bool,
    /// Operations confirmed and removed from the queue
    pub synced: usize,
    /// Operations that failed and stay queued
    pub failed: usize,
    /// Operations skipped because an earlier one for the same record did not settle
    pub deferred: usize,
    pub errors: Vec<String>,
    /// Conflicts raised during this pass
    pub conflicts: Vec<ConflictInfo>,
}

impl SyncResult {
    /// A pass that did not run at all.
    pub fn rejected(reason: impl Into<String>) -> Self {
        Self {
            success: false,
            errors: vec![reason.into()],
            ..Self::default()
        }
    }

    pub(crate) fn finish(mut self) -> Self {
        self.success = self.failed == 0 && self.conflicts.is_empty();
        self
    }
}
