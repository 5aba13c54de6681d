//! Locally durable record model

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::entity::{Entity, EntityKind, TypedEntity};

/// Locally-assigned identifier, increasing within each entity table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LocalId(i64);

impl LocalId {
    pub const fn new(raw: i64) -> Self {
        Self(raw)
    }

    pub const fn get(self) -> i64 {
        self.0
    }
}

impl fmt::Display for LocalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for LocalId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.trim().parse()?))
    }
}

/// Identifier assigned by the remote authority once a create is confirmed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ServerId(i64);

impl ServerId {
    pub const fn new(raw: i64) -> Self {
        Self(raw)
    }

    /// Interpret a stored/wire value where `0` (or less) means "not assigned yet".
    pub const fn from_raw(raw: i64) -> Option<Self> {
        if raw > 0 {
            Some(Self(raw))
        } else {
            None
        }
    }

    pub const fn get(self) -> i64 {
        self.0
    }
}

impl fmt::Display for ServerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ServerId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.trim().parse()?))
    }
}

/// Synchronization state of a single record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordState {
    /// Created locally, no server id yet
    UnsyncedNew,
    /// Matches the last server-confirmed state
    Synced,
    /// Known to the server, then changed locally
    UnsyncedModified,
    /// Replay was rejected because the server diverged
    Conflicted,
}

/// The locally known state of one record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocalRecord<T> {
    pub local_id: LocalId,
    pub server_id: Option<ServerId>,
    pub payload: T,
    /// Last local mutation (Unix ms)
    pub updated_at: i64,
    /// Last `updatedAt` reported by the remote authority (Unix ms)
    pub server_updated_at: Option<i64>,
    pub synced: bool,
    /// Deleted locally, remote delete not yet confirmed
    pub is_deleted: bool,
}

impl<T> LocalRecord<T> {
    /// `synced` implies a server id; a record without one is never synced.
    pub const fn is_consistent(&self) -> bool {
        !self.synced || self.server_id.is_some()
    }

    pub const fn state(&self, has_conflict: bool) -> RecordState {
        if has_conflict {
            RecordState::Conflicted
        } else if self.server_id.is_none() {
            RecordState::UnsyncedNew
        } else if self.synced {
            RecordState::Synced
        } else {
            RecordState::UnsyncedModified
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> LocalRecord<U> {
        LocalRecord {
            local_id: self.local_id,
            server_id: self.server_id,
            payload: f(self.payload),
            updated_at: self.updated_at,
            server_updated_at: self.server_updated_at,
            synced: self.synced,
            is_deleted: self.is_deleted,
        }
    }
}

impl LocalRecord<Entity> {
    pub const fn kind(&self) -> EntityKind {
        self.payload.kind()
    }

    /// Narrow to a concrete payload type; `None` if the kind differs.
    pub fn into_typed<T: TypedEntity>(self) -> Option<LocalRecord<T>> {
        let payload = T::from_entity(self.payload.clone())?;
        Some(self.map(|_| payload))
    }
}

impl<T: TypedEntity> LocalRecord<T> {
    pub fn into_entity_record(self) -> LocalRecord<Entity> {
        self.map(TypedEntity::into_entity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Customer, Product};

    fn record(server_id: Option<ServerId>, synced: bool) -> LocalRecord<Product> {
        LocalRecord {
            local_id: LocalId::new(1),
            server_id,
            payload: Product::new("Milk", 60.0, 20),
            updated_at: 1,
            server_updated_at: None,
            synced,
            is_deleted: false,
        }
    }

    #[test]
    fn server_id_zero_means_unassigned() {
        assert_eq!(ServerId::from_raw(0), None);
        assert_eq!(ServerId::from_raw(501), Some(ServerId::new(501)));
    }

    #[test]
    fn state_follows_record_lifecycle() {
        assert_eq!(record(None, false).state(false), RecordState::UnsyncedNew);
        let id = Some(ServerId::new(501));
        assert_eq!(record(id, true).state(false), RecordState::Synced);
        assert_eq!(record(id, false).state(false), RecordState::UnsyncedModified);
        assert_eq!(record(id, false).state(true), RecordState::Conflicted);
    }

    #[test]
    fn synced_without_server_id_is_inconsistent() {
        assert!(!record(None, true).is_consistent());
        assert!(record(None, false).is_consistent());
    }

    #[test]
    fn typed_narrowing_checks_kind() {
        let entity_record = record(None, false).into_entity_record();
        assert_eq!(entity_record.kind(), EntityKind::Product);
        assert!(entity_record.clone().into_typed::<Customer>().is_none());
        let typed = entity_record.into_typed::<Product>().unwrap();
        assert_eq!(typed.payload.name, "Milk");
    }
}
