//! Pending operation model

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::entity::{Entity, EntityKind};
use super::record::{LocalId, LocalRecord, ServerId};
use crate::error::{Error, Result};

/// Mutation kinds that can be replayed against the remote authority
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationAction {
    Create,
    Update,
    Delete,
}

impl OperationAction {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }
}

impl fmt::Display for OperationAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OperationAction {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "create" => Ok(Self::Create),
            "update" => Ok(Self::Update),
            "delete" => Ok(Self::Delete),
            other => Err(Error::InvalidInput(format!("unknown action '{other}'"))),
        }
    }
}

/// Queue row identifier; insertion order doubles as replay order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OperationId(i64);

impl OperationId {
    pub const fn new(raw: i64) -> Self {
        Self(raw)
    }

    pub const fn get(self) -> i64 {
        self.0
    }
}

impl fmt::Display for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for OperationId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(s.trim().parse()?))
    }
}

/// A mutation that has not been confirmed by the remote authority
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingOperation {
    pub id: OperationId,
    pub kind: EntityKind,
    pub action: OperationAction,
    pub local_id: LocalId,
    /// Server id known at enqueue time, if any
    pub server_id: Option<ServerId>,
    /// Payload snapshot; `None` for deletes
    pub data: Option<Entity>,
    /// Server `updatedAt` the local edit was based on (updates only)
    pub base_updated_at: Option<i64>,
    pub attempts: u32,
    /// Enqueue time (Unix ms)
    pub created_at: i64,
    /// Idempotency key sent with remote creates
    pub op_key: String,
    pub last_error: Option<String>,
    /// Skipped by sync passes until an operator retries or purges it
    pub parked: bool,
}

impl PendingOperation {
    /// Operations sharing this key are replayed strictly in enqueue order.
    pub const fn record_key(&self) -> (EntityKind, LocalId) {
        (self.kind, self.local_id)
    }
}

/// An operation about to be appended to the queue
#[derive(Debug, Clone, PartialEq)]
pub struct NewOperation {
    pub kind: EntityKind,
    pub action: OperationAction,
    pub local_id: LocalId,
    pub server_id: Option<ServerId>,
    pub data: Option<Entity>,
    pub base_updated_at: Option<i64>,
}

impl NewOperation {
    pub fn create(record: &LocalRecord<Entity>) -> Self {
        Self {
            kind: record.kind(),
            action: OperationAction::Create,
            local_id: record.local_id,
            server_id: None,
            data: Some(record.payload.clone()),
            base_updated_at: None,
        }
    }

    /// `base_updated_at` is the pre-mutation server timestamp snapshot.
    pub fn update(record: &LocalRecord<Entity>, base_updated_at: Option<i64>) -> Self {
        Self {
            kind: record.kind(),
            action: OperationAction::Update,
            local_id: record.local_id,
            server_id: record.server_id,
            data: Some(record.payload.clone()),
            base_updated_at,
        }
    }

    pub const fn delete(kind: EntityKind, local_id: LocalId, server_id: Option<ServerId>) -> Self {
        Self {
            kind,
            action: OperationAction::Delete,
            local_id,
            server_id,
            data: None,
            base_updated_at: None,
        }
    }
}
