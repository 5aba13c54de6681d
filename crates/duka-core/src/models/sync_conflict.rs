//! Sync conflict model

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::entity::{Entity, EntityKind};
use super::operation::OperationId;
use super::record::{LocalId, ServerId};
use crate::error::{Error, Result};

/// Outstanding divergence between local and server state for one record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConflictInfo {
    pub kind: EntityKind,
    /// Server id of the diverged record
    pub id: ServerId,
    pub local_id: LocalId,
    /// Queued operation that was rejected
    pub op_id: OperationId,
    pub local_data: Entity,
    /// `None` when the server no longer has the record
    pub server_data: Option<Entity>,
    pub server_updated_at: Option<i64>,
    /// Detection time (Unix ms)
    pub detected_at: i64,
}

/// Which side wins a manually resolved conflict
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConflictResolution {
    Local,
    Server,
}

impl fmt::Display for ConflictResolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Local => "local",
            Self::Server => "server",
        })
    }
}

impl FromStr for ConflictResolution {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "local" => Ok(Self::Local),
            "server" => Ok(Self::Server),
            other => Err(Error::InvalidInput(format!(
                "resolution must be 'local' or 'server', got '{other}'"
            ))),
        }
    }
}
