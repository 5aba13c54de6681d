//! The remote authority: REST collections per entity kind.
//!
//! [`RemoteApi`] is the seam the sync engine replays against. [`HttpRemote`] talks to a real
//! server; [`MemoryRemote`] is an in-process authority with the same contract.

mod http;
mod memory;

use std::future::Future;

use serde_json::Value;
use thiserror::Error;

use crate::models::{Entity, EntityKind, ServerId};

pub use http::HttpRemote;
pub use memory::MemoryRemote;

/// A record as stored by the remote authority
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteRecord {
    pub id: ServerId,
    /// Server-side last modification (Unix ms)
    pub updated_at: i64,
    pub data: Entity,
}

impl RemoteRecord {
    /// Parse a REST response body, accepting either a bare record or a `{"data": {...}}` envelope.
    pub fn from_wire(kind: EntityKind, value: Value) -> RemoteResult<Self> {
        let value = match value {
            Value::Object(mut map) if map.get("data").is_some_and(Value::is_object) => {
                map.remove("data").unwrap_or_default()
            }
            other => other,
        };

        let id = value
            .get("id")
            .and_then(parse_i64)
            .and_then(ServerId::from_raw)
            .ok_or_else(|| RemoteError::InvalidPayload("record is missing an id".to_string()))?;
        let updated_at = value
            .get("updatedAt")
            .or_else(|| value.get("updated_at"))
            .and_then(parse_timestamp)
            .unwrap_or_default();
        let data = Entity::from_wire(kind, value)
            .map_err(|error| RemoteError::InvalidPayload(error.to_string()))?;

        Ok(Self {
            id,
            updated_at,
            data,
        })
    }
}

fn parse_i64(value: &Value) -> Option<i64> {
    match value {
        Value::Number(number) => number.as_i64(),
        Value::String(text) => text.trim().parse().ok(),
        _ => None,
    }
}

/// Accepts Unix milliseconds or an RFC 3339 string.
fn parse_timestamp(value: &Value) -> Option<i64> {
    match value {
        Value::Number(number) => number.as_i64(),
        Value::String(text) => chrono::DateTime::parse_from_rfc3339(text.trim())
            .ok()
            .map(|datetime| datetime.timestamp_millis()),
        _ => None,
    }
}

/// Failures reported by the remote authority
#[derive(Debug, Clone, Error)]
pub enum RemoteError {
    #[error("invalid remote configuration: {0}")]
    InvalidConfiguration(String),
    #[error("network unavailable: {0}")]
    Network(String),
    #[error("request timed out")]
    Timeout,
    #[error("authentication rejected: {0}")]
    Unauthorized(String),
    #[error("record not found on server")]
    NotFound,
    /// The stored record is newer than the submitted snapshot, or a create collided
    /// with an existing record on a natural key.
    #[error("record changed on server")]
    Conflict { current: Option<Box<RemoteRecord>> },
    #[error("request rejected: {message}")]
    Rejected { status: u16, message: String },
    #[error("server error: {message}")]
    Server { status: u16, message: String },
    #[error("invalid response payload: {0}")]
    InvalidPayload(String),
}

impl RemoteError {
    /// Whether replaying the same request later may succeed.
    pub const fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Network(_) | Self::Timeout | Self::Server { .. } | Self::InvalidPayload(_)
        )
    }
}

impl From<reqwest::Error> for RemoteError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_timeout() {
            Self::Timeout
        } else if error.is_decode() {
            Self::InvalidPayload(error.to_string())
        } else {
            Self::Network(error.to_string())
        }
    }
}

pub type RemoteResult<T> = Result<T, RemoteError>;

/// Contract of the remote authority (one REST collection per entity kind).
pub trait RemoteApi: Send + Sync + 'static {
    /// `POST /{collection}`; returns the stored record with its server id.
    fn create(
        &self,
        entity: &Entity,
        idempotency_key: &str,
    ) -> impl Future<Output = RemoteResult<RemoteRecord>> + Send;

    /// `PUT /{collection}/{id}`; `base_updated_at` drives server-side conflict detection.
    fn update(
        &self,
        id: ServerId,
        entity: &Entity,
        base_updated_at: Option<i64>,
    ) -> impl Future<Output = RemoteResult<RemoteRecord>> + Send;

    /// `DELETE /{collection}/{id}`; already-gone records count as deleted.
    fn delete(&self, kind: EntityKind, id: ServerId)
        -> impl Future<Output = RemoteResult<()>> + Send;

    /// `GET /{collection}/{id}`
    fn fetch(
        &self,
        kind: EntityKind,
        id: ServerId,
    ) -> impl Future<Output = RemoteResult<Option<RemoteRecord>>> + Send;

    /// Cheap reachability check
    fn ping(&self) -> impl Future<Output = RemoteResult<()>> + Send;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Product;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn from_wire_reads_id_and_timestamp() {
        let record = RemoteRecord::from_wire(
            EntityKind::Product,
            json!({"id": 501, "updatedAt": 1_700, "name": "Milk", "price": 60, "stock": 20}),
        )
        .unwrap();
        assert_eq!(record.id, ServerId::new(501));
        assert_eq!(record.updated_at, 1_700);
        assert_eq!(record.data, Entity::Product(Product::new("Milk", 60.0, 20)));
    }

    #[test]
    fn from_wire_unwraps_envelope_and_rfc3339() {
        let record = RemoteRecord::from_wire(
            EntityKind::Product,
            json!({"data": {
                "id": "42",
                "updatedAt": "1970-01-01T00:00:01Z",
                "name": "Bread",
                "price": 55
            }}),
        )
        .unwrap();
        assert_eq!(record.id, ServerId::new(42));
        assert_eq!(record.updated_at, 1_000);
    }

    #[test]
    fn from_wire_requires_server_id() {
        let error = RemoteRecord::from_wire(
            EntityKind::Product,
            json!({"id": 0, "name": "Milk", "price": 60}),
        )
        .unwrap_err();
        assert!(matches!(error, RemoteError::InvalidPayload(_)));
    }

    #[test]
    fn transient_classification() {
        assert!(RemoteError::Timeout.is_transient());
        assert!(RemoteError::Network("offline".into()).is_transient());
        assert!(RemoteError::Server {
            status: 503,
            message: "busy".into()
        }
        .is_transient());
        assert!(!RemoteError::Unauthorized("expired".into()).is_transient());
        assert!(!RemoteError::Conflict { current: None }.is_transient());
        assert!(!RemoteError::Rejected {
            status: 422,
            message: "bad".into()
        }
        .is_transient());
    }
}
