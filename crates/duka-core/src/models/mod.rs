//! Data models for Duka

mod entity;
mod operation;
mod record;
mod sync_conflict;
mod sync_result;

pub use entity::{Customer, Entity, EntityKind, LineItem, Order, Product, Sale, TypedEntity};
pub use operation::{NewOperation, OperationAction, OperationId, PendingOperation};
pub use record::{LocalId, LocalRecord, RecordState, ServerId};
pub use sync_conflict::{ConflictInfo, ConflictResolution};
pub use sync_result::SyncResult;
