//! Database layer for Duka

mod conflict_repository;
mod connection;
mod entity_repository;
mod migrations;
mod queue_repository;

pub use conflict_repository::{ConflictRepository, LibSqlConflictRepository};
pub use connection::Database;
pub use entity_repository::{EntityRepository, LibSqlEntityRepository};
pub use queue_repository::{LibSqlQueueRepository, QueueRepository};
