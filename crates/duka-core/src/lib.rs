//! duka-core - offline-first sync subsystem for the Duka point of sale
//!
//! Mutations are written to a durable local store first and queued; the sync engine
//! replays the queue against the remote REST authority, maps local ids to server ids,
//! and surfaces conflicts for manual resolution.

pub mod client;
pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod network;
pub mod remote;
pub mod services;
pub mod state;
pub mod sync;
pub mod util;

pub use client::DukaClient;
pub use config::ClientConfig;
pub use error::{Error, Result};
pub use models::{
    ConflictInfo, ConflictResolution, Customer, Entity, EntityKind, LineItem, LocalId, LocalRecord,
    Order, PendingOperation, Product, Sale, ServerId, SyncResult,
};
pub use network::NetworkMonitor;
pub use remote::{HttpRemote, MemoryRemote, RemoteApi, RemoteError};
pub use services::{LocalStore, Mutation, MutationStatus};
pub use state::{SyncState, SyncStatus};
pub use sync::{SyncCoordinator, SyncEngine};
