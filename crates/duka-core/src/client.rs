//! One injectable handle over the whole sync subsystem.

use std::sync::Arc;

use crate::config::ClientConfig;
use crate::network::NetworkMonitor;
use crate::remote::RemoteApi;
use crate::services::{CustomerService, LocalStore, OrderService, ProductService, SaleService};
use crate::sync::{SyncCoordinator, SyncEngine};

/// Wires the local store, a remote authority and a network monitor into the entity services,
/// the sync engine and the coordinator. Clones share everything.
pub struct DukaClient<R> {
    pub products: ProductService<R>,
    pub customers: CustomerService<R>,
    pub orders: OrderService<R>,
    pub sales: SaleService<R>,
    engine: SyncEngine<R>,
    coordinator: SyncCoordinator<R>,
}

impl<R> Clone for DukaClient<R> {
    fn clone(&self) -> Self {
        Self {
            products: self.products.clone(),
            customers: self.customers.clone(),
            orders: self.orders.clone(),
            sales: self.sales.clone(),
            engine: self.engine.clone(),
            coordinator: self.coordinator.clone(),
        }
    }
}

impl<R: RemoteApi> DukaClient<R> {
    pub fn new(
        store: LocalStore,
        remote: Arc<R>,
        network: NetworkMonitor,
        config: &ClientConfig,
    ) -> Self {
        let engine = SyncEngine::new(store, remote, network, config.request_timeout());
        let coordinator = SyncCoordinator::new(engine.clone(), config.sync_interval());
        Self {
            products: ProductService::new(engine.clone()),
            customers: CustomerService::new(engine.clone()),
            orders: OrderService::new(engine.clone()),
            sales: SaleService::new(engine.clone()),
            engine,
            coordinator,
        }
    }

    pub const fn engine(&self) -> &SyncEngine<R> {
        &self.engine
    }

    pub const fn coordinator(&self) -> &SyncCoordinator<R> {
        &self.coordinator
    }

    pub const fn store(&self) -> &LocalStore {
        self.engine.store()
    }

    pub const fn network(&self) -> &NetworkMonitor {
        self.engine.network()
    }
}
