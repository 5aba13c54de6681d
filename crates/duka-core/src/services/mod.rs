//! Services shared by every client of the sync subsystem.

mod database;
mod entity;

pub use database::LocalStore;
pub use entity::{
    CustomerService, EntityService, Mutation, MutationStatus, OrderService, ProductService,
    SaleService,
};
