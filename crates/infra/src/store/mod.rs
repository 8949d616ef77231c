//! Transactional persistence boundary.
//!
//! Services talk to storage exclusively through [`UnitOfWork`]s handed out by
//! a [`Store`]. Two implementations exist: an in-memory store for tests and
//! development, and a Postgres store for production.

pub mod in_memory;
pub mod postgres;
pub mod r#trait;

pub use in_memory::InMemoryStore;
pub use postgres::PostgresStore;
pub use r#trait::{NewUser, Store, StoreError, StoreResult, UnitOfWork};
