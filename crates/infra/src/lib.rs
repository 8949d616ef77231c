//! Infrastructure layer: storage, caching, configuration and services.

pub mod bootstrap;
pub mod cache;
pub mod config;
pub mod invalidation;
pub mod password;
pub mod services;
pub mod store;

pub use bootstrap::{bootstrap, Engine};
pub use config::{ConfigError, Settings};
pub use invalidation::{AffectedPrincipals, Invalidator, MutationOutcome, SessionRevocation};
