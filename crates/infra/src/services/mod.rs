//! Application services (one per administered entity).
//!
//! Every mutating call follows the same pipeline:
//!
//! ```text
//! actor: &Principal
//!   ↓
//! 1. Resolve scope / menu partition (never trust ids alone)
//!   ↓
//! 2. Begin a unit of work
//!   ↓
//! 3. Check preconditions (existence in scope, uniqueness, tree shape)
//!   ↓
//! 4. Write, collecting the affected principals
//!   ↓
//! 5. Commit, then sweep the principal cache
//! ```
//!
//! A failed precondition returns early; the unit of work is dropped and
//! nothing is written. Department, menu and role services do not evaluate
//! permission strings themselves; callers gate them with
//! [`AccessService::authorize`]. User and tenant administration require a
//! superuser and enforce that internally.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use storedesk_core::DomainResult;

use crate::invalidation::Invalidator;
use crate::store::{Store, UnitOfWork};

pub mod access;
pub mod dept;
pub mod menu;
pub mod role;
pub mod rule;
pub mod tenant;
pub mod user;

pub use access::AccessService;
pub use dept::DeptService;
pub use menu::MenuService;
pub use role::RoleService;
pub use rule::DataRuleService;
pub use tenant::TenantService;
pub use user::UserService;

/// Shared handles every service needs.
#[derive(Clone)]
pub struct ServiceContext {
    store: Arc<dyn Store>,
    invalidator: Invalidator,
}

impl ServiceContext {
    pub fn new(store: Arc<dyn Store>, invalidator: Invalidator) -> Self {
        Self { store, invalidator }
    }

    pub fn invalidator(&self) -> &Invalidator {
        &self.invalidator
    }

    pub(crate) async fn begin(&self) -> DomainResult<Box<dyn UnitOfWork>> {
        Ok(self.store.begin().await?)
    }
}

pub(crate) fn now() -> DateTime<Utc> {
    Utc::now()
}
