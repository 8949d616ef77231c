//! Visibility partitions.
//!
//! Two independent partitions are threaded through every query:
//!
//! - [`Scope`] decides which tenant-owned rows (departments, roles, users)
//!   are visible. Platform rows carry no tenant id.
//! - [`MenuPartition`] splits the menu catalog into the platform-admin
//!   universe and the tenant-facing universe. They never intermix.

use serde::{Deserialize, Serialize};

use crate::error::{DomainError, DomainResult};
use crate::id::TenantId;

/// Which menu catalog a row belongs to (the `is_admin` column).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MenuPartition {
    /// Platform administration menus (`is_admin = 1`).
    Platform,
    /// Tenant-facing menus (`is_admin = 0`).
    Tenant,
}

impl MenuPartition {
    pub fn is_admin(self) -> bool {
        matches!(self, MenuPartition::Platform)
    }

    /// Column value stored in `sys_menu.is_admin`.
    pub fn as_flag(self) -> i16 {
        match self {
            MenuPartition::Platform => 1,
            MenuPartition::Tenant => 0,
        }
    }

    pub fn from_flag(flag: i16) -> DomainResult<Self> {
        match flag {
            1 => Ok(MenuPartition::Platform),
            0 => Ok(MenuPartition::Tenant),
            other => Err(DomainError::validation(format!(
                "is_admin must be 0 or 1, got {other}"
            ))),
        }
    }
}

/// Ownership scope applied to every Department / Role / User query.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "tenant_id", rename_all = "snake_case")]
pub enum Scope {
    /// The platform's own organisation (rows with no tenant id).
    Platform,
    /// A single tenant's organisation.
    Tenant(TenantId),
}

impl Scope {
    pub fn tenant_id(self) -> Option<TenantId> {
        match self {
            Scope::Platform => None,
            Scope::Tenant(id) => Some(id),
        }
    }

    pub fn is_platform(self) -> bool {
        matches!(self, Scope::Platform)
    }

    /// Menu catalog that matches this scope.
    pub fn menu_partition(self) -> MenuPartition {
        match self {
            Scope::Platform => MenuPartition::Platform,
            Scope::Tenant(_) => MenuPartition::Tenant,
        }
    }

    /// Whether a row owned by `owner` is visible from this scope.
    ///
    /// A row outside the scope must be treated exactly like a missing row.
    pub fn owns(self, owner: Option<TenantId>) -> bool {
        self.tenant_id() == owner
    }
}

impl core::fmt::Display for Scope {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Scope::Platform => f.write_str("platform"),
            Scope::Tenant(id) => write!(f, "tenant:{id}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tenant_scope_only_owns_its_rows() {
        let t1 = TenantId::new(1);
        let t2 = TenantId::new(2);
        let scope = Scope::Tenant(t1);

        assert!(scope.owns(Some(t1)));
        assert!(!scope.owns(Some(t2)));
        assert!(!scope.owns(None));
        assert_eq!(scope.menu_partition(), MenuPartition::Tenant);
    }

    #[test]
    fn platform_scope_owns_unowned_rows() {
        assert!(Scope::Platform.owns(None));
        assert!(!Scope::Platform.owns(Some(TenantId::new(7))));
        assert_eq!(Scope::Platform.menu_partition(), MenuPartition::Platform);
    }

    #[test]
    fn partition_flag_round_trips_and_rejects_unknown() {
        assert_eq!(MenuPartition::from_flag(1).unwrap(), MenuPartition::Platform);
        assert_eq!(MenuPartition::from_flag(0).unwrap(), MenuPartition::Tenant);
        assert!(MenuPartition::from_flag(2).is_err());
    }
}
