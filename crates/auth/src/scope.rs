//! Principal → visibility partition.

use storedesk_core::{DomainError, DomainResult, MenuPartition, Scope};

use crate::Principal;

/// Which organisation rows the principal may see.
///
/// Platform accounts act on platform-owned rows; every other account type
/// is confined to its own tenant. A non-platform account without a tenant
/// is malformed and may not act at all.
pub fn resolve_scope(principal: &Principal) -> DomainResult<Scope> {
    if principal.is_platform() {
        return Ok(Scope::Platform);
    }
    principal.tenant_id.map(Scope::Tenant).ok_or_else(|| {
        DomainError::unauthorized(format!(
            "user {} has no tenant for user type {}",
            principal.user_id,
            principal.user_type.code()
        ))
    })
}

/// Which menu catalog the principal works against.
///
/// Platform accounts use the admin catalog unless they are explicitly
/// looking at a tenant-facing tree (e.g. editing a tenant role template).
pub fn resolve_menu_partition(principal: &Principal, viewing_tenant: bool) -> MenuPartition {
    if principal.is_platform() && !viewing_tenant {
        MenuPartition::Platform
    } else {
        MenuPartition::Tenant
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::principal;
    use storedesk_core::TenantId;
    use storedesk_org::UserType;

    #[test]
    fn platform_user_resolves_to_platform_scope() {
        let p = principal(UserType::Platform, None);
        assert_eq!(resolve_scope(&p).unwrap(), Scope::Platform);
        assert_eq!(resolve_menu_partition(&p, false), MenuPartition::Platform);
        assert_eq!(resolve_menu_partition(&p, true), MenuPartition::Tenant);
    }

    #[test]
    fn tenant_user_is_confined_to_its_tenant() {
        let p = principal(UserType::TenantStaff, Some(TenantId::new(3)));
        assert_eq!(resolve_scope(&p).unwrap(), Scope::Tenant(TenantId::new(3)));
        assert_eq!(resolve_menu_partition(&p, false), MenuPartition::Tenant);
    }

    #[test]
    fn other_codes_are_scoped_like_tenant_staff() {
        let p = principal(UserType::Other("31".into()), Some(TenantId::new(4)));
        assert_eq!(resolve_scope(&p).unwrap(), Scope::Tenant(TenantId::new(4)));
    }

    #[test]
    fn tenant_user_without_tenant_is_unauthorized() {
        let p = principal(UserType::TenantStaff, None);
        assert!(resolve_scope(&p).unwrap_err().is_unauthorized());
    }
}
