use std::collections::BTreeSet;

use serde::Serialize;
use thiserror::Error;

use storedesk_core::{DomainError, RoleId, TenantId, UserId};

use crate::scope::resolve_menu_partition;
use crate::{Permission, Principal};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthzError {
    #[error("account is disabled")]
    Inactive,

    #[error("account is not allowed to use the admin backend")]
    NotStaff,

    #[error("missing permission '{0}'")]
    MissingPermission(String),

    #[error("superuser privileges required")]
    NotSuperuser,
}

impl From<AuthzError> for DomainError {
    fn from(err: AuthzError) -> Self {
        DomainError::unauthorized(err.to_string())
    }
}

/// Permission strings granted by the principal's enabled roles.
///
/// Only enabled pages and buttons in the principal's own menu partition
/// contribute. Superusers are not expanded here; they bypass the set.
pub fn effective_permissions(principal: &Principal) -> BTreeSet<String> {
    let partition = resolve_menu_partition(principal, false);
    principal
        .enabled_roles()
        .flat_map(|role| role.menus.iter())
        .flat_map(|menu| menu.perms_in(partition))
        .map(str::to_owned)
        .collect()
}

/// Authorize a principal for `required`.
///
/// - No IO
/// - No panics
///
/// Order: superuser allow, then disabled/non-staff deny, then membership in
/// the effective permission set.
pub fn authorize(principal: &Principal, required: &Permission) -> Result<(), AuthzError> {
    if principal.is_superuser {
        return Ok(());
    }
    if !principal.is_active() {
        return Err(AuthzError::Inactive);
    }
    if !principal.is_staff {
        return Err(AuthzError::NotStaff);
    }
    if effective_permissions(principal).contains(required.as_str()) {
        Ok(())
    } else {
        Err(AuthzError::MissingPermission(required.as_str().to_string()))
    }
}

/// Boolean form of [`authorize`].
pub fn check_permission(principal: &Principal, required: &Permission) -> bool {
    authorize(principal, required).is_ok()
}

/// Gate for user and tenant administration.
pub fn require_superuser(principal: &Principal) -> Result<(), AuthzError> {
    if principal.is_superuser {
        Ok(())
    } else {
        Err(AuthzError::NotSuperuser)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Authorization Explanation (Audit Trail)
// ─────────────────────────────────────────────────────────────────────────────

/// Detailed explanation of an authorization decision.
#[derive(Debug, Clone, Serialize)]
pub struct AuthorizationExplanation {
    pub required_permission: String,
    pub granted: bool,
    pub reason: String,
    pub principal: PrincipalState,
    pub denial_reason: Option<DenialReason>,
}

/// Snapshot of the principal at decision time.
#[derive(Debug, Clone, Serialize)]
pub struct PrincipalState {
    pub user_id: UserId,
    pub tenant_id: Option<TenantId>,
    pub user_type: String,
    pub is_superuser: bool,
    pub is_staff: bool,
    pub active: bool,
    pub roles: Vec<String>,
    pub effective_permissions: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DenialReason {
    pub kind: DenialKind,
    pub message: String,
    pub suggestions: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DenialKind {
    Inactive,
    NotStaff,
    MissingPermission,
}

/// Explain why an authorization decision was made (or would be made).
///
/// Mirrors [`authorize`] step by step and records which rule decided.
pub fn explain_authorization(principal: &Principal, required: &Permission) -> AuthorizationExplanation {
    let required_str = required.as_str();
    let effective = effective_permissions(principal);
    let state = PrincipalState {
        user_id: principal.user_id,
        tenant_id: principal.tenant_id,
        user_type: principal.user_type.code().to_string(),
        is_superuser: principal.is_superuser,
        is_staff: principal.is_staff,
        active: principal.is_active(),
        roles: principal.roles.iter().map(|r| r.name.clone()).collect(),
        effective_permissions: effective.iter().cloned().collect(),
    };

    let denial = match authorize(principal, required) {
        Ok(()) => None,
        Err(AuthzError::Inactive) => Some(DenialReason {
            kind: DenialKind::Inactive,
            message: "The account is disabled".to_string(),
            suggestions: vec!["Re-enable the account before retrying".to_string()],
        }),
        Err(AuthzError::NotStaff) => Some(DenialReason {
            kind: DenialKind::NotStaff,
            message: "The account is not flagged as staff".to_string(),
            suggestions: vec!["Grant the staff flag to allow back-office access".to_string()],
        }),
        Err(_) => {
            let granting_roles: Vec<RoleId> = principal
                .roles
                .iter()
                .filter(|r| !r.status.is_enabled())
                .filter(|r| {
                    r.menus
                        .iter()
                        .any(|m| m.perms.as_deref().is_some_and(|p| p.split(',').any(|s| s.trim() == required_str)))
                })
                .map(|r| r.role_id)
                .collect();

            let mut suggestions = vec![format!(
                "Bind a menu carrying '{required_str}' to one of the principal's roles"
            )];
            if !granting_roles.is_empty() {
                suggestions.insert(
                    0,
                    format!("Disabled roles {granting_roles:?} would grant this permission if enabled"),
                );
            }
            Some(DenialReason {
                kind: DenialKind::MissingPermission,
                message: format!("Missing required permission: '{required_str}'"),
                suggestions,
            })
        }
    };

    let reason = match &denial {
        None if principal.is_superuser => "Principal is a superuser".to_string(),
        None => format!("Principal has permission '{required_str}'"),
        Some(d) => d.message.clone(),
    };

    AuthorizationExplanation {
        required_permission: required_str.to_string(),
        granted: denial.is_none(),
        reason,
        principal: state,
        denial_reason: denial,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{grant, menu_grant, principal};
    use proptest::prelude::*;
    use storedesk_core::{MenuPartition, TenantId};
    use storedesk_org::{MenuType, Status, UserType};

    fn staff(roles: Vec<crate::RoleGrant>) -> Principal {
        let mut p = principal(UserType::TenantStaff, Some(TenantId::new(1)));
        p.is_staff = true;
        p.roles = roles;
        p
    }

    fn perm(s: &'static str) -> Permission {
        Permission::new(s)
    }

    #[test]
    fn superuser_bypasses_everything() {
        let mut p = principal(UserType::TenantStaff, Some(TenantId::new(1)));
        p.is_superuser = true;
        p.is_staff = false;
        p.status = Status::Disabled;
        assert!(check_permission(&p, &perm("anything:at:all")));
    }

    #[test]
    fn non_staff_is_denied_even_with_grant() {
        let mut p = staff(vec![grant(1, Status::Enabled, vec![menu_grant(1, "sys:user:add")])]);
        p.is_staff = false;
        assert_eq!(authorize(&p, &perm("sys:user:add")), Err(AuthzError::NotStaff));
    }

    #[test]
    fn disabled_account_is_denied() {
        let mut p = staff(vec![grant(1, Status::Enabled, vec![menu_grant(1, "sys:user:add")])]);
        p.status = Status::Disabled;
        assert_eq!(authorize(&p, &perm("sys:user:add")), Err(AuthzError::Inactive));
    }

    #[test]
    fn permission_is_union_over_roles() {
        let p = staff(vec![
            grant(1, Status::Enabled, vec![menu_grant(1, "sys:user:add")]),
            grant(2, Status::Enabled, vec![menu_grant(2, "sys:role:edit")]),
        ]);
        assert!(check_permission(&p, &perm("sys:user:add")));
        assert!(check_permission(&p, &perm("sys:role:edit")));
        assert!(!check_permission(&p, &perm("sys:dept:del")));
    }

    #[test]
    fn disabled_roles_and_menus_grant_nothing() {
        let mut off_menu = menu_grant(2, "sys:dept:add");
        off_menu.status = Status::Disabled;
        let p = staff(vec![
            grant(1, Status::Disabled, vec![menu_grant(1, "sys:user:add")]),
            grant(2, Status::Enabled, vec![off_menu]),
        ]);
        assert!(!check_permission(&p, &perm("sys:user:add")));
        assert!(!check_permission(&p, &perm("sys:dept:add")));
    }

    #[test]
    fn directories_and_foreign_partition_grant_nothing() {
        let mut dir = menu_grant(1, "sys:user");
        dir.menu_type = MenuType::Directory;
        let mut admin = menu_grant(2, "store:review");
        admin.partition = MenuPartition::Platform;
        let p = staff(vec![grant(1, Status::Enabled, vec![dir, admin])]);
        assert!(!check_permission(&p, &perm("sys:user")));
        assert!(!check_permission(&p, &perm("store:review")));
    }

    #[test]
    fn require_superuser_gate() {
        let mut p = staff(vec![]);
        assert_eq!(require_superuser(&p), Err(AuthzError::NotSuperuser));
        p.is_superuser = true;
        assert!(require_superuser(&p).is_ok());
        let err: DomainError = AuthzError::NotSuperuser.into();
        assert!(err.is_unauthorized());
    }

    #[test]
    fn explanation_points_at_disabled_role() {
        let p = staff(vec![grant(7, Status::Disabled, vec![menu_grant(1, "sys:user:add")])]);
        let explanation = explain_authorization(&p, &perm("sys:user:add"));
        assert!(!explanation.granted);
        let denial = explanation.denial_reason.unwrap();
        assert_eq!(denial.kind, DenialKind::MissingPermission);
        assert!(denial.suggestions[0].contains("Disabled roles"));
    }

    #[test]
    fn explanation_for_grant_lists_effective_set() {
        let p = staff(vec![grant(1, Status::Enabled, vec![menu_grant(1, "b:x"), menu_grant(2, "a:y")])]);
        let explanation = explain_authorization(&p, &perm("a:y"));
        assert!(explanation.granted);
        assert_eq!(explanation.principal.effective_permissions, vec!["a:y", "b:x"]);
        assert!(explanation.denial_reason.is_none());
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 256,
            ..ProptestConfig::default()
        })]

        /// Property: for an active staff member, the decision equals
        /// membership in the union of enabled roles' perms.
        #[test]
        fn decision_matches_union_of_enabled_roles(
            roles in prop::collection::vec(
                (any::<bool>(), prop::collection::vec(0u8..6, 0..4)),
                0..5,
            ),
            probe in 0u8..6,
        ) {
            let mut expected = false;
            let grants = roles
                .iter()
                .enumerate()
                .map(|(i, (enabled, perms))| {
                    let menus = perms
                        .iter()
                        .enumerate()
                        .map(|(j, n)| {
                            let mut m = menu_grant((i * 10 + j) as i64 + 1, "");
                            m.perms = Some(format!("p:{n}"));
                            m
                        })
                        .collect();
                    if *enabled && perms.contains(&probe) {
                        expected = true;
                    }
                    grant(i as i64 + 1, Status::from(*enabled), menus)
                })
                .collect();
            let p = staff(grants);
            let required = Permission::new(format!("p:{probe}"));
            prop_assert_eq!(check_permission(&p, &required), expected);
        }
    }
}
