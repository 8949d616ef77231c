//! `storedesk-auth`: pure authorization boundary.
//!
//! This crate is decoupled from HTTP and storage: it only sees resolved
//! [`Principal`] snapshots.

pub mod authorize;
pub mod permissions;
pub mod principal;
pub mod scope;

pub use authorize::{
    authorize, check_permission, effective_permissions, explain_authorization, require_superuser,
    AuthorizationExplanation, AuthzError, DenialKind,
};
pub use permissions::Permission;
pub use principal::{MenuGrant, Principal, RoleGrant};
pub use scope::{resolve_menu_partition, resolve_scope};

#[cfg(test)]
pub(crate) mod test_support {
    use chrono::Utc;
    use storedesk_core::{MenuId, MenuPartition, RoleId, TenantId, UserId};
    use storedesk_org::{MenuType, Status, User, UserType};

    use crate::{MenuGrant, Principal, RoleGrant};

    pub fn principal(user_type: UserType, tenant_id: Option<TenantId>) -> Principal {
        let user = User {
            id: UserId::new(1),
            username: "ana".into(),
            nickname: "Ana".into(),
            phone: "13800000001".into(),
            email: None,
            avatar: None,
            password_hash: String::new(),
            salt: None,
            dept_id: None,
            tenant_id,
            user_type,
            is_superuser: false,
            is_staff: false,
            is_multi_login: false,
            status: Status::Enabled,
            join_time: Utc::now(),
            last_login_time: None,
        };
        Principal::from_user(&user, Vec::new())
    }

    pub fn menu_grant(id: i64, perms: &str) -> MenuGrant {
        MenuGrant {
            menu_id: MenuId::new(id),
            menu_type: MenuType::Button,
            perms: Some(perms.to_string()),
            status: Status::Enabled,
            partition: MenuPartition::Tenant,
        }
    }

    pub fn grant(id: i64, status: Status, menus: Vec<MenuGrant>) -> RoleGrant {
        RoleGrant {
            role_id: RoleId::new(id),
            name: format!("role-{id}"),
            status,
            menus,
        }
    }
}
