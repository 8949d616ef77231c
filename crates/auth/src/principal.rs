//! Resolved principal profile.
//!
//! A [`Principal`] is the cached snapshot of a user plus every role grant
//! needed to answer authorization questions without touching storage.

use serde::{Deserialize, Serialize};

use storedesk_core::{DeptId, MenuId, MenuPartition, RoleId, TenantId, UserId};
use storedesk_org::{Menu, MenuType, Role, Status, User, UserType};

/// A menu row as seen through a role grant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MenuGrant {
    pub menu_id: MenuId,
    pub menu_type: MenuType,
    pub perms: Option<String>,
    pub status: Status,
    pub partition: MenuPartition,
}

impl From<&Menu> for MenuGrant {
    fn from(menu: &Menu) -> Self {
        Self {
            menu_id: menu.id,
            menu_type: menu.menu_type,
            perms: menu.perms.clone(),
            status: menu.status,
            partition: menu.partition,
        }
    }
}

impl MenuGrant {
    /// Permission strings granted by this entry inside `partition`.
    pub fn perms_in(&self, partition: MenuPartition) -> impl Iterator<Item = &str> {
        let active = self.partition == partition
            && self.status.is_enabled()
            && self.menu_type.grants_permission();
        self.perms
            .as_deref()
            .filter(|_| active)
            .into_iter()
            .flat_map(|p| p.split(','))
            .map(str::trim)
            .filter(|p| !p.is_empty())
    }
}

/// A role held by the principal, with the menus bound to it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleGrant {
    pub role_id: RoleId,
    pub name: String,
    pub status: Status,
    pub menus: Vec<MenuGrant>,
}

impl RoleGrant {
    pub fn new(role: &Role, menus: &[Menu]) -> Self {
        Self {
            role_id: role.id,
            name: role.name.clone(),
            status: role.status,
            menus: menus.iter().map(MenuGrant::from).collect(),
        }
    }
}

/// A fully resolved principal for authorization decisions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub user_id: UserId,
    pub username: String,
    pub phone: String,
    pub user_type: UserType,
    pub tenant_id: Option<TenantId>,
    pub dept_id: Option<DeptId>,
    pub is_superuser: bool,
    pub is_staff: bool,
    pub is_multi_login: bool,
    pub status: Status,
    pub roles: Vec<RoleGrant>,
}

impl Principal {
    pub fn from_user(user: &User, roles: Vec<RoleGrant>) -> Self {
        Self {
            user_id: user.id,
            username: user.username.clone(),
            phone: user.phone.clone(),
            user_type: user.user_type.clone(),
            tenant_id: user.tenant_id,
            dept_id: user.dept_id,
            is_superuser: user.is_superuser,
            is_staff: user.is_staff,
            is_multi_login: user.is_multi_login,
            status: user.status,
            roles,
        }
    }

    pub fn is_platform(&self) -> bool {
        self.user_type.is_platform()
    }

    pub fn is_active(&self) -> bool {
        self.status.is_enabled()
    }

    pub fn role_ids(&self) -> Vec<RoleId> {
        self.roles.iter().map(|r| r.role_id).collect()
    }

    pub fn enabled_roles(&self) -> impl Iterator<Item = &RoleGrant> {
        self.roles.iter().filter(|r| r.status.is_enabled())
    }
}
