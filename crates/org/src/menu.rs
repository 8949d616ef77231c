//! Menu catalog entries.
//!
//! A menu row is a directory, a navigable page, or a button. Pages and
//! buttons carry the permission strings (`perms`) that roles grant.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use storedesk_core::{DomainError, DomainResult, MenuId, MenuPartition, TreeRecord};

use crate::status::{like, require_text, Status};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MenuType {
    Directory,
    Menu,
    Button,
}

impl MenuType {
    pub fn as_code(self) -> i16 {
        match self {
            MenuType::Directory => 0,
            MenuType::Menu => 1,
            MenuType::Button => 2,
        }
    }

    pub fn from_code(code: i16) -> DomainResult<Self> {
        match code {
            0 => Ok(MenuType::Directory),
            1 => Ok(MenuType::Menu),
            2 => Ok(MenuType::Button),
            other => Err(DomainError::validation(format!("unknown menu type {other}"))),
        }
    }

    /// Directories only group; pages and buttons grant `perms`.
    pub fn grants_permission(self) -> bool {
        !matches!(self, MenuType::Directory)
    }

    /// Buttons repeat their titles under many parents.
    pub fn has_unique_title(self) -> bool {
        !matches!(self, MenuType::Button)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Menu {
    pub id: MenuId,
    pub title: String,
    pub name: Option<String>,
    pub parent_id: Option<MenuId>,
    pub sort: i32,
    pub icon: Option<String>,
    pub path: Option<String>,
    pub menu_type: MenuType,
    pub component: Option<String>,
    pub perms: Option<String>,
    pub status: Status,
    pub show: bool,
    pub cache: bool,
    pub remark: Option<String>,
    pub partition: MenuPartition,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl TreeRecord for Menu {
    type Key = MenuId;

    fn key(&self) -> MenuId {
        self.id
    }

    fn parent_key(&self) -> Option<MenuId> {
        self.parent_id
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MenuParams {
    pub title: String,
    pub name: Option<String>,
    pub parent_id: Option<MenuId>,
    #[serde(default)]
    pub sort: i32,
    pub icon: Option<String>,
    pub path: Option<String>,
    pub menu_type: MenuType,
    pub component: Option<String>,
    pub perms: Option<String>,
    #[serde(default)]
    pub status: Status,
    #[serde(default = "default_true")]
    pub show: bool,
    #[serde(default = "default_true")]
    pub cache: bool,
    pub remark: Option<String>,
}

fn default_true() -> bool {
    true
}

impl MenuParams {
    pub fn validate(&self) -> DomainResult<()> {
        require_text("menu title", &self.title)
    }

    pub fn ensure_not_self_parent(&self, id: MenuId) -> DomainResult<()> {
        if self.parent_id == Some(id) {
            return Err(DomainError::forbidden("a menu cannot be its own parent"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MenuFilter {
    pub title: Option<String>,
    pub status: Option<Status>,
}

impl MenuFilter {
    pub fn matches(&self, menu: &Menu) -> bool {
        like(&menu.title, &self.title) && self.status.is_none_or(|s| s == menu.status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn menu_type_codes() {
        for ty in [MenuType::Directory, MenuType::Menu, MenuType::Button] {
            assert_eq!(MenuType::from_code(ty.as_code()).unwrap(), ty);
        }
        assert!(MenuType::from_code(5).is_err());
        assert!(!MenuType::Button.has_unique_title());
        assert!(!MenuType::Directory.grants_permission());
    }

    #[test]
    fn filter_matches_title_case_insensitively() {
        let f = MenuFilter { title: Some("USER".into()), status: Some(Status::Enabled) };
        let mut m = Menu {
            id: MenuId::new(1),
            title: "Users".into(),
            name: None,
            parent_id: None,
            sort: 0,
            icon: None,
            path: None,
            menu_type: MenuType::Menu,
            component: None,
            perms: None,
            status: Status::Enabled,
            show: true,
            cache: true,
            remark: None,
            partition: MenuPartition::Tenant,
            created_at: Utc::now(),
            updated_at: None,
        };
        assert!(f.matches(&m));
        m.status = Status::Disabled;
        assert!(!f.matches(&m));
    }
}
