//! Department entity.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use storedesk_core::{DeptId, DomainError, DomainResult, TenantId, TreeRecord};

use crate::status::{like, require_text, Status};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Department {
    pub id: DeptId,
    pub name: String,
    pub parent_id: Option<DeptId>,
    /// Depth in the tree; roots are level 0.
    pub level: i32,
    pub sort: i32,
    pub leader: Option<String>,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub status: Status,
    pub tenant_id: Option<TenantId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl TreeRecord for Department {
    type Key = DeptId;

    fn key(&self) -> DeptId {
        self.id
    }

    fn parent_key(&self) -> Option<DeptId> {
        self.parent_id
    }
}

/// Editable department fields, shared by create and update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeptParams {
    pub name: String,
    pub parent_id: Option<DeptId>,
    #[serde(default)]
    pub sort: i32,
    pub leader: Option<String>,
    pub phone: Option<String>,
    pub email: Option<String>,
    #[serde(default)]
    pub status: Status,
}

impl DeptParams {
    pub fn validate(&self) -> DomainResult<()> {
        require_text("department name", &self.name)
    }

    /// Reject pointing a department at itself.
    pub fn ensure_not_self_parent(&self, id: DeptId) -> DomainResult<()> {
        if self.parent_id == Some(id) {
            return Err(DomainError::forbidden("a department cannot be its own parent"));
        }
        Ok(())
    }
}

impl From<&Department> for DeptParams {
    fn from(dept: &Department) -> Self {
        Self {
            name: dept.name.clone(),
            parent_id: dept.parent_id,
            sort: dept.sort,
            leader: dept.leader.clone(),
            phone: dept.phone.clone(),
            email: dept.email.clone(),
            status: dept.status,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeptFilter {
    pub name: Option<String>,
    pub leader: Option<String>,
    pub phone: Option<String>,
    pub status: Option<Status>,
}

impl DeptFilter {
    pub fn matches(&self, dept: &Department) -> bool {
        like(&dept.name, &self.name)
            && like(dept.leader.as_deref().unwrap_or_default(), &self.leader)
            && like(dept.phone.as_deref().unwrap_or_default(), &self.phone)
            && self.status.is_none_or(|s| s == dept.status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(parent: Option<i64>) -> DeptParams {
        DeptParams {
            name: "Sales".into(),
            parent_id: parent.map(DeptId::new),
            sort: 0,
            leader: Some("Ana".into()),
            phone: None,
            email: None,
            status: Status::Enabled,
        }
    }

    #[test]
    fn self_parent_is_forbidden() {
        assert!(params(Some(4)).ensure_not_self_parent(DeptId::new(4)).unwrap_err().is_forbidden());
        assert!(params(Some(3)).ensure_not_self_parent(DeptId::new(4)).is_ok());
        assert!(params(None).ensure_not_self_parent(DeptId::new(4)).is_ok());
    }

    #[test]
    fn blank_name_fails_validation() {
        let mut p = params(None);
        p.name = "   ".into();
        assert!(matches!(p.validate(), Err(DomainError::Validation(_))));
    }

    #[test]
    fn filter_checks_optional_columns() {
        let dept = Department {
            id: DeptId::new(1),
            name: "Sales".into(),
            parent_id: None,
            level: 0,
            sort: 0,
            leader: None,
            phone: None,
            email: None,
            status: Status::Enabled,
            tenant_id: None,
            created_at: Utc::now(),
            updated_at: None,
        };
        assert!(DeptFilter::default().matches(&dept));
        let f = DeptFilter { leader: Some("ana".into()), ..Default::default() };
        assert!(!f.matches(&dept));
    }
}
