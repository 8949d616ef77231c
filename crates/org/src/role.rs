//! Roles and the data-rule catalog they bind.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use storedesk_core::{DataRuleId, DomainResult, MenuId, RoleId, TenantId};

use crate::status::{like, require_text, Status};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Role {
    pub id: RoleId,
    pub name: String,
    pub status: Status,
    pub remark: Option<String>,
    pub tenant_id: Option<TenantId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleParams {
    pub name: String,
    #[serde(default)]
    pub status: Status,
    pub remark: Option<String>,
}

impl RoleParams {
    pub fn validate(&self) -> DomainResult<()> {
        require_text("role name", &self.name)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleFilter {
    pub name: Option<String>,
    pub status: Option<Status>,
}

impl RoleFilter {
    pub fn matches(&self, role: &Role) -> bool {
        like(&role.name, &self.name) && self.status.is_none_or(|s| s == role.status)
    }
}

/// A role together with its current bindings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleDetail {
    #[serde(flatten)]
    pub role: Role,
    pub menu_ids: Vec<MenuId>,
    pub rule_ids: Vec<DataRuleId>,
}

/// Row-level filter attached to roles. The core stores and binds these but
/// does not evaluate them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataRule {
    pub id: DataRuleId,
    pub name: String,
    pub model: String,
    pub column: String,
    pub operator: String,
    pub expression: String,
    pub value: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataRuleParams {
    pub name: String,
    pub model: String,
    pub column: String,
    pub operator: String,
    pub expression: String,
    pub value: String,
}

impl DataRuleParams {
    pub fn validate(&self) -> DomainResult<()> {
        require_text("rule name", &self.name)?;
        require_text("rule model", &self.model)?;
        require_text("rule column", &self.column)
    }
}
