//! Tenant (store) entity and its review lifecycle.
//!
//! ```text
//! Pending ──review──▶ Active
//!    │                  ✗ (terminal for review)
//!    └────review──▶ Rejected ──review──▶ Active | Rejected
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use storedesk_core::{DomainError, DomainResult, TenantId, UserId};

use crate::status::{like, require_text};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TenantStatus {
    /// Submitted, waiting for a platform reviewer.
    #[default]
    Pending,
    /// Approved and operating.
    Active,
    /// Refused; may be reviewed again after resubmission.
    Rejected,
}

impl TenantStatus {
    pub fn as_code(self) -> i16 {
        match self {
            TenantStatus::Pending => 0,
            TenantStatus::Active => 1,
            TenantStatus::Rejected => 2,
        }
    }

    pub fn from_code(code: i16) -> DomainResult<Self> {
        match code {
            0 => Ok(TenantStatus::Pending),
            1 => Ok(TenantStatus::Active),
            2 => Ok(TenantStatus::Rejected),
            other => Err(DomainError::validation(format!("unknown tenant status {other}"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tenant {
    pub id: TenantId,
    pub name: String,
    pub code: String,
    pub province_id: i64,
    pub city_id: i64,
    pub area_id: i64,
    pub address: Option<String>,
    pub logo: Option<String>,
    pub remark: Option<String>,
    pub status: TenantStatus,
    pub created_by: Option<UserId>,
    pub updated_by: Option<UserId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

/// Fields supplied when registering or editing a tenant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TenantParams {
    pub name: String,
    pub code: String,
    pub province_id: i64,
    pub city_id: i64,
    pub area_id: i64,
    pub address: Option<String>,
    pub logo: Option<String>,
}

impl TenantParams {
    pub fn validate(&self) -> DomainResult<()> {
        require_text("tenant name", &self.name)?;
        require_text("tenant code", &self.code)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewTenant {
    pub status: TenantStatus,
    pub remark: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TenantFilter {
    pub name: Option<String>,
    pub code: Option<String>,
    pub status: Option<TenantStatus>,
}

impl TenantFilter {
    pub fn matches(&self, tenant: &Tenant) -> bool {
        like(&tenant.name, &self.name)
            && like(&tenant.code, &self.code)
            && self.status.is_none_or(|s| s == tenant.status)
    }
}

impl Tenant {
    /// Apply an edit. The tenant code is immutable once registered.
    pub fn apply_update(
        &mut self,
        params: &TenantParams,
        actor: UserId,
        now: DateTime<Utc>,
    ) -> DomainResult<()> {
        params.validate()?;
        if params.code != self.code {
            return Err(DomainError::forbidden("tenant code cannot be changed"));
        }
        self.name = params.name.clone();
        self.province_id = params.province_id;
        self.city_id = params.city_id;
        self.area_id = params.area_id;
        self.address = params.address.clone();
        self.logo = params.logo.clone();
        self.updated_by = Some(actor);
        self.updated_at = Some(now);
        Ok(())
    }

    /// Record a platform review decision.
    pub fn review(
        &mut self,
        review: &ReviewTenant,
        reviewer: UserId,
        now: DateTime<Utc>,
    ) -> DomainResult<()> {
        if self.status == TenantStatus::Active {
            return Err(DomainError::forbidden("tenant is already approved"));
        }
        let remark = review.remark.as_deref().map(str::trim).filter(|r| !r.is_empty());
        match review.status {
            TenantStatus::Pending => {
                return Err(DomainError::validation("review must approve or reject"));
            }
            TenantStatus::Rejected if remark.is_none() => {
                return Err(DomainError::forbidden("a rejection requires a reason"));
            }
            _ => {}
        }
        self.status = review.status;
        self.remark = remark.map(str::to_owned);
        self.updated_by = Some(reviewer);
        self.updated_at = Some(now);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tenant(status: TenantStatus) -> Tenant {
        Tenant {
            id: TenantId::new(1),
            name: "Corner Store".into(),
            code: "CS01".into(),
            province_id: 1,
            city_id: 2,
            area_id: 3,
            address: None,
            logo: None,
            remark: None,
            status,
            created_by: None,
            updated_by: None,
            created_at: Utc::now(),
            updated_at: None,
        }
    }

    fn params(code: &str) -> TenantParams {
        TenantParams {
            name: "Corner Store 2".into(),
            code: code.into(),
            province_id: 1,
            city_id: 2,
            area_id: 3,
            address: Some("Main St".into()),
            logo: None,
        }
    }

    fn review(status: TenantStatus, remark: Option<&str>) -> ReviewTenant {
        ReviewTenant { status, remark: remark.map(Into::into) }
    }

    #[test]
    fn update_keeps_code_immutable() {
        let mut t = tenant(TenantStatus::Pending);
        let err = t.apply_update(&params("OTHER"), UserId::new(9), Utc::now()).unwrap_err();
        assert!(err.is_forbidden());

        t.apply_update(&params("CS01"), UserId::new(9), Utc::now()).unwrap();
        assert_eq!(t.name, "Corner Store 2");
        assert_eq!(t.updated_by, Some(UserId::new(9)));
    }

    #[test]
    fn active_tenant_cannot_be_reviewed_again() {
        let mut t = tenant(TenantStatus::Active);
        let err = t.review(&review(TenantStatus::Rejected, Some("x")), UserId::new(1), Utc::now());
        assert!(err.unwrap_err().is_forbidden());
    }

    #[test]
    fn rejection_requires_reason() {
        let mut t = tenant(TenantStatus::Pending);
        let err = t.review(&review(TenantStatus::Rejected, Some("  ")), UserId::new(1), Utc::now());
        assert!(err.unwrap_err().is_forbidden());
        assert_eq!(t.status, TenantStatus::Pending);

        t.review(&review(TenantStatus::Rejected, Some("blurry licence")), UserId::new(1), Utc::now())
            .unwrap();
        assert_eq!(t.status, TenantStatus::Rejected);
        assert_eq!(t.remark.as_deref(), Some("blurry licence"));
    }

    #[test]
    fn rejected_tenant_can_be_approved_later() {
        let mut t = tenant(TenantStatus::Rejected);
        t.review(&review(TenantStatus::Active, None), UserId::new(1), Utc::now()).unwrap();
        assert_eq!(t.status, TenantStatus::Active);
    }

    #[test]
    fn filter_matches_substring_and_status() {
        let t = tenant(TenantStatus::Pending);
        let f = TenantFilter { name: Some("corner".into()), ..Default::default() };
        assert!(f.matches(&t));
        let f = TenantFilter { status: Some(TenantStatus::Active), ..Default::default() };
        assert!(!f.matches(&t));
    }
}
