//! Back-office accounts.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use storedesk_core::{DeptId, DomainError, DomainResult, RoleId, TenantId, UserId};

use crate::status::{like, require_text, Status};

/// Account class. Drives the visibility scope of everything the user does.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum UserType {
    /// Platform operator (`"00"`).
    Platform,
    /// Store employee (`"20"`).
    TenantStaff,
    /// Any other code; scoped like tenant staff.
    Other(String),
}

impl UserType {
    pub const PLATFORM_CODE: &'static str = "00";
    pub const TENANT_STAFF_CODE: &'static str = "20";

    pub fn code(&self) -> &str {
        match self {
            UserType::Platform => Self::PLATFORM_CODE,
            UserType::TenantStaff => Self::TENANT_STAFF_CODE,
            UserType::Other(code) => code,
        }
    }

    pub fn from_code(code: &str) -> Self {
        match code.trim() {
            Self::PLATFORM_CODE => UserType::Platform,
            Self::TENANT_STAFF_CODE => UserType::TenantStaff,
            other => UserType::Other(other.to_owned()),
        }
    }

    pub fn is_platform(&self) -> bool {
        matches!(self, UserType::Platform)
    }
}

impl Serialize for UserType {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.code())
    }
}

impl<'de> Deserialize<'de> for UserType {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let code = String::deserialize(deserializer)?;
        Ok(UserType::from_code(&code))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub username: String,
    pub nickname: String,
    pub phone: String,
    pub email: Option<String>,
    pub avatar: Option<String>,
    #[serde(skip_serializing, default)]
    pub password_hash: String,
    #[serde(skip_serializing, default)]
    pub salt: Option<String>,
    pub dept_id: Option<DeptId>,
    pub tenant_id: Option<TenantId>,
    pub user_type: UserType,
    pub is_superuser: bool,
    pub is_staff: bool,
    pub is_multi_login: bool,
    pub status: Status,
    pub join_time: DateTime<Utc>,
    pub last_login_time: Option<DateTime<Utc>>,
}

/// Boolean account switches an administrator may flip.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserFlag {
    Superuser,
    Staff,
    Status,
    MultiLogin,
}

impl UserFlag {
    /// Whether an administrator may flip this flag on their own account.
    pub fn self_toggle_allowed(self) -> bool {
        matches!(self, UserFlag::MultiLogin)
    }

    pub fn column(self) -> &'static str {
        match self {
            UserFlag::Superuser => "is_superuser",
            UserFlag::Staff => "is_staff",
            UserFlag::Status => "status",
            UserFlag::MultiLogin => "is_multi_login",
        }
    }
}

impl User {
    pub fn flag(&self, flag: UserFlag) -> bool {
        match flag {
            UserFlag::Superuser => self.is_superuser,
            UserFlag::Staff => self.is_staff,
            UserFlag::Status => self.status.is_enabled(),
            UserFlag::MultiLogin => self.is_multi_login,
        }
    }

    pub fn set_flag(&mut self, flag: UserFlag, value: bool) {
        match flag {
            UserFlag::Superuser => self.is_superuser = value,
            UserFlag::Staff => self.is_staff = value,
            UserFlag::Status => self.status = Status::from(value),
            UserFlag::MultiLogin => self.is_multi_login = value,
        }
    }
}

/// New account created by an administrator inside their own scope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddUser {
    pub username: Option<String>,
    pub nickname: Option<String>,
    pub phone: String,
    pub password: String,
    pub email: Option<String>,
    pub dept_id: DeptId,
    #[serde(default)]
    pub roles: Vec<RoleId>,
}

impl AddUser {
    pub fn validate(&self) -> DomainResult<()> {
        require_text("phone", &self.phone)?;
        if self.password.is_empty() {
            return Err(DomainError::forbidden("password is empty"));
        }
        Ok(())
    }

    /// Username falls back to the phone number.
    pub fn resolved_username(&self) -> String {
        self.username
            .as_deref()
            .map(str::trim)
            .filter(|u| !u.is_empty())
            .unwrap_or(&self.phone)
            .to_owned()
    }

    /// Nickname falls back to `user` plus the last four phone digits.
    pub fn resolved_nickname(&self) -> String {
        if let Some(n) = self.nickname.as_deref().map(str::trim).filter(|n| !n.is_empty()) {
            return n.to_owned();
        }
        let digits: Vec<char> = self.phone.chars().collect();
        let tail: String = digits[digits.len().saturating_sub(4)..].iter().collect();
        format!("user{tail}")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateUserInfo {
    pub username: String,
    pub nickname: String,
    pub phone: String,
    pub email: Option<String>,
}

impl UpdateUserInfo {
    pub fn validate(&self) -> DomainResult<()> {
        require_text("username", &self.username)?;
        require_text("nickname", &self.nickname)?;
        require_text("phone", &self.phone)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResetPassword {
    pub old_password: String,
    pub new_password: String,
    pub confirm_password: String,
}

impl ResetPassword {
    pub fn validate(&self) -> DomainResult<()> {
        if self.new_password.is_empty() {
            return Err(DomainError::forbidden("password is empty"));
        }
        if self.new_password != self.confirm_password {
            return Err(DomainError::forbidden("password confirmation does not match"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserFilter {
    pub dept_id: Option<DeptId>,
    pub username: Option<String>,
    pub phone: Option<String>,
    pub status: Option<Status>,
}

impl UserFilter {
    pub fn matches(&self, user: &User) -> bool {
        self.dept_id.is_none_or(|d| user.dept_id == Some(d))
            && like(&user.username, &self.username)
            && like(&user.phone, &self.phone)
            && self.status.is_none_or(|s| s == user.status)
    }
}
