use serde::{Deserialize, Serialize};

use storedesk_core::{DomainError, DomainResult};

/// Enable/disable switch shared by departments, menus, roles and users.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Disabled,
    #[default]
    Enabled,
}

impl Status {
    pub fn is_enabled(self) -> bool {
        matches!(self, Status::Enabled)
    }

    pub fn as_code(self) -> i16 {
        match self {
            Status::Disabled => 0,
            Status::Enabled => 1,
        }
    }

    pub fn from_code(code: i16) -> DomainResult<Self> {
        match code {
            0 => Ok(Status::Disabled),
            1 => Ok(Status::Enabled),
            other => Err(DomainError::validation(format!("unknown status code {other}"))),
        }
    }
}

impl From<bool> for Status {
    fn from(enabled: bool) -> Self {
        if enabled { Status::Enabled } else { Status::Disabled }
    }
}

impl core::fmt::Display for Status {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Status::Disabled => write!(f, "Disabled"),
            Status::Enabled => write!(f, "Enabled"),
        }
    }
}

/// Case-insensitive substring match used by list filters.
pub(crate) fn like(haystack: &str, needle: &Option<String>) -> bool {
    match needle {
        Some(n) if !n.is_empty() => haystack.to_lowercase().contains(&n.to_lowercase()),
        _ => true,
    }
}

pub(crate) fn require_text(field: &str, value: &str) -> DomainResult<()> {
    if value.trim().is_empty() {
        return Err(DomainError::validation(format!("{field} must not be empty")));
    }
    Ok(())
}
