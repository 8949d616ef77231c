//! Strongly-typed identifiers used across the domain.
//!
//! Rows live in a relational store with `BIGSERIAL` keys, so every identifier
//! wraps an `i64`. The newtypes keep a `RoleId` from being passed where a
//! `MenuId` is expected.

use core::str::FromStr;
use serde::{Deserialize, Serialize};

use crate::error::DomainError;

/// Identifier of a tenant (store).
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TenantId(i64);

/// Identifier of a user account.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(i64);

/// Identifier of a department.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeptId(i64);

/// Identifier of a menu / button entry.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MenuId(i64);

/// Identifier of a role.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoleId(i64);

/// Identifier of a data-scoping rule.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DataRuleId(i64);

macro_rules! impl_row_id {
    ($t:ty, $name:literal) => {
        impl $t {
            pub const fn new(value: i64) -> Self {
                Self(value)
            }

            pub const fn get(self) -> i64 {
                self.0
            }
        }

        impl core::fmt::Display for $t {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                core::fmt::Display::fmt(&self.0, f)
            }
        }

        impl From<i64> for $t {
            fn from(value: i64) -> Self {
                Self(value)
            }
        }

        impl From<$t> for i64 {
            fn from(value: $t) -> Self {
                value.0
            }
        }

        impl FromStr for $t {
            type Err = DomainError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let value = s
                    .trim()
                    .parse::<i64>()
                    .map_err(|e| DomainError::invalid_id(format!("{}: {}", $name, e)))?;
                if value <= 0 {
                    return Err(DomainError::invalid_id(format!(
                        "{}: must be positive, got {}",
                        $name, value
                    )));
                }
                Ok(Self(value))
            }
        }
    };
}

impl_row_id!(TenantId, "TenantId");
impl_row_id!(UserId, "UserId");
impl_row_id!(DeptId, "DeptId");
impl_row_id!(MenuId, "MenuId");
impl_row_id!(RoleId, "RoleId");
impl_row_id!(DataRuleId, "DataRuleId");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_positive_ids() {
        let id: RoleId = " 42 ".parse().unwrap();
        assert_eq!(id, RoleId::new(42));
        assert_eq!(id.to_string(), "42");
    }

    #[test]
    fn rejects_garbage_and_non_positive_ids() {
        assert!(matches!("abc".parse::<MenuId>(), Err(DomainError::InvalidId(_))));
        assert!(matches!("0".parse::<DeptId>(), Err(DomainError::InvalidId(_))));
        assert!(matches!("-3".parse::<UserId>(), Err(DomainError::InvalidId(_))));
    }
}
