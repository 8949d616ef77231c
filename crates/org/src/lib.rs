//! `storedesk-org`: organisation entities.
//!
//! Tenants, departments, menus, roles, data rules and users, together with
//! the invariants that can be checked without touching storage.

pub mod dept;
pub mod menu;
pub mod role;
pub mod status;
pub mod tenant;
pub mod user;

pub use dept::{DeptFilter, DeptParams, Department};
pub use menu::{Menu, MenuFilter, MenuParams, MenuType};
pub use role::{DataRule, DataRuleParams, Role, RoleDetail, RoleFilter, RoleParams};
pub use status::Status;
pub use tenant::{ReviewTenant, Tenant, TenantFilter, TenantParams, TenantStatus};
pub use user::{AddUser, ResetPassword, UpdateUserInfo, User, UserFilter, UserFlag, UserType};
