//! `storedesk-core`: domain foundation building blocks.
//!
//! This crate contains **pure domain** primitives (no infrastructure concerns):
//! identifiers, the error taxonomy, visibility scopes and the tree builder.

pub mod error;
pub mod id;
pub mod scope;
pub mod tree;

pub use error::{DomainError, DomainResult};
pub use id::{DataRuleId, DeptId, MenuId, RoleId, TenantId, UserId};
pub use scope::{MenuPartition, Scope};
pub use tree::{build_tree, creates_cycle, node_count, TreeNode, TreeRecord};
