use std::sync::Arc;

use chrono::{DateTime, Utc};
use thiserror::Error;

use storedesk_core::{
    DataRuleId, DeptId, DomainError, MenuId, MenuPartition, RoleId, Scope, TenantId, UserId,
};
use storedesk_org::{
    DataRule, DataRuleParams, DeptParams, Department, Menu, MenuParams, Role, RoleParams, Status,
    Tenant, TenantParams, UpdateUserInfo, User, UserFlag, UserType,
};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// A uniqueness constraint rejected the write.
    #[error("duplicate value: {0}")]
    Conflict(String),

    #[error("database error: {0}")]
    Database(String),

    /// A stored row could not be mapped back into a domain value.
    #[error("corrupt row: {0}")]
    Decode(String),

    #[error("unit of work already committed")]
    Finished,
}

impl From<StoreError> for DomainError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Conflict(msg) => DomainError::forbidden(msg),
            other => DomainError::storage(other.to_string()),
        }
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Account row ready to be inserted.
#[derive(Clone, PartialEq, Eq)]
pub struct NewUser {
    pub username: String,
    pub nickname: String,
    pub phone: String,
    pub email: Option<String>,
    pub password_hash: String,
    pub salt: Option<String>,
    pub dept_id: Option<DeptId>,
    pub tenant_id: Option<TenantId>,
    pub user_type: UserType,
    pub is_superuser: bool,
    pub is_staff: bool,
    pub is_multi_login: bool,
    pub status: Status,
    pub join_time: DateTime<Utc>,
}

impl core::fmt::Debug for NewUser {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("NewUser")
            .field("username", &self.username)
            .field("phone", &self.phone)
            .field("tenant_id", &self.tenant_id)
            .field("user_type", &self.user_type)
            .finish_non_exhaustive()
    }
}

/// Entry point to persistence: hands out units of work.
#[async_trait::async_trait]
pub trait Store: Send + Sync {
    async fn begin(&self) -> StoreResult<Box<dyn UnitOfWork>>;
}

#[async_trait::async_trait]
impl<S: Store + ?Sized> Store for Arc<S> {
    async fn begin(&self) -> StoreResult<Box<dyn UnitOfWork>> {
        (**self).begin().await
    }
}

/// One transaction's worth of reads and writes.
///
/// Dropping a unit of work without calling [`UnitOfWork::commit`] discards
/// every write made through it.
///
/// Department, role and user lookups take the caller's [`Scope`]; a row
/// owned by another scope behaves exactly like a missing row. Menu lookups
/// take the [`MenuPartition`] instead.
#[async_trait::async_trait]
pub trait UnitOfWork: Send {
    // ── tenants ────────────────────────────────────────────────────────────
    async fn tenant_by_id(&mut self, id: TenantId) -> StoreResult<Option<Tenant>>;
    async fn tenant_by_code(&mut self, code: &str) -> StoreResult<Option<Tenant>>;
    async fn list_tenants(&mut self) -> StoreResult<Vec<Tenant>>;
    async fn insert_tenant(
        &mut self,
        params: &TenantParams,
        created_by: UserId,
        now: DateTime<Utc>,
    ) -> StoreResult<Tenant>;
    /// Overwrite every mutable column of an existing tenant.
    async fn save_tenant(&mut self, tenant: &Tenant) -> StoreResult<u64>;

    // ── departments ────────────────────────────────────────────────────────
    async fn dept_by_id(&mut self, scope: Scope, id: DeptId) -> StoreResult<Option<Department>>;
    async fn dept_by_name(&mut self, scope: Scope, name: &str) -> StoreResult<Option<Department>>;
    /// Every department in the scope, ordered by `(sort, id)`.
    async fn list_depts(&mut self, scope: Scope) -> StoreResult<Vec<Department>>;
    async fn insert_dept(
        &mut self,
        scope: Scope,
        params: &DeptParams,
        level: i32,
        now: DateTime<Utc>,
    ) -> StoreResult<Department>;
    async fn update_dept(
        &mut self,
        scope: Scope,
        id: DeptId,
        params: &DeptParams,
        level: i32,
        now: DateTime<Utc>,
    ) -> StoreResult<u64>;
    async fn delete_dept(&mut self, scope: Scope, id: DeptId) -> StoreResult<u64>;
    async fn count_dept_children(&mut self, scope: Scope, id: DeptId) -> StoreResult<u64>;
    async fn dept_member_ids(&mut self, scope: Scope, id: DeptId) -> StoreResult<Vec<UserId>>;

    // ── menus ──────────────────────────────────────────────────────────────
    async fn menu_by_id(&mut self, partition: MenuPartition, id: MenuId) -> StoreResult<Option<Menu>>;
    /// Non-button menu with this exact title.
    async fn menu_by_title(&mut self, partition: MenuPartition, title: &str) -> StoreResult<Option<Menu>>;
    /// Every menu in the partition, ordered by `(sort, id)`.
    async fn list_menus(&mut self, partition: MenuPartition) -> StoreResult<Vec<Menu>>;
    async fn insert_menu(
        &mut self,
        partition: MenuPartition,
        params: &MenuParams,
        now: DateTime<Utc>,
    ) -> StoreResult<Menu>;
    async fn update_menu(
        &mut self,
        partition: MenuPartition,
        id: MenuId,
        params: &MenuParams,
        now: DateTime<Utc>,
    ) -> StoreResult<u64>;
    /// Removes the menu and its role bindings.
    async fn delete_menu(&mut self, partition: MenuPartition, id: MenuId) -> StoreResult<u64>;
    async fn count_menu_children(&mut self, partition: MenuPartition, id: MenuId) -> StoreResult<u64>;
    /// Users holding any role bound to the menu.
    async fn menu_holder_ids(&mut self, id: MenuId) -> StoreResult<Vec<UserId>>;

    // ── roles ──────────────────────────────────────────────────────────────
    async fn role_by_id(&mut self, scope: Scope, id: RoleId) -> StoreResult<Option<Role>>;
    async fn role_by_name(&mut self, scope: Scope, name: &str) -> StoreResult<Option<Role>>;
    async fn list_roles(&mut self, scope: Scope) -> StoreResult<Vec<Role>>;
    async fn insert_role(
        &mut self,
        scope: Scope,
        params: &RoleParams,
        now: DateTime<Utc>,
    ) -> StoreResult<Role>;
    async fn update_role(
        &mut self,
        scope: Scope,
        id: RoleId,
        params: &RoleParams,
        now: DateTime<Utc>,
    ) -> StoreResult<u64>;
    /// Removes the role and every association row that references it.
    async fn delete_role(&mut self, scope: Scope, id: RoleId) -> StoreResult<u64>;
    /// Menus bound to the role, ordered by `(sort, id)`.
    async fn role_menus(&mut self, role_id: RoleId) -> StoreResult<Vec<Menu>>;
    async fn role_rule_ids(&mut self, role_id: RoleId) -> StoreResult<Vec<DataRuleId>>;
    async fn replace_role_menus(&mut self, role_id: RoleId, menu_ids: &[MenuId]) -> StoreResult<()>;
    async fn replace_role_rules(&mut self, role_id: RoleId, rule_ids: &[DataRuleId]) -> StoreResult<()>;
    async fn role_holder_ids(&mut self, role_id: RoleId) -> StoreResult<Vec<UserId>>;
    async fn roles_of_user(&mut self, user_id: UserId) -> StoreResult<Vec<Role>>;

    // ── data rules ─────────────────────────────────────────────────────────
    async fn list_rules(&mut self) -> StoreResult<Vec<DataRule>>;
    async fn rules_by_ids(&mut self, ids: &[DataRuleId]) -> StoreResult<Vec<DataRule>>;
    async fn insert_rule(&mut self, params: &DataRuleParams, now: DateTime<Utc>) -> StoreResult<DataRule>;

    // ── users ──────────────────────────────────────────────────────────────
    async fn user_by_id(&mut self, scope: Scope, id: UserId) -> StoreResult<Option<User>>;
    /// Lookup used when resolving a principal, before any scope is known.
    async fn user_by_id_unscoped(&mut self, id: UserId) -> StoreResult<Option<User>>;
    async fn user_by_phone(&mut self, user_type: &UserType, phone: &str) -> StoreResult<Option<User>>;
    async fn list_users(&mut self, scope: Scope) -> StoreResult<Vec<User>>;
    async fn insert_user(&mut self, user: &NewUser) -> StoreResult<User>;
    async fn update_user_info(&mut self, id: UserId, info: &UpdateUserInfo) -> StoreResult<u64>;
    async fn set_user_flag(&mut self, id: UserId, flag: UserFlag, value: bool) -> StoreResult<u64>;
    async fn set_password(&mut self, id: UserId, password_hash: &str) -> StoreResult<u64>;
    /// Removes the user and their role assignments.
    async fn delete_user(&mut self, id: UserId) -> StoreResult<u64>;
    async fn replace_user_roles(&mut self, user_id: UserId, role_ids: &[RoleId]) -> StoreResult<()>;

    /// Make every write visible. The unit of work is unusable afterwards.
    async fn commit(&mut self) -> StoreResult<()>;
}
