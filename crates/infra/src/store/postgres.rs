//! Postgres-backed store.
//!
//! Every unit of work wraps one `sqlx` transaction. Dropping the unit of
//! work without committing rolls the transaction back.
//!
//! ## Ownership columns
//!
//! Tenant-owned tables carry a nullable `store_id`; platform rows store
//! `NULL`. Scoped queries compare with `IS NOT DISTINCT FROM` so the same
//! statement serves both scopes. Menus carry `is_admin` instead.
//!
//! ## Error Mapping
//!
//! | SQLx Error | PostgreSQL Error Code | StoreError |
//! |------------|----------------------|------------|
//! | Database (unique violation) | `23505` | `Conflict` |
//! | Database (other) | any | `Database` |
//! | PoolClosed / Io / other | N/A | `Database` |
//! | Column decode failure | N/A | `Decode` |

use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgConnection, PgPool, Postgres, Row, Transaction};
use tracing::instrument;

use storedesk_core::{
    DataRuleId, DeptId, DomainResult, MenuId, MenuPartition, RoleId, Scope, TenantId, UserId,
};
use storedesk_org::{
    DataRule, DataRuleParams, DeptParams, Department, Menu, MenuParams, MenuType, Role, RoleParams,
    Status, Tenant, TenantParams, TenantStatus, UpdateUserInfo, User, UserFlag, UserType,
};

use super::r#trait::{NewUser, Store, StoreError, StoreResult, UnitOfWork};

const TENANT_COLUMNS: &str = "id, name, code, province_id, city_id, area_id, address, logo, remark, \
     status, created_by, updated_by, created_at, updated_at";
const DEPT_COLUMNS: &str = "id, name, parent_id, level, sort, leader, phone, email, status, store_id, \
     created_at, updated_at";
const MENU_COLUMNS: &str = "id, title, name, parent_id, sort, icon, path, menu_type, component, perms, \
     status, show, cache, remark, is_admin, created_at, updated_at";
const ROLE_COLUMNS: &str = "id, name, status, remark, store_id, created_at, updated_at";
const RULE_COLUMNS: &str = "id, name, model, column_name, operator, expression, value, created_at";
const USER_COLUMNS: &str = "id, username, nickname, phone, email, avatar, password, salt, dept_id, \
     store_id, user_type, is_superuser, is_staff, is_multi_login, status, join_time, last_login_time";

static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");

#[derive(Debug, Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Open a pool against `database_url`.
    pub async fn connect(database_url: &str, max_connections: u32) -> StoreResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .map_err(|e| map_sqlx_error("connect", e))?;
        Ok(Self::new(pool))
    }

    /// Apply the bundled schema migrations.
    pub async fn migrate(&self) -> StoreResult<()> {
        MIGRATOR
            .run(&self.pool)
            .await
            .map_err(|e| StoreError::Database(format!("migration failed: {e}")))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait::async_trait]
impl Store for PostgresStore {
    async fn begin(&self) -> StoreResult<Box<dyn UnitOfWork>> {
        let tx = self.pool.begin().await.map_err(|e| map_sqlx_error("begin", e))?;
        Ok(Box::new(PostgresUnitOfWork { tx: Some(tx) }))
    }
}

struct PostgresUnitOfWork {
    tx: Option<Transaction<'static, Postgres>>,
}

impl PostgresUnitOfWork {
    fn conn(&mut self) -> StoreResult<&mut PgConnection> {
        self.tx.as_deref_mut().ok_or(StoreError::Finished)
    }
}

fn owner(scope: Scope) -> Option<i64> {
    scope.tenant_id().map(TenantId::get)
}

fn ids<T: Copy + Into<i64>>(values: &[T]) -> Vec<i64> {
    values.iter().map(|v| (*v).into()).collect()
}

#[async_trait::async_trait]
impl UnitOfWork for PostgresUnitOfWork {
    // ── tenants ────────────────────────────────────────────────────────────

    #[instrument(skip(self), fields(tenant_id = %id), err)]
    async fn tenant_by_id(&mut self, id: TenantId) -> StoreResult<Option<Tenant>> {
        let row = sqlx::query(&format!("SELECT {TENANT_COLUMNS} FROM sys_store WHERE id = $1"))
            .bind(id.get())
            .fetch_optional(self.conn()?)
            .await
            .map_err(|e| map_sqlx_error("tenant_by_id", e))?;
        row.as_ref().map(tenant_from_row).transpose()
    }

    #[instrument(skip(self), err)]
    async fn tenant_by_code(&mut self, code: &str) -> StoreResult<Option<Tenant>> {
        let row = sqlx::query(&format!("SELECT {TENANT_COLUMNS} FROM sys_store WHERE code = $1"))
            .bind(code)
            .fetch_optional(self.conn()?)
            .await
            .map_err(|e| map_sqlx_error("tenant_by_code", e))?;
        row.as_ref().map(tenant_from_row).transpose()
    }

    #[instrument(skip(self), err)]
    async fn list_tenants(&mut self) -> StoreResult<Vec<Tenant>> {
        let rows = sqlx::query(&format!("SELECT {TENANT_COLUMNS} FROM sys_store ORDER BY id"))
            .fetch_all(self.conn()?)
            .await
            .map_err(|e| map_sqlx_error("list_tenants", e))?;
        rows.iter().map(tenant_from_row).collect()
    }

    #[instrument(skip(self, params), fields(code = %params.code), err)]
    async fn insert_tenant(
        &mut self,
        params: &TenantParams,
        created_by: UserId,
        now: DateTime<Utc>,
    ) -> StoreResult<Tenant> {
        let row = sqlx::query(&format!(
            r#"
            INSERT INTO sys_store (name, code, province_id, city_id, area_id, address, logo,
                                   status, created_by, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            RETURNING {TENANT_COLUMNS}
            "#
        ))
        .bind(&params.name)
        .bind(&params.code)
        .bind(params.province_id)
        .bind(params.city_id)
        .bind(params.area_id)
        .bind(&params.address)
        .bind(&params.logo)
        .bind(TenantStatus::Pending.as_code())
        .bind(created_by.get())
        .bind(now)
        .fetch_one(self.conn()?)
        .await
        .map_err(|e| map_sqlx_error("insert_tenant", e))?;
        tenant_from_row(&row)
    }

    #[instrument(skip(self, tenant), fields(tenant_id = %tenant.id), err)]
    async fn save_tenant(&mut self, tenant: &Tenant) -> StoreResult<u64> {
        let result = sqlx::query(
            r#"
            UPDATE sys_store
            SET name = $2, province_id = $3, city_id = $4, area_id = $5, address = $6, logo = $7,
                remark = $8, status = $9, updated_by = $10, updated_at = $11
            WHERE id = $1
            "#,
        )
        .bind(tenant.id.get())
        .bind(&tenant.name)
        .bind(tenant.province_id)
        .bind(tenant.city_id)
        .bind(tenant.area_id)
        .bind(&tenant.address)
        .bind(&tenant.logo)
        .bind(&tenant.remark)
        .bind(tenant.status.as_code())
        .bind(tenant.updated_by.map(UserId::get))
        .bind(tenant.updated_at)
        .execute(self.conn()?)
        .await
        .map_err(|e| map_sqlx_error("save_tenant", e))?;
        Ok(result.rows_affected())
    }

    // ── departments ────────────────────────────────────────────────────────

    #[instrument(skip(self), fields(scope = %scope, dept_id = %id), err)]
    async fn dept_by_id(&mut self, scope: Scope, id: DeptId) -> StoreResult<Option<Department>> {
        let row = sqlx::query(&format!(
            "SELECT {DEPT_COLUMNS} FROM sys_dept WHERE id = $1 AND store_id IS NOT DISTINCT FROM $2"
        ))
        .bind(id.get())
        .bind(owner(scope))
        .fetch_optional(self.conn()?)
        .await
        .map_err(|e| map_sqlx_error("dept_by_id", e))?;
        row.as_ref().map(dept_from_row).transpose()
    }

    #[instrument(skip(self), fields(scope = %scope), err)]
    async fn dept_by_name(&mut self, scope: Scope, name: &str) -> StoreResult<Option<Department>> {
        let row = sqlx::query(&format!(
            "SELECT {DEPT_COLUMNS} FROM sys_dept WHERE name = $1 AND store_id IS NOT DISTINCT FROM $2"
        ))
        .bind(name)
        .bind(owner(scope))
        .fetch_optional(self.conn()?)
        .await
        .map_err(|e| map_sqlx_error("dept_by_name", e))?;
        row.as_ref().map(dept_from_row).transpose()
    }

    #[instrument(skip(self), fields(scope = %scope), err)]
    async fn list_depts(&mut self, scope: Scope) -> StoreResult<Vec<Department>> {
        let rows = sqlx::query(&format!(
            "SELECT {DEPT_COLUMNS} FROM sys_dept WHERE store_id IS NOT DISTINCT FROM $1 ORDER BY sort, id"
        ))
        .bind(owner(scope))
        .fetch_all(self.conn()?)
        .await
        .map_err(|e| map_sqlx_error("list_depts", e))?;
        rows.iter().map(dept_from_row).collect()
    }

    #[instrument(skip(self, params), fields(scope = %scope, name = %params.name), err)]
    async fn insert_dept(
        &mut self,
        scope: Scope,
        params: &DeptParams,
        level: i32,
        now: DateTime<Utc>,
    ) -> StoreResult<Department> {
        let row = sqlx::query(&format!(
            r#"
            INSERT INTO sys_dept (name, parent_id, level, sort, leader, phone, email, status,
                                  store_id, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            RETURNING {DEPT_COLUMNS}
            "#
        ))
        .bind(&params.name)
        .bind(params.parent_id.map(DeptId::get))
        .bind(level)
        .bind(params.sort)
        .bind(&params.leader)
        .bind(&params.phone)
        .bind(&params.email)
        .bind(params.status.as_code())
        .bind(owner(scope))
        .bind(now)
        .fetch_one(self.conn()?)
        .await
        .map_err(|e| map_sqlx_error("insert_dept", e))?;
        dept_from_row(&row)
    }

    #[instrument(skip(self, params), fields(scope = %scope, dept_id = %id), err)]
    async fn update_dept(
        &mut self,
        scope: Scope,
        id: DeptId,
        params: &DeptParams,
        level: i32,
        now: DateTime<Utc>,
    ) -> StoreResult<u64> {
        let result = sqlx::query(
            r#"
            UPDATE sys_dept
            SET name = $3, parent_id = $4, level = $5, sort = $6, leader = $7, phone = $8,
                email = $9, status = $10, updated_at = $11
            WHERE id = $1 AND store_id IS NOT DISTINCT FROM $2
            "#,
        )
        .bind(id.get())
        .bind(owner(scope))
        .bind(&params.name)
        .bind(params.parent_id.map(DeptId::get))
        .bind(level)
        .bind(params.sort)
        .bind(&params.leader)
        .bind(&params.phone)
        .bind(&params.email)
        .bind(params.status.as_code())
        .bind(now)
        .execute(self.conn()?)
        .await
        .map_err(|e| map_sqlx_error("update_dept", e))?;
        Ok(result.rows_affected())
    }

    #[instrument(skip(self), fields(scope = %scope, dept_id = %id), err)]
    async fn delete_dept(&mut self, scope: Scope, id: DeptId) -> StoreResult<u64> {
        let result = sqlx::query("DELETE FROM sys_dept WHERE id = $1 AND store_id IS NOT DISTINCT FROM $2")
            .bind(id.get())
            .bind(owner(scope))
            .execute(self.conn()?)
            .await
            .map_err(|e| map_sqlx_error("delete_dept", e))?;
        Ok(result.rows_affected())
    }

    #[instrument(skip(self), fields(scope = %scope, dept_id = %id), err)]
    async fn count_dept_children(&mut self, scope: Scope, id: DeptId) -> StoreResult<u64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM sys_dept WHERE parent_id = $1 AND store_id IS NOT DISTINCT FROM $2",
        )
        .bind(id.get())
        .bind(owner(scope))
        .fetch_one(self.conn()?)
        .await
        .map_err(|e| map_sqlx_error("count_dept_children", e))?;
        Ok(count as u64)
    }

    #[instrument(skip(self), fields(scope = %scope, dept_id = %id), err)]
    async fn dept_member_ids(&mut self, scope: Scope, id: DeptId) -> StoreResult<Vec<UserId>> {
        let rows: Vec<i64> = sqlx::query_scalar(
            "SELECT id FROM sys_user WHERE dept_id = $1 AND store_id IS NOT DISTINCT FROM $2 ORDER BY id",
        )
        .bind(id.get())
        .bind(owner(scope))
        .fetch_all(self.conn()?)
        .await
        .map_err(|e| map_sqlx_error("dept_member_ids", e))?;
        Ok(rows.into_iter().map(UserId::new).collect())
    }

    // ── menus ──────────────────────────────────────────────────────────────

    #[instrument(skip(self), fields(menu_id = %id), err)]
    async fn menu_by_id(&mut self, partition: MenuPartition, id: MenuId) -> StoreResult<Option<Menu>> {
        let row = sqlx::query(&format!("SELECT {MENU_COLUMNS} FROM sys_menu WHERE id = $1 AND is_admin = $2"))
            .bind(id.get())
            .bind(partition.as_flag())
            .fetch_optional(self.conn()?)
            .await
            .map_err(|e| map_sqlx_error("menu_by_id", e))?;
        row.as_ref().map(menu_from_row).transpose()
    }

    #[instrument(skip(self), err)]
    async fn menu_by_title(&mut self, partition: MenuPartition, title: &str) -> StoreResult<Option<Menu>> {
        let row = sqlx::query(&format!(
            "SELECT {MENU_COLUMNS} FROM sys_menu WHERE title = $1 AND is_admin = $2 AND menu_type <> $3"
        ))
        .bind(title)
        .bind(partition.as_flag())
        .bind(MenuType::Button.as_code())
        .fetch_optional(self.conn()?)
        .await
        .map_err(|e| map_sqlx_error("menu_by_title", e))?;
        row.as_ref().map(menu_from_row).transpose()
    }

    #[instrument(skip(self), err)]
    async fn list_menus(&mut self, partition: MenuPartition) -> StoreResult<Vec<Menu>> {
        let rows = sqlx::query(&format!("SELECT {MENU_COLUMNS} FROM sys_menu WHERE is_admin = $1 ORDER BY sort, id"))
            .bind(partition.as_flag())
            .fetch_all(self.conn()?)
            .await
            .map_err(|e| map_sqlx_error("list_menus", e))?;
        rows.iter().map(menu_from_row).collect()
    }

    #[instrument(skip(self, params), fields(title = %params.title), err)]
    async fn insert_menu(
        &mut self,
        partition: MenuPartition,
        params: &MenuParams,
        now: DateTime<Utc>,
    ) -> StoreResult<Menu> {
        let row = sqlx::query(&format!(
            r#"
            INSERT INTO sys_menu (title, name, parent_id, sort, icon, path, menu_type, component,
                                  perms, status, show, cache, remark, is_admin, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
            RETURNING {MENU_COLUMNS}
            "#
        ))
        .bind(&params.title)
        .bind(&params.name)
        .bind(params.parent_id.map(MenuId::get))
        .bind(params.sort)
        .bind(&params.icon)
        .bind(&params.path)
        .bind(params.menu_type.as_code())
        .bind(&params.component)
        .bind(&params.perms)
        .bind(params.status.as_code())
        .bind(params.show)
        .bind(params.cache)
        .bind(&params.remark)
        .bind(partition.as_flag())
        .bind(now)
        .fetch_one(self.conn()?)
        .await
        .map_err(|e| map_sqlx_error("insert_menu", e))?;
        menu_from_row(&row)
    }

    #[instrument(skip(self, params), fields(menu_id = %id), err)]
    async fn update_menu(
        &mut self,
        partition: MenuPartition,
        id: MenuId,
        params: &MenuParams,
        now: DateTime<Utc>,
    ) -> StoreResult<u64> {
        let result = sqlx::query(
            r#"
            UPDATE sys_menu
            SET title = $3, name = $4, parent_id = $5, sort = $6, icon = $7, path = $8,
                menu_type = $9, component = $10, perms = $11, status = $12, show = $13,
                cache = $14, remark = $15, updated_at = $16
            WHERE id = $1 AND is_admin = $2
            "#,
        )
        .bind(id.get())
        .bind(partition.as_flag())
        .bind(&params.title)
        .bind(&params.name)
        .bind(params.parent_id.map(MenuId::get))
        .bind(params.sort)
        .bind(&params.icon)
        .bind(&params.path)
        .bind(params.menu_type.as_code())
        .bind(&params.component)
        .bind(&params.perms)
        .bind(params.status.as_code())
        .bind(params.show)
        .bind(params.cache)
        .bind(&params.remark)
        .bind(now)
        .execute(self.conn()?)
        .await
        .map_err(|e| map_sqlx_error("update_menu", e))?;
        Ok(result.rows_affected())
    }

    #[instrument(skip(self), fields(menu_id = %id), err)]
    async fn delete_menu(&mut self, partition: MenuPartition, id: MenuId) -> StoreResult<u64> {
        // sys_role_menu rows go with it (ON DELETE CASCADE).
        let result = sqlx::query("DELETE FROM sys_menu WHERE id = $1 AND is_admin = $2")
            .bind(id.get())
            .bind(partition.as_flag())
            .execute(self.conn()?)
            .await
            .map_err(|e| map_sqlx_error("delete_menu", e))?;
        Ok(result.rows_affected())
    }

    #[instrument(skip(self), fields(menu_id = %id), err)]
    async fn count_menu_children(&mut self, partition: MenuPartition, id: MenuId) -> StoreResult<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM sys_menu WHERE parent_id = $1 AND is_admin = $2")
            .bind(id.get())
            .bind(partition.as_flag())
            .fetch_one(self.conn()?)
            .await
            .map_err(|e| map_sqlx_error("count_menu_children", e))?;
        Ok(count as u64)
    }

    #[instrument(skip(self), fields(menu_id = %id), err)]
    async fn menu_holder_ids(&mut self, id: MenuId) -> StoreResult<Vec<UserId>> {
        let rows: Vec<i64> = sqlx::query_scalar(
            r#"
            SELECT DISTINCT ur.user_id
            FROM sys_user_role ur
            JOIN sys_role_menu rm ON rm.role_id = ur.role_id
            WHERE rm.menu_id = $1
            ORDER BY ur.user_id
            "#,
        )
        .bind(id.get())
        .fetch_all(self.conn()?)
        .await
        .map_err(|e| map_sqlx_error("menu_holder_ids", e))?;
        Ok(rows.into_iter().map(UserId::new).collect())
    }

    // ── roles ──────────────────────────────────────────────────────────────

    #[instrument(skip(self), fields(scope = %scope, role_id = %id), err)]
    async fn role_by_id(&mut self, scope: Scope, id: RoleId) -> StoreResult<Option<Role>> {
        let row = sqlx::query(&format!(
            "SELECT {ROLE_COLUMNS} FROM sys_role WHERE id = $1 AND store_id IS NOT DISTINCT FROM $2"
        ))
        .bind(id.get())
        .bind(owner(scope))
        .fetch_optional(self.conn()?)
        .await
        .map_err(|e| map_sqlx_error("role_by_id", e))?;
        row.as_ref().map(role_from_row).transpose()
    }

    #[instrument(skip(self), fields(scope = %scope), err)]
    async fn role_by_name(&mut self, scope: Scope, name: &str) -> StoreResult<Option<Role>> {
        let row = sqlx::query(&format!(
            "SELECT {ROLE_COLUMNS} FROM sys_role WHERE name = $1 AND store_id IS NOT DISTINCT FROM $2"
        ))
        .bind(name)
        .bind(owner(scope))
        .fetch_optional(self.conn()?)
        .await
        .map_err(|e| map_sqlx_error("role_by_name", e))?;
        row.as_ref().map(role_from_row).transpose()
    }

    #[instrument(skip(self), fields(scope = %scope), err)]
    async fn list_roles(&mut self, scope: Scope) -> StoreResult<Vec<Role>> {
        let rows = sqlx::query(&format!(
            "SELECT {ROLE_COLUMNS} FROM sys_role WHERE store_id IS NOT DISTINCT FROM $1 ORDER BY id"
        ))
        .bind(owner(scope))
        .fetch_all(self.conn()?)
        .await
        .map_err(|e| map_sqlx_error("list_roles", e))?;
        rows.iter().map(role_from_row).collect()
    }

    #[instrument(skip(self, params), fields(scope = %scope, name = %params.name), err)]
    async fn insert_role(
        &mut self,
        scope: Scope,
        params: &RoleParams,
        now: DateTime<Utc>,
    ) -> StoreResult<Role> {
        let row = sqlx::query(&format!(
            r#"
            INSERT INTO sys_role (name, status, remark, store_id, created_at)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING {ROLE_COLUMNS}
            "#
        ))
        .bind(&params.name)
        .bind(params.status.as_code())
        .bind(&params.remark)
        .bind(owner(scope))
        .bind(now)
        .fetch_one(self.conn()?)
        .await
        .map_err(|e| map_sqlx_error("insert_role", e))?;
        role_from_row(&row)
    }

    #[instrument(skip(self, params), fields(scope = %scope, role_id = %id), err)]
    async fn update_role(
        &mut self,
        scope: Scope,
        id: RoleId,
        params: &RoleParams,
        now: DateTime<Utc>,
    ) -> StoreResult<u64> {
        let result = sqlx::query(
            r#"
            UPDATE sys_role SET name = $3, status = $4, remark = $5, updated_at = $6
            WHERE id = $1 AND store_id IS NOT DISTINCT FROM $2
            "#,
        )
        .bind(id.get())
        .bind(owner(scope))
        .bind(&params.name)
        .bind(params.status.as_code())
        .bind(&params.remark)
        .bind(now)
        .execute(self.conn()?)
        .await
        .map_err(|e| map_sqlx_error("update_role", e))?;
        Ok(result.rows_affected())
    }

    #[instrument(skip(self), fields(scope = %scope, role_id = %id), err)]
    async fn delete_role(&mut self, scope: Scope, id: RoleId) -> StoreResult<u64> {
        // Association rows cascade.
        let result = sqlx::query("DELETE FROM sys_role WHERE id = $1 AND store_id IS NOT DISTINCT FROM $2")
            .bind(id.get())
            .bind(owner(scope))
            .execute(self.conn()?)
            .await
            .map_err(|e| map_sqlx_error("delete_role", e))?;
        Ok(result.rows_affected())
    }

    #[instrument(skip(self), fields(role_id = %role_id), err)]
    async fn role_menus(&mut self, role_id: RoleId) -> StoreResult<Vec<Menu>> {
        let columns = MENU_COLUMNS
            .split(", ")
            .map(|c| format!("m.{}", c.trim()))
            .collect::<Vec<_>>()
            .join(", ");
        let rows = sqlx::query(&format!(
            r#"
            SELECT {columns}
            FROM sys_menu m
            JOIN sys_role_menu rm ON rm.menu_id = m.id
            WHERE rm.role_id = $1
            ORDER BY m.sort, m.id
            "#
        ))
        .bind(role_id.get())
        .fetch_all(self.conn()?)
        .await
        .map_err(|e| map_sqlx_error("role_menus", e))?;
        rows.iter().map(menu_from_row).collect()
    }

    #[instrument(skip(self), fields(role_id = %role_id), err)]
    async fn role_rule_ids(&mut self, role_id: RoleId) -> StoreResult<Vec<DataRuleId>> {
        let rows: Vec<i64> = sqlx::query_scalar(
            "SELECT data_rule_id FROM sys_role_data_rule WHERE role_id = $1 ORDER BY data_rule_id",
        )
        .bind(role_id.get())
        .fetch_all(self.conn()?)
        .await
        .map_err(|e| map_sqlx_error("role_rule_ids", e))?;
        Ok(rows.into_iter().map(DataRuleId::new).collect())
    }

    #[instrument(skip(self, menu_ids), fields(role_id = %role_id, menu_count = menu_ids.len()), err)]
    async fn replace_role_menus(&mut self, role_id: RoleId, menu_ids: &[MenuId]) -> StoreResult<()> {
        let conn = self.conn()?;
        sqlx::query("DELETE FROM sys_role_menu WHERE role_id = $1")
            .bind(role_id.get())
            .execute(&mut *conn)
            .await
            .map_err(|e| map_sqlx_error("replace_role_menus", e))?;
        sqlx::query("INSERT INTO sys_role_menu (role_id, menu_id) SELECT $1, UNNEST($2::BIGINT[])")
            .bind(role_id.get())
            .bind(ids(menu_ids))
            .execute(&mut *conn)
            .await
            .map_err(|e| map_sqlx_error("replace_role_menus", e))?;
        Ok(())
    }

    #[instrument(skip(self, rule_ids), fields(role_id = %role_id, rule_count = rule_ids.len()), err)]
    async fn replace_role_rules(&mut self, role_id: RoleId, rule_ids: &[DataRuleId]) -> StoreResult<()> {
        let conn = self.conn()?;
        sqlx::query("DELETE FROM sys_role_data_rule WHERE role_id = $1")
            .bind(role_id.get())
            .execute(&mut *conn)
            .await
            .map_err(|e| map_sqlx_error("replace_role_rules", e))?;
        sqlx::query("INSERT INTO sys_role_data_rule (role_id, data_rule_id) SELECT $1, UNNEST($2::BIGINT[])")
            .bind(role_id.get())
            .bind(ids(rule_ids))
            .execute(&mut *conn)
            .await
            .map_err(|e| map_sqlx_error("replace_role_rules", e))?;
        Ok(())
    }

    #[instrument(skip(self), fields(role_id = %role_id), err)]
    async fn role_holder_ids(&mut self, role_id: RoleId) -> StoreResult<Vec<UserId>> {
        let rows: Vec<i64> =
            sqlx::query_scalar("SELECT user_id FROM sys_user_role WHERE role_id = $1 ORDER BY user_id")
                .bind(role_id.get())
                .fetch_all(self.conn()?)
                .await
                .map_err(|e| map_sqlx_error("role_holder_ids", e))?;
        Ok(rows.into_iter().map(UserId::new).collect())
    }

    #[instrument(skip(self), fields(user_id = %user_id), err)]
    async fn roles_of_user(&mut self, user_id: UserId) -> StoreResult<Vec<Role>> {
        let rows = sqlx::query(
            r#"
            SELECT r.id, r.name, r.status, r.remark, r.store_id, r.created_at, r.updated_at
            FROM sys_role r
            JOIN sys_user_role ur ON ur.role_id = r.id
            WHERE ur.user_id = $1
            ORDER BY r.id
            "#,
        )
        .bind(user_id.get())
        .fetch_all(self.conn()?)
        .await
        .map_err(|e| map_sqlx_error("roles_of_user", e))?;
        rows.iter().map(role_from_row).collect()
    }

    // ── data rules ─────────────────────────────────────────────────────────

    #[instrument(skip(self), err)]
    async fn list_rules(&mut self) -> StoreResult<Vec<DataRule>> {
        let rows = sqlx::query(&format!("SELECT {RULE_COLUMNS} FROM sys_data_rule ORDER BY id"))
            .fetch_all(self.conn()?)
            .await
            .map_err(|e| map_sqlx_error("list_rules", e))?;
        rows.iter().map(rule_from_row).collect()
    }

    #[instrument(skip(self, rule_ids), fields(count = rule_ids.len()), err)]
    async fn rules_by_ids(&mut self, rule_ids: &[DataRuleId]) -> StoreResult<Vec<DataRule>> {
        let rows = sqlx::query(&format!(
            "SELECT {RULE_COLUMNS} FROM sys_data_rule WHERE id = ANY($1) ORDER BY id"
        ))
        .bind(ids(rule_ids))
        .fetch_all(self.conn()?)
        .await
        .map_err(|e| map_sqlx_error("rules_by_ids", e))?;
        rows.iter().map(rule_from_row).collect()
    }

    #[instrument(skip(self, params), fields(name = %params.name), err)]
    async fn insert_rule(&mut self, params: &DataRuleParams, now: DateTime<Utc>) -> StoreResult<DataRule> {
        let row = sqlx::query(&format!(
            r#"
            INSERT INTO sys_data_rule (name, model, column_name, operator, expression, value, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING {RULE_COLUMNS}
            "#
        ))
        .bind(&params.name)
        .bind(&params.model)
        .bind(&params.column)
        .bind(&params.operator)
        .bind(&params.expression)
        .bind(&params.value)
        .bind(now)
        .fetch_one(self.conn()?)
        .await
        .map_err(|e| map_sqlx_error("insert_rule", e))?;
        rule_from_row(&row)
    }

    // ── users ──────────────────────────────────────────────────────────────

    #[instrument(skip(self), fields(scope = %scope, user_id = %id), err)]
    async fn user_by_id(&mut self, scope: Scope, id: UserId) -> StoreResult<Option<User>> {
        let row = sqlx::query(&format!(
            "SELECT {USER_COLUMNS} FROM sys_user WHERE id = $1 AND store_id IS NOT DISTINCT FROM $2"
        ))
        .bind(id.get())
        .bind(owner(scope))
        .fetch_optional(self.conn()?)
        .await
        .map_err(|e| map_sqlx_error("user_by_id", e))?;
        row.as_ref().map(user_from_row).transpose()
    }

    #[instrument(skip(self), fields(user_id = %id), err)]
    async fn user_by_id_unscoped(&mut self, id: UserId) -> StoreResult<Option<User>> {
        let row = sqlx::query(&format!("SELECT {USER_COLUMNS} FROM sys_user WHERE id = $1"))
            .bind(id.get())
            .fetch_optional(self.conn()?)
            .await
            .map_err(|e| map_sqlx_error("user_by_id_unscoped", e))?;
        row.as_ref().map(user_from_row).transpose()
    }

    #[instrument(skip(self, phone), fields(user_type = %user_type.code()), err)]
    async fn user_by_phone(&mut self, user_type: &UserType, phone: &str) -> StoreResult<Option<User>> {
        let row = sqlx::query(&format!(
            "SELECT {USER_COLUMNS} FROM sys_user WHERE user_type = $1 AND phone = $2"
        ))
        .bind(user_type.code())
        .bind(phone)
        .fetch_optional(self.conn()?)
        .await
        .map_err(|e| map_sqlx_error("user_by_phone", e))?;
        row.as_ref().map(user_from_row).transpose()
    }

    #[instrument(skip(self), fields(scope = %scope), err)]
    async fn list_users(&mut self, scope: Scope) -> StoreResult<Vec<User>> {
        let rows = sqlx::query(&format!(
            "SELECT {USER_COLUMNS} FROM sys_user WHERE store_id IS NOT DISTINCT FROM $1 ORDER BY id"
        ))
        .bind(owner(scope))
        .fetch_all(self.conn()?)
        .await
        .map_err(|e| map_sqlx_error("list_users", e))?;
        rows.iter().map(user_from_row).collect()
    }

    #[instrument(skip(self, user), fields(username = %user.username), err)]
    async fn insert_user(&mut self, user: &NewUser) -> StoreResult<User> {
        let row = sqlx::query(&format!(
            r#"
            INSERT INTO sys_user (username, nickname, phone, email, password, salt, dept_id, store_id,
                                  user_type, is_superuser, is_staff, is_multi_login, status, join_time)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(&user.username)
        .bind(&user.nickname)
        .bind(&user.phone)
        .bind(&user.email)
        .bind(&user.password_hash)
        .bind(&user.salt)
        .bind(user.dept_id.map(DeptId::get))
        .bind(user.tenant_id.map(TenantId::get))
        .bind(user.user_type.code())
        .bind(user.is_superuser)
        .bind(user.is_staff)
        .bind(user.is_multi_login)
        .bind(user.status.as_code())
        .bind(user.join_time)
        .fetch_one(self.conn()?)
        .await
        .map_err(|e| map_sqlx_error("insert_user", e))?;
        user_from_row(&row)
    }

    #[instrument(skip(self, info), fields(user_id = %id), err)]
    async fn update_user_info(&mut self, id: UserId, info: &UpdateUserInfo) -> StoreResult<u64> {
        let result = sqlx::query(
            "UPDATE sys_user SET username = $2, nickname = $3, phone = $4, email = $5 WHERE id = $1",
        )
        .bind(id.get())
        .bind(&info.username)
        .bind(&info.nickname)
        .bind(&info.phone)
        .bind(&info.email)
        .execute(self.conn()?)
        .await
        .map_err(|e| map_sqlx_error("update_user_info", e))?;
        Ok(result.rows_affected())
    }

    #[instrument(skip(self), fields(user_id = %id), err)]
    async fn set_user_flag(&mut self, id: UserId, flag: UserFlag, value: bool) -> StoreResult<u64> {
        let sql = format!("UPDATE sys_user SET {} = $2 WHERE id = $1", flag.column());
        let query = sqlx::query(&sql).bind(id.get());
        let query = match flag {
            UserFlag::Status => query.bind(Status::from(value).as_code()),
            _ => query.bind(value),
        };
        let result = query
            .execute(self.conn()?)
            .await
            .map_err(|e| map_sqlx_error("set_user_flag", e))?;
        Ok(result.rows_affected())
    }

    #[instrument(skip(self, password_hash), fields(user_id = %id), err)]
    async fn set_password(&mut self, id: UserId, password_hash: &str) -> StoreResult<u64> {
        let result = sqlx::query("UPDATE sys_user SET password = $2 WHERE id = $1")
            .bind(id.get())
            .bind(password_hash)
            .execute(self.conn()?)
            .await
            .map_err(|e| map_sqlx_error("set_password", e))?;
        Ok(result.rows_affected())
    }

    #[instrument(skip(self), fields(user_id = %id), err)]
    async fn delete_user(&mut self, id: UserId) -> StoreResult<u64> {
        let result = sqlx::query("DELETE FROM sys_user WHERE id = $1")
            .bind(id.get())
            .execute(self.conn()?)
            .await
            .map_err(|e| map_sqlx_error("delete_user", e))?;
        Ok(result.rows_affected())
    }

    #[instrument(skip(self, role_ids), fields(user_id = %user_id, role_count = role_ids.len()), err)]
    async fn replace_user_roles(&mut self, user_id: UserId, role_ids: &[RoleId]) -> StoreResult<()> {
        let conn = self.conn()?;
        sqlx::query("DELETE FROM sys_user_role WHERE user_id = $1")
            .bind(user_id.get())
            .execute(&mut *conn)
            .await
            .map_err(|e| map_sqlx_error("replace_user_roles", e))?;
        sqlx::query("INSERT INTO sys_user_role (user_id, role_id) SELECT $1, UNNEST($2::BIGINT[])")
            .bind(user_id.get())
            .bind(ids(role_ids))
            .execute(&mut *conn)
            .await
            .map_err(|e| map_sqlx_error("replace_user_roles", e))?;
        Ok(())
    }

    async fn commit(&mut self) -> StoreResult<()> {
        let tx = self.tx.take().ok_or(StoreError::Finished)?;
        tx.commit().await.map_err(|e| map_sqlx_error("commit", e))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Row mapping
// ─────────────────────────────────────────────────────────────────────────────

fn col<'r, T>(row: &'r PgRow, name: &str) -> StoreResult<T>
where
    T: sqlx::Decode<'r, Postgres> + sqlx::Type<Postgres>,
{
    row.try_get(name)
        .map_err(|e| StoreError::Decode(format!("column {name}: {e}")))
}

fn domain<T>(value: DomainResult<T>) -> StoreResult<T> {
    value.map_err(|e| StoreError::Decode(e.to_string()))
}

fn tenant_from_row(row: &PgRow) -> StoreResult<Tenant> {
    Ok(Tenant {
        id: TenantId::new(col(row, "id")?),
        name: col(row, "name")?,
        code: col(row, "code")?,
        province_id: col(row, "province_id")?,
        city_id: col(row, "city_id")?,
        area_id: col(row, "area_id")?,
        address: col(row, "address")?,
        logo: col(row, "logo")?,
        remark: col(row, "remark")?,
        status: domain(TenantStatus::from_code(col(row, "status")?))?,
        created_by: col::<Option<i64>>(row, "created_by")?.map(UserId::new),
        updated_by: col::<Option<i64>>(row, "updated_by")?.map(UserId::new),
        created_at: col(row, "created_at")?,
        updated_at: col(row, "updated_at")?,
    })
}

fn dept_from_row(row: &PgRow) -> StoreResult<Department> {
    Ok(Department {
        id: DeptId::new(col(row, "id")?),
        name: col(row, "name")?,
        parent_id: col::<Option<i64>>(row, "parent_id")?.map(DeptId::new),
        level: col(row, "level")?,
        sort: col(row, "sort")?,
        leader: col(row, "leader")?,
        phone: col(row, "phone")?,
        email: col(row, "email")?,
        status: domain(Status::from_code(col(row, "status")?))?,
        tenant_id: col::<Option<i64>>(row, "store_id")?.map(TenantId::new),
        created_at: col(row, "created_at")?,
        updated_at: col(row, "updated_at")?,
    })
}

fn menu_from_row(row: &PgRow) -> StoreResult<Menu> {
    Ok(Menu {
        id: MenuId::new(col(row, "id")?),
        title: col(row, "title")?,
        name: col(row, "name")?,
        parent_id: col::<Option<i64>>(row, "parent_id")?.map(MenuId::new),
        sort: col(row, "sort")?,
        icon: col(row, "icon")?,
        path: col(row, "path")?,
        menu_type: domain(MenuType::from_code(col(row, "menu_type")?))?,
        component: col(row, "component")?,
        perms: col(row, "perms")?,
        status: domain(Status::from_code(col(row, "status")?))?,
        show: col(row, "show")?,
        cache: col(row, "cache")?,
        remark: col(row, "remark")?,
        partition: domain(MenuPartition::from_flag(col(row, "is_admin")?))?,
        created_at: col(row, "created_at")?,
        updated_at: col(row, "updated_at")?,
    })
}

fn role_from_row(row: &PgRow) -> StoreResult<Role> {
    Ok(Role {
        id: RoleId::new(col(row, "id")?),
        name: col(row, "name")?,
        status: domain(Status::from_code(col(row, "status")?))?,
        remark: col(row, "remark")?,
        tenant_id: col::<Option<i64>>(row, "store_id")?.map(TenantId::new),
        created_at: col(row, "created_at")?,
        updated_at: col(row, "updated_at")?,
    })
}

fn rule_from_row(row: &PgRow) -> StoreResult<DataRule> {
    Ok(DataRule {
        id: DataRuleId::new(col(row, "id")?),
        name: col(row, "name")?,
        model: col(row, "model")?,
        column: col(row, "column_name")?,
        operator: col(row, "operator")?,
        expression: col(row, "expression")?,
        value: col(row, "value")?,
        created_at: col(row, "created_at")?,
    })
}

fn user_from_row(row: &PgRow) -> StoreResult<User> {
    Ok(User {
        id: UserId::new(col(row, "id")?),
        username: col(row, "username")?,
        nickname: col(row, "nickname")?,
        phone: col(row, "phone")?,
        email: col(row, "email")?,
        avatar: col(row, "avatar")?,
        password_hash: col(row, "password")?,
        salt: col(row, "salt")?,
        dept_id: col::<Option<i64>>(row, "dept_id")?.map(DeptId::new),
        tenant_id: col::<Option<i64>>(row, "store_id")?.map(TenantId::new),
        user_type: UserType::from_code(&col::<String>(row, "user_type")?),
        is_superuser: col(row, "is_superuser")?,
        is_staff: col(row, "is_staff")?,
        is_multi_login: col(row, "is_multi_login")?,
        status: domain(Status::from_code(col(row, "status")?))?,
        join_time: col(row, "join_time")?,
        last_login_time: col(row, "last_login_time")?,
    })
}

// ─────────────────────────────────────────────────────────────────────────────
// Error mapping
// ─────────────────────────────────────────────────────────────────────────────

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    if is_unique_violation(&err) {
        let detail = match &err {
            sqlx::Error::Database(db_err) => db_err.constraint().unwrap_or("unique").to_string(),
            _ => "unique".to_string(),
        };
        return StoreError::Conflict(format!("{operation}: duplicate value violates {detail}"));
    }
    match err {
        sqlx::Error::Database(db_err) => {
            StoreError::Database(format!("database error in {}: {}", operation, db_err.message()))
        }
        sqlx::Error::PoolClosed => StoreError::Database(format!("connection pool closed in {operation}")),
        other => StoreError::Database(format!("sqlx error in {operation}: {other}")),
    }
}

/// Check if an error is a unique constraint violation.
fn is_unique_violation(err: &sqlx::Error) -> bool {
    if let sqlx::Error::Database(db_err) = err {
        if let Some(code) = db_err.code() {
            return code.as_ref() == "23505";
        }
    }
    false
}
