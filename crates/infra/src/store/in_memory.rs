//! In-memory store for tests and local development.
//!
//! Units of work are serialised through one owned mutex guard. Each unit of
//! work edits a private copy of the state that replaces the shared state on
//! commit; dropping it simply discards the copy.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, OwnedMutexGuard};

use storedesk_core::{
    DataRuleId, DeptId, MenuId, MenuPartition, RoleId, Scope, TenantId, UserId,
};
use storedesk_org::{
    DataRule, DataRuleParams, DeptParams, Department, Menu, MenuParams, Role, RoleParams, Tenant,
    TenantParams, TenantStatus, UpdateUserInfo, User, UserFlag, UserType,
};

use super::r#trait::{NewUser, Store, StoreError, StoreResult, UnitOfWork};

#[derive(Debug, Clone, Default)]
struct State {
    last_id: i64,
    tenants: BTreeMap<TenantId, Tenant>,
    depts: BTreeMap<DeptId, Department>,
    menus: BTreeMap<MenuId, Menu>,
    roles: BTreeMap<RoleId, Role>,
    rules: BTreeMap<DataRuleId, DataRule>,
    users: BTreeMap<UserId, User>,
    role_menus: BTreeSet<(RoleId, MenuId)>,
    role_rules: BTreeSet<(RoleId, DataRuleId)>,
    user_roles: BTreeSet<(UserId, RoleId)>,
}

impl State {
    fn next_id(&mut self) -> i64 {
        self.last_id += 1;
        self.last_id
    }

    fn holders_of(&self, roles: &BTreeSet<RoleId>) -> Vec<UserId> {
        let holders: BTreeSet<UserId> = self
            .user_roles
            .iter()
            .filter(|(_, r)| roles.contains(r))
            .map(|(u, _)| *u)
            .collect();
        holders.into_iter().collect()
    }
}

#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    state: Arc<Mutex<State>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl Store for InMemoryStore {
    async fn begin(&self) -> StoreResult<Box<dyn UnitOfWork>> {
        let guard = Arc::clone(&self.state).lock_owned().await;
        let work = guard.clone();
        Ok(Box::new(InMemoryUnitOfWork { guard, work, done: false }))
    }
}

struct InMemoryUnitOfWork {
    guard: OwnedMutexGuard<State>,
    work: State,
    done: bool,
}

impl InMemoryUnitOfWork {
    fn state(&mut self) -> StoreResult<&mut State> {
        if self.done {
            return Err(StoreError::Finished);
        }
        Ok(&mut self.work)
    }
}

#[async_trait::async_trait]
impl UnitOfWork for InMemoryUnitOfWork {
    // ── tenants ────────────────────────────────────────────────────────────

    async fn tenant_by_id(&mut self, id: TenantId) -> StoreResult<Option<Tenant>> {
        Ok(self.state()?.tenants.get(&id).cloned())
    }

    async fn tenant_by_code(&mut self, code: &str) -> StoreResult<Option<Tenant>> {
        Ok(self.state()?.tenants.values().find(|t| t.code == code).cloned())
    }

    async fn list_tenants(&mut self) -> StoreResult<Vec<Tenant>> {
        Ok(self.state()?.tenants.values().cloned().collect())
    }

    async fn insert_tenant(
        &mut self,
        params: &TenantParams,
        created_by: UserId,
        now: DateTime<Utc>,
    ) -> StoreResult<Tenant> {
        let state = self.state()?;
        if state.tenants.values().any(|t| t.code == params.code) {
            return Err(StoreError::Conflict(format!("tenant code '{}'", params.code)));
        }
        let tenant = Tenant {
            id: TenantId::new(state.next_id()),
            name: params.name.clone(),
            code: params.code.clone(),
            province_id: params.province_id,
            city_id: params.city_id,
            area_id: params.area_id,
            address: params.address.clone(),
            logo: params.logo.clone(),
            remark: None,
            status: TenantStatus::Pending,
            created_by: Some(created_by),
            updated_by: None,
            created_at: now,
            updated_at: None,
        };
        state.tenants.insert(tenant.id, tenant.clone());
        Ok(tenant)
    }

    async fn save_tenant(&mut self, tenant: &Tenant) -> StoreResult<u64> {
        let state = self.state()?;
        match state.tenants.get_mut(&tenant.id) {
            Some(row) => {
                *row = tenant.clone();
                Ok(1)
            }
            None => Ok(0),
        }
    }

    // ── departments ────────────────────────────────────────────────────────

    async fn dept_by_id(&mut self, scope: Scope, id: DeptId) -> StoreResult<Option<Department>> {
        let state = self.state()?;
        Ok(state.depts.get(&id).filter(|d| scope.owns(d.tenant_id)).cloned())
    }

    async fn dept_by_name(&mut self, scope: Scope, name: &str) -> StoreResult<Option<Department>> {
        let state = self.state()?;
        Ok(state
            .depts
            .values()
            .find(|d| scope.owns(d.tenant_id) && d.name == name)
            .cloned())
    }

    async fn list_depts(&mut self, scope: Scope) -> StoreResult<Vec<Department>> {
        let state = self.state()?;
        let mut rows: Vec<Department> = state
            .depts
            .values()
            .filter(|d| scope.owns(d.tenant_id))
            .cloned()
            .collect();
        rows.sort_by_key(|d| (d.sort, d.id));
        Ok(rows)
    }

    async fn insert_dept(
        &mut self,
        scope: Scope,
        params: &DeptParams,
        level: i32,
        now: DateTime<Utc>,
    ) -> StoreResult<Department> {
        let state = self.state()?;
        let dept = Department {
            id: DeptId::new(state.next_id()),
            name: params.name.clone(),
            parent_id: params.parent_id,
            level,
            sort: params.sort,
            leader: params.leader.clone(),
            phone: params.phone.clone(),
            email: params.email.clone(),
            status: params.status,
            tenant_id: scope.tenant_id(),
            created_at: now,
            updated_at: None,
        };
        state.depts.insert(dept.id, dept.clone());
        Ok(dept)
    }

    async fn update_dept(
        &mut self,
        scope: Scope,
        id: DeptId,
        params: &DeptParams,
        level: i32,
        now: DateTime<Utc>,
    ) -> StoreResult<u64> {
        let state = self.state()?;
        let Some(dept) = state.depts.get_mut(&id).filter(|d| scope.owns(d.tenant_id)) else {
            return Ok(0);
        };
        dept.name = params.name.clone();
        dept.parent_id = params.parent_id;
        dept.level = level;
        dept.sort = params.sort;
        dept.leader = params.leader.clone();
        dept.phone = params.phone.clone();
        dept.email = params.email.clone();
        dept.status = params.status;
        dept.updated_at = Some(now);
        Ok(1)
    }

    async fn delete_dept(&mut self, scope: Scope, id: DeptId) -> StoreResult<u64> {
        let state = self.state()?;
        if !state.depts.get(&id).is_some_and(|d| scope.owns(d.tenant_id)) {
            return Ok(0);
        }
        state.depts.remove(&id);
        Ok(1)
    }

    async fn count_dept_children(&mut self, scope: Scope, id: DeptId) -> StoreResult<u64> {
        let state = self.state()?;
        Ok(state
            .depts
            .values()
            .filter(|d| scope.owns(d.tenant_id) && d.parent_id == Some(id))
            .count() as u64)
    }

    async fn dept_member_ids(&mut self, scope: Scope, id: DeptId) -> StoreResult<Vec<UserId>> {
        let state = self.state()?;
        Ok(state
            .users
            .values()
            .filter(|u| scope.owns(u.tenant_id) && u.dept_id == Some(id))
            .map(|u| u.id)
            .collect())
    }

    // ── menus ──────────────────────────────────────────────────────────────

    async fn menu_by_id(&mut self, partition: MenuPartition, id: MenuId) -> StoreResult<Option<Menu>> {
        let state = self.state()?;
        Ok(state.menus.get(&id).filter(|m| m.partition == partition).cloned())
    }

    async fn menu_by_title(&mut self, partition: MenuPartition, title: &str) -> StoreResult<Option<Menu>> {
        let state = self.state()?;
        Ok(state
            .menus
            .values()
            .find(|m| m.partition == partition && m.menu_type.has_unique_title() && m.title == title)
            .cloned())
    }

    async fn list_menus(&mut self, partition: MenuPartition) -> StoreResult<Vec<Menu>> {
        let state = self.state()?;
        let mut rows: Vec<Menu> = state
            .menus
            .values()
            .filter(|m| m.partition == partition)
            .cloned()
            .collect();
        rows.sort_by_key(|m| (m.sort, m.id));
        Ok(rows)
    }

    async fn insert_menu(
        &mut self,
        partition: MenuPartition,
        params: &MenuParams,
        now: DateTime<Utc>,
    ) -> StoreResult<Menu> {
        let state = self.state()?;
        let menu = Menu {
            id: MenuId::new(state.next_id()),
            title: params.title.clone(),
            name: params.name.clone(),
            parent_id: params.parent_id,
            sort: params.sort,
            icon: params.icon.clone(),
            path: params.path.clone(),
            menu_type: params.menu_type,
            component: params.component.clone(),
            perms: params.perms.clone(),
            status: params.status,
            show: params.show,
            cache: params.cache,
            remark: params.remark.clone(),
            partition,
            created_at: now,
            updated_at: None,
        };
        state.menus.insert(menu.id, menu.clone());
        Ok(menu)
    }

    async fn update_menu(
        &mut self,
        partition: MenuPartition,
        id: MenuId,
        params: &MenuParams,
        now: DateTime<Utc>,
    ) -> StoreResult<u64> {
        let state = self.state()?;
        let Some(menu) = state.menus.get_mut(&id).filter(|m| m.partition == partition) else {
            return Ok(0);
        };
        menu.title = params.title.clone();
        menu.name = params.name.clone();
        menu.parent_id = params.parent_id;
        menu.sort = params.sort;
        menu.icon = params.icon.clone();
        menu.path = params.path.clone();
        menu.menu_type = params.menu_type;
        menu.component = params.component.clone();
        menu.perms = params.perms.clone();
        menu.status = params.status;
        menu.show = params.show;
        menu.cache = params.cache;
        menu.remark = params.remark.clone();
        menu.updated_at = Some(now);
        Ok(1)
    }

    async fn delete_menu(&mut self, partition: MenuPartition, id: MenuId) -> StoreResult<u64> {
        let state = self.state()?;
        if !state.menus.get(&id).is_some_and(|m| m.partition == partition) {
            return Ok(0);
        }
        state.menus.remove(&id);
        state.role_menus.retain(|(_, m)| *m != id);
        Ok(1)
    }

    async fn count_menu_children(&mut self, partition: MenuPartition, id: MenuId) -> StoreResult<u64> {
        let state = self.state()?;
        Ok(state
            .menus
            .values()
            .filter(|m| m.partition == partition && m.parent_id == Some(id))
            .count() as u64)
    }

    async fn menu_holder_ids(&mut self, id: MenuId) -> StoreResult<Vec<UserId>> {
        let state = self.state()?;
        let roles: BTreeSet<RoleId> = state
            .role_menus
            .iter()
            .filter(|(_, m)| *m == id)
            .map(|(r, _)| *r)
            .collect();
        Ok(state.holders_of(&roles))
    }

    // ── roles ──────────────────────────────────────────────────────────────

    async fn role_by_id(&mut self, scope: Scope, id: RoleId) -> StoreResult<Option<Role>> {
        let state = self.state()?;
        Ok(state.roles.get(&id).filter(|r| scope.owns(r.tenant_id)).cloned())
    }

    async fn role_by_name(&mut self, scope: Scope, name: &str) -> StoreResult<Option<Role>> {
        let state = self.state()?;
        Ok(state
            .roles
            .values()
            .find(|r| scope.owns(r.tenant_id) && r.name == name)
            .cloned())
    }

    async fn list_roles(&mut self, scope: Scope) -> StoreResult<Vec<Role>> {
        let state = self.state()?;
        Ok(state
            .roles
            .values()
            .filter(|r| scope.owns(r.tenant_id))
            .cloned()
            .collect())
    }

    async fn insert_role(
        &mut self,
        scope: Scope,
        params: &RoleParams,
        now: DateTime<Utc>,
    ) -> StoreResult<Role> {
        let state = self.state()?;
        let role = Role {
            id: RoleId::new(state.next_id()),
            name: params.name.clone(),
            status: params.status,
            remark: params.remark.clone(),
            tenant_id: scope.tenant_id(),
            created_at: now,
            updated_at: None,
        };
        state.roles.insert(role.id, role.clone());
        Ok(role)
    }

    async fn update_role(
        &mut self,
        scope: Scope,
        id: RoleId,
        params: &RoleParams,
        now: DateTime<Utc>,
    ) -> StoreResult<u64> {
        let state = self.state()?;
        let Some(role) = state.roles.get_mut(&id).filter(|r| scope.owns(r.tenant_id)) else {
            return Ok(0);
        };
        role.name = params.name.clone();
        role.status = params.status;
        role.remark = params.remark.clone();
        role.updated_at = Some(now);
        Ok(1)
    }

    async fn delete_role(&mut self, scope: Scope, id: RoleId) -> StoreResult<u64> {
        let state = self.state()?;
        if !state.roles.get(&id).is_some_and(|r| scope.owns(r.tenant_id)) {
            return Ok(0);
        }
        state.roles.remove(&id);
        state.role_menus.retain(|(r, _)| *r != id);
        state.role_rules.retain(|(r, _)| *r != id);
        state.user_roles.retain(|(_, r)| *r != id);
        Ok(1)
    }

    async fn role_menus(&mut self, role_id: RoleId) -> StoreResult<Vec<Menu>> {
        let state = self.state()?;
        let mut rows: Vec<Menu> = state
            .role_menus
            .iter()
            .filter(|(r, _)| *r == role_id)
            .filter_map(|(_, m)| state.menus.get(m).cloned())
            .collect();
        rows.sort_by_key(|m| (m.sort, m.id));
        Ok(rows)
    }

    async fn role_rule_ids(&mut self, role_id: RoleId) -> StoreResult<Vec<DataRuleId>> {
        let state = self.state()?;
        Ok(state
            .role_rules
            .iter()
            .filter(|(r, _)| *r == role_id)
            .map(|(_, rule)| *rule)
            .collect())
    }

    async fn replace_role_menus(&mut self, role_id: RoleId, menu_ids: &[MenuId]) -> StoreResult<()> {
        let state = self.state()?;
        state.role_menus.retain(|(r, _)| *r != role_id);
        state.role_menus.extend(menu_ids.iter().map(|m| (role_id, *m)));
        Ok(())
    }

    async fn replace_role_rules(&mut self, role_id: RoleId, rule_ids: &[DataRuleId]) -> StoreResult<()> {
        let state = self.state()?;
        state.role_rules.retain(|(r, _)| *r != role_id);
        state.role_rules.extend(rule_ids.iter().map(|rule| (role_id, *rule)));
        Ok(())
    }

    async fn role_holder_ids(&mut self, role_id: RoleId) -> StoreResult<Vec<UserId>> {
        let state = self.state()?;
        Ok(state.holders_of(&BTreeSet::from([role_id])))
    }

    async fn roles_of_user(&mut self, user_id: UserId) -> StoreResult<Vec<Role>> {
        let state = self.state()?;
        Ok(state
            .user_roles
            .iter()
            .filter(|(u, _)| *u == user_id)
            .filter_map(|(_, r)| state.roles.get(r).cloned())
            .collect())
    }

    // ── data rules ─────────────────────────────────────────────────────────

    async fn list_rules(&mut self) -> StoreResult<Vec<DataRule>> {
        Ok(self.state()?.rules.values().cloned().collect())
    }

    async fn rules_by_ids(&mut self, ids: &[DataRuleId]) -> StoreResult<Vec<DataRule>> {
        let state = self.state()?;
        Ok(ids.iter().filter_map(|id| state.rules.get(id).cloned()).collect())
    }

    async fn insert_rule(&mut self, params: &DataRuleParams, now: DateTime<Utc>) -> StoreResult<DataRule> {
        let state = self.state()?;
        let rule = DataRule {
            id: DataRuleId::new(state.next_id()),
            name: params.name.clone(),
            model: params.model.clone(),
            column: params.column.clone(),
            operator: params.operator.clone(),
            expression: params.expression.clone(),
            value: params.value.clone(),
            created_at: now,
        };
        state.rules.insert(rule.id, rule.clone());
        Ok(rule)
    }

    // ── users ──────────────────────────────────────────────────────────────

    async fn user_by_id(&mut self, scope: Scope, id: UserId) -> StoreResult<Option<User>> {
        let state = self.state()?;
        Ok(state.users.get(&id).filter(|u| scope.owns(u.tenant_id)).cloned())
    }

    async fn user_by_id_unscoped(&mut self, id: UserId) -> StoreResult<Option<User>> {
        Ok(self.state()?.users.get(&id).cloned())
    }

    async fn user_by_phone(&mut self, user_type: &UserType, phone: &str) -> StoreResult<Option<User>> {
        let state = self.state()?;
        Ok(state
            .users
            .values()
            .find(|u| &u.user_type == user_type && u.phone == phone)
            .cloned())
    }

    async fn list_users(&mut self, scope: Scope) -> StoreResult<Vec<User>> {
        let state = self.state()?;
        Ok(state
            .users
            .values()
            .filter(|u| scope.owns(u.tenant_id))
            .cloned()
            .collect())
    }

    async fn insert_user(&mut self, new: &NewUser) -> StoreResult<User> {
        let state = self.state()?;
        if state
            .users
            .values()
            .any(|u| u.user_type == new.user_type && u.phone == new.phone)
        {
            return Err(StoreError::Conflict(format!("phone '{}'", new.phone)));
        }
        let user = User {
            id: UserId::new(state.next_id()),
            username: new.username.clone(),
            nickname: new.nickname.clone(),
            phone: new.phone.clone(),
            email: new.email.clone(),
            avatar: None,
            password_hash: new.password_hash.clone(),
            salt: new.salt.clone(),
            dept_id: new.dept_id,
            tenant_id: new.tenant_id,
            user_type: new.user_type.clone(),
            is_superuser: new.is_superuser,
            is_staff: new.is_staff,
            is_multi_login: new.is_multi_login,
            status: new.status,
            join_time: new.join_time,
            last_login_time: None,
        };
        state.users.insert(user.id, user.clone());
        Ok(user)
    }

    async fn update_user_info(&mut self, id: UserId, info: &UpdateUserInfo) -> StoreResult<u64> {
        let state = self.state()?;
        let Some(user) = state.users.get_mut(&id) else {
            return Ok(0);
        };
        user.username = info.username.clone();
        user.nickname = info.nickname.clone();
        user.phone = info.phone.clone();
        user.email = info.email.clone();
        Ok(1)
    }

    async fn set_user_flag(&mut self, id: UserId, flag: UserFlag, value: bool) -> StoreResult<u64> {
        let state = self.state()?;
        let Some(user) = state.users.get_mut(&id) else {
            return Ok(0);
        };
        user.set_flag(flag, value);
        Ok(1)
    }

    async fn set_password(&mut self, id: UserId, password_hash: &str) -> StoreResult<u64> {
        let state = self.state()?;
        let Some(user) = state.users.get_mut(&id) else {
            return Ok(0);
        };
        user.password_hash = password_hash.to_string();
        Ok(1)
    }

    async fn delete_user(&mut self, id: UserId) -> StoreResult<u64> {
        let state = self.state()?;
        if state.users.remove(&id).is_none() {
            return Ok(0);
        }
        state.user_roles.retain(|(u, _)| *u != id);
        Ok(1)
    }

    async fn replace_user_roles(&mut self, user_id: UserId, role_ids: &[RoleId]) -> StoreResult<()> {
        let state = self.state()?;
        state.user_roles.retain(|(u, _)| *u != user_id);
        state.user_roles.extend(role_ids.iter().map(|r| (user_id, *r)));
        Ok(())
    }

    async fn commit(&mut self) -> StoreResult<()> {
        if self.done {
            return Err(StoreError::Finished);
        }
        *self.guard = std::mem::take(&mut self.work);
        self.done = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use storedesk_org::Status;

    fn dept(name: &str) -> DeptParams {
        DeptParams {
            name: name.to_string(),
            parent_id: None,
            sort: 0,
            leader: None,
            phone: None,
            email: None,
            status: Status::Enabled,
        }
    }

    #[tokio::test(flavor = "current_thread")]
    async fn dropped_unit_of_work_rolls_back() {
        let store = InMemoryStore::new();
        let scope = Scope::Tenant(TenantId::new(1));

        {
            let mut uow = store.begin().await.unwrap();
            uow.insert_dept(scope, &dept("Sales"), 0, Utc::now()).await.unwrap();
        }

        let mut uow = store.begin().await.unwrap();
        assert!(uow.list_depts(scope).await.unwrap().is_empty());
    }

    #[tokio::test(flavor = "current_thread")]
    async fn committed_writes_are_visible_and_scoped() {
        let store = InMemoryStore::new();
        let t1 = Scope::Tenant(TenantId::new(1));
        let t2 = Scope::Tenant(TenantId::new(2));

        let mut uow = store.begin().await.unwrap();
        let d = uow.insert_dept(t1, &dept("Sales"), 0, Utc::now()).await.unwrap();
        uow.commit().await.unwrap();
        assert_eq!(uow.list_depts(t1).await.unwrap_err(), StoreError::Finished);
        drop(uow);

        let mut uow = store.begin().await.unwrap();
        assert!(uow.dept_by_id(t1, d.id).await.unwrap().is_some());
        assert!(uow.dept_by_id(t2, d.id).await.unwrap().is_none());
        assert!(uow.dept_by_id(Scope::Platform, d.id).await.unwrap().is_none());
        assert_eq!(uow.update_dept(t2, d.id, &dept("X"), 0, Utc::now()).await.unwrap(), 0);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn replacing_role_rules_is_wholesale() {
        let store = InMemoryStore::new();
        let mut uow = store.begin().await.unwrap();
        let role = RoleId::new(10);
        uow.replace_role_rules(role, &[DataRuleId::new(1), DataRuleId::new(2)]).await.unwrap();
        uow.replace_role_rules(role, &[DataRuleId::new(3)]).await.unwrap();
        assert_eq!(uow.role_rule_ids(role).await.unwrap(), vec![DataRuleId::new(3)]);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn duplicate_phone_within_user_type_conflicts() {
        let store = InMemoryStore::new();
        let mut uow = store.begin().await.unwrap();
        let new = NewUser {
            username: "ana".into(),
            nickname: "Ana".into(),
            phone: "13800000001".into(),
            email: None,
            password_hash: "h".into(),
            salt: None,
            dept_id: None,
            tenant_id: None,
            user_type: UserType::Platform,
            is_superuser: false,
            is_staff: true,
            is_multi_login: false,
            status: Status::Enabled,
            join_time: Utc::now(),
        };
        uow.insert_user(&new).await.unwrap();
        assert!(matches!(uow.insert_user(&new).await, Err(StoreError::Conflict(_))));

        let other_type = NewUser { user_type: UserType::TenantStaff, tenant_id: Some(TenantId::new(1)), ..new };
        uow.insert_user(&other_type).await.unwrap();
    }
}
