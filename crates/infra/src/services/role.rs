use std::collections::BTreeSet;

use tracing::{info, instrument};

use storedesk_auth::{resolve_scope, Principal};
use storedesk_core::{DataRuleId, DomainError, DomainResult, MenuId, RoleId, Scope, UserId};
use storedesk_org::{Role, RoleDetail, RoleFilter, RoleParams};

use super::{now, ServiceContext};
use crate::invalidation::{AffectedPrincipals, MutationOutcome};
use crate::store::UnitOfWork;

/// Roles and their menu / data-rule bindings.
///
/// Binding replaces a role's association set wholesale inside one unit of
/// work. Every id is checked before anything is written, and every holder
/// of the role is swept from the principal cache afterwards.
#[derive(Clone)]
pub struct RoleService {
    ctx: ServiceContext,
}

impl RoleService {
    pub fn new(ctx: ServiceContext) -> Self {
        Self { ctx }
    }

    pub async fn get(&self, actor: &Principal, id: RoleId) -> DomainResult<RoleDetail> {
        let scope = resolve_scope(actor)?;
        let mut uow = self.ctx.begin().await?;
        let role = find(&mut *uow, scope, id).await?;
        let menu_ids = uow.role_menus(id).await?.into_iter().map(|m| m.id).collect();
        let rule_ids = uow.role_rule_ids(id).await?;
        Ok(RoleDetail { role, menu_ids, rule_ids })
    }

    pub async fn list(&self, actor: &Principal, filter: &RoleFilter) -> DomainResult<Vec<Role>> {
        let scope = resolve_scope(actor)?;
        let mut uow = self.ctx.begin().await?;
        Ok(uow
            .list_roles(scope)
            .await?
            .into_iter()
            .filter(|r| filter.matches(r))
            .collect())
    }

    /// Roles held by a user of the actor's scope.
    pub async fn roles_of_user(&self, actor: &Principal, user_id: UserId) -> DomainResult<Vec<Role>> {
        let scope = resolve_scope(actor)?;
        let mut uow = self.ctx.begin().await?;
        if uow.user_by_id(scope, user_id).await?.is_none() {
            return Err(DomainError::not_found(format!("user {user_id}")));
        }
        Ok(uow.roles_of_user(user_id).await?)
    }

    #[instrument(skip(self, actor, params), fields(actor = %actor.user_id, name = %params.name), err)]
    pub async fn create(&self, actor: &Principal, params: &RoleParams) -> DomainResult<MutationOutcome<Role>> {
        params.validate()?;
        let scope = resolve_scope(actor)?;
        let mut uow = self.ctx.begin().await?;

        if uow.role_by_name(scope, &params.name).await?.is_some() {
            return Err(DomainError::forbidden("role name already exists"));
        }
        let role = uow.insert_role(scope, params, now()).await?;
        info!(role_id = %role.id, %scope, "role created");
        self.ctx
            .invalidator()
            .commit(uow, MutationOutcome::with_value(role, AffectedPrincipals::none()))
            .await
    }

    #[instrument(skip(self, actor, params), fields(actor = %actor.user_id, %id), err)]
    pub async fn update(
        &self,
        actor: &Principal,
        id: RoleId,
        params: &RoleParams,
    ) -> DomainResult<MutationOutcome> {
        params.validate()?;
        let scope = resolve_scope(actor)?;
        let mut uow = self.ctx.begin().await?;

        let Some(current) = uow.role_by_id(scope, id).await? else {
            return Ok(MutationOutcome::unmatched());
        };
        if current.name != params.name && uow.role_by_name(scope, &params.name).await?.is_some() {
            return Err(DomainError::forbidden("role name already exists"));
        }

        let rows = uow.update_role(scope, id, params, now()).await?;
        let holders = uow.role_holder_ids(id).await?;
        info!(rows, holders = holders.len(), "role updated");
        self.ctx
            .invalidator()
            .commit(uow, MutationOutcome::rows(rows, AffectedPrincipals::users(holders)))
            .await
    }

    /// Delete several roles at once. Ids outside the scope are skipped and
    /// do not count towards `rows`.
    #[instrument(skip(self, actor), fields(actor = %actor.user_id, count = ids.len()), err)]
    pub async fn delete(&self, actor: &Principal, ids: &[RoleId]) -> DomainResult<MutationOutcome> {
        let scope = resolve_scope(actor)?;
        let mut uow = self.ctx.begin().await?;

        let mut matched = Vec::new();
        let mut holders = BTreeSet::new();
        for id in dedup(ids) {
            if uow.role_by_id(scope, id).await?.is_some() {
                holders.extend(uow.role_holder_ids(id).await?);
                matched.push(id);
            }
        }

        let mut rows = 0;
        for id in matched {
            rows += uow.delete_role(scope, id).await?;
        }
        info!(rows, holders = holders.len(), "roles deleted");
        self.ctx
            .invalidator()
            .commit(uow, MutationOutcome::rows(rows, AffectedPrincipals::users(holders)))
            .await
    }

    /// Replace the menus bound to `role_id`.
    ///
    /// Each menu must belong to the role's menu partition; otherwise the
    /// call fails with `NotFound` and the bindings stay untouched.
    #[instrument(skip(self, actor, menu_ids), fields(actor = %actor.user_id, %role_id, count = menu_ids.len()), err)]
    pub async fn bind_menus(
        &self,
        actor: &Principal,
        role_id: RoleId,
        menu_ids: &[MenuId],
    ) -> DomainResult<MutationOutcome> {
        let scope = resolve_scope(actor)?;
        let partition = scope.menu_partition();
        let mut uow = self.ctx.begin().await?;

        find(&mut *uow, scope, role_id).await?;
        let menu_ids = dedup(menu_ids);
        for &menu_id in &menu_ids {
            if uow.menu_by_id(partition, menu_id).await?.is_none() {
                return Err(DomainError::not_found(format!("menu {menu_id}")));
            }
        }

        uow.replace_role_menus(role_id, &menu_ids).await?;
        let holders = uow.role_holder_ids(role_id).await?;
        info!(holders = holders.len(), "role menus replaced");
        self.ctx
            .invalidator()
            .commit(uow, MutationOutcome::rows(menu_ids.len() as u64, AffectedPrincipals::users(holders)))
            .await
    }

    /// Replace the data rules bound to `role_id`.
    #[instrument(skip(self, actor, rule_ids), fields(actor = %actor.user_id, %role_id, count = rule_ids.len()), err)]
    pub async fn bind_rules(
        &self,
        actor: &Principal,
        role_id: RoleId,
        rule_ids: &[DataRuleId],
    ) -> DomainResult<MutationOutcome> {
        let scope = resolve_scope(actor)?;
        let mut uow = self.ctx.begin().await?;

        find(&mut *uow, scope, role_id).await?;
        let rule_ids = dedup(rule_ids);
        let known: BTreeSet<DataRuleId> = uow
            .rules_by_ids(&rule_ids)
            .await?
            .into_iter()
            .map(|r| r.id)
            .collect();
        if let Some(missing) = rule_ids.iter().find(|id| !known.contains(id)) {
            return Err(DomainError::not_found(format!("data rule {missing}")));
        }

        uow.replace_role_rules(role_id, &rule_ids).await?;
        let holders = uow.role_holder_ids(role_id).await?;
        info!(holders = holders.len(), "role data rules replaced");
        self.ctx
            .invalidator()
            .commit(uow, MutationOutcome::rows(rule_ids.len() as u64, AffectedPrincipals::users(holders)))
            .await
    }
}

async fn find(uow: &mut dyn UnitOfWork, scope: Scope, id: RoleId) -> DomainResult<Role> {
    uow.role_by_id(scope, id)
        .await?
        .ok_or_else(|| DomainError::not_found(format!("role {id}")))
}

/// Drop repeated ids, keeping first occurrences in order.
fn dedup<T: Copy + Ord>(ids: &[T]) -> Vec<T> {
    let mut seen = BTreeSet::new();
    ids.iter().copied().filter(|id| seen.insert(*id)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dedup_keeps_first_occurrence_order() {
        let ids = [MenuId::new(3), MenuId::new(1), MenuId::new(3), MenuId::new(2)];
        assert_eq!(dedup(&ids), vec![MenuId::new(3), MenuId::new(1), MenuId::new(2)]);
    }
}
