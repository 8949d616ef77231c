use std::collections::BTreeSet;

use tracing::{info, instrument};

use storedesk_auth::{resolve_menu_partition, resolve_scope, Principal};
use storedesk_core::{
    build_tree, creates_cycle, DomainError, DomainResult, MenuId, MenuPartition, RoleId, TreeNode,
};
use storedesk_org::{Menu, MenuFilter, MenuParams};

use super::{now, ServiceContext};
use crate::invalidation::{AffectedPrincipals, MutationOutcome};
use crate::store::UnitOfWork;

/// Menu catalog administration.
///
/// Every call takes `viewing_tenant`: platform accounts work on the admin
/// catalog unless they set it to edit the tenant-facing catalog. It has no
/// effect for tenant accounts.
#[derive(Clone)]
pub struct MenuService {
    ctx: ServiceContext,
}

impl MenuService {
    pub fn new(ctx: ServiceContext) -> Self {
        Self { ctx }
    }

    pub async fn get(&self, actor: &Principal, viewing_tenant: bool, id: MenuId) -> DomainResult<Menu> {
        let partition = resolve_menu_partition(actor, viewing_tenant);
        let mut uow = self.ctx.begin().await?;
        find(&mut *uow, partition, id).await
    }

    pub async fn tree(
        &self,
        actor: &Principal,
        viewing_tenant: bool,
        filter: &MenuFilter,
    ) -> DomainResult<Vec<TreeNode<Menu>>> {
        let partition = resolve_menu_partition(actor, viewing_tenant);
        let mut uow = self.ctx.begin().await?;
        let rows: Vec<Menu> = uow
            .list_menus(partition)
            .await?
            .into_iter()
            .filter(|m| filter.matches(m))
            .collect();
        Ok(build_tree(rows))
    }

    /// Menus bound to one of the actor's roles, as a tree.
    pub async fn role_menu_tree(
        &self,
        actor: &Principal,
        role_id: RoleId,
    ) -> DomainResult<Vec<TreeNode<Menu>>> {
        let scope = resolve_scope(actor)?;
        let mut uow = self.ctx.begin().await?;
        if uow.role_by_id(scope, role_id).await?.is_none() {
            return Err(DomainError::not_found(format!("role {role_id}")));
        }
        let partition = scope.menu_partition();
        let rows: Vec<Menu> = uow
            .role_menus(role_id)
            .await?
            .into_iter()
            .filter(|m| m.partition == partition)
            .collect();
        Ok(build_tree(rows))
    }

    /// Navigation tree for the actor.
    ///
    /// Superusers see the whole catalog of their partition; everyone else
    /// sees the enabled menus reachable through their enabled roles.
    pub async fn user_menu_tree(&self, actor: &Principal) -> DomainResult<Vec<TreeNode<Menu>>> {
        let partition = resolve_menu_partition(actor, false);
        let mut uow = self.ctx.begin().await?;
        let catalog = uow.list_menus(partition).await?;
        if actor.is_superuser {
            return Ok(build_tree(catalog));
        }

        let granted: BTreeSet<MenuId> = actor
            .enabled_roles()
            .flat_map(|r| r.menus.iter())
            .map(|m| m.menu_id)
            .collect();
        let rows: Vec<Menu> = catalog
            .into_iter()
            .filter(|m| m.status.is_enabled() && granted.contains(&m.id))
            .collect();
        Ok(build_tree(rows))
    }

    #[instrument(skip(self, actor, params), fields(actor = %actor.user_id, title = %params.title), err)]
    pub async fn create(
        &self,
        actor: &Principal,
        viewing_tenant: bool,
        params: &MenuParams,
    ) -> DomainResult<MutationOutcome<Menu>> {
        params.validate()?;
        let partition = resolve_menu_partition(actor, viewing_tenant);
        let mut uow = self.ctx.begin().await?;

        if params.menu_type.has_unique_title()
            && uow.menu_by_title(partition, &params.title).await?.is_some()
        {
            return Err(DomainError::forbidden("menu title already exists"));
        }
        if let Some(parent) = params.parent_id {
            find_parent(&mut *uow, partition, parent).await?;
        }

        let menu = uow.insert_menu(partition, params, now()).await?;
        info!(menu_id = %menu.id, ?partition, "menu created");
        self.ctx
            .invalidator()
            .commit(uow, MutationOutcome::with_value(menu, AffectedPrincipals::none()))
            .await
    }

    #[instrument(skip(self, actor, params), fields(actor = %actor.user_id, %id), err)]
    pub async fn update(
        &self,
        actor: &Principal,
        viewing_tenant: bool,
        id: MenuId,
        params: &MenuParams,
    ) -> DomainResult<MutationOutcome> {
        params.validate()?;
        let partition = resolve_menu_partition(actor, viewing_tenant);
        let mut uow = self.ctx.begin().await?;

        let Some(current) = uow.menu_by_id(partition, id).await? else {
            return Ok(MutationOutcome::unmatched());
        };
        let title_changed = current.title != params.title || !current.menu_type.has_unique_title();
        if params.menu_type.has_unique_title() && title_changed {
            if let Some(other) = uow.menu_by_title(partition, &params.title).await? {
                if other.id != id {
                    return Err(DomainError::forbidden("menu title already exists"));
                }
            }
        }
        params.ensure_not_self_parent(id)?;
        if let Some(parent) = params.parent_id {
            find_parent(&mut *uow, partition, parent).await?;
            let all = uow.list_menus(partition).await?;
            if creates_cycle(&all, id, parent) {
                return Err(DomainError::forbidden(
                    "a menu cannot be moved under one of its descendants",
                ));
            }
        }

        let rows = uow.update_menu(partition, id, params, now()).await?;
        let holders = uow.menu_holder_ids(id).await?;
        info!(rows, holders = holders.len(), "menu updated");
        self.ctx
            .invalidator()
            .commit(uow, MutationOutcome::rows(rows, AffectedPrincipals::users(holders)))
            .await
    }

    #[instrument(skip(self, actor), fields(actor = %actor.user_id, %id), err)]
    pub async fn delete(
        &self,
        actor: &Principal,
        viewing_tenant: bool,
        id: MenuId,
    ) -> DomainResult<MutationOutcome> {
        let partition = resolve_menu_partition(actor, viewing_tenant);
        let mut uow = self.ctx.begin().await?;

        if uow.menu_by_id(partition, id).await?.is_none() {
            return Ok(MutationOutcome::unmatched());
        }
        if uow.count_menu_children(partition, id).await? > 0 {
            return Err(DomainError::forbidden("menu still has child menus"));
        }

        let holders = uow.menu_holder_ids(id).await?;
        let rows = uow.delete_menu(partition, id).await?;
        info!(rows, holders = holders.len(), "menu deleted");
        self.ctx
            .invalidator()
            .commit(uow, MutationOutcome::rows(rows, AffectedPrincipals::users(holders)))
            .await
    }
}

async fn find(uow: &mut dyn UnitOfWork, partition: MenuPartition, id: MenuId) -> DomainResult<Menu> {
    uow.menu_by_id(partition, id)
        .await?
        .ok_or_else(|| DomainError::not_found(format!("menu {id}")))
}

async fn find_parent(
    uow: &mut dyn UnitOfWork,
    partition: MenuPartition,
    id: MenuId,
) -> DomainResult<Menu> {
    uow.menu_by_id(partition, id)
        .await?
        .ok_or_else(|| DomainError::not_found(format!("parent menu {id}")))
}
