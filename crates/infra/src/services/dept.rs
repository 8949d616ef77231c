use std::collections::{HashMap, VecDeque};

use tracing::{info, instrument};

use storedesk_auth::{resolve_scope, Principal};
use storedesk_core::{
    build_tree, creates_cycle, DeptId, DomainError, DomainResult, Scope, TreeNode,
};
use storedesk_org::{DeptFilter, DeptParams, Department};

use super::{now, ServiceContext};
use crate::invalidation::{AffectedPrincipals, MutationOutcome};
use crate::store::UnitOfWork;

#[derive(Clone)]
pub struct DeptService {
    ctx: ServiceContext,
}

impl DeptService {
    pub fn new(ctx: ServiceContext) -> Self {
        Self { ctx }
    }

    pub async fn get(&self, actor: &Principal, id: DeptId) -> DomainResult<Department> {
        let scope = resolve_scope(actor)?;
        let mut uow = self.ctx.begin().await?;
        find(&mut *uow, scope, id).await
    }

    /// Department forest of the actor's scope, narrowed by `filter`.
    ///
    /// A department whose parent is filtered out is shown as a root.
    pub async fn tree(
        &self,
        actor: &Principal,
        filter: &DeptFilter,
    ) -> DomainResult<Vec<TreeNode<Department>>> {
        let scope = resolve_scope(actor)?;
        let mut uow = self.ctx.begin().await?;
        let rows: Vec<Department> = uow
            .list_depts(scope)
            .await?
            .into_iter()
            .filter(|d| filter.matches(d))
            .collect();
        Ok(build_tree(rows))
    }

    #[instrument(skip(self, actor, params), fields(actor = %actor.user_id, name = %params.name), err)]
    pub async fn create(
        &self,
        actor: &Principal,
        params: &DeptParams,
    ) -> DomainResult<MutationOutcome<Department>> {
        params.validate()?;
        let scope = resolve_scope(actor)?;
        let mut uow = self.ctx.begin().await?;

        if uow.dept_by_name(scope, &params.name).await?.is_some() {
            return Err(DomainError::forbidden("department name already exists"));
        }
        let level = level_under(&mut *uow, scope, params.parent_id).await?;

        let dept = uow.insert_dept(scope, params, level, now()).await?;
        info!(dept_id = %dept.id, %scope, "department created");
        self.ctx
            .invalidator()
            .commit(uow, MutationOutcome::with_value(dept, AffectedPrincipals::none()))
            .await
    }

    #[instrument(skip(self, actor, params), fields(actor = %actor.user_id, %id), err)]
    pub async fn update(
        &self,
        actor: &Principal,
        id: DeptId,
        params: &DeptParams,
    ) -> DomainResult<MutationOutcome> {
        params.validate()?;
        let scope = resolve_scope(actor)?;
        let mut uow = self.ctx.begin().await?;

        let Some(current) = uow.dept_by_id(scope, id).await? else {
            return Ok(MutationOutcome::unmatched());
        };
        if current.name != params.name && uow.dept_by_name(scope, &params.name).await?.is_some() {
            return Err(DomainError::forbidden("department name already exists"));
        }
        params.ensure_not_self_parent(id)?;
        let level = level_under(&mut *uow, scope, params.parent_id).await?;

        let all = uow.list_depts(scope).await?;
        if let Some(parent) = params.parent_id {
            if creates_cycle(&all, id, parent) {
                return Err(DomainError::forbidden(
                    "a department cannot be moved under one of its descendants",
                ));
            }
        }

        let at = now();
        let rows = uow.update_dept(scope, id, params, level, at).await?;
        if level != current.level {
            for (child, depth) in descendants(&all, id) {
                let child_params = DeptParams::from(child);
                uow.update_dept(scope, child.id, &child_params, level + depth, at)
                    .await?;
            }
        }

        let members = uow.dept_member_ids(scope, id).await?;
        info!(rows, members = members.len(), "department updated");
        self.ctx
            .invalidator()
            .commit(uow, MutationOutcome::rows(rows, AffectedPrincipals::users(members)))
            .await
    }

    #[instrument(skip(self, actor), fields(actor = %actor.user_id, %id), err)]
    pub async fn delete(&self, actor: &Principal, id: DeptId) -> DomainResult<MutationOutcome> {
        let scope = resolve_scope(actor)?;
        let mut uow = self.ctx.begin().await?;

        if uow.dept_by_id(scope, id).await?.is_none() {
            return Ok(MutationOutcome::unmatched());
        }
        let members = uow.dept_member_ids(scope, id).await?;
        if !members.is_empty() {
            return Err(DomainError::forbidden("department still has users"));
        }
        if uow.count_dept_children(scope, id).await? > 0 {
            return Err(DomainError::forbidden("department still has child departments"));
        }

        let rows = uow.delete_dept(scope, id).await?;
        info!(rows, "department deleted");
        self.ctx
            .invalidator()
            .commit(uow, MutationOutcome::rows(rows, AffectedPrincipals::users(members)))
            .await
    }
}

async fn find(uow: &mut dyn UnitOfWork, scope: Scope, id: DeptId) -> DomainResult<Department> {
    uow.dept_by_id(scope, id)
        .await?
        .ok_or_else(|| DomainError::not_found(format!("department {id}")))
}

/// Level of a department placed under `parent` (roots are level 0).
async fn level_under(
    uow: &mut dyn UnitOfWork,
    scope: Scope,
    parent: Option<DeptId>,
) -> DomainResult<i32> {
    match parent {
        None => Ok(0),
        Some(parent_id) => match uow.dept_by_id(scope, parent_id).await? {
            Some(parent) => Ok(parent.level + 1),
            None => Err(DomainError::not_found(format!("parent department {parent_id}"))),
        },
    }
}

/// Every descendant of `root` with its depth below it (children are 1).
fn descendants(all: &[Department], root: DeptId) -> Vec<(&Department, i32)> {
    let mut children: HashMap<DeptId, Vec<&Department>> = HashMap::new();
    for dept in all {
        if let Some(parent) = dept.parent_id {
            children.entry(parent).or_default().push(dept);
        }
    }

    let mut out = Vec::new();
    let mut queue = VecDeque::from([(root, 0)]);
    while let Some((id, depth)) = queue.pop_front() {
        for child in children.get(&id).into_iter().flatten() {
            if child.id == root {
                continue;
            }
            out.push((*child, depth + 1));
            queue.push_back((child.id, depth + 1));
        }
    }
    out
}
