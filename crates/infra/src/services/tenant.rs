use tracing::{info, instrument};

use storedesk_auth::Principal;
use storedesk_core::{DomainError, DomainResult, TenantId};
use storedesk_org::{ReviewTenant, Tenant, TenantFilter, TenantParams};

use super::rule::require_platform_superuser;
use super::{now, ServiceContext};
use crate::invalidation::{AffectedPrincipals, MutationOutcome};
use crate::store::UnitOfWork;

/// Tenant (store) registry. Every call requires a platform superuser.
#[derive(Clone)]
pub struct TenantService {
    ctx: ServiceContext,
}

impl TenantService {
    pub fn new(ctx: ServiceContext) -> Self {
        Self { ctx }
    }

    pub async fn get(&self, actor: &Principal, id: TenantId) -> DomainResult<Tenant> {
        require_platform_superuser(actor)?;
        let mut uow = self.ctx.begin().await?;
        find(&mut *uow, id).await
    }

    pub async fn list(&self, actor: &Principal, filter: &TenantFilter) -> DomainResult<Vec<Tenant>> {
        require_platform_superuser(actor)?;
        let mut uow = self.ctx.begin().await?;
        Ok(uow
            .list_tenants()
            .await?
            .into_iter()
            .filter(|t| filter.matches(t))
            .collect())
    }

    /// Register a tenant. New tenants start out pending review.
    #[instrument(skip(self, actor, params), fields(actor = %actor.user_id, code = %params.code), err)]
    pub async fn create(
        &self,
        actor: &Principal,
        params: &TenantParams,
    ) -> DomainResult<MutationOutcome<Tenant>> {
        require_platform_superuser(actor)?;
        params.validate()?;
        let mut uow = self.ctx.begin().await?;

        if uow.tenant_by_code(&params.code).await?.is_some() {
            return Err(DomainError::forbidden("tenant code already exists"));
        }
        let tenant = uow.insert_tenant(params, actor.user_id, now()).await?;
        info!(tenant_id = %tenant.id, "tenant registered");
        self.ctx
            .invalidator()
            .commit(uow, MutationOutcome::with_value(tenant, AffectedPrincipals::none()))
            .await
    }

    #[instrument(skip(self, actor, params), fields(actor = %actor.user_id, %id), err)]
    pub async fn update(
        &self,
        actor: &Principal,
        id: TenantId,
        params: &TenantParams,
    ) -> DomainResult<MutationOutcome<Tenant>> {
        require_platform_superuser(actor)?;
        let mut uow = self.ctx.begin().await?;

        let mut tenant = find(&mut *uow, id).await?;
        tenant.apply_update(params, actor.user_id, now())?;
        let rows = uow.save_tenant(&tenant).await?;
        info!(rows, "tenant updated");
        let outcome = MutationOutcome { rows, value: tenant, affected: AffectedPrincipals::none() };
        self.ctx.invalidator().commit(uow, outcome).await
    }

    /// Approve or reject a pending (or previously rejected) tenant.
    #[instrument(skip(self, actor, review), fields(actor = %actor.user_id, %id, decision = ?review.status), err)]
    pub async fn review(
        &self,
        actor: &Principal,
        id: TenantId,
        review: &ReviewTenant,
    ) -> DomainResult<MutationOutcome<Tenant>> {
        require_platform_superuser(actor)?;
        let mut uow = self.ctx.begin().await?;

        let mut tenant = find(&mut *uow, id).await?;
        tenant.review(review, actor.user_id, now())?;
        let rows = uow.save_tenant(&tenant).await?;
        info!(rows, status = ?tenant.status, "tenant reviewed");
        let outcome = MutationOutcome { rows, value: tenant, affected: AffectedPrincipals::none() };
        self.ctx.invalidator().commit(uow, outcome).await
    }
}

async fn find(uow: &mut dyn UnitOfWork, id: TenantId) -> DomainResult<Tenant> {
    uow.tenant_by_id(id)
        .await?
        .ok_or_else(|| DomainError::not_found(format!("tenant {id}")))
}
