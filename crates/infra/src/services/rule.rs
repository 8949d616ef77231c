use tracing::{info, instrument};

use storedesk_auth::{require_superuser, resolve_scope, Principal};
use storedesk_core::{DomainError, DomainResult};
use storedesk_org::{DataRule, DataRuleParams};

use super::{now, ServiceContext};
use crate::invalidation::{AffectedPrincipals, MutationOutcome};

/// The global data-rule catalog roles bind against.
#[derive(Clone)]
pub struct DataRuleService {
    ctx: ServiceContext,
}

impl DataRuleService {
    pub fn new(ctx: ServiceContext) -> Self {
        Self { ctx }
    }

    pub async fn list(&self, actor: &Principal) -> DomainResult<Vec<DataRule>> {
        resolve_scope(actor)?;
        let mut uow = self.ctx.begin().await?;
        Ok(uow.list_rules().await?)
    }

    /// Add a rule to the catalog. Platform superusers only.
    #[instrument(skip(self, actor, params), fields(actor = %actor.user_id, name = %params.name), err)]
    pub async fn create(
        &self,
        actor: &Principal,
        params: &DataRuleParams,
    ) -> DomainResult<MutationOutcome<DataRule>> {
        require_platform_superuser(actor)?;
        params.validate()?;
        let mut uow = self.ctx.begin().await?;
        let rule = uow.insert_rule(params, now()).await?;
        info!(rule_id = %rule.id, "data rule created");
        self.ctx
            .invalidator()
            .commit(uow, MutationOutcome::with_value(rule, AffectedPrincipals::none()))
            .await
    }
}

pub(crate) fn require_platform_superuser(actor: &Principal) -> DomainResult<()> {
    require_superuser(actor)?;
    if !resolve_scope(actor)?.is_platform() {
        return Err(DomainError::unauthorized("platform account required"));
    }
    Ok(())
}
