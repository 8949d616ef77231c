use tracing::{debug, instrument, warn};

use storedesk_auth::{
    self as auth, AuthorizationExplanation, Permission, Principal, RoleGrant,
};
use storedesk_core::{DomainError, DomainResult, UserId};

use super::ServiceContext;

/// Principal resolution and permission checks by user id.
#[derive(Clone)]
pub struct AccessService {
    ctx: ServiceContext,
}

impl AccessService {
    pub fn new(ctx: ServiceContext) -> Self {
        Self { ctx }
    }

    /// Resolve a principal, serving it from the cache when possible.
    ///
    /// A cache failure degrades to a store read; an unknown user is
    /// `NotFound`. The result is cached only if no invalidation for the
    /// user landed while it was being read.
    #[instrument(skip(self), err)]
    pub async fn load_principal(&self, user_id: UserId) -> DomainResult<Principal> {
        let cache = self.ctx.invalidator().cache();
        match cache.get(user_id).await {
            Ok(Some(principal)) => {
                debug!("principal served from cache");
                return Ok(principal);
            }
            Ok(None) => {}
            Err(err) => warn!(error = %err, "principal cache read failed"),
        }

        // Read before the store so a concurrent invalidation voids our write.
        let generation = match cache.generation(user_id).await {
            Ok(generation) => Some(generation),
            Err(err) => {
                warn!(error = %err, "principal cache generation read failed");
                None
            }
        };

        let principal = {
            let mut uow = self.ctx.begin().await?;
            let user = uow
                .user_by_id_unscoped(user_id)
                .await?
                .ok_or_else(|| DomainError::not_found(format!("user {user_id}")))?;
            let mut grants = Vec::new();
            for role in uow.roles_of_user(user_id).await? {
                let menus = uow.role_menus(role.id).await?;
                grants.push(RoleGrant::new(&role, &menus));
            }
            Principal::from_user(&user, grants)
        };

        if let Some(generation) = generation {
            if let Err(err) = cache.put_if_current(&principal, &generation).await {
                warn!(error = %err, "principal cache write failed");
            }
        }
        Ok(principal)
    }

    pub async fn check_permission(&self, user_id: UserId, permission: &Permission) -> DomainResult<bool> {
        let principal = self.load_principal(user_id).await?;
        Ok(auth::check_permission(&principal, permission))
    }

    /// Load the principal and fail with `Unauthorized` unless it holds `permission`.
    pub async fn authorize(&self, user_id: UserId, permission: &Permission) -> DomainResult<Principal> {
        let principal = self.load_principal(user_id).await?;
        auth::authorize(&principal, permission)?;
        Ok(principal)
    }

    pub async fn explain(
        &self,
        user_id: UserId,
        permission: &Permission,
    ) -> DomainResult<AuthorizationExplanation> {
        let principal = self.load_principal(user_id).await?;
        Ok(auth::explain_authorization(&principal, permission))
    }
}
