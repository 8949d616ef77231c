use std::sync::Arc;

use tracing::{info, instrument};

use storedesk_auth::{require_superuser, resolve_scope, Principal};
use storedesk_core::{DomainError, DomainResult, RoleId, Scope, UserId};
use storedesk_org::{AddUser, ResetPassword, Status, UpdateUserInfo, User, UserFilter, UserFlag};

use super::{now, ServiceContext};
use crate::cache::SessionRef;
use crate::invalidation::{AffectedPrincipals, MutationOutcome};
use crate::password::PasswordHasher;
use crate::store::{NewUser, UnitOfWork};

/// Account administration inside the actor's scope.
///
/// Everything except [`UserService::update_info`] and
/// [`UserService::reset_password`] requires a superuser.
#[derive(Clone)]
pub struct UserService {
    ctx: ServiceContext,
    hasher: Arc<dyn PasswordHasher>,
}

impl UserService {
    pub fn new(ctx: ServiceContext, hasher: Arc<dyn PasswordHasher>) -> Self {
        Self { ctx, hasher }
    }

    pub async fn get(&self, actor: &Principal, id: UserId) -> DomainResult<User> {
        require_superuser(actor)?;
        let scope = resolve_scope(actor)?;
        let mut uow = self.ctx.begin().await?;
        find(&mut *uow, scope, id).await
    }

    pub async fn list(&self, actor: &Principal, filter: &UserFilter) -> DomainResult<Vec<User>> {
        require_superuser(actor)?;
        let scope = resolve_scope(actor)?;
        let mut uow = self.ctx.begin().await?;
        Ok(uow
            .list_users(scope)
            .await?
            .into_iter()
            .filter(|u| filter.matches(u))
            .collect())
    }

    /// Create an account of the actor's own user type inside the actor's scope.
    #[instrument(skip(self, actor, params), fields(actor = %actor.user_id, phone = %params.phone), err)]
    pub async fn add(&self, actor: &Principal, params: &AddUser) -> DomainResult<MutationOutcome<User>> {
        require_superuser(actor)?;
        params.validate()?;
        let scope = resolve_scope(actor)?;
        let mut uow = self.ctx.begin().await?;

        if uow.user_by_phone(&actor.user_type, &params.phone).await?.is_some() {
            return Err(DomainError::forbidden("phone number already registered"));
        }
        if uow.dept_by_id(scope, params.dept_id).await?.is_none() {
            return Err(DomainError::not_found(format!("department {}", params.dept_id)));
        }
        let roles = ensure_roles(&mut *uow, scope, &params.roles).await?;

        let salt = self.hasher.generate_salt();
        let password_hash = self.hasher.hash(&params.password, &salt)?;
        let new = NewUser {
            username: params.resolved_username(),
            nickname: params.resolved_nickname(),
            phone: params.phone.clone(),
            email: params.email.clone(),
            password_hash,
            salt: Some(salt),
            dept_id: Some(params.dept_id),
            tenant_id: scope.tenant_id(),
            user_type: actor.user_type.clone(),
            is_superuser: false,
            is_staff: true,
            is_multi_login: false,
            status: Status::Enabled,
            join_time: now(),
        };
        let user = uow.insert_user(&new).await?;
        uow.replace_user_roles(user.id, &roles).await?;
        info!(user_id = %user.id, %scope, "user added");
        self.ctx
            .invalidator()
            .commit(uow, MutationOutcome::with_value(user, AffectedPrincipals::none()))
            .await
    }

    /// Edit profile fields. Non-superusers may only edit themselves.
    #[instrument(skip(self, actor, changes), fields(actor = %actor.user_id, %id), err)]
    pub async fn update_info(
        &self,
        actor: &Principal,
        id: UserId,
        changes: &UpdateUserInfo,
    ) -> DomainResult<MutationOutcome> {
        if !actor.is_superuser && actor.user_id != id {
            return Err(DomainError::forbidden("you can only modify your own info"));
        }
        changes.validate()?;
        let scope = resolve_scope(actor)?;
        let mut uow = self.ctx.begin().await?;

        let target = find(&mut *uow, scope, id).await?;
        if target.phone != changes.phone {
            if let Some(other) = uow.user_by_phone(&target.user_type, &changes.phone).await? {
                if other.id != id {
                    return Err(DomainError::forbidden("phone number already registered"));
                }
            }
        }

        let rows = uow.update_user_info(id, changes).await?;
        info!(rows, "user info updated");
        self.ctx
            .invalidator()
            .commit(uow, MutationOutcome::rows(rows, AffectedPrincipals::user(id)))
            .await
    }

    /// Replace the roles held by a user.
    #[instrument(skip(self, actor, roles), fields(actor = %actor.user_id, %id, count = roles.len()), err)]
    pub async fn update_roles(
        &self,
        actor: &Principal,
        id: UserId,
        roles: &[RoleId],
    ) -> DomainResult<MutationOutcome> {
        require_superuser(actor)?;
        let scope = resolve_scope(actor)?;
        let mut uow = self.ctx.begin().await?;

        find(&mut *uow, scope, id).await?;
        let roles = ensure_roles(&mut *uow, scope, roles).await?;

        uow.replace_user_roles(id, &roles).await?;
        info!("user roles replaced");
        self.ctx
            .invalidator()
            .commit(uow, MutationOutcome::rows(roles.len() as u64, AffectedPrincipals::user(id)))
            .await
    }

    pub async fn toggle_superuser(&self, actor: &Principal, id: UserId) -> DomainResult<MutationOutcome<bool>> {
        self.toggle(actor, id, UserFlag::Superuser, None).await
    }

    pub async fn toggle_staff(&self, actor: &Principal, id: UserId) -> DomainResult<MutationOutcome<bool>> {
        self.toggle(actor, id, UserFlag::Staff, None).await
    }

    pub async fn toggle_status(&self, actor: &Principal, id: UserId) -> DomainResult<MutationOutcome<bool>> {
        self.toggle(actor, id, UserFlag::Status, None).await
    }

    /// Flip multi-login. Turning it off signs the user out everywhere;
    /// when actors turn it off for themselves, `current` stays signed in.
    pub async fn toggle_multi_login(
        &self,
        actor: &Principal,
        id: UserId,
        current: Option<SessionRef>,
    ) -> DomainResult<MutationOutcome<bool>> {
        self.toggle(actor, id, UserFlag::MultiLogin, current).await
    }

    #[instrument(skip(self, actor, current), fields(actor = %actor.user_id, %id, ?flag), err)]
    async fn toggle(
        &self,
        actor: &Principal,
        id: UserId,
        flag: UserFlag,
        current: Option<SessionRef>,
    ) -> DomainResult<MutationOutcome<bool>> {
        require_superuser(actor)?;
        let scope = resolve_scope(actor)?;
        let mut uow = self.ctx.begin().await?;

        let target = find(&mut *uow, scope, id).await?;
        if id == actor.user_id && !flag.self_toggle_allowed() {
            return Err(DomainError::forbidden("illegal operation on your own account"));
        }

        let value = !target.flag(flag);
        let rows = uow.set_user_flag(id, flag, value).await?;

        let mut affected = AffectedPrincipals::user(id);
        if flag == UserFlag::MultiLogin && !value {
            let keep = if id == actor.user_id { current } else { None };
            affected = affected.with_sessions_revoked(id, keep);
        }
        info!(rows, value, column = flag.column(), "user flag toggled");
        self.ctx
            .invalidator()
            .commit(uow, MutationOutcome { rows, value, affected })
            .await
    }

    /// Change the actor's own password and sign them out everywhere.
    #[instrument(skip(self, actor, params), fields(actor = %actor.user_id), err)]
    pub async fn reset_password(
        &self,
        actor: &Principal,
        params: &ResetPassword,
    ) -> DomainResult<MutationOutcome> {
        let scope = resolve_scope(actor)?;
        let mut uow = self.ctx.begin().await?;

        let user = find(&mut *uow, scope, actor.user_id).await?;
        if !self.hasher.verify(&params.old_password, &user.password_hash)? {
            return Err(DomainError::forbidden("old password is incorrect"));
        }
        params.validate()?;

        let salt = user.salt.clone().unwrap_or_else(|| self.hasher.generate_salt());
        let hash = self.hasher.hash(&params.new_password, &salt)?;
        let rows = uow.set_password(user.id, &hash).await?;
        info!(rows, "password reset");
        let affected = AffectedPrincipals::user(user.id).with_sessions_revoked(user.id, None);
        self.ctx
            .invalidator()
            .commit(uow, MutationOutcome::rows(rows, affected))
            .await
    }

    #[instrument(skip(self, actor), fields(actor = %actor.user_id, %id), err)]
    pub async fn delete(&self, actor: &Principal, id: UserId) -> DomainResult<MutationOutcome> {
        require_superuser(actor)?;
        let scope = resolve_scope(actor)?;
        let mut uow = self.ctx.begin().await?;

        find(&mut *uow, scope, id).await?;
        let rows = uow.delete_user(id).await?;
        info!(rows, "user deleted");
        let affected = AffectedPrincipals::user(id).with_sessions_revoked(id, None);
        self.ctx
            .invalidator()
            .commit(uow, MutationOutcome::rows(rows, affected))
            .await
    }
}

async fn find(uow: &mut dyn UnitOfWork, scope: Scope, id: UserId) -> DomainResult<User> {
    uow.user_by_id(scope, id)
        .await?
        .ok_or_else(|| DomainError::not_found(format!("user {id}")))
}

/// Check every role exists in `scope`; returns the ids sorted and deduplicated.
async fn ensure_roles(
    uow: &mut dyn UnitOfWork,
    scope: Scope,
    roles: &[RoleId],
) -> DomainResult<Vec<RoleId>> {
    let mut ids = roles.to_vec();
    ids.sort();
    ids.dedup();
    for &role_id in &ids {
        if uow.role_by_id(scope, role_id).await?.is_none() {
            return Err(DomainError::not_found(format!("role {role_id}")));
        }
    }
    Ok(ids)
}
