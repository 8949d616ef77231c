//! Post-commit cache invalidation.
//!
//! Every mutating service call reports the principals whose effective
//! permissions (or sessions) it touched as [`AffectedPrincipals`]. The
//! [`Invalidator`] applies that report after the unit of work commits.

use std::collections::BTreeSet;

use serde::Serialize;
use tracing::{debug, error};

use storedesk_core::{DomainResult, UserId};

use crate::cache::{PrincipalCache, SessionRef};
use crate::store::UnitOfWork;

/// Sessions of one user to revoke, optionally sparing the caller's own.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionRevocation {
    pub user_id: UserId,
    pub keep: Option<SessionRef>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AffectedPrincipals {
    profiles: BTreeSet<UserId>,
    sessions: Vec<SessionRevocation>,
}

impl AffectedPrincipals {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn user(user_id: UserId) -> Self {
        Self::users([user_id])
    }

    pub fn users(ids: impl IntoIterator<Item = UserId>) -> Self {
        Self {
            profiles: ids.into_iter().collect(),
            sessions: Vec::new(),
        }
    }

    /// Also revoke `user_id`'s login sessions, except `keep`.
    pub fn with_sessions_revoked(mut self, user_id: UserId, keep: Option<SessionRef>) -> Self {
        self.sessions.push(SessionRevocation { user_id, keep });
        self
    }

    pub fn profiles(&self) -> impl Iterator<Item = UserId> + '_ {
        self.profiles.iter().copied()
    }

    pub fn sessions(&self) -> &[SessionRevocation] {
        &self.sessions
    }

    pub fn contains(&self, user_id: UserId) -> bool {
        self.profiles.contains(&user_id)
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty() && self.sessions.is_empty()
    }
}

/// Result of a write: rows touched, the written value and who was affected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MutationOutcome<T = ()> {
    pub rows: u64,
    pub value: T,
    pub affected: AffectedPrincipals,
}

impl MutationOutcome<()> {
    pub fn rows(rows: u64, affected: AffectedPrincipals) -> Self {
        Self { rows, value: (), affected }
    }

    /// Nothing in scope matched; no row changed and nobody is affected.
    pub fn unmatched() -> Self {
        Self::rows(0, AffectedPrincipals::none())
    }
}

impl<T> MutationOutcome<T> {
    pub fn with_value(value: T, affected: AffectedPrincipals) -> Self {
        Self { rows: 1, value, affected }
    }
}

#[derive(Clone)]
pub struct Invalidator {
    cache: PrincipalCache,
}

impl Invalidator {
    pub fn new(cache: PrincipalCache) -> Self {
        Self { cache }
    }

    pub fn cache(&self) -> &PrincipalCache {
        &self.cache
    }

    /// Clear every cached profile and session set named in `affected`.
    ///
    /// Runs after commit, so failures are logged rather than returned; each
    /// entry is attempted regardless of earlier failures.
    pub async fn sweep(&self, affected: &AffectedPrincipals) {
        for user_id in affected.profiles() {
            if let Err(err) = self.cache.invalidate(user_id).await {
                error!(%user_id, error = %err, "failed to invalidate cached principal");
            }
        }
        for revocation in affected.sessions() {
            match self
                .cache
                .revoke_sessions(revocation.user_id, revocation.keep.as_ref())
                .await
            {
                Ok(removed) => debug!(user_id = %revocation.user_id, removed, "revoked sessions"),
                Err(err) => error!(user_id = %revocation.user_id, error = %err, "failed to revoke sessions"),
            }
        }
    }

    /// Commit `uow`, then sweep the outcome's affected principals.
    pub async fn commit<T>(
        &self,
        mut uow: Box<dyn UnitOfWork>,
        outcome: MutationOutcome<T>,
    ) -> DomainResult<MutationOutcome<T>> {
        uow.commit().await?;
        drop(uow);
        self.sweep(&outcome.affected).await;
        Ok(outcome)
    }
}
