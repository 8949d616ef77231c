//! Resolved-principal cache and session key layout.
//!
//! Key layout (`:`-separated, prefixes configurable):
//!
//! ```text
//! {user_prefix}:{user_id}                      cached Principal (JSON)
//! {user_prefix}_gen:{user_id}                  invalidation counter
//! {token_prefix}:{user_id}:{session_id}        access-token session
//! {refresh_prefix}:{user_id}:{refresh_token}   refresh-token session
//! ```

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use storedesk_auth::Principal;
use storedesk_core::UserId;

use super::kv::{CacheError, KeyValueCache};

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CacheKeys {
    pub user_prefix: String,
    pub token_prefix: String,
    pub refresh_token_prefix: String,
}

impl Default for CacheKeys {
    fn default() -> Self {
        Self {
            user_prefix: "storedesk:user".to_string(),
            token_prefix: "storedesk:token".to_string(),
            refresh_token_prefix: "storedesk:refresh_token".to_string(),
        }
    }
}

/// The caller's own login, kept alive when other sessions are revoked.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionRef {
    pub session_id: Uuid,
    pub refresh_token: Option<String>,
}

/// Snapshot of a user's invalidation counter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Generation(Option<String>);

#[derive(Clone)]
pub struct PrincipalCache {
    kv: Arc<dyn KeyValueCache>,
    keys: CacheKeys,
    ttl: Option<Duration>,
}

impl PrincipalCache {
    pub fn new(kv: Arc<dyn KeyValueCache>, keys: CacheKeys, ttl: Option<Duration>) -> Self {
        Self { kv, keys, ttl }
    }

    pub fn profile_key(&self, user_id: UserId) -> String {
        format!("{}:{}", self.keys.user_prefix, user_id)
    }

    pub fn generation_key(&self, user_id: UserId) -> String {
        format!("{}_gen:{}", self.keys.user_prefix, user_id)
    }

    pub fn token_key(&self, user_id: UserId, session_id: Uuid) -> String {
        format!("{}:{}:{}", self.keys.token_prefix, user_id, session_id)
    }

    pub fn refresh_token_key(&self, user_id: UserId, refresh_token: &str) -> String {
        format!("{}:{}:{}", self.keys.refresh_token_prefix, user_id, refresh_token)
    }

    /// Cached principal, if present. An undecodable entry is dropped and
    /// reported as a miss.
    pub async fn get(&self, user_id: UserId) -> Result<Option<Principal>, CacheError> {
        let key = self.profile_key(user_id);
        let Some(raw) = self.kv.get(&key).await? else {
            return Ok(None);
        };
        match serde_json::from_str(&raw) {
            Ok(principal) => Ok(Some(principal)),
            Err(err) => {
                warn!(%user_id, error = %err, "discarding undecodable cached principal");
                self.kv.delete(&key).await?;
                Ok(None)
            }
        }
    }

    /// Invalidation generation of `user_id`. Read it before loading a
    /// principal from the store and hand it to [`Self::put_if_current`].
    pub async fn generation(&self, user_id: UserId) -> Result<Generation, CacheError> {
        Ok(Generation(self.kv.get(&self.generation_key(user_id)).await?))
    }

    /// Cache `principal` unless the user was invalidated after `seen` was
    /// read. Returns whether the entry was written.
    pub async fn put_if_current(
        &self,
        principal: &Principal,
        seen: &Generation,
    ) -> Result<bool, CacheError> {
        let raw = serde_json::to_string(principal)
            .map_err(|e| CacheError::Serialization(e.to_string()))?;
        let user_id = principal.user_id;
        let written = self
            .kv
            .set_if_unchanged(
                &self.generation_key(user_id),
                seen.0.as_deref(),
                &self.profile_key(user_id),
                &raw,
                self.ttl,
            )
            .await?;
        if !written {
            debug!(%user_id, "principal invalidated during load; not caching");
        }
        Ok(written)
    }

    /// Drop the cached profile so the next lookup reloads it. The generation
    /// is bumped first so an in-flight load cannot write back its stale copy.
    pub async fn invalidate(&self, user_id: UserId) -> Result<(), CacheError> {
        self.kv.incr(&self.generation_key(user_id)).await?;
        self.kv.delete(&self.profile_key(user_id)).await.map(|_| ())
    }

    /// Record a login session (used by the token layer and by tests).
    pub async fn register_session(
        &self,
        user_id: UserId,
        session: &SessionRef,
        ttl: Option<Duration>,
    ) -> Result<(), CacheError> {
        self.kv
            .set(&self.token_key(user_id, session.session_id), "1", ttl)
            .await?;
        if let Some(refresh) = &session.refresh_token {
            self.kv
                .set(&self.refresh_token_key(user_id, refresh), "1", ttl)
                .await?;
        }
        Ok(())
    }

    /// Revoke every access and refresh session of `user_id`, except `keep`.
    pub async fn revoke_sessions(
        &self,
        user_id: UserId,
        keep: Option<&SessionRef>,
    ) -> Result<u64, CacheError> {
        let token_prefix = format!("{}:{}:", self.keys.token_prefix, user_id);
        let refresh_prefix = format!("{}:{}:", self.keys.refresh_token_prefix, user_id);

        let keep_token = keep.map(|s| self.token_key(user_id, s.session_id));
        let keep_refresh = keep
            .and_then(|s| s.refresh_token.as_deref())
            .map(|r| self.refresh_token_key(user_id, r));

        let tokens = self
            .kv
            .delete_by_prefix(&token_prefix, keep_token.as_deref())
            .await?;
        let refreshes = self
            .kv
            .delete_by_prefix(&refresh_prefix, keep_refresh.as_deref())
            .await?;
        Ok(tokens + refreshes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::InMemoryCache;
    use storedesk_org::{Status, UserType};

    fn cache() -> (Arc<InMemoryCache>, PrincipalCache) {
        let kv = Arc::new(InMemoryCache::new());
        let cache = PrincipalCache::new(kv.clone(), CacheKeys::default(), None);
        (kv, cache)
    }

    #[tokio::test(flavor = "current_thread")]
    async fn corrupt_profile_is_a_miss() {
        let (kv, cache) = cache();
        kv.set(&cache.profile_key(UserId::new(1)), "{not json", None).await.unwrap();
        assert!(cache.get(UserId::new(1)).await.unwrap().is_none());
        assert!(kv.keys().is_empty());
    }

    #[tokio::test(flavor = "current_thread")]
    async fn invalidation_between_read_and_write_blocks_the_write() {
        let (kv, cache) = cache();
        let user = UserId::new(7);
        let principal = Principal {
            user_id: user,
            username: "ana".into(),
            phone: "13800000007".into(),
            user_type: UserType::Platform,
            tenant_id: None,
            dept_id: None,
            is_superuser: false,
            is_staff: true,
            is_multi_login: true,
            status: Status::Enabled,
            roles: Vec::new(),
        };

        let seen = cache.generation(user).await.unwrap();
        cache.invalidate(user).await.unwrap();
        assert!(!cache.put_if_current(&principal, &seen).await.unwrap());
        assert!(!kv.keys().contains(&cache.profile_key(user)));

        let seen = cache.generation(user).await.unwrap();
        assert!(cache.put_if_current(&principal, &seen).await.unwrap());
        assert_eq!(cache.get(user).await.unwrap(), Some(principal));
    }

    #[tokio::test(flavor = "current_thread")]
    async fn revocation_keeps_current_session_only() {
        let (kv, cache) = cache();
        let user = UserId::new(1);
        let current = SessionRef { session_id: Uuid::new_v4(), refresh_token: Some("r1".into()) };
        let other = SessionRef { session_id: Uuid::new_v4(), refresh_token: Some("r2".into()) };
        cache.register_session(user, &current, None).await.unwrap();
        cache.register_session(user, &other, None).await.unwrap();
        cache.register_session(UserId::new(12), &other, None).await.unwrap();

        let removed = cache.revoke_sessions(user, Some(&current)).await.unwrap();
        assert_eq!(removed, 2);
        let keys = kv.keys();
        assert!(keys.contains(&cache.token_key(user, current.session_id)));
        assert!(keys.contains(&cache.refresh_token_key(user, "r1")));
        assert!(keys.contains(&cache.token_key(UserId::new(12), other.session_id)));
        assert_eq!(keys.len(), 4);
    }
}
