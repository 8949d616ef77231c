//! Wiring: settings → store, cache and services.

use std::sync::Arc;

use anyhow::Context;
use tracing::info;

use crate::cache::{CacheKeys, InMemoryCache, KeyValueCache, PrincipalCache};
use crate::config::Settings;
use crate::invalidation::Invalidator;
use crate::password::{BcryptHasher, PasswordHasher};
use crate::services::{
    AccessService, DataRuleService, DeptService, MenuService, RoleService, ServiceContext,
    TenantService, UserService,
};
use crate::store::{InMemoryStore, PostgresStore, Store};

/// Every service, sharing one store and one principal cache.
#[derive(Clone)]
pub struct Engine {
    pub depts: DeptService,
    pub menus: MenuService,
    pub roles: RoleService,
    pub rules: DataRuleService,
    pub users: UserService,
    pub tenants: TenantService,
    pub access: AccessService,
}

impl Engine {
    pub fn new(
        store: Arc<dyn Store>,
        cache: PrincipalCache,
        hasher: Arc<dyn PasswordHasher>,
    ) -> Self {
        let ctx = ServiceContext::new(store, Invalidator::new(cache));
        Self {
            depts: DeptService::new(ctx.clone()),
            menus: MenuService::new(ctx.clone()),
            roles: RoleService::new(ctx.clone()),
            rules: DataRuleService::new(ctx.clone()),
            users: UserService::new(ctx.clone(), hasher),
            tenants: TenantService::new(ctx.clone()),
            access: AccessService::new(ctx),
        }
    }

    /// Engine on the in-memory store and cache, with default key prefixes.
    pub fn in_memory(hasher: Arc<dyn PasswordHasher>) -> Self {
        let cache = PrincipalCache::new(Arc::new(InMemoryCache::new()), CacheKeys::default(), None);
        Self::new(Arc::new(InMemoryStore::new()), cache, hasher)
    }
}

/// Build the engine described by `settings`, initialising logging first.
pub async fn bootstrap(settings: &Settings) -> anyhow::Result<Engine> {
    storedesk_observability::init(&settings.log);

    let store: Arc<dyn Store> = match &settings.database_url {
        Some(url) => {
            let pg = PostgresStore::connect(url, settings.database_max_connections)
                .await
                .context("connecting to postgres")?;
            pg.migrate().await.context("running migrations")?;
            info!(max_connections = settings.database_max_connections, "using postgres store");
            Arc::new(pg)
        }
        None => {
            info!("DATABASE_URL not set, using in-memory store");
            Arc::new(InMemoryStore::new())
        }
    };

    let kv = cache_backend(settings).await?;
    let cache = PrincipalCache::new(kv, settings.cache_keys.clone(), settings.profile_ttl);
    Ok(Engine::new(store, cache, Arc::new(BcryptHasher::default())))
}

#[cfg(feature = "redis")]
async fn cache_backend(settings: &Settings) -> anyhow::Result<Arc<dyn KeyValueCache>> {
    match &settings.redis_url {
        Some(url) => {
            let redis = crate::cache::RedisCache::connect(url)
                .await
                .context("connecting to redis")?;
            info!("using redis cache");
            Ok(Arc::new(redis))
        }
        None => Ok(Arc::new(InMemoryCache::new())),
    }
}

#[cfg(not(feature = "redis"))]
async fn cache_backend(settings: &Settings) -> anyhow::Result<Arc<dyn KeyValueCache>> {
    if settings.redis_url.is_some() {
        tracing::warn!("REDIS_URL is set but the redis feature is disabled; using in-memory cache");
    }
    Ok(Arc::new(InMemoryCache::new()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use storedesk_core::UserId;

    #[tokio::test(flavor = "current_thread")]
    async fn in_memory_engine_starts_empty() {
        let engine = Engine::in_memory(Arc::new(BcryptHasher::new(4)));
        let err = engine.access.load_principal(UserId::new(1)).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test(flavor = "current_thread")]
    async fn bootstrap_without_backends_falls_back_to_memory() {
        let engine = bootstrap(&Settings::default()).await.unwrap();
        assert!(engine.access.load_principal(UserId::new(1)).await.unwrap_err().is_not_found());
    }
}
