//! Key-value cache and the principal cache built on it.

pub mod kv;
pub mod principal;
#[cfg(feature = "redis")]
pub mod redis;

pub use kv::{CacheError, InMemoryCache, KeyValueCache};
pub use principal::{CacheKeys, Generation, PrincipalCache, SessionRef};
#[cfg(feature = "redis")]
pub use self::redis::RedisCache;
