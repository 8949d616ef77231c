//! Environment-driven settings.
//!
//! `Settings::from_env` loads a `.env` file when present, then reads the
//! process environment. Every variable is optional; without `DATABASE_URL`
//! the engine runs on the in-memory store, without `REDIS_URL` on the
//! in-memory cache.

use std::time::Duration;

use thiserror::Error;

use storedesk_observability::{LogFormat, LogSettings};

use crate::cache::CacheKeys;

const DEFAULT_MAX_CONNECTIONS: u32 = 10;
const DEFAULT_PROFILE_TTL_SECS: u64 = 7 * 24 * 60 * 60;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value for {var}: {reason}")]
    Invalid { var: &'static str, reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub database_url: Option<String>,
    pub database_max_connections: u32,
    pub redis_url: Option<String>,
    pub cache_keys: CacheKeys,
    /// `None` keeps cached principals until invalidated.
    pub profile_ttl: Option<Duration>,
    pub log: LogSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            database_url: None,
            database_max_connections: DEFAULT_MAX_CONNECTIONS,
            redis_url: None,
            cache_keys: CacheKeys::default(),
            profile_ttl: Some(Duration::from_secs(DEFAULT_PROFILE_TTL_SECS)),
            log: LogSettings::default(),
        }
    }
}

impl Settings {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build settings from an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
        let defaults = Self::default();

        let database_max_connections = match var("DATABASE_MAX_CONNECTIONS") {
            Some(raw) => parse("DATABASE_MAX_CONNECTIONS", &raw)?,
            None => defaults.database_max_connections,
        };

        let profile_ttl = match var("CACHE_PROFILE_TTL_SECS") {
            Some(raw) => match parse::<u64>("CACHE_PROFILE_TTL_SECS", &raw)? {
                0 => None,
                secs => Some(Duration::from_secs(secs)),
            },
            None => defaults.profile_ttl,
        };

        let format = match var("LOG_FORMAT") {
            Some(raw) => raw.parse::<LogFormat>().map_err(|e| ConfigError::Invalid {
                var: "LOG_FORMAT",
                reason: e.to_string(),
            })?,
            None => defaults.log.format,
        };

        let keys = defaults.cache_keys;
        Ok(Self {
            database_url: var("DATABASE_URL"),
            database_max_connections,
            redis_url: var("REDIS_URL"),
            cache_keys: CacheKeys {
                user_prefix: var("CACHE_USER_PREFIX").unwrap_or(keys.user_prefix),
                token_prefix: var("CACHE_TOKEN_PREFIX").unwrap_or(keys.token_prefix),
                refresh_token_prefix: var("CACHE_REFRESH_TOKEN_PREFIX")
                    .unwrap_or(keys.refresh_token_prefix),
            },
            profile_ttl,
            log: LogSettings {
                format,
                default_filter: var("RUST_LOG").unwrap_or(defaults.log.default_filter),
            },
        })
    }
}

fn parse<T>(var: &'static str, raw: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
        var,
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn settings(pairs: &[(&str, &str)]) -> Result<Settings, ConfigError> {
        let env: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Settings::from_lookup(|k| env.get(k).cloned())
    }

    #[test]
    fn empty_environment_gives_defaults() {
        assert_eq!(settings(&[]).unwrap(), Settings::default());
    }

    #[test]
    fn reads_every_variable() {
        let s = settings(&[
            ("DATABASE_URL", "postgres://localhost/storedesk"),
            ("DATABASE_MAX_CONNECTIONS", "3"),
            ("REDIS_URL", "redis://localhost:6379/1"),
            ("CACHE_USER_PREFIX", "u"),
            ("CACHE_TOKEN_PREFIX", "t"),
            ("CACHE_REFRESH_TOKEN_PREFIX", "r"),
            ("CACHE_PROFILE_TTL_SECS", "60"),
            ("LOG_FORMAT", "compact"),
            ("RUST_LOG", "debug"),
        ])
        .unwrap();
        assert_eq!(s.database_url.as_deref(), Some("postgres://localhost/storedesk"));
        assert_eq!(s.database_max_connections, 3);
        assert_eq!(s.redis_url.as_deref(), Some("redis://localhost:6379/1"));
        assert_eq!(s.cache_keys.user_prefix, "u");
        assert_eq!(s.cache_keys.token_prefix, "t");
        assert_eq!(s.cache_keys.refresh_token_prefix, "r");
        assert_eq!(s.profile_ttl, Some(Duration::from_secs(60)));
        assert_eq!(s.log.format, LogFormat::Compact);
        assert_eq!(s.log.default_filter, "debug");
    }

    #[test]
    fn zero_ttl_disables_expiry() {
        let s = settings(&[("CACHE_PROFILE_TTL_SECS", "0")]).unwrap();
        assert_eq!(s.profile_ttl, None);
    }

    #[test]
    fn blank_values_count_as_unset() {
        let s = settings(&[("DATABASE_URL", "  ")]).unwrap();
        assert_eq!(s.database_url, None);
    }

    #[test]
    fn malformed_numbers_are_reported() {
        let err = settings(&[("DATABASE_MAX_CONNECTIONS", "many")]).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { var: "DATABASE_MAX_CONNECTIONS", .. }));
    }
}
