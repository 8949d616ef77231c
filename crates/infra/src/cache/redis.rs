//! Redis-backed cache (enabled with the `redis` feature).
//!
//! Uses one multiplexed async connection shared by every caller. Prefix
//! deletion walks the keyspace with `SCAN ... MATCH prefix*` so it never
//! blocks the server the way `KEYS` would. Guarded writes run as a Lua
//! script so the compare and the set happen in one server step.

use std::time::Duration;

use redis::aio::MultiplexedConnection;
use tracing::instrument;

use super::kv::{CacheError, KeyValueCache};

const SCAN_BATCH: usize = 500;

// KEYS[1] guard, KEYS[2] target; ARGV[1] expected guard ("" = absent),
// ARGV[2] value, ARGV[3] ttl in ms ("" = none).
const SET_IF_UNCHANGED: &str = r#"
local current = redis.call('GET', KEYS[1])
if current == false then current = '' end
if current ~= ARGV[1] then return 0 end
if ARGV[3] == '' then
  redis.call('SET', KEYS[2], ARGV[2])
else
  redis.call('SET', KEYS[2], ARGV[2], 'PX', ARGV[3])
end
return 1
"#;

#[derive(Clone)]
pub struct RedisCache {
    conn: MultiplexedConnection,
}

impl RedisCache {
    /// Connect to `redis_url` (e.g. `redis://localhost:6379/0`).
    pub async fn connect(redis_url: impl AsRef<str>) -> Result<Self, CacheError> {
        let client = redis::Client::open(redis_url.as_ref()).map_err(backend)?;
        let conn = client
            .get_multiplexed_tokio_connection()
            .await
            .map_err(backend)?;
        Ok(Self { conn })
    }

    async fn scan(&self, pattern: &str) -> Result<Vec<String>, CacheError> {
        let mut conn = self.conn.clone();
        let mut cursor: u64 = 0;
        let mut keys = Vec::new();
        loop {
            let (next, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(pattern)
                .arg("COUNT")
                .arg(SCAN_BATCH)
                .query_async(&mut conn)
                .await
                .map_err(backend)?;
            keys.extend(batch);
            if next == 0 {
                return Ok(keys);
            }
            cursor = next;
        }
    }
}

fn backend(err: redis::RedisError) -> CacheError {
    CacheError::Backend(err.to_string())
}

/// Escape glob metacharacters so a prefix matches literally.
fn glob_escape(prefix: &str) -> String {
    let mut out = String::with_capacity(prefix.len() + 1);
    for c in prefix.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out.push('*');
    out
}

#[async_trait::async_trait]
impl KeyValueCache for RedisCache {
    #[instrument(skip(self), err)]
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let mut conn = self.conn.clone();
        redis::cmd("GET")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(backend)
    }

    #[instrument(skip(self, value), err)]
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), CacheError> {
        let mut conn = self.conn.clone();
        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(value);
        if let Some(ttl) = ttl {
            cmd.arg("PX").arg(ttl.as_millis().max(1) as u64);
        }
        cmd.query_async::<_, ()>(&mut conn).await.map_err(backend)
    }

    #[instrument(skip(self), err)]
    async fn delete(&self, key: &str) -> Result<u64, CacheError> {
        let mut conn = self.conn.clone();
        redis::cmd("DEL")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(backend)
    }

    #[instrument(skip(self), err)]
    async fn delete_by_prefix(&self, prefix: &str, exclude: Option<&str>) -> Result<u64, CacheError> {
        let keys: Vec<String> = self
            .scan(&glob_escape(prefix))
            .await?
            .into_iter()
            .filter(|k| Some(k.as_str()) != exclude)
            .collect();
        if keys.is_empty() {
            return Ok(0);
        }
        let mut conn = self.conn.clone();
        redis::cmd("DEL")
            .arg(&keys)
            .query_async(&mut conn)
            .await
            .map_err(backend)
    }

    #[instrument(skip(self), err)]
    async fn incr(&self, key: &str) -> Result<i64, CacheError> {
        let mut conn = self.conn.clone();
        redis::cmd("INCR")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(backend)
    }

    #[instrument(skip(self, value), err)]
    async fn set_if_unchanged(
        &self,
        guard: &str,
        expected: Option<&str>,
        key: &str,
        value: &str,
        ttl: Option<Duration>,
    ) -> Result<bool, CacheError> {
        let mut conn = self.conn.clone();
        let ttl_ms = ttl
            .map(|t| (t.as_millis().max(1) as u64).to_string())
            .unwrap_or_default();
        let applied: i64 = redis::Script::new(SET_IF_UNCHANGED)
            .key(guard)
            .key(key)
            .arg(expected.unwrap_or_default())
            .arg(value)
            .arg(ttl_ms)
            .invoke_async(&mut conn)
            .await
            .map_err(backend)?;
        Ok(applied == 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefix_pattern_escapes_glob_characters() {
        assert_eq!(glob_escape("storedesk:token:1:"), "storedesk:token:1:*");
        assert_eq!(glob_escape("a*b?[c]"), "a\\*b\\?\\[c\\]*");
    }
}
