use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, RedisError, Script};
use std::time::Duration;

use crate::{Client, CustomRedisError};

/// Compare-and-set used for conditional window updates. The stored value
/// is a JSON object carrying a `version` field; the write only goes
/// through if that field still matches what the caller read earlier.
/// Runs atomically server-side, so no lock service is needed.
const SET_IF_VERSION_SCRIPT: &str = r#"
local cur = redis.call('GET', KEYS[1])
if not cur then
  return 0
end
local ok, obj = pcall(cjson.decode, cur)
if not ok or type(obj) ~= 'table' then
  return 0
end
if obj['version'] ~= ARGV[1] then
  return 0
end
redis.call('SET', KEYS[1], ARGV[2], 'EX', tonumber(ARGV[3]))
return 1
"#;

pub struct RedisClient {
    connection: MultiplexedConnection,
    set_if_version: Script,
}

impl RedisClient {
    /// Create a new RedisClient with no timeouts (blocks indefinitely).
    ///
    /// For timeout configuration, use `with_timeouts()`.
    pub async fn new(addr: String) -> Result<RedisClient, CustomRedisError> {
        Self::with_timeouts(addr, None, None).await
    }

    /// Create a new RedisClient with explicit timeouts.
    ///
    /// # Arguments
    /// * `addr` - Redis connection string
    /// * `response_timeout` - Optional timeout for Redis command responses. `None` means no timeout.
    /// * `connection_timeout` - Optional timeout for establishing connections. `None` means no timeout.
    ///
    /// # Errors
    /// Returns `CustomRedisError::InvalidConfiguration` if `Some(Duration::ZERO)` is passed -
    /// use `None` for no timeout instead.
    pub async fn with_timeouts(
        addr: String,
        response_timeout: Option<Duration>,
        connection_timeout: Option<Duration>,
    ) -> Result<RedisClient, CustomRedisError> {
        let client = redis::Client::open(addr)?;

        // Validate that Duration::ZERO is not passed - use None instead
        if let Some(timeout) = response_timeout {
            if timeout.is_zero() {
                return Err(CustomRedisError::InvalidConfiguration(
                    "Redis response timeout cannot be Duration::ZERO - use None for no timeout"
                        .to_string(),
                ));
            }
        }
        if let Some(timeout) = connection_timeout {
            if timeout.is_zero() {
                return Err(CustomRedisError::InvalidConfiguration(
                    "Redis connection timeout cannot be Duration::ZERO - use None for no timeout"
                        .to_string(),
                ));
            }
        }

        // Use Redis native timeout configuration
        let mut config = redis::AsyncConnectionConfig::new();

        if let Some(timeout) = response_timeout {
            config = config.set_response_timeout(timeout);
        }

        if let Some(timeout) = connection_timeout {
            config = config.set_connection_timeout(timeout);
        }

        let connection = client
            .get_multiplexed_async_connection_with_config(&config)
            .await?;

        Ok(RedisClient {
            connection,
            set_if_version: Script::new(SET_IF_VERSION_SCRIPT),
        })
    }
}

#[async_trait]
impl Client for RedisClient {
    async fn get(&self, k: String) -> Result<String, CustomRedisError> {
        let mut conn = self.connection.clone();

        let result: Result<Option<String>, RedisError> = conn.get(&k).await;

        match result {
            Ok(Some(value)) => Ok(value),
            Ok(None) => Err(CustomRedisError::NotFound),
            Err(e) => Err(e.into()),
        }
    }

    async fn set_nx_ex(
        &self,
        k: String,
        v: String,
        seconds: u64,
    ) -> Result<bool, CustomRedisError> {
        let mut conn = self.connection.clone();

        // Use SET with both NX and EX options
        let result: Result<Option<String>, RedisError> = redis::cmd("SET")
            .arg(&k)
            .arg(&v)
            .arg("EX")
            .arg(seconds)
            .arg("NX")
            .query_async(&mut conn)
            .await;

        match result {
            Ok(Some(_)) => Ok(true), // Key was created
            Ok(None) => Ok(false),   // Key already existed
            Err(e) => Err(e.into()),
        }
    }

    async fn set_if_version_ex(
        &self,
        k: String,
        v: String,
        expected_version: String,
        seconds: u64,
    ) -> Result<bool, CustomRedisError> {
        let mut conn = self.connection.clone();

        let result: Result<i64, RedisError> = self
            .set_if_version
            .key(&k)
            .arg(&expected_version)
            .arg(&v)
            .arg(seconds)
            .invoke_async(&mut conn)
            .await;

        match result {
            Ok(1) => Ok(true),
            Ok(_) => Ok(false), // missing, unparsable or version mismatch
            Err(e) => Err(e.into()),
        }
    }
}
