use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

// Re-export ErrorKind so consumers can construct CustomRedisError in tests
pub use redis::ErrorKind as RedisErrorKind;

#[derive(Error, Debug, Clone)]
pub enum CustomRedisError {
    #[error("Not found in redis")]
    NotFound,
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),
    #[error("Parse error: {0}")]
    ParseError(String),
    #[error("Timeout error")]
    Timeout,
    #[error(transparent)]
    Redis(#[from] Arc<redis::RedisError>),
}

impl From<redis::RedisError> for CustomRedisError {
    fn from(err: redis::RedisError) -> Self {
        if err.is_timeout() {
            CustomRedisError::Timeout
        } else {
            CustomRedisError::Redis(Arc::new(err))
        }
    }
}

impl CustomRedisError {
    /// Create a Redis error from an ErrorKind (primarily for testing)
    pub fn from_redis_kind(kind: redis::ErrorKind, description: &'static str) -> Self {
        CustomRedisError::Redis(Arc::new(redis::RedisError::from((kind, description))))
    }
}

/// A thin command surface over Redis, exposing only what the window
/// limiter needs. Keeping this a trait lets tests inject a stateful
/// mock and lets us swap the store implementation without touching
/// call sites.
///
/// The two conditional writes are the interesting part:
///
/// - `set_nx_ex` creates a key only if it does not exist yet, so two
///   racing creators cannot both win.
/// - `set_if_version_ex` replaces a key only if the JSON value stored
///   under it still carries the expected `version` field, giving the
///   caller an atomic compare-and-set without any locks.
#[async_trait]
pub trait Client {
    /// GET. Returns `CustomRedisError::NotFound` when the key is absent.
    async fn get(&self, k: String) -> Result<String, CustomRedisError>;

    /// SET NX EX. Returns `true` if the key was created, `false` if it
    /// already existed.
    async fn set_nx_ex(&self, k: String, v: String, seconds: u64)
        -> Result<bool, CustomRedisError>;

    /// Atomically replace the value at `k` with `v` (and refresh the TTL)
    /// only if the JSON object currently stored there has
    /// `version == expected_version`. Returns `false` when the key is
    /// missing, unparsable, or the version no longer matches - i.e.
    /// another writer won the race.
    async fn set_if_version_ex(
        &self,
        k: String,
        v: String,
        expected_version: String,
        seconds: u64,
    ) -> Result<bool, CustomRedisError>;
}

// Module declarations
mod client;
mod mock;

// Re-export public APIs
pub use client::RedisClient;
pub use mock::{MockRedisCall, MockRedisClient, MockRedisValue};
