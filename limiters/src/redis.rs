use std::sync::Arc;

use chrono::{DateTime, Utc};
use common_redis::{Client, CustomRedisError};
use metrics::counter;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::keys::{partition_of, row_key_of};
use crate::limiter::RateLimitDecision;

const WRITE_CONFLICT_COUNTER: &str = "rate_limiter_write_conflicts_total";

pub const DEFAULT_KEY_PREFIX: &str = "@limiters/windows/";

#[derive(Error, Debug)]
pub enum DistributedLimitError {
    #[error("conditional write conflicted on every attempt")]
    RetryBudgetExhausted,
    #[error(transparent)]
    Store(#[from] CustomRedisError),
}

/// Persisted window counter, stored as JSON under
/// `{prefix}{partition_key}:{row_key}`.
///
/// `partition_key` is the coarse, human-groupable scope; `row_key` is
/// the digest of the full rate-limit key, so the raw discriminator is
/// never written twice. Entities are overwritten in place on every
/// call and never deleted explicitly; the TTL on the Redis key (twice
/// the window) lets abandoned entries age out.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WindowEntity {
    pub partition_key: String,
    pub row_key: String,
    pub count: u64,
    /// epoch millis
    pub reset_at: i64,
    pub updated_at: DateTime<Utc>,
    /// Refreshed on every successful write; the precondition for
    /// conditional updates.
    pub version: Uuid,
}

/// Fixed-window counter backed by a shared Redis store, so multiple
/// stateless instances agree on one count per key.
///
/// Every increment is a read-modify-write cycle closed by a conditional
/// write: creations use `SET NX` and updates compare the entity's
/// version token server-side. A lost race re-reads current state and
/// tries again, up to `retry_budget` attempts, so no increment is ever
/// silently dropped. Exhausting the budget or hitting any transport
/// error surfaces to the caller, which is expected to fall back to
/// per-instance limiting rather than deny traffic.
#[derive(Clone)]
pub struct RedisWindowLimiter {
    redis: Arc<dyn Client + Send + Sync>,
    key_prefix: String,
    retry_budget: u32,
}

/// Outcome of one read-modify-write attempt.
enum WriteOutcome {
    Committed(RateLimitDecision),
    Conflict,
}

impl RedisWindowLimiter {
    pub fn new(
        redis: Arc<dyn Client + Send + Sync>,
        key_prefix: Option<String>,
        retry_budget: u32,
    ) -> Self {
        RedisWindowLimiter {
            redis,
            key_prefix: key_prefix.unwrap_or_else(|| DEFAULT_KEY_PREFIX.to_string()),
            retry_budget: retry_budget.max(1),
        }
    }

    fn storage_key(&self, key: &str) -> String {
        format!("{}{}:{}", self.key_prefix, partition_of(key), row_key_of(key))
    }

    /// Count one call against `key` on the shared store.
    ///
    /// Errors mean the shared count could not be updated; they carry no
    /// decision and the caller should degrade to local limiting.
    pub async fn increment(
        &self,
        key: &str,
        limit: u64,
        window_ms: u64,
        now: DateTime<Utc>,
    ) -> Result<RateLimitDecision, DistributedLimitError> {
        let storage_key = self.storage_key(key);

        for _ in 0..self.retry_budget {
            match self.try_increment(key, &storage_key, limit, window_ms, now).await? {
                WriteOutcome::Committed(decision) => return Ok(decision),
                WriteOutcome::Conflict => {
                    counter!(WRITE_CONFLICT_COUNTER).increment(1);
                }
            }
        }

        Err(DistributedLimitError::RetryBudgetExhausted)
    }

    /// One cycle of the read -> compute -> conditional-write protocol.
    async fn try_increment(
        &self,
        key: &str,
        storage_key: &str,
        limit: u64,
        window_ms: u64,
        now: DateTime<Utc>,
    ) -> Result<WriteOutcome, DistributedLimitError> {
        let now_ms = now.timestamp_millis();

        // Read
        let current = match self.redis.get(storage_key.to_string()).await {
            Ok(raw) => Some(
                serde_json::from_str::<WindowEntity>(&raw)
                    .map_err(|e| CustomRedisError::ParseError(e.to_string()))?,
            ),
            Err(CustomRedisError::NotFound) => None,
            Err(e) => return Err(e.into()),
        };

        // Compute: an expired entity contributes nothing to the new
        // window, but its version still guards the write below so a
        // racing reset cannot drop a concurrent increment.
        let expected_version = current.as_ref().map(|entity| entity.version);
        let active = current.filter(|entity| entity.reset_at > now_ms);
        let count = active.as_ref().map_or(0, |entity| entity.count) + 1;
        let reset_at = active
            .as_ref()
            .map_or(now_ms + window_ms as i64, |entity| entity.reset_at);

        let entity = WindowEntity {
            partition_key: partition_of(key),
            row_key: row_key_of(key),
            count,
            reset_at,
            updated_at: now,
            version: Uuid::new_v4(),
        };
        let payload = serde_json::to_string(&entity)
            .map_err(|e| CustomRedisError::ParseError(e.to_string()))?;

        // Conditional write: create-if-absent or replace-if-unchanged.
        let ttl = ttl_seconds(window_ms);
        let committed = match expected_version {
            None => {
                self.redis
                    .set_nx_ex(storage_key.to_string(), payload, ttl)
                    .await?
            }
            Some(version) => {
                self.redis
                    .set_if_version_ex(storage_key.to_string(), payload, version.to_string(), ttl)
                    .await?
            }
        };

        if committed {
            Ok(WriteOutcome::Committed(RateLimitDecision::from_window(
                count, limit, reset_at, now_ms,
            )))
        } else {
            Ok(WriteOutcome::Conflict)
        }
    }
}

/// Twice the window, so an entity survives long enough to be reset in
/// place but still ages out once its key goes quiet.
fn ttl_seconds(window_ms: u64) -> u64 {
    (window_ms * 2).div_ceil(1000).max(1)
}
