use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use common_redis::{Client, CustomRedisError, RedisClient};
use metrics::counter;
use tracing::warn;

use crate::config::Config;
use crate::keys::partition_of;
use crate::memory::MemoryLimiter;
use crate::redis::{DistributedLimitError, RedisWindowLimiter};

const RATE_LIMITER_EVAL_COUNTER: &str = "rate_limiter_eval_counts_total";
const RATE_LIMITER_FALLBACK_COUNTER: &str = "rate_limiter_fallback_total";

/// One quota check: `<feature>:<scope>:<hashedDiscriminator>` key, the
/// maximum permitted calls per window (inclusive), and the window
/// length in milliseconds.
#[derive(Debug, Clone)]
pub struct RateLimitRequest {
    pub key: String,
    pub limit: u64,
    pub window_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitDecision {
    pub allowed: bool,
    /// Seconds until the window resets; only non-zero on denial.
    /// Callers typically surface this as an HTTP `Retry-After` header.
    pub retry_after_seconds: u64,
}

impl RateLimitDecision {
    pub(crate) fn allow() -> Self {
        RateLimitDecision {
            allowed: true,
            retry_after_seconds: 0,
        }
    }

    pub(crate) fn from_window(count: u64, limit: u64, reset_at_ms: i64, now_ms: i64) -> Self {
        if count > limit {
            let remaining_ms = (reset_at_ms - now_ms).max(0);
            RateLimitDecision {
                allowed: false,
                retry_after_seconds: (remaining_ms as u64).div_ceil(1000),
            }
        } else {
            Self::allow()
        }
    }
}

enum Backend {
    Memory(MemoryLimiter),
    Distributed {
        redis: RedisWindowLimiter,
        fallback: MemoryLimiter,
    },
}

/// The only entry point consumers use for quota checks.
///
/// The backend is chosen once at construction: with a shared store
/// configured, counts go through Redis so all instances agree; without
/// one, counting stays process-local. Store failures are never
/// surfaced - the call silently degrades to the in-memory backend, so
/// under an outage the system enforces per-instance limits instead of
/// blocking traffic. Fail-open on infrastructure failure, fail-closed
/// only on genuine quota exhaustion.
pub struct RateLimiter {
    backend: Backend,
}

impl RateLimiter {
    /// Build a limiter with an injected store client, or a purely
    /// process-local one when `redis` is `None`.
    pub fn new(config: &Config, redis: Option<Arc<dyn Client + Send + Sync>>) -> RateLimiter {
        let backend = match redis {
            Some(client) => Backend::Distributed {
                redis: RedisWindowLimiter::new(
                    client,
                    config.redis_key_prefix.clone(),
                    config.write_retry_budget,
                ),
                fallback: MemoryLimiter::new(config.memory_max_keys),
            },
            None => Backend::Memory(MemoryLimiter::new(config.memory_max_keys)),
        };

        RateLimiter { backend }
    }

    /// Build a limiter from configuration, connecting to Redis when a
    /// URL is present.
    pub async fn from_config(config: &Config) -> anyhow::Result<RateLimiter> {
        let redis: Option<Arc<dyn Client + Send + Sync>> = match &config.redis_url {
            Some(url) => {
                let client = RedisClient::with_timeouts(
                    url.clone(),
                    Some(Duration::from_millis(config.redis_timeout_ms)),
                    Some(Duration::from_millis(config.redis_timeout_ms)),
                )
                .await?;
                Some(Arc::new(client))
            }
            None => None,
        };

        Ok(Self::new(config, redis))
    }

    /// Decide whether one more call against `request.key` is allowed.
    ///
    /// Pass a `timestamp` to evaluate at a fixed point in time (tests);
    /// `None` means now. Never returns an error: misconfigured calls
    /// (empty key, zero limit or window) are treated as "limiter
    /// disabled" and allowed, and store failures degrade to local
    /// counting.
    pub async fn rate_limit(
        &self,
        request: &RateLimitRequest,
        timestamp: Option<DateTime<Utc>>,
    ) -> RateLimitDecision {
        if request.key.is_empty() || request.limit == 0 || request.window_ms == 0 {
            counter!(RATE_LIMITER_EVAL_COUNTER, "result" => "disabled").increment(1);
            return RateLimitDecision::allow();
        }

        let now = timestamp.unwrap_or_else(Utc::now);
        let decision = match &self.backend {
            Backend::Memory(memory) => {
                memory.increment(&request.key, request.limit, request.window_ms, now)
            }
            Backend::Distributed { redis, fallback } => {
                match redis
                    .increment(&request.key, request.limit, request.window_ms, now)
                    .await
                {
                    Ok(decision) => decision,
                    Err(e) => {
                        counter!(RATE_LIMITER_FALLBACK_COUNTER, "cause" => fallback_cause(&e))
                            .increment(1);
                        warn!(
                            partition = %partition_of(&request.key),
                            error = %e,
                            "rate limit store unavailable, degrading to in-memory limiting"
                        );
                        fallback.increment(&request.key, request.limit, request.window_ms, now)
                    }
                }
            }
        };

        let result = if decision.allowed { "allowed" } else { "limited" };
        counter!(RATE_LIMITER_EVAL_COUNTER, "result" => result).increment(1);

        decision
    }
}

fn fallback_cause(err: &DistributedLimitError) -> &'static str {
    match err {
        DistributedLimitError::RetryBudgetExhausted => "conflict_budget",
        DistributedLimitError::Store(CustomRedisError::Timeout) => "timeout",
        DistributedLimitError::Store(_) => "store_error",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common_redis::{MockRedisClient, RedisErrorKind};

    fn request(key: &str, limit: u64, window_ms: u64) -> RateLimitRequest {
        RateLimitRequest {
            key: key.to_string(),
            limit,
            window_ms,
        }
    }

    #[tokio::test]
    async fn memory_only_limiter_enforces_the_quota() {
        let limiter = RateLimiter::new(&Config::default(), None);
        let now = Utc::now();
        let req = request("login:ip:abc", 3, 1000);

        let mut results = vec![];
        for _ in 0..4 {
            results.push(limiter.rate_limit(&req, Some(now)).await.allowed);
        }

        assert_eq!(results, vec![true, true, true, false]);
    }

    #[tokio::test]
    async fn distributed_limiter_counts_through_the_store() {
        let client = MockRedisClient::new();
        let limiter = RateLimiter::new(&Config::default(), Some(Arc::new(client.clone())));
        let now = Utc::now();
        let req = request("login:ip:abc", 2, 1000);

        assert!(limiter.rate_limit(&req, Some(now)).await.allowed);
        assert!(limiter.rate_limit(&req, Some(now)).await.allowed);
        let denied = limiter.rate_limit(&req, Some(now)).await;
        assert!(!denied.allowed);
        assert_eq!(denied.retry_after_seconds, 1);

        // the store saw the writes
        assert!(client
            .get_calls()
            .iter()
            .any(|c| c.op.starts_with("set_")));
    }

    #[tokio::test]
    async fn store_outage_degrades_to_local_limiting() {
        let mut client = MockRedisClient::new();
        let client = client.error_on_every_call(CustomRedisError::from_redis_kind(
            RedisErrorKind::IoError,
            "connection refused",
        ));
        let limiter = RateLimiter::new(&Config::default(), Some(Arc::new(client)));
        let now = Utc::now();
        let req = request("login:ip:abc", 3, 1000);

        // same numeric limit enforced, no call errors
        let mut results = vec![];
        for _ in 0..4 {
            results.push(limiter.rate_limit(&req, Some(now)).await.allowed);
        }

        assert_eq!(results, vec![true, true, true, false]);
    }

    #[tokio::test]
    async fn store_timeout_degrades_to_local_limiting() {
        let mut client = MockRedisClient::new();
        let client = client.error_on_every_call(CustomRedisError::Timeout);
        let limiter = RateLimiter::new(&Config::default(), Some(Arc::new(client)));
        let req = request("login:ip:abc", 1, 1000);
        let now = Utc::now();

        assert!(limiter.rate_limit(&req, Some(now)).await.allowed);
        assert!(!limiter.rate_limit(&req, Some(now)).await.allowed);
    }

    #[tokio::test]
    async fn window_reset_allows_the_key_again() {
        let limiter = RateLimiter::new(&Config::default(), None);
        let start = Utc::now();
        let req = request("login:ip:abc", 3, 1000);

        for _ in 0..4 {
            limiter.rate_limit(&req, Some(start)).await;
        }
        assert!(!limiter.rate_limit(&req, Some(start)).await.allowed);

        let later = start + chrono::Duration::milliseconds(1100);
        assert!(limiter.rate_limit(&req, Some(later)).await.allowed);
    }

    #[tokio::test]
    async fn misconfigured_calls_are_always_allowed() {
        let limiter = RateLimiter::new(&Config::default(), None);
        let now = Utc::now();

        for req in [
            request("", 3, 1000),
            request("login:ip:abc", 0, 1000),
            request("login:ip:abc", 3, 0),
        ] {
            for _ in 0..10 {
                let decision = limiter.rate_limit(&req, Some(now)).await;
                assert!(decision.allowed);
                assert_eq!(decision.retry_after_seconds, 0);
            }
        }
    }

    #[tokio::test]
    async fn conflicts_recover_within_the_call() {
        let mut client = MockRedisClient::new();
        let client = client.conflict_next_writes(1);
        let limiter = RateLimiter::new(&Config::default(), Some(Arc::new(client)));

        let decision = limiter
            .rate_limit(&request("x:y:z", 3, 1000), None)
            .await;

        assert!(decision.allowed);
    }
}
