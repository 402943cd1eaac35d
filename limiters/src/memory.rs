use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use metrics::gauge;

use crate::limiter::RateLimitDecision;

const MEMORY_LIMITER_KEY_GAUGE: &str = "rate_limiter_memory_tracked_keys";

/// Process-local window state for one key. Once `now >= reset_at` the
/// state is logically expired and treated as absent, never mutated in
/// place.
#[derive(Debug, Clone, Copy)]
struct WindowState {
    count: u64,
    reset_at: i64, // epoch millis
}

/// Fixed-window counter backed by process memory.
///
/// This is the fallback of last resort when the shared store is down,
/// and the sole backend in single-instance deployments. Counts reset at
/// fixed window boundaries, so bursts of up to twice the limit can pass
/// across a window edge; callers' limits are tuned against that
/// semantics and it is kept deliberately.
///
/// Increments on the same key are serialized by the map mutex, which is
/// never held across an await point.
#[derive(Clone)]
pub struct MemoryLimiter {
    windows: Arc<Mutex<HashMap<String, WindowState>>>,
    max_keys: usize,
}

impl MemoryLimiter {
    pub fn new(max_keys: usize) -> Self {
        MemoryLimiter {
            windows: Arc::new(Mutex::new(HashMap::new())),
            max_keys,
        }
    }

    // Helper to safely lock the window map, recovering from poisoning
    fn lock_windows(&self) -> std::sync::MutexGuard<'_, HashMap<String, WindowState>> {
        match self.windows.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Count one call against `key` and decide whether it is allowed.
    pub fn increment(
        &self,
        key: &str,
        limit: u64,
        window_ms: u64,
        now: DateTime<Utc>,
    ) -> RateLimitDecision {
        let now_ms = now.timestamp_millis();
        let mut windows = self.lock_windows();

        // Amortized cleanup: before tracking a brand new key past the
        // high-water mark, drop every expired window. Keeps cardinality
        // bounded without a background timer.
        if !windows.contains_key(key) && windows.len() >= self.max_keys {
            windows.retain(|_, state| state.reset_at > now_ms);
            gauge!(MEMORY_LIMITER_KEY_GAUGE).set(windows.len() as f64);
        }

        let current = match windows.get(key) {
            Some(state) if now_ms < state.reset_at => *state,
            // absent or expired: fresh window
            _ => WindowState {
                count: 0,
                reset_at: now_ms + window_ms as i64,
            },
        };

        let state = WindowState {
            count: current.count + 1,
            reset_at: current.reset_at,
        };
        windows.insert(key.to_string(), state);
        drop(windows);

        RateLimitDecision::from_window(state.count, limit, state.reset_at, now_ms)
    }
}
