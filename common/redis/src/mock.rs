use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::{Client, CustomRedisError};

/// In-memory stand-in for Redis with real conditional-write semantics.
///
/// Unlike a canned-response mock, this one keeps an actual key/value map
/// behind a mutex, so `set_nx_ex` and `set_if_version_ex` genuinely
/// conflict when racing writers interleave. That is what lets the
/// limiter tests prove "no lost updates" instead of asserting against
/// scripted returns. mockall got really annoying with async and results
/// so we do our own, same as the production wrapper.
///
/// Failure injection:
/// - `error_on_every_call` makes every operation fail, simulating a
///   store outage.
/// - `conflict_next_writes` makes the next N conditional writes report
///   a conflict without touching the map, simulating lost races.
#[derive(Clone)]
pub struct MockRedisClient {
    store: Arc<Mutex<HashMap<String, String>>>,
    calls: Arc<Mutex<Vec<MockRedisCall>>>,
    forced_error: Arc<Mutex<Option<CustomRedisError>>>,
    forced_conflicts: Arc<Mutex<u32>>,
}

impl Default for MockRedisClient {
    fn default() -> Self {
        Self {
            store: Arc::new(Mutex::new(HashMap::new())),
            calls: Arc::new(Mutex::new(Vec::new())),
            forced_error: Arc::new(Mutex::new(None)),
            forced_conflicts: Arc::new(Mutex::new(0)),
        }
    }
}

impl MockRedisClient {
    pub fn new() -> Self {
        Self::default()
    }

    // Helper to safely lock a mutex, recovering from poisoning
    fn lock<'a, T>(mutex: &'a Mutex<T>) -> std::sync::MutexGuard<'a, T> {
        match mutex.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Make every subsequent operation fail with the given error.
    pub fn error_on_every_call(&mut self, err: CustomRedisError) -> Self {
        *Self::lock(&self.forced_error) = Some(err);
        self.clone()
    }

    /// Make the next `n` conditional writes report a conflict
    /// (return `false`) without modifying the store.
    pub fn conflict_next_writes(&mut self, n: u32) -> Self {
        *Self::lock(&self.forced_conflicts) = n;
        self.clone()
    }

    /// Seed the store directly, bypassing the call log.
    pub fn seed(&mut self, key: &str, value: &str) -> Self {
        Self::lock(&self.store).insert(key.to_owned(), value.to_owned());
        self.clone()
    }

    /// Read the store directly, for assertions.
    pub fn stored(&self, key: &str) -> Option<String> {
        Self::lock(&self.store).get(key).cloned()
    }

    pub fn get_calls(&self) -> Vec<MockRedisCall> {
        Self::lock(&self.calls).clone()
    }

    fn record(&self, op: &str, key: &str, value: MockRedisValue) {
        Self::lock(&self.calls).push(MockRedisCall {
            op: op.to_string(),
            key: key.to_string(),
            value,
        });
    }

    fn check_forced_error(&self) -> Result<(), CustomRedisError> {
        match Self::lock(&self.forced_error).as_ref() {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }

    fn take_forced_conflict(&self) -> bool {
        let mut remaining = Self::lock(&self.forced_conflicts);
        if *remaining > 0 {
            *remaining -= 1;
            true
        } else {
            false
        }
    }
}

#[derive(Debug, Clone)]
pub enum MockRedisValue {
    None,
    StringWithTTL(String, u64),
    Conditional {
        expected_version: String,
        value: String,
        ttl: u64,
    },
}

#[derive(Debug, Clone)]
#[allow(dead_code)]
pub struct MockRedisCall {
    pub op: String,
    pub key: String,
    pub value: MockRedisValue,
}

#[async_trait]
impl Client for MockRedisClient {
    async fn get(&self, key: String) -> Result<String, CustomRedisError> {
        self.record("get", &key, MockRedisValue::None);
        self.check_forced_error()?;

        match Self::lock(&self.store).get(&key) {
            Some(value) => Ok(value.clone()),
            None => Err(CustomRedisError::NotFound),
        }
    }

    async fn set_nx_ex(
        &self,
        key: String,
        value: String,
        seconds: u64,
    ) -> Result<bool, CustomRedisError> {
        self.record(
            "set_nx_ex",
            &key,
            MockRedisValue::StringWithTTL(value.clone(), seconds),
        );
        self.check_forced_error()?;

        if self.take_forced_conflict() {
            return Ok(false);
        }

        let mut store = Self::lock(&self.store);
        if store.contains_key(&key) {
            Ok(false)
        } else {
            store.insert(key, value);
            Ok(true)
        }
    }

    async fn set_if_version_ex(
        &self,
        key: String,
        value: String,
        expected_version: String,
        seconds: u64,
    ) -> Result<bool, CustomRedisError> {
        self.record(
            "set_if_version_ex",
            &key,
            MockRedisValue::Conditional {
                expected_version: expected_version.clone(),
                value: value.clone(),
                ttl: seconds,
            },
        );
        self.check_forced_error()?;

        if self.take_forced_conflict() {
            return Ok(false);
        }

        let mut store = Self::lock(&self.store);
        let current_version = store
            .get(&key)
            .and_then(|raw| serde_json::from_str::<serde_json::Value>(raw).ok())
            .and_then(|obj| obj.get("version").and_then(|v| v.as_str().map(String::from)));

        match current_version {
            Some(version) if version == expected_version => {
                store.insert(key, value);
                Ok(true)
            }
            _ => Ok(false), // missing, unparsable or version mismatch
        }
    }
}
