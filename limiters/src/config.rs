use envconfig::Envconfig;

#[derive(Envconfig, Clone)]
pub struct Config {
    /// When unset, the limiter runs on process-local state only.
    pub redis_url: Option<String>,

    pub redis_key_prefix: Option<String>,

    #[envconfig(default = "50")]
    pub redis_timeout_ms: u64,

    /// Conditional-write attempts before giving up on the shared store
    /// for a single call.
    #[envconfig(default = "3")]
    pub write_retry_budget: u32,

    /// High-water mark for the in-memory window map. Crossing it
    /// triggers a sweep of expired windows before a new key is added.
    #[envconfig(default = "10000")]
    pub memory_max_keys: usize,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            redis_url: None,
            redis_key_prefix: None,
            redis_timeout_ms: 50,
            write_retry_budget: 3,
            memory_max_keys: 10_000,
        }
    }
}
