pub mod config;
pub mod hashing;
pub mod keys;
pub mod limiter;
pub mod memory;
pub mod redis;

pub use limiter::{RateLimitDecision, RateLimitRequest, RateLimiter};
