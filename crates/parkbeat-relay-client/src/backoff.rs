use std::time::Duration;

pub const BASE_BACKOFF_MS: u64 = 1_000;
pub const MAX_BACKOFF_MS: u64 = 30_000;
pub const MAX_RECONNECT_ATTEMPTS: u32 = 5;

/// `min(1000 · 2^attempt, 30000)` milliseconds.
pub fn backoff_delay(attempt: u32) -> Duration {
    let exp = BASE_BACKOFF_MS.saturating_mul(1u64 << attempt.min(16));
    Duration::from_millis(exp.min(MAX_BACKOFF_MS))
}
