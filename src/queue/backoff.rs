use std::time::Duration;

const MAX_EXPONENT: u32 = 32;

/// Next eligible time after `retries` consecutive failures:
/// `now + base_delay * 2^retries`, saturating.
pub fn next_fetch_time(now: u64, base_delay: Duration, retries: u32) -> u64 {
    let base_ms = u64::try_from(base_delay.as_millis()).unwrap_or(u64::MAX);
    let factor = 1u64 << retries.min(MAX_EXPONENT);
    now.saturating_add(base_ms.saturating_mul(factor))
}
