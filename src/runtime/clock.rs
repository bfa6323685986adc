use std::time::{SystemTime, UNIX_EPOCH};

/// Wall-clock time in unix milliseconds. Clocks before the epoch read as 0.
pub fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or_default()
}
