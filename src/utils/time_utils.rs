use std::time::{SystemTime, UNIX_EPOCH};

// ──────────────────────────── timestamps ─────────────────────────────────── //

/// Current UTC Unix timestamp in **milliseconds**.
pub fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// Current UTC Unix timestamp in **seconds**.
pub fn now_sec() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn millis_and_seconds_agree() {
        let ms = now_ms();
        let sec = now_sec();
        assert!((ms / 1000 - sec).abs() <= 1);
    }
}
