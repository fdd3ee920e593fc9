use std::sync::atomic::{AtomicI64, Ordering};

/// Largest instant that still renders as a four-digit ISO-8601 year
/// (`9999-12-31T23:59:59.999Z`). Reported as the expiry of every token while
/// authentication is disabled.
pub const FAR_FUTURE_MS: i64 = 253_402_300_799_999;

/// Source of wall-clock time in Unix epoch milliseconds
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> i64;
}

/// Clock backed by the system time
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> i64 {
        time::OffsetDateTime::now_utc().unix_timestamp_nanos() as i64 / 1_000_000
    }
}

/// Manually driven clock for deterministic expiry tests
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicI64,
}

impl ManualClock {
    pub fn new(start_ms: i64) -> Self {
        Self {
            now: AtomicI64::new(start_ms),
        }
    }

    pub fn set(&self, now_ms: i64) {
        self.now.store(now_ms, Ordering::SeqCst);
    }

    pub fn advance(&self, delta_ms: i64) {
        self.now.fetch_add(delta_ms, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> i64 {
        self.now.load(Ordering::SeqCst)
    }
}

/// Render a Unix millisecond timestamp as RFC 3339 with millisecond precision
pub fn format_expiry(expires_at_ms: i64) -> String {
    use time::format_description::well_known::Rfc3339;

    let nanos = i128::from(expires_at_ms) * 1_000_000;
    time::OffsetDateTime::from_unix_timestamp_nanos(nanos)
        .ok()
        .and_then(|dt| dt.format(&Rfc3339).ok())
        .unwrap_or_else(|| "9999-12-31T23:59:59.999Z".to_string())
}
