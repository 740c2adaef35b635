use std::time::Duration;

/// Client-level retry policy for contact store requests.
///
/// Retry `n` (1-based) waits `backoff_factor * 2^(n-1)` seconds unless the
/// server sent a `Retry-After` hint; either way the wait is capped at
/// `max_delay`.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub backoff_factor: f64,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff_factor: 2.0,
            max_delay: Duration::from_secs(120),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, backoff_factor: f64) -> Self {
        Self {
            max_retries,
            backoff_factor,
            ..Default::default()
        }
    }

    pub fn delay_for(&self, retry: u32, retry_after: Option<Duration>) -> Duration {
        let delay = match retry_after {
            Some(hint) => hint,
            None => {
                let exponent = i32::try_from(retry.saturating_sub(1)).unwrap_or(i32::MAX);
                let secs = self.backoff_factor.max(0.0) * 2f64.powi(exponent);
                if !secs.is_finite() || secs >= self.max_delay.as_secs_f64() {
                    return self.max_delay;
                }
                Duration::from_secs_f64(secs)
            }
        };
        delay.min(self.max_delay)
    }
}

/// Parse a `Retry-After` header given in delta-seconds.
///
/// HTTP-date values are not honored and fall back to the computed backoff.
pub fn parse_retry_after(value: &str) -> Option<Duration> {
    value.trim().parse::<u64>().ok().map(Duration::from_secs)
}
