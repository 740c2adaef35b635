use anyhow::Result;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Exponential backoff for broker (re)connects.
///
/// The delay before retry `attempt` (1-based) is `factor^attempt` seconds,
/// capped at `max_delay`.
#[derive(Debug, Clone)]
pub struct ReconnectBackoff {
    pub factor: f64,
    pub max_delay: Duration,
}

impl Default for ReconnectBackoff {
    fn default() -> Self {
        Self {
            factor: 2.0,
            max_delay: Duration::from_secs(60),
        }
    }
}

impl ReconnectBackoff {
    pub fn new(factor: f64, max_delay: Duration) -> Self {
        Self { factor, max_delay }
    }

    pub fn delay(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let secs = self.factor.max(0.0).powi(exponent);
        if !secs.is_finite() || secs >= self.max_delay.as_secs_f64() {
            return self.max_delay;
        }
        Duration::from_secs_f64(secs)
    }
}

/// Run `operation` until it succeeds, sleeping with backoff between failures.
///
/// Returns `None` if the token is cancelled before a successful attempt; the
/// backoff sleep is interrupted by cancellation.
pub async fn retry_until_cancelled<T, F, Fut>(
    backoff: &ReconnectBackoff,
    ctx: &CancellationToken,
    what: &str,
    mut operation: F,
) -> Option<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt: u32 = 0;

    loop {
        if ctx.is_cancelled() {
            return None;
        }

        match operation().await {
            Ok(value) => {
                if attempt > 0 {
                    info!(operation = what, attempts = attempt + 1, "succeeded after retrying");
                }
                return Some(value);
            }
            Err(e) => {
                attempt = attempt.saturating_add(1);
                let delay = backoff.delay(attempt);
                warn!(
                    operation = what,
                    attempt,
                    retry_in_secs = delay.as_secs_f64(),
                    error = %format!("{:#}", e),
                    "attempt failed, retrying"
                );

                tokio::select! {
                    _ = ctx.cancelled() => return None,
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_delay_grows_exponentially_and_caps() {
        let backoff = ReconnectBackoff::default();
        assert_eq!(backoff.delay(1), Duration::from_secs(2));
        assert_eq!(backoff.delay(2), Duration::from_secs(4));
        assert_eq!(backoff.delay(5), Duration::from_secs(32));
        assert_eq!(backoff.delay(6), Duration::from_secs(60));
        assert_eq!(backoff.delay(u32::MAX), Duration::from_secs(60));
    }

    #[test]
    fn test_zero_factor_retries_immediately() {
        let backoff = ReconnectBackoff::new(0.0, Duration::from_secs(60));
        assert_eq!(backoff.delay(3), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_until_success() {
        let calls = Arc::new(AtomicU32::new(0));
        let ctx = CancellationToken::new();

        let result = retry_until_cancelled(&ReconnectBackoff::default(), &ctx, "connect", || {
            let calls = calls.clone();
            async move {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(anyhow::anyhow!("broker unavailable"))
                } else {
                    Ok("connected")
                }
            }
        })
        .await;

        assert_eq!(result, Some("connected"));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_interrupts_backoff() {
        let ctx = CancellationToken::new();
        let cancel = ctx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(3)).await;
            cancel.cancel();
        });

        let result: Option<()> =
            retry_until_cancelled(&ReconnectBackoff::default(), &ctx, "connect", || async {
                Err(anyhow::anyhow!("broker unavailable"))
            })
            .await;

        assert!(result.is_none());
    }

    #[tokio::test]
    async fn test_already_cancelled_never_calls_operation() {
        let ctx = CancellationToken::new();
        ctx.cancel();
        let calls = AtomicU32::new(0);

        let result = retry_until_cancelled(&ReconnectBackoff::default(), &ctx, "connect", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Ok(()) }
        })
        .await;

        assert!(result.is_none());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }
}
