use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Shared pause gate for consumption.
///
/// A flush that hits a struggling downstream engages the gate; consumers wait
/// on it before pulling more work. Engaging again only ever extends the pause.
#[derive(Debug, Default)]
pub struct Backpressure {
    paused_until: Mutex<Option<Instant>>,
}

impl Backpressure {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn engage(&self, pause: Duration) {
        let until = Instant::now() + pause;
        let mut paused_until = self.paused_until.lock().unwrap_or_else(|p| p.into_inner());
        if paused_until.map_or(true, |current| current < until) {
            *paused_until = Some(until);
        }
    }

    /// Time left before consumption may resume, if paused
    pub fn remaining(&self) -> Option<Duration> {
        let paused_until = *self.paused_until.lock().unwrap_or_else(|p| p.into_inner());
        paused_until
            .map(|until| until.saturating_duration_since(Instant::now()))
            .filter(|left| !left.is_zero())
    }

    /// Wait until the gate is open. Returns false if cancelled while waiting.
    pub async fn wait(&self, ctx: &CancellationToken) -> bool {
        while let Some(left) = self.remaining() {
            info!(pause_secs = left.as_secs_f64(), "backpressure engaged, pausing consumption");
            tokio::select! {
                _ = ctx.cancelled() => return false,
                _ = tokio::time::sleep(left) => {}
            }
        }
        !ctx.is_cancelled()
    }
}
