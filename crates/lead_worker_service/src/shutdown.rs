use lead_runner::{RunOutcome, Runner};
use lead_worker::LeadIntake;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

/// Run the worker processes, then settle and release.
///
/// The final flush starts only after every process has stopped and is not
/// bounded by a timeout, so a slow contact service is never cut off in the
/// middle of a request. The broker connection stays open until it finishes;
/// only `release` (closing NATS and telemetry) runs under `release_timeout`.
pub async fn run_until_drained<F, Fut>(
    runner: Runner,
    intake: Arc<LeadIntake>,
    release_timeout: Duration,
    release: F,
) -> RunOutcome
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = ()>,
{
    let outcome = runner.run().await;

    intake.final_flush().await;

    info!("Releasing connections with timeout of {:?}", release_timeout);
    if tokio::time::timeout(release_timeout, release()).await.is_err() {
        error!("Release timed out after {:?}", release_timeout);
    }

    outcome
}
