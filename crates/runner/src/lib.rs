//! A concurrent application runner that manages long-running processes with graceful shutdown.
//!
//! The runner orchestrates named app processes and cleanup functions:
//! - Processes run concurrently and share one cancellation token
//! - SIGTERM/SIGINT or the first failing process cancels the token
//! - Remaining processes get a grace period to finish in-flight work
//! - Closers then run one after another, in registration order
//!
//! # Example
//!
//! ```no_run
//! use lead_runner::Runner;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() {
//!     let outcome = Runner::new()
//!         .with_named_process("ticker", |ctx| async move {
//!             loop {
//!                 tokio::select! {
//!                     _ = ctx.cancelled() => break,
//!                     _ = tokio::time::sleep(Duration::from_secs(1)) => {
//!                         tracing::info!("tick");
//!                     }
//!                 }
//!             }
//!             Ok(())
//!         })
//!         .with_closer(|| async move {
//!             tracing::info!("Cleaning up resources");
//!             Ok(())
//!         })
//!         .with_closer_timeout(Duration::from_secs(5))
//!         .run()
//!         .await;
//!
//!     std::process::exit(outcome.exit_code());
//! }
//! ```

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

type BoxedResultFuture = Pin<Box<dyn Future<Output = Result<(), anyhow::Error>> + Send>>;

/// Type alias for an app process function.
/// Takes a cancellation token and returns a future that resolves to Result<(), anyhow::Error>
pub type AppProcess = Box<dyn FnOnce(CancellationToken) -> BoxedResultFuture + Send>;

/// Type alias for a closer function.
pub type Closer = Box<dyn FnOnce() -> BoxedResultFuture + Send>;

struct NamedProcess {
    name: String,
    process: AppProcess,
}

/// How a run ended.
#[derive(Debug)]
pub enum RunOutcome {
    /// Every process stopped without error.
    Clean,
    /// At least one process failed or panicked; holds the first failure.
    Failed(anyhow::Error),
}

impl RunOutcome {
    pub fn is_clean(&self) -> bool {
        matches!(self, RunOutcome::Clean)
    }

    /// Process exit code for this outcome.
    pub fn exit_code(&self) -> i32 {
        match self {
            RunOutcome::Clean => 0,
            RunOutcome::Failed(_) => 1,
        }
    }
}

/// A concurrent application runner that manages long-running processes with graceful shutdown.
pub struct Runner {
    processes: Vec<NamedProcess>,
    closers: Vec<Closer>,
    closer_timeout: Duration,
    shutdown_grace: Duration,
    cancellation_token: CancellationToken,
}

impl Default for Runner {
    fn default() -> Self {
        Self::new()
    }
}

impl Runner {
    /// Creates a new Runner with default configuration.
    ///
    /// Default settings:
    /// - Closer timeout: 10 seconds
    /// - Shutdown grace: 10 seconds
    pub fn new() -> Self {
        Self {
            processes: Vec::new(),
            closers: Vec::new(),
            closer_timeout: Duration::from_secs(10),
            shutdown_grace: Duration::from_secs(10),
            cancellation_token: CancellationToken::new(),
        }
    }

    /// Adds a named app process to the runner.
    ///
    /// If any process returns an error or panics, the shared token is
    /// cancelled and the run ends as [`RunOutcome::Failed`].
    pub fn with_named_process<F, Fut>(mut self, name: impl Into<String>, process: F) -> Self
    where
        F: FnOnce(CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), anyhow::Error>> + Send + 'static,
    {
        self.processes.push(NamedProcess {
            name: name.into(),
            process: Box::new(|token| Box::pin(process(token))),
        });
        self
    }

    /// Adds an already boxed process.
    pub fn with_boxed_process(mut self, name: impl Into<String>, process: AppProcess) -> Self {
        self.processes.push(NamedProcess {
            name: name.into(),
            process,
        });
        self
    }

    /// Adds a closer to the runner.
    ///
    /// Closers run after all app processes have stopped, in the order they
    /// were added. A failing closer does not prevent later ones from running.
    pub fn with_closer<F, Fut>(mut self, closer: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), anyhow::Error>> + Send + 'static,
    {
        self.closers.push(Box::new(|| Box::pin(closer())));
        self
    }

    /// Sets the timeout for executing all closers.
    pub fn with_closer_timeout(mut self, timeout: Duration) -> Self {
        self.closer_timeout = timeout;
        self
    }

    /// Sets how long processes may keep running after cancellation before
    /// they are aborted.
    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }

    /// Sets a custom cancellation token.
    ///
    /// This allows external control over process cancellation.
    pub fn with_cancellation_token(mut self, token: CancellationToken) -> Self {
        self.cancellation_token = token;
        self
    }

    /// The token shared by every process of this runner.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancellation_token.clone()
    }

    /// Runs all app processes and waits for completion or shutdown signal.
    ///
    /// This method:
    /// 1. Spawns all app processes concurrently
    /// 2. Monitors for SIGTERM/SIGINT signals
    /// 3. Cancels all processes when a signal is received or any process fails
    /// 4. Gives remaining processes the shutdown grace period, then aborts them
    /// 5. Executes closers sequentially under the closer timeout
    pub async fn run(self) -> RunOutcome {
        let token = self.cancellation_token;
        let mut join_set = JoinSet::new();

        for NamedProcess { name, process } in self.processes {
            let process_token = token.clone();
            debug!(process = %name, "starting app process");
            join_set.spawn(async move {
                let result = process(process_token).await;
                (name, result)
            });
        }

        install_signal_handlers(&token);

        let mut first_error: Option<anyhow::Error> = None;

        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                next = join_set.join_next() => match next {
                    Some(result) => record_result(result, &token, &mut first_error),
                    None => break,
                },
            }
        }

        if !join_set.is_empty() {
            info!(
                remaining = join_set.len(),
                grace = ?self.shutdown_grace,
                "waiting for app processes to stop"
            );
            let drained = tokio::time::timeout(
                self.shutdown_grace,
                drain_processes(&mut join_set, &token, &mut first_error),
            )
            .await;

            if drained.is_err() {
                warn!(
                    remaining = join_set.len(),
                    "app processes did not stop within shutdown grace, aborting"
                );
                join_set.shutdown().await;
            }
        }

        if !self.closers.is_empty() {
            info!("Running closers with timeout of {:?}", self.closer_timeout);

            match tokio::time::timeout(self.closer_timeout, run_closers(self.closers)).await {
                Ok(()) => info!("All closers completed"),
                Err(_) => error!("Closers timed out after {:?}", self.closer_timeout),
            }
        }

        match first_error {
            Some(err) => {
                error!("Application exiting with error: {:#}", err);
                RunOutcome::Failed(err)
            }
            None => {
                info!("Application exiting normally");
                RunOutcome::Clean
            }
        }
    }
}

fn record_result(
    result: Result<(String, Result<(), anyhow::Error>), tokio::task::JoinError>,
    token: &CancellationToken,
    first_error: &mut Option<anyhow::Error>,
) {
    match result {
        Ok((name, Ok(()))) => {
            debug!(process = %name, "App process completed successfully");
        }
        Ok((name, Err(err))) => {
            error!(process = %name, "App process error: {:#}", err);
            if first_error.is_none() {
                *first_error = Some(err.context(format!("process '{}' failed", name)));
            }
            token.cancel();
        }
        Err(err) if err.is_cancelled() => {
            debug!("App process aborted");
        }
        Err(err) => {
            error!("App process panicked: {}", err);
            if first_error.is_none() {
                *first_error = Some(anyhow::anyhow!("app process panicked: {}", err));
            }
            token.cancel();
        }
    }
}

async fn drain_processes(
    join_set: &mut JoinSet<(String, Result<(), anyhow::Error>)>,
    token: &CancellationToken,
    first_error: &mut Option<anyhow::Error>,
) {
    while let Some(result) = join_set.join_next().await {
        record_result(result, token, first_error);
    }
}

async fn run_closers(closers: Vec<Closer>) {
    for (index, closer) in closers.into_iter().enumerate() {
        // A panicking closer must not stop the ones after it.
        match tokio::spawn(closer()).await {
            Ok(Ok(())) => debug!(closer = index, "Closer completed successfully"),
            Ok(Err(err)) => error!(closer = index, "Closer error: {:#}", err),
            Err(err) => error!(closer = index, "Closer panicked: {}", err),
        }
    }
}

fn install_signal_handlers(token: &CancellationToken) {
    let signal_token = token.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Received shutdown signal");
                signal_token.cancel();
            }
            Err(err) => {
                error!("Error setting up signal handler: {}", err);
            }
        }
    });

    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let sigterm_token = token.clone();
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::spawn(async move {
                    if sigterm.recv().await.is_some() {
                        info!("Received SIGTERM signal");
                        sigterm_token.cancel();
                    }
                });
            }
            Err(err) => error!("Error setting up SIGTERM handler: {}", err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{Arc, Mutex};

    fn wait_for_cancel(ctx: CancellationToken) -> impl Future<Output = anyhow::Result<()>> {
        async move {
            ctx.cancelled().await;
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_cancelled_runner_is_clean_and_runs_closers() {
        let closer_called = Arc::new(AtomicBool::new(false));
        let flag = closer_called.clone();
        let token = CancellationToken::new();

        let runner = Runner::new()
            .with_named_process("waiter", wait_for_cancel)
            .with_closer(move || async move {
                flag.store(true, Ordering::SeqCst);
                Ok(())
            })
            .with_cancellation_token(token.clone());

        let canceller = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            canceller.cancel();
        });

        let outcome = runner.run().await;
        assert!(outcome.is_clean());
        assert_eq!(outcome.exit_code(), 0);
        assert!(closer_called.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_failing_process_cancels_others() {
        let other_stopped = Arc::new(AtomicBool::new(false));
        let flag = other_stopped.clone();

        let outcome = Runner::new()
            .with_named_process("broken", |_ctx| async move {
                Err(anyhow::anyhow!("boom"))
            })
            .with_named_process("healthy", move |ctx| async move {
                ctx.cancelled().await;
                flag.store(true, Ordering::SeqCst);
                Ok(())
            })
            .run()
            .await;

        assert_eq!(outcome.exit_code(), 1);
        assert!(other_stopped.load(Ordering::SeqCst));
        match outcome {
            RunOutcome::Failed(err) => assert!(format!("{:#}", err).contains("boom")),
            RunOutcome::Clean => panic!("expected failure"),
        }
    }

    #[tokio::test]
    async fn test_panicking_process_fails_run() {
        let outcome = Runner::new()
            .with_named_process("panicky", |_ctx| async move {
                if true {
                    panic!("unexpected");
                }
                Ok(())
            })
            .run()
            .await;

        assert!(!outcome.is_clean());
    }

    #[tokio::test]
    async fn test_closers_run_in_registration_order() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let first = order.clone();
        let second = order.clone();
        let third = order.clone();

        let outcome = Runner::new()
            .with_named_process("done", |_ctx| async move { Ok(()) })
            .with_closer(move || async move {
                tokio::time::sleep(Duration::from_millis(10)).await;
                first.lock().unwrap().push(1);
                Ok(())
            })
            .with_closer(move || async move {
                second.lock().unwrap().push(2);
                Err(anyhow::anyhow!("closer failure is logged only"))
            })
            .with_closer(move || async move {
                third.lock().unwrap().push(3);
                Ok(())
            })
            .run()
            .await;

        assert!(outcome.is_clean());
        assert_eq!(*order.lock().unwrap(), vec![1, 2, 3]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_in_flight_work_finishes_within_grace() {
        let finished = Arc::new(AtomicBool::new(false));
        let flag = finished.clone();
        let token = CancellationToken::new();

        let runner = Runner::new()
            .with_named_process("slow", move |ctx| async move {
                ctx.cancelled().await;
                tokio::time::sleep(Duration::from_secs(3)).await;
                flag.store(true, Ordering::SeqCst);
                Ok(())
            })
            .with_shutdown_grace(Duration::from_secs(5))
            .with_cancellation_token(token.clone());

        token.cancel();
        let outcome = runner.run().await;

        assert!(outcome.is_clean());
        assert!(finished.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stragglers_are_aborted_after_grace() {
        let finished = Arc::new(AtomicBool::new(false));
        let flag = finished.clone();
        let closer_called = Arc::new(AtomicBool::new(false));
        let closer_flag = closer_called.clone();
        let token = CancellationToken::new();

        let runner = Runner::new()
            .with_named_process("stuck", move |_ctx| async move {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                flag.store(true, Ordering::SeqCst);
                Ok(())
            })
            .with_closer(move || async move {
                closer_flag.store(true, Ordering::SeqCst);
                Ok(())
            })
            .with_shutdown_grace(Duration::from_secs(1))
            .with_cancellation_token(token.clone());

        token.cancel();
        let outcome = runner.run().await;

        assert!(outcome.is_clean());
        assert!(!finished.load(Ordering::SeqCst));
        assert!(closer_called.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn test_closer_timeout_bounds_shutdown() {
        let outcome = Runner::new()
            .with_named_process("done", |_ctx| async move { Ok(()) })
            .with_closer(|| async move {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(())
            })
            .with_closer_timeout(Duration::from_secs(1))
            .run()
            .await;

        assert!(outcome.is_clean());
    }
}
