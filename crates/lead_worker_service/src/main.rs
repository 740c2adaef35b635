mod config;
mod shutdown;

use common::nats::NatsClient;
use common::telemetry::{init_telemetry, shutdown_telemetry};
use lead_runner::Runner;
use lead_worker::{HttpContactStore, LeadWorker};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};

#[tokio::main]
async fn main() {
    let config = match config::ServiceConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = config.validate() {
        eprintln!("Invalid configuration: {:#}", e);
        std::process::exit(1);
    }

    let telemetry_providers = match init_telemetry(&config.telemetry_config()) {
        Ok(providers) => providers,
        Err(e) => {
            eprintln!("Failed to initialize telemetry: {:#}", e);
            std::process::exit(1);
        }
    };

    info!(
        queue = %config.queue_name,
        contact_service_url = %config.contact_service_url,
        "Starting lead worker"
    );
    debug!("Configuration: {:?}", config);

    let contact_store = match HttpContactStore::new(
        &config.contact_service_url,
        config.retry_policy(),
    ) {
        Ok(store) => Arc::new(store),
        Err(e) => {
            error!("Failed to create contact service client: {:#}", e);
            shutdown_telemetry(telemetry_providers);
            std::process::exit(1);
        }
    };

    let runner = Runner::new()
        .with_shutdown_grace(Duration::from_secs(config.shutdown_grace_secs));

    // The runner only listens for signals once it runs, so the initial
    // connect watches ctrl-c itself.
    let startup_token = runner.cancellation_token();
    let signal_token = startup_token.clone();
    let startup_signal = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutdown requested during startup");
            signal_token.cancel();
        }
    });

    let nats = match NatsClient::connect_with_backoff(
        &config.nats_options(),
        &config.reconnect_backoff(),
        &startup_token,
    )
    .await
    {
        Ok(client) => client,
        Err(e) => {
            error!("Failed to connect to NATS: {:#}", e);
            shutdown_telemetry(telemetry_providers);
            std::process::exit(1);
        }
    };
    startup_signal.abort();

    let worker = LeadWorker::new(
        nats.create_consumer_client(),
        nats.create_publisher_client(),
        contact_store,
        config.worker_config(),
    );
    let intake = worker.intake();

    let mut runner = runner;
    for (name, process) in worker.into_runner_processes() {
        runner = runner.with_boxed_process(name, process);
    }

    let outcome = shutdown::run_until_drained(
        runner,
        intake,
        Duration::from_secs(config.closer_timeout_secs),
        move || async move {
            nats.close().await;
            shutdown_telemetry(telemetry_providers);
        },
    )
    .await;

    if let lead_runner::RunOutcome::Failed(e) = &outcome {
        eprintln!("Lead worker stopped with an error: {:#}", e);
    }
    std::process::exit(outcome.exit_code());
}
