use crate::domain::{
    Backpressure, BatchBuffer, ContactStore, DeadLetterPublisher, DeadLetterSink,
    DispatcherConfig, FlushDispatcher, LeadIntake, MetricsReporter, TimeoutFlusher,
    WorkerMetrics,
};
use crate::nats::{
    run_demo_producer, BrokerConnection, ConsumeConfig, DemoProducerConfig, LeadConsumer,
    NatsDeadLetterProducer, QueueTopology,
};
use common::nats::{JetStreamConsumer, JetStreamPublisher, ReconnectBackoff};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// A long-running worker task, ready to hand to the runner
pub type WorkerProcess = Box<
    dyn FnOnce(CancellationToken) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send>>
        + Send,
>;

pub struct LeadWorkerConfig {
    pub topology: QueueTopology,
    pub batch_size: usize,
    pub batch_timeout: Duration,
    pub flush_poll_interval: Duration,
    pub dispatcher: DispatcherConfig,
    pub metrics_interval: Duration,
    pub reconnect_backoff: ReconnectBackoff,
    pub demo_producer: Option<DemoProducerConfig>,
}

pub struct LeadWorker {
    consumer: LeadConsumer,
    flusher: TimeoutFlusher,
    reporter: MetricsReporter,
    demo_producer: Option<(DemoProducerConfig, Arc<dyn JetStreamPublisher>)>,
    intake: Arc<LeadIntake>,
}

impl LeadWorker {
    pub fn new(
        consumer_client: Arc<dyn JetStreamConsumer>,
        publisher: Arc<dyn JetStreamPublisher>,
        contact_store: Arc<dyn ContactStore>,
        config: LeadWorkerConfig,
    ) -> Self {
        info!(
            queue = %config.topology.queue_name,
            batch_size = config.batch_size,
            batch_timeout_secs = config.batch_timeout.as_secs_f64(),
            dead_lettering = config.topology.dead_letter.is_some(),
            "initializing lead worker"
        );

        let metrics = Arc::new(WorkerMetrics::new());
        let backpressure = Arc::new(Backpressure::new());

        let sink = config.topology.dead_letter_exchange().map(|exchange| {
            Arc::new(NatsDeadLetterProducer::new(
                publisher.clone(),
                exchange.to_string(),
            )) as Arc<dyn DeadLetterSink>
        });
        let dead_letters = DeadLetterPublisher::new(sink, metrics.clone());

        let dispatcher = Arc::new(FlushDispatcher::new(
            contact_store,
            dead_letters,
            metrics.clone(),
            backpressure.clone(),
            config.dispatcher,
        ));
        let buffer = Arc::new(BatchBuffer::new(config.batch_size, config.batch_timeout));
        let intake = Arc::new(LeadIntake::new(buffer, dispatcher, metrics.clone()));

        let consume = ConsumeConfig {
            fetch_batch: config.batch_size.min(config.topology.prefetch).max(1),
            poll_interval: config.flush_poll_interval,
        };
        let connection = BrokerConnection::new(
            consumer_client,
            publisher.clone(),
            config.topology,
            config.reconnect_backoff,
        );
        let consumer = LeadConsumer::new(connection, intake.clone(), backpressure.clone(), consume);
        let flusher = TimeoutFlusher::new(intake.clone(), backpressure, config.flush_poll_interval);
        let reporter = MetricsReporter::new(metrics, config.metrics_interval);

        Self {
            consumer,
            flusher,
            reporter,
            demo_producer: config.demo_producer.map(|demo| (demo, publisher)),
            intake,
        }
    }

    /// Intake shared with the shutdown closer for the final flush
    pub fn intake(&self) -> Arc<LeadIntake> {
        self.intake.clone()
    }

    pub fn into_runner_processes(self) -> Vec<(&'static str, WorkerProcess)> {
        let mut processes: Vec<(&'static str, WorkerProcess)> = vec![
            (
                "lead_consumer",
                Box::new({
                    let consumer = self.consumer;
                    move |ctx| Box::pin(async move { consumer.run(ctx).await })
                }),
            ),
            (
                "timeout_flusher",
                Box::new({
                    let flusher = self.flusher;
                    move |ctx| Box::pin(async move { flusher.run(ctx).await })
                }),
            ),
            (
                "metrics_reporter",
                Box::new({
                    let reporter = self.reporter;
                    move |ctx| Box::pin(async move { reporter.run(ctx).await })
                }),
            ),
        ];

        if let Some((config, publisher)) = self.demo_producer {
            processes.push((
                "demo_producer",
                Box::new(move |ctx| Box::pin(run_demo_producer(ctx, config, publisher))),
            ));
        }

        processes
    }
}
