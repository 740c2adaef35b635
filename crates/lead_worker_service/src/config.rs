use anyhow::{bail, Result};
use common::nats::{NatsConnectOptions, ReconnectBackoff};
use common::telemetry::TelemetryConfig;
use config::{Config, ConfigError, Environment};
use lead_worker::{
    DeadLetterTopology, DemoProducerConfig, DispatcherConfig, LeadWorkerConfig, QueueTopology,
    RetryPolicy,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

#[derive(Deserialize, Serialize, Clone)]
pub struct ServiceConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    // Downstream configuration
    /// Batch endpoint of the contact service
    #[serde(default = "default_contact_service_url")]
    pub contact_service_url: String,

    // NATS configuration
    /// NATS server URL
    #[serde(default = "default_nats_url")]
    pub nats_url: String,

    /// NATS username, anonymous when unset
    #[serde(default)]
    pub nats_user: Option<String>,

    /// NATS password
    #[serde(default)]
    pub nats_password: Option<String>,

    /// Connection name reported to the NATS server
    #[serde(default = "default_connection_name")]
    pub connection_name: String,

    /// Timeout of a single NATS connection attempt in seconds
    #[serde(default = "default_startup_timeout_secs")]
    pub startup_timeout_secs: u64,

    /// Work queue (stream) leads are consumed from
    #[serde(default = "default_queue_name")]
    pub queue_name: String,

    /// Durable consumer name
    #[serde(default = "default_consumer_name")]
    pub consumer_name: String,

    /// Dead-letter exchange (subject prefix); dead-lettering is off unless
    /// both exchange and queue are set
    #[serde(default)]
    pub dead_letter_exchange: Option<String>,

    /// Dead-letter queue (stream)
    #[serde(default)]
    pub dead_letter_queue: Option<String>,

    /// Maximum unacknowledged messages outstanding to the worker
    #[serde(default = "default_prefetch")]
    pub prefetch: usize,

    /// Seconds before an unacknowledged message is redelivered.
    ///
    /// Also bounds how long leads dropped from the buffer on reconnect wait
    /// before the broker redelivers them: JetStream does not release their
    /// deliveries when the consumer is recreated, so they come back only
    /// once this expires.
    #[serde(default = "default_ack_wait_secs")]
    pub ack_wait_secs: u64,

    /// Broker-side delivery limit, -1 for unlimited
    #[serde(default = "default_max_deliver")]
    pub max_deliver: i64,

    // Batching configuration
    /// Leads per batch before a size-triggered flush
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Seconds a non-empty batch may wait before a timeout flush
    #[serde(default = "default_batch_timeout_secs")]
    pub batch_timeout_secs: f64,

    /// Poll interval of the timeout flusher and broker fetch in milliseconds
    #[serde(default = "default_flush_poll_interval_ms")]
    pub flush_poll_interval_ms: u64,

    // HTTP configuration
    /// Client-level retries for transient failures
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Exponential backoff factor for retries and reconnects
    #[serde(default = "default_retry_backoff_factor")]
    pub retry_backoff_factor: f64,

    /// Batch request timeout in seconds
    #[serde(default = "default_http_timeout_secs")]
    pub http_timeout_secs: f64,

    /// Single-lead request timeout in seconds
    #[serde(default = "default_per_item_timeout_secs")]
    pub per_item_timeout_secs: f64,

    /// Consumption pause after a transient batch failure in seconds
    #[serde(default = "default_backpressure_sleep_secs")]
    pub backpressure_sleep_secs: f64,

    /// Interval of the periodic metrics log line in seconds
    #[serde(default = "default_metrics_log_interval_secs")]
    pub metrics_log_interval_secs: u64,

    // Demo producer configuration
    /// Publish sample leads to the work queue
    #[serde(default)]
    pub demo_producer_enabled: bool,

    /// Seconds between sample leads
    #[serde(default = "default_demo_producer_interval_secs")]
    pub demo_producer_interval_secs: u64,

    // OpenTelemetry configuration
    /// Enable OpenTelemetry export
    #[serde(default)]
    pub otel_enabled: bool,

    /// OpenTelemetry OTLP endpoint (gRPC)
    #[serde(default = "default_otel_endpoint")]
    pub otel_endpoint: String,

    /// Service name for OpenTelemetry resource
    #[serde(default = "default_otel_service_name")]
    pub otel_service_name: String,

    // Shutdown configuration
    /// Seconds allowed for closing NATS and telemetry once the final flush is done
    #[serde(default = "default_closer_timeout_secs")]
    pub closer_timeout_secs: u64,

    /// Time processes get to finish in-flight work after shutdown is requested
    #[serde(default = "default_shutdown_grace_secs")]
    pub shutdown_grace_secs: u64,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_contact_service_url() -> String {
    "http://localhost:8002/contacts/batch".to_string()
}

// NATS defaults
fn default_nats_url() -> String {
    "nats://localhost:4222".to_string()
}

fn default_connection_name() -> String {
    "lead-worker".to_string()
}

fn default_startup_timeout_secs() -> u64 {
    30
}

fn default_queue_name() -> String {
    "lead_queue".to_string()
}

fn default_consumer_name() -> String {
    "lead-worker".to_string()
}

fn default_prefetch() -> usize {
    200
}

fn default_ack_wait_secs() -> u64 {
    300
}

fn default_max_deliver() -> i64 {
    -1
}

// Batching defaults
fn default_batch_size() -> usize {
    100
}

fn default_batch_timeout_secs() -> f64 {
    5.0
}

fn default_flush_poll_interval_ms() -> u64 {
    1000
}

// HTTP defaults
fn default_max_retries() -> u32 {
    3
}

fn default_retry_backoff_factor() -> f64 {
    2.0
}

fn default_http_timeout_secs() -> f64 {
    15.0
}

fn default_per_item_timeout_secs() -> f64 {
    10.0
}

fn default_backpressure_sleep_secs() -> f64 {
    10.0
}

fn default_metrics_log_interval_secs() -> u64 {
    60
}

fn default_demo_producer_interval_secs() -> u64 {
    5
}

// OpenTelemetry defaults
fn default_otel_endpoint() -> String {
    "http://localhost:4317".to_string()
}

fn default_otel_service_name() -> String {
    "lead-worker".to_string()
}

fn default_closer_timeout_secs() -> u64 {
    30
}

fn default_shutdown_grace_secs() -> u64 {
    30
}

fn secs(value: f64) -> Duration {
    Duration::try_from_secs_f64(value).unwrap_or(Duration::ZERO)
}

impl fmt::Debug for ServiceConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceConfig")
            .field("log_level", &self.log_level)
            .field("contact_service_url", &self.contact_service_url)
            .field("nats_url", &self.nats_url)
            .field("nats_user", &self.nats_user)
            .field("nats_password", &self.nats_password.as_ref().map(|_| "***"))
            .field("queue_name", &self.queue_name)
            .field("consumer_name", &self.consumer_name)
            .field("dead_letter_exchange", &self.dead_letter_exchange)
            .field("dead_letter_queue", &self.dead_letter_queue)
            .field("prefetch", &self.prefetch)
            .field("batch_size", &self.batch_size)
            .field("batch_timeout_secs", &self.batch_timeout_secs)
            .field("max_retries", &self.max_retries)
            .field("http_timeout_secs", &self.http_timeout_secs)
            .field("demo_producer_enabled", &self.demo_producer_enabled)
            .field("otel_enabled", &self.otel_enabled)
            .finish_non_exhaustive()
    }
}

impl ServiceConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Config::builder()
            .add_source(Environment::with_prefix("LEAD_WORKER"))
            .build()?
            .try_deserialize()
    }

    /// Reject settings the worker cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            bail!("batch_size must be greater than zero");
        }
        if self.prefetch == 0 {
            bail!("prefetch must be greater than zero");
        }

        for (name, value) in [
            ("batch_timeout_secs", self.batch_timeout_secs),
            ("http_timeout_secs", self.http_timeout_secs),
            ("per_item_timeout_secs", self.per_item_timeout_secs),
            ("backpressure_sleep_secs", self.backpressure_sleep_secs),
        ] {
            if !value.is_finite() || value <= 0.0 {
                bail!("{} must be a positive number of seconds, got {}", name, value);
            }
        }
        for (name, value) in [
            ("flush_poll_interval_ms", self.flush_poll_interval_ms),
            ("startup_timeout_secs", self.startup_timeout_secs),
            ("ack_wait_secs", self.ack_wait_secs),
            ("metrics_log_interval_secs", self.metrics_log_interval_secs),
            ("demo_producer_interval_secs", self.demo_producer_interval_secs),
        ] {
            if value == 0 {
                bail!("{} must be greater than zero", name);
            }
        }
        if !self.retry_backoff_factor.is_finite() || self.retry_backoff_factor < 0.0 {
            bail!("retry_backoff_factor must be a non-negative number");
        }
        if self.max_deliver == 0 || self.max_deliver < -1 {
            bail!("max_deliver must be -1 (unlimited) or positive");
        }

        match (&self.dead_letter_exchange, &self.dead_letter_queue) {
            (Some(_), None) => bail!("dead_letter_exchange is set but dead_letter_queue is not"),
            (None, Some(_)) => bail!("dead_letter_queue is set but dead_letter_exchange is not"),
            _ => {}
        }

        reqwest::Url::parse(&self.contact_service_url).map_err(|e| {
            anyhow::anyhow!(
                "invalid contact_service_url '{}': {}",
                self.contact_service_url,
                e
            )
        })?;

        Ok(())
    }

    pub fn telemetry_config(&self) -> TelemetryConfig {
        TelemetryConfig {
            service_name: self.otel_service_name.clone(),
            otel_endpoint: self.otel_endpoint.clone(),
            otel_enabled: self.otel_enabled,
            log_level: self.log_level.clone(),
        }
    }

    pub fn nats_options(&self) -> NatsConnectOptions {
        NatsConnectOptions {
            url: self.nats_url.clone(),
            user: self.nats_user.clone(),
            password: self.nats_password.clone(),
            connection_name: self.connection_name.clone(),
            connection_timeout: Duration::from_secs(self.startup_timeout_secs),
        }
    }

    pub fn reconnect_backoff(&self) -> ReconnectBackoff {
        ReconnectBackoff::new(self.retry_backoff_factor, Duration::from_secs(60))
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_retries, self.retry_backoff_factor)
    }

    pub fn topology(&self) -> QueueTopology {
        let dead_letter = match (&self.dead_letter_exchange, &self.dead_letter_queue) {
            (Some(exchange), Some(queue)) => Some(DeadLetterTopology {
                exchange: exchange.clone(),
                queue: queue.clone(),
            }),
            _ => None,
        };

        QueueTopology {
            queue_name: self.queue_name.clone(),
            consumer_name: self.consumer_name.clone(),
            dead_letter,
            prefetch: self.prefetch,
            ack_wait: Duration::from_secs(self.ack_wait_secs),
            max_deliver: self.max_deliver,
        }
    }

    pub fn worker_config(&self) -> LeadWorkerConfig {
        let topology = self.topology();
        let demo_producer = self.demo_producer_enabled.then(|| DemoProducerConfig {
            interval: Duration::from_secs(self.demo_producer_interval_secs),
            subject: topology.demo_subject(),
        });

        LeadWorkerConfig {
            topology,
            batch_size: self.batch_size,
            batch_timeout: secs(self.batch_timeout_secs),
            flush_poll_interval: Duration::from_millis(self.flush_poll_interval_ms),
            dispatcher: DispatcherConfig {
                batch_timeout: secs(self.http_timeout_secs),
                per_item_timeout: secs(self.per_item_timeout_secs),
                backpressure: secs(self.backpressure_sleep_secs),
            },
            metrics_interval: Duration::from_secs(self.metrics_log_interval_secs),
            reconnect_backoff: self.reconnect_backoff(),
            demo_producer,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    // Mutex to ensure tests run serially and don't interfere with each other
    static TEST_LOCK: Mutex<()> = Mutex::new(());

    const VARS: &[&str] = &[
        "LEAD_WORKER_LOG_LEVEL",
        "LEAD_WORKER_BATCH_SIZE",
        "LEAD_WORKER_BATCH_TIMEOUT_SECS",
        "LEAD_WORKER_DEAD_LETTER_EXCHANGE",
        "LEAD_WORKER_DEAD_LETTER_QUEUE",
        "LEAD_WORKER_MAX_DELIVER",
    ];

    fn clear_env() {
        for var in VARS {
            std::env::remove_var(var);
        }
    }

    #[test]
    fn test_default_config() {
        let _lock = TEST_LOCK.lock().unwrap();
        clear_env();

        let config = ServiceConfig::from_env().unwrap();
        assert_eq!(config.log_level, "info");
        assert_eq!(config.contact_service_url, "http://localhost:8002/contacts/batch");
        assert_eq!(config.queue_name, "lead_queue");
        assert_eq!(config.prefetch, 200);
        assert_eq!(config.batch_size, 100);
        assert_eq!(config.batch_timeout_secs, 5.0);
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.max_deliver, -1);
        assert!(config.dead_letter_exchange.is_none());
        assert!(!config.demo_producer_enabled);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_custom_config() {
        let _lock = TEST_LOCK.lock().unwrap();
        clear_env();
        std::env::set_var("LEAD_WORKER_LOG_LEVEL", "debug");
        std::env::set_var("LEAD_WORKER_BATCH_SIZE", "25");
        std::env::set_var("LEAD_WORKER_BATCH_TIMEOUT_SECS", "2.5");
        std::env::set_var("LEAD_WORKER_DEAD_LETTER_EXCHANGE", "leads_dlx");
        std::env::set_var("LEAD_WORKER_DEAD_LETTER_QUEUE", "leads_dlq");

        let config = ServiceConfig::from_env().unwrap();
        clear_env();

        assert_eq!(config.log_level, "debug");
        assert_eq!(config.batch_size, 25);
        assert!(config.validate().is_ok());

        let worker = config.worker_config();
        assert_eq!(worker.batch_timeout, Duration::from_millis(2500));
        assert_eq!(
            worker.topology.dead_letter,
            Some(DeadLetterTopology {
                exchange: "leads_dlx".to_string(),
                queue: "leads_dlq".to_string(),
            })
        );
    }

    #[test]
    fn test_validation_rejects_bad_settings() {
        let _lock = TEST_LOCK.lock().unwrap();
        clear_env();
        let base = ServiceConfig::from_env().unwrap();

        let mut config = base.clone();
        config.batch_size = 0;
        assert!(config.validate().is_err());

        let mut config = base.clone();
        config.prefetch = 0;
        assert!(config.validate().is_err());

        let mut config = base.clone();
        config.http_timeout_secs = 0.0;
        assert!(config.validate().is_err());

        let mut config = base.clone();
        config.dead_letter_exchange = Some("leads_dlx".to_string());
        assert!(config.validate().is_err());

        let mut config = base.clone();
        config.dead_letter_queue = Some("leads_dlq".to_string());
        assert!(config.validate().is_err());

        let mut config = base.clone();
        config.contact_service_url = "not a url".to_string();
        assert!(config.validate().is_err());

        let mut config = base;
        config.max_deliver = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_derived_configs() {
        let _lock = TEST_LOCK.lock().unwrap();
        clear_env();
        let mut config = ServiceConfig::from_env().unwrap();
        config.demo_producer_enabled = true;

        let worker = config.worker_config();
        assert_eq!(worker.topology.consumer_name, "lead-worker");
        assert_eq!(worker.dispatcher.batch_timeout, Duration::from_secs(15));
        assert_eq!(worker.dispatcher.per_item_timeout, Duration::from_secs(10));
        assert_eq!(worker.dispatcher.backpressure, Duration::from_secs(10));
        assert_eq!(
            worker.demo_producer.map(|demo| demo.subject),
            Some("lead_queue.demo".to_string())
        );

        let retry = config.retry_policy();
        assert_eq!(retry.max_retries, 3);
        assert_eq!(retry.delay_for(1, None), Duration::from_secs(2));

        let nats = config.nats_options();
        assert_eq!(nats.connection_timeout, Duration::from_secs(30));
        assert!(nats.user.is_none());

        let debug = format!("{:?}", ServiceConfig {
            nats_password: Some("hunter2".to_string()),
            ..config
        });
        assert!(!debug.contains("hunter2"));
    }
}
