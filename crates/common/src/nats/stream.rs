use crate::nats::JetStreamPublisher;
use anyhow::{Context, Result};
use async_nats::jetstream::stream::Config as StreamConfig;
use tracing::info;

/// Declare a stream if it does not exist yet.
///
/// Existing streams are left untouched, mirroring a passive queue declare.
pub async fn ensure_stream(publisher: &dyn JetStreamPublisher, config: StreamConfig) -> Result<()> {
    let stream_name = config.name.clone();
    info!(stream = %stream_name, subjects = ?config.subjects, "ensuring stream exists");

    match publisher.get_stream(&stream_name).await {
        Ok(()) => {
            info!(stream = %stream_name, "stream already exists");
        }
        Err(_) => {
            publisher
                .create_stream(config)
                .await
                .with_context(|| format!("failed to create stream {}", stream_name))?;
            info!(stream = %stream_name, "created stream");
        }
    }

    Ok(())
}
