//! NATS connection and inbound event consumer

use anyhow::Context;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use orch_server_domain::EventSink;
use orch_server_infrastructure::messaging::{NatsEventConsumer, NatsEventConsumerConfig};
use orch_shared::config::NatsConfig;

pub async fn connect(config: &NatsConfig) -> anyhow::Result<async_nats::Client> {
    let urls = config.urls.join(",");
    let client = async_nats::ConnectOptions::new()
        .connection_timeout(Duration::from_secs(config.timeout_secs))
        .connect(urls.as_str())
        .await
        .with_context(|| format!("Failed to connect to NATS at {}", urls))?;
    info!("✓ Connected to NATS");
    Ok(client)
}

pub fn event_consumer(
    client: async_nats::Client,
    config: &NatsConfig,
    sink: Arc<dyn EventSink>,
) -> NatsEventConsumer {
    NatsEventConsumer::new(
        client,
        NatsEventConsumerConfig {
            stream: config.stream.clone(),
            subject: config.subject.clone(),
            durable_name: config.consumer_name.clone(),
            ..Default::default()
        },
        sink,
    )
}
