//! Inbound event consumer over NATS JetStream
//!
//! Pulls JSON `EventMessage`s from a durable consumer and hands each one to an
//! `EventSink`. Every message is acked once handled, whatever the outcome, so
//! a failed dispatch is never redelivered. The exception is a message cut
//! short by shutdown: it stays unacked and comes back after `ack_wait`.

use async_nats::jetstream::consumer::pull::Config as PullConsumerConfig;
use async_nats::jetstream::consumer::{AckPolicy, DeliverPolicy, PullConsumer};
use async_nats::jetstream::stream::{Config as StreamConfig, Stream};
use async_nats::jetstream::{self, Context as JetStreamContext};
use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use orch_server_domain::{EventMessage, EventSink};

#[derive(Debug, Clone)]
pub struct NatsEventConsumerConfig {
    /// JetStream stream holding inbound events
    pub stream: String,
    /// Subject the stream captures
    pub subject: String,
    /// Durable consumer name
    pub durable_name: String,
    pub ack_wait: Duration,
}

impl Default for NatsEventConsumerConfig {
    fn default() -> Self {
        Self {
            stream: "ORCH_EVENTS".to_string(),
            subject: "orch.events".to_string(),
            durable_name: "workflow-manager".to_string(),
            ack_wait: Duration::from_secs(300),
        }
    }
}

#[derive(Debug, Error)]
pub enum EventConsumerError {
    #[error("Failed to ensure stream {stream}: {message}")]
    Stream { stream: String, message: String },

    #[error("Failed to create consumer {consumer}: {message}")]
    Consumer { consumer: String, message: String },

    #[error("Failed to pull messages: {0}")]
    Messages(String),
}

/// What happened to one message
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Handled {
    Delivered,
    Rejected,
    Malformed,
}

pub struct NatsEventConsumer {
    jetstream: JetStreamContext,
    config: NatsEventConsumerConfig,
    sink: Arc<dyn EventSink>,
}

impl NatsEventConsumer {
    pub fn new(
        client: async_nats::Client,
        config: NatsEventConsumerConfig,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            jetstream: jetstream::new(client),
            config,
            sink,
        }
    }

    async fn ensure_stream(&self) -> Result<Stream, EventConsumerError> {
        self.jetstream
            .get_or_create_stream(StreamConfig {
                name: self.config.stream.clone(),
                subjects: vec![self.config.subject.clone()],
                ..Default::default()
            })
            .await
            .map_err(|e| EventConsumerError::Stream {
                stream: self.config.stream.clone(),
                message: e.to_string(),
            })
    }

    async fn consumer(&self) -> Result<PullConsumer, EventConsumerError> {
        let stream = self.ensure_stream().await?;
        let name = &self.config.durable_name;
        stream
            .get_or_create_consumer(
                name,
                PullConsumerConfig {
                    durable_name: Some(name.clone()),
                    filter_subject: self.config.subject.clone(),
                    deliver_policy: DeliverPolicy::All,
                    ack_policy: AckPolicy::Explicit,
                    ack_wait: self.config.ack_wait,
                    ..Default::default()
                },
            )
            .await
            .map_err(|e| EventConsumerError::Consumer {
                consumer: name.clone(),
                message: e.to_string(),
            })
    }

    /// Consume until `cancel` fires
    pub async fn run(self, cancel: CancellationToken) -> Result<(), EventConsumerError> {
        let consumer = self.consumer().await?;
        let mut messages = consumer
            .messages()
            .await
            .map_err(|e| EventConsumerError::Messages(e.to_string()))?;

        info!(
            target: "orch::events",
            stream = %self.config.stream,
            subject = %self.config.subject,
            consumer = %self.config.durable_name,
            "Event consumer started"
        );

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                next = messages.next() => match next {
                    Some(Ok(msg)) => {
                        let handled = handle_payload(self.sink.as_ref(), &msg.payload).await;
                        if handled == Handled::Rejected && cancel.is_cancelled() {
                            debug!(target: "orch::events", "Shutting down, leaving event for redelivery");
                            continue;
                        }
                        if let Err(e) = msg.ack().await {
                            warn!(target: "orch::events", error = %e, "Failed to ack event");
                        }
                    }
                    Some(Err(e)) => {
                        warn!(target: "orch::events", error = %e, "Error receiving event");
                    }
                    None => {
                        warn!(target: "orch::events", "Event stream closed");
                        break;
                    }
                },
            }
        }

        info!(target: "orch::events", "Event consumer stopped");
        Ok(())
    }

    pub fn spawn(self, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            if let Err(e) = self.run(cancel).await {
                error!(target: "orch::events", error = %e, "Event consumer failed");
            }
        })
    }
}

pub(crate) async fn handle_payload(sink: &dyn EventSink, payload: &[u8]) -> Handled {
    let event: EventMessage = match serde_json::from_slice(payload) {
        Ok(event) => event,
        Err(e) => {
            error!(target: "orch::events", error = %e, "Discarding malformed event");
            return Handled::Malformed;
        }
    };

    debug!(
        target: "orch::events",
        event = %event.event,
        workflow_id = %event.workflow_id,
        request_id = %event.request_id,
        "Event received"
    );

    let workflow_id = event.workflow_id.clone();
    let request_id = event.request_id.clone();
    match sink.deliver(event).await {
        Ok(()) => Handled::Delivered,
        Err(e) => {
            error!(
                target: "orch::events",
                workflow_id = %workflow_id,
                request_id = %request_id,
                error = %e,
                "Event dispatch failed"
            );
            Handled::Rejected
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use orch_server_domain::{DomainError, Result};
    use tokio::sync::Mutex;

    #[derive(Default)]
    struct RecordingSink {
        received: Mutex<Vec<EventMessage>>,
        fail: bool,
    }

    #[async_trait]
    impl EventSink for RecordingSink {
        async fn deliver(&self, event: EventMessage) -> Result<()> {
            let workflow_id = event.workflow_id.clone();
            self.received.lock().await.push(event);
            if self.fail {
                return Err(DomainError::WorkflowNotFound { workflow_id });
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_valid_event_is_delivered() {
        let sink = RecordingSink::default();
        let payload = br#"{"event":"INGESTED","source_id":"ingestor","request_id":"R1","workflow_id":"W1","payload":{"file":"a.mp4"}}"#;

        assert_eq!(handle_payload(&sink, payload).await, Handled::Delivered);
        let received = sink.received.lock().await;
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].payload["file"], "a.mp4");
    }

    #[tokio::test]
    async fn test_malformed_event_never_reaches_sink() {
        let sink = RecordingSink::default();
        assert_eq!(
            handle_payload(&sink, br#"{"event":"INGESTED"}"#).await,
            Handled::Malformed
        );
        assert_eq!(handle_payload(&sink, b"not json").await, Handled::Malformed);
        assert!(sink.received.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_dispatch_failure_is_reported_not_raised() {
        let sink = RecordingSink {
            fail: true,
            ..Default::default()
        };
        let payload = br#"{"event":"INGESTED","source_id":"x","request_id":"R1","workflow_id":"W9"}"#;
        assert_eq!(handle_payload(&sink, payload).await, Handled::Rejected);
    }

    #[tokio::test]
    #[ignore = "Requires a NATS server with JetStream"]
    async fn test_consumes_from_live_stream() {
        let url = std::env::var("NATS_URL").unwrap_or_else(|_| "nats://localhost:4222".to_string());
        let client = async_nats::connect(&url).await.unwrap();
        let config = NatsEventConsumerConfig {
            stream: "ORCH_EVENTS_TEST".to_string(),
            subject: "orch.events.test".to_string(),
            durable_name: "orch-test".to_string(),
            ..Default::default()
        };
        let sink = Arc::new(RecordingSink::default());
        let consumer = NatsEventConsumer::new(client.clone(), config, sink.clone());
        let cancel = CancellationToken::new();
        let task = consumer.spawn(cancel.clone());

        tokio::time::sleep(Duration::from_millis(500)).await;
        jetstream::new(client)
            .publish(
                "orch.events.test",
                r#"{"event":"INGESTED","source_id":"x","request_id":"R1","workflow_id":"W1"}"#.into(),
            )
            .await
            .unwrap()
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_secs(1)).await;
        cancel.cancel();
        task.await.unwrap();
        assert!(!sink.received.lock().await.is_empty());
    }
}
