//! Inbound event envelope

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::shared_kernel::Result;

/// Event received from the bus. Transient, never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventMessage {
    /// Event name, matched against `EventRoute::event_name`
    pub event: String,
    /// Emitting service; matched against `EventRoute::event_source`
    pub source_id: String,
    pub request_id: String,
    pub workflow_id: String,
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl EventMessage {
    pub fn new(
        event: impl Into<String>,
        source_id: impl Into<String>,
        request_id: impl Into<String>,
        workflow_id: impl Into<String>,
    ) -> Self {
        Self {
            event: event.into(),
            source_id: source_id.into(),
            request_id: request_id.into(),
            workflow_id: workflow_id.into(),
            payload: serde_json::Value::Null,
        }
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }
}

/// Where the bus consumer hands parsed events.
///
/// Returns once the event has been fully handled.
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn deliver(&self, event: EventMessage) -> Result<()>;
}
