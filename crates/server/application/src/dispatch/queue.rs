//! Single-consumer dispatch queue
//!
//! Producers (the bus consumer, tests) enqueue events; one worker drains them
//! in order and runs the full dispatch for each before taking the next. A
//! caller that needs the outcome waits on a oneshot; others fire and forget.

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::event_dispatcher::{DispatchOutcome, EventDispatcher};
use orch_server_domain::{DomainError, EventMessage, EventSink, Result};

pub const DEFAULT_QUEUE_CAPACITY: usize = 64;

struct DispatchRequest {
    event: EventMessage,
    respond_to: Option<oneshot::Sender<Result<DispatchOutcome>>>,
}

/// Producer handle. Cheap to clone.
#[derive(Clone)]
pub struct DispatchQueue {
    sender: mpsc::Sender<DispatchRequest>,
}

/// The only consumer of a [`DispatchQueue`]
pub struct DispatchWorker {
    receiver: mpsc::Receiver<DispatchRequest>,
    dispatcher: Arc<EventDispatcher>,
}

pub fn dispatch_queue(
    dispatcher: Arc<EventDispatcher>,
    capacity: usize,
) -> (DispatchQueue, DispatchWorker) {
    let (sender, receiver) = mpsc::channel(capacity.max(1));
    (
        DispatchQueue { sender },
        DispatchWorker {
            receiver,
            dispatcher,
        },
    )
}

fn queue_closed() -> DomainError {
    DomainError::InfrastructureError {
        message: "dispatch queue is closed".to_string(),
    }
}

impl DispatchQueue {
    /// Enqueue and wait until the worker has fully handled the event
    pub async fn submit(&self, event: EventMessage) -> Result<DispatchOutcome> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(DispatchRequest {
                event,
                respond_to: Some(tx),
            })
            .await
            .map_err(|_| queue_closed())?;
        rx.await.map_err(|_| queue_closed())?
    }

    /// Enqueue without waiting for the outcome
    pub async fn enqueue(&self, event: EventMessage) -> Result<()> {
        self.sender
            .send(DispatchRequest {
                event,
                respond_to: None,
            })
            .await
            .map_err(|_| queue_closed())
    }
}

#[async_trait]
impl EventSink for DispatchQueue {
    async fn deliver(&self, event: EventMessage) -> Result<()> {
        self.submit(event).await.map(|_| ())
    }
}

impl DispatchWorker {
    /// Drain the queue until cancelled or every producer is gone.
    /// An event already being dispatched is finished first.
    pub async fn run(mut self, cancel: CancellationToken) {
        info!("Dispatch worker started");
        loop {
            let request = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                request = self.receiver.recv() => match request {
                    Some(request) => request,
                    None => break,
                },
            };

            let result = self.dispatcher.dispatch(&request.event).await;
            match request.respond_to {
                Some(tx) => {
                    if tx.send(result).is_err() {
                        debug!("Dispatch caller went away before the outcome was ready");
                    }
                }
                None => {
                    if let Err(e) = result {
                        warn!(
                            workflow_id = %request.event.workflow_id,
                            request_id = %request.event.request_id,
                            "Queued dispatch failed: {}", e
                        );
                    }
                }
            }
        }
        info!("Dispatch worker stopped");
    }
}
