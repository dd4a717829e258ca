//! Worker loop: claim, handle, complete.
//!
//! A failed event is not retried here. It stays claimed until the stale
//! guard releases it, which bounds retry storms on poison events.

use std::sync::Arc;

use opentelemetry::KeyValue;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{Instrument, error, info, warn};

use super::wait_or_shutdown;
use crate::config::QueueConfig;
use crate::db::EventStore;
use crate::error::Result;
use crate::handler::EventHandler;
use crate::model::{Claim, ClaimedEvent};
use crate::queue::QueueAccessLayer;
use crate::telemetry::event::{record_outcome, record_state_transition, start_event_span};
use crate::telemetry::metrics;

/// What one pass through the loop did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cycle {
    /// Nothing was eligible.
    Empty,
    /// An event was handled and marked processed.
    Completed,
    /// The handler failed; the event is left claimed.
    Failed,
}

enum HandlerFailure {
    Error(anyhow::Error),
    Panic(String),
}

impl HandlerFailure {
    fn reason(&self) -> &'static str {
        match self {
            HandlerFailure::Error(_) => "error",
            HandlerFailure::Panic(_) => "panic",
        }
    }
}

impl std::fmt::Display for HandlerFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HandlerFailure::Error(e) => write!(f, "{e:#}"),
            HandlerFailure::Panic(msg) => write!(f, "handler panicked: {msg}"),
        }
    }
}

pub struct Worker<S> {
    id: usize,
    queue: Arc<QueueAccessLayer<S>>,
    handler: Arc<dyn EventHandler>,
    config: QueueConfig,
    shutdown: watch::Receiver<bool>,
}

impl<S: EventStore + 'static> Worker<S> {
    pub fn new(
        id: usize,
        queue: Arc<QueueAccessLayer<S>>,
        handler: Arc<dyn EventHandler>,
        config: QueueConfig,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            id,
            queue,
            handler,
            config,
            shutdown,
        }
    }

    /// Loop until shutdown. Never returns early on errors.
    pub async fn run(mut self) {
        info!(worker = self.id, "worker started");
        let mut last_idle_log: Option<Instant> = None;

        while !*self.shutdown.borrow() {
            let pause = match self.run_cycle().await {
                Ok(Cycle::Completed) => continue,
                Ok(Cycle::Empty) => {
                    if last_idle_log.is_none_or(|at| at.elapsed() >= self.config.idle_log_interval)
                    {
                        info!(worker = self.id, "no events to process");
                        last_idle_log = Some(Instant::now());
                    }
                    self.config.poll_sleep
                }
                Ok(Cycle::Failed) => self.config.failure_cooldown,
                Err(e) => {
                    error!(worker = self.id, error = %e, "worker cycle failed");
                    self.config.failure_cooldown
                }
            };

            if wait_or_shutdown(&mut self.shutdown, pause).await {
                break;
            }
        }

        info!(worker = self.id, "worker stopped");
    }

    /// Claim at most one event and take it through the handler.
    pub async fn run_cycle(&self) -> Result<Cycle> {
        let event = match self.queue.claim().await? {
            Claim::Event(event) => event,
            Claim::Empty => return Ok(Cycle::Empty),
        };

        let span = start_event_span(&event.event_type, &event.id, self.id);
        async {
            info!(
                key = %event.idempotency_key,
                payload = %event.payload,
                "fetched event"
            );
            record_state_transition(&span, "unclaimed", "claimed");

            let started = Instant::now();
            let outcome = self.invoke(&event).await;
            let duration_ms = started.elapsed().as_secs_f64() * 1000.0;

            match outcome {
                Ok(()) => {
                    metrics::handler_duration_ms().record(
                        duration_ms,
                        &[
                            KeyValue::new("event_type", event.event_type.clone()),
                            KeyValue::new("outcome", "ok"),
                        ],
                    );
                    self.queue.complete(&event.id).await?;
                    record_state_transition(&span, "claimed", "completed");
                    record_outcome(&span, "completed");
                    info!(duration_ms, "marked processed");
                    Ok(Cycle::Completed)
                }
                Err(failure) => {
                    metrics::handler_duration_ms().record(
                        duration_ms,
                        &[
                            KeyValue::new("event_type", event.event_type.clone()),
                            KeyValue::new("outcome", "failed"),
                        ],
                    );
                    metrics::handler_failures().add(
                        1,
                        &[
                            KeyValue::new("event_type", event.event_type.clone()),
                            KeyValue::new("reason", failure.reason()),
                        ],
                    );
                    record_outcome(&span, "failed");
                    warn!(
                        error = %failure,
                        duration_ms,
                        "handler failed, event left claimed for the stale guard"
                    );
                    Ok(Cycle::Failed)
                }
            }
        }
        .instrument(span.clone())
        .await
    }

    // Runs on its own task so a panicking handler cannot take the worker down.
    async fn invoke(&self, event: &ClaimedEvent) -> std::result::Result<(), HandlerFailure> {
        let handler = Arc::clone(&self.handler);
        let owned = event.clone();
        let task = tokio::spawn(async move { handler.handle(&owned).await }.in_current_span());

        match task.await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(HandlerFailure::Error(e)),
            Err(join) => Err(HandlerFailure::Panic(join.to_string())),
        }
    }
}
