//! Event processing span helpers.

use tracing::Span;

use crate::model::EventId;

/// Start a span covering one claimed event, from handler to completion.
///
/// `event.outcome` is declared empty and filled in by [`record_outcome`].
pub fn start_event_span(event_type: &str, id: &EventId, worker_id: usize) -> Span {
    tracing::info_span!(
        "event.process",
        "event.type" = event_type,
        "event.id" = %id,
        "worker.id" = worker_id,
        "event.outcome" = tracing::field::Empty,
    )
}

/// Record a state transition event on the given span.
pub fn record_state_transition(span: &Span, from: &str, to: &str) {
    span.in_scope(|| {
        tracing::info!(from = from, to = to, "state_transition");
    });
}

pub fn record_outcome(span: &Span, outcome: &str) {
    span.record("event.outcome", outcome);
}
