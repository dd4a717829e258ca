//! Metric instrument factories for eventq.
//!
//! Uses the OTel Meter API with the globally-registered `MeterProvider`.
//! All instruments are created lazily from the `"eventq"` meter.

use opentelemetry::metrics::{Counter, Histogram, Meter};

fn meter() -> Meter {
    opentelemetry::global::meter("eventq")
}

/// Counter: store operations issued through the queue access layer.
/// Labels: `operation` ("claim" | "complete" | "reclaim_stale"), `result` ("ok" | "error").
pub fn queue_operations() -> Counter<u64> {
    meter()
        .u64_counter("eventq.queue.operations")
        .with_description("Number of queue store operations")
        .build()
}

/// Counter: rows touched by the stale guard.
/// Labels: `action` ("released" | "deleted").
pub fn stale_events() -> Counter<u64> {
    meter()
        .u64_counter("eventq.guard.stale_events")
        .with_description("Events released or purged by the stale guard")
        .build()
}

/// Counter: handler invocations that did not succeed.
/// Labels: `event_type`, `reason` ("error" | "panic").
pub fn handler_failures() -> Counter<u64> {
    meter()
        .u64_counter("eventq.handler.failures")
        .with_description("Failed handler invocations")
        .build()
}

/// Histogram: handler duration in milliseconds.
/// Labels: `event_type`, `outcome` ("ok" | "failed").
pub fn handler_duration_ms() -> Histogram<f64> {
    meter()
        .f64_histogram("eventq.handler.duration_ms")
        .with_description("Handler duration in milliseconds")
        .with_unit("ms")
        .build()
}
