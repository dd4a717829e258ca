//! # eventq
//!
//! Durable, at-least-once consumer for an `events` table.
//!
//! A pool of workers claims events one at a time through a
//! [`queue::QueueAccessLayer`], runs a handler, and marks them processed.
//! A stale guard releases claims abandoned by stalled workers and purges
//! rows past retention. SQLite and PostgreSQL stores, OpenTelemetry
//! observability.

pub mod config;
pub mod db;
pub mod engine;
pub mod error;
pub mod handler;
pub mod model;
pub mod queue;
pub mod telemetry;
