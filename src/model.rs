//! Core data model.
//!
//! An event is a row in the shared store. The queue only ever looks at its
//! two flags and its claim timestamp; everything else is carried through
//! to the handler untouched.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Event
// ---------------------------------------------------------------------------

/// Key of an event row.
///
/// Opaque to the queue: integer keys from our own schema and text keys from
/// an external producer's table are both read back as text.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(String);

impl EventId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for EventId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::str::FromStr for EventId {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self::new(s))
    }
}

impl From<String> for EventId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<&str> for EventId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// A full event row, as returned by an inspection fetch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub id: EventId,

    /// Caller-supplied dedup token. Carried through, never enforced here.
    pub idempotency_key: String,

    /// Tag that selects the handler. Opaque to the queue.
    pub event_type: String,

    /// Serialized payload. Passed to the handler unmodified.
    pub payload: String,

    /// Terminal once true.
    pub processed: bool,

    /// True while a worker holds the claim.
    pub in_progress: bool,

    /// Set at claim time; only meaningful while `in_progress` is true.
    pub processing_date: Option<DateTime<Utc>>,
}

impl Event {
    pub fn state(&self) -> EventState {
        if self.processed {
            EventState::Completed
        } else if self.in_progress {
            EventState::Claimed
        } else {
            EventState::Unclaimed
        }
    }
}

/// Lifecycle state derived from the `processed` and `in_progress` flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventState {
    /// Eligible for claiming.
    Unclaimed,
    /// Held by a worker (or abandoned, until the guard releases it).
    Claimed,
    /// Done. Never claimed again.
    Completed,
}

impl std::fmt::Display for EventState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            EventState::Unclaimed => "unclaimed",
            EventState::Claimed => "claimed",
            EventState::Completed => "completed",
        };
        write!(f, "{s}")
    }
}

// ---------------------------------------------------------------------------
// Claiming
// ---------------------------------------------------------------------------

/// The part of an event a worker receives when it wins a claim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimedEvent {
    pub id: EventId,
    pub idempotency_key: String,
    pub event_type: String,
    pub payload: String,
}

/// Outcome of a claim attempt. An empty queue is not an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Claim {
    Event(ClaimedEvent),
    Empty,
}

impl Claim {
    pub fn into_event(self) -> Option<ClaimedEvent> {
        match self {
            Claim::Event(event) => Some(event),
            Claim::Empty => None,
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Claim::Empty)
    }
}

/// Rows touched by one stale-claim maintenance pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReclaimReport {
    /// Claims older than the release threshold returned to the unclaimed pool.
    pub released: u64,
    /// Rows older than the retention threshold removed outright.
    pub deleted: u64,
}

impl ReclaimReport {
    pub fn is_empty(&self) -> bool {
        self.released == 0 && self.deleted == 0
    }
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// Builder for inserting events. Producers normally live outside this crate;
/// this exists for tooling and tests.
#[derive(Debug, Clone)]
pub struct NewEvent {
    pub(crate) idempotency_key: String,
    pub(crate) event_type: String,
    pub(crate) payload: String,
}

impl NewEvent {
    pub fn new(event_type: impl Into<String>, payload: impl Into<String>) -> Self {
        Self {
            idempotency_key: String::new(),
            event_type: event_type.into(),
            payload: payload.into(),
        }
    }

    pub fn idempotency_key(mut self, key: impl Into<String>) -> Self {
        self.idempotency_key = key.into();
        self
    }
}
