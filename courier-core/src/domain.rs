//! Generic cross-cutting types shared by every Courier crate.
//!
//! Messaging-domain types (Channel, URN, MsgIn, MsgOut, StatusUpdate, ...)
//! live in `courier::model` — they're specific to the messaging fabric, not
//! shared infrastructure.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Request-scoped tracing/correlation identifiers, attached to every
/// inbound request and outbound send attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestContext {
    pub trace_id: String,
    pub request_id: String,
}

impl RequestContext {
    pub fn new() -> Self {
        Self {
            trace_id: Uuid::new_v4().to_string(),
            request_id: Uuid::new_v4().to_string(),
        }
    }
}

impl Default for RequestContext {
    fn default() -> Self {
        Self::new()
    }
}

/// UTC timestamp wrapper, matching spec.md's requirement that every
/// timestamp in the data model is UTC with nanosecond precision.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
pub struct Timestamp(pub DateTime<Utc>);

impl Timestamp {
    pub fn now() -> Self {
        Self(Utc::now())
    }
}

impl Default for Timestamp {
    fn default() -> Self {
        Self::now()
    }
}

impl From<DateTime<Utc>> for Timestamp {
    fn from(dt: DateTime<Utc>) -> Self {
        Self(dt)
    }
}
