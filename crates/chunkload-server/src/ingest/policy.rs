//! Delivery retry policy
//!
//! Deliveries are at-least-once and retried by the platform whenever the
//! handler fails. The policy caps that retry horizon by event age and
//! defines what every terminal outcome looks like to the caller.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Duration;

use super::coordinator::Disposition;

/// Default maximum age of an event before it is dropped (one hour)
pub const DEFAULT_MAX_EVENT_AGE_SECS: u64 = 3600;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeliveryPolicy {
    max_event_age: Duration,
}

impl Default for DeliveryPolicy {
    fn default() -> Self {
        Self::new(Duration::from_secs(DEFAULT_MAX_EVENT_AGE_SECS))
    }
}

impl DeliveryPolicy {
    pub fn new(max_event_age: Duration) -> Self {
        Self { max_event_age }
    }

    pub fn max_event_age(&self) -> Duration {
        self.max_event_age
    }

    /// Whether `now - event_time` exceeds the maximum age
    ///
    /// Events stamped in the future are never too old.
    pub fn event_is_too_old(&self, event_time: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        (now - event_time)
            .to_std()
            .is_ok_and(|age| age > self.max_event_age)
    }
}

/// How a delivery was resolved without asking for a retry
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Outcome {
    /// Loaded, recorded and deleted
    Loaded { disposition: Disposition, rows: u64 },
    /// The object name can never be ingested; deleted
    DroppedMalformed { reason: String },
    /// A newer export generation exists; deleted
    DroppedStale,
    /// Already loaded for this generation; deleted
    DroppedDuplicate,
    /// Retried past the maximum age; marked failed
    Expired,
    /// Previously marked failed; left alone
    SkippedFailed,
    /// The destination table is missing; marked failed
    TableNotFound { table: String },
}
