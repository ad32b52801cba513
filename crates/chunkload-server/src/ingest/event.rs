//! Delivery events
//!
//! The platform pushes one CloudEvent per staged object. Only the event id,
//! its time and the object's bucket and name matter to ingestion; every
//! other attribute is ignored.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::storage::ObjectRef;

/// Naive layouts accepted for event times without an offset
const NAIVE_TIME_FORMATS: &[&str] = &["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"];

/// Parse an ISO-8601 instant, reading it as UTC when it carries no offset
pub fn parse_event_time(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(time) = DateTime::parse_from_rfc3339(raw) {
        return Some(time.with_timezone(&Utc));
    }

    NAIVE_TIME_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(raw, format).ok())
        .map(|naive| naive.and_utc())
}

fn deserialize_event_time<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    parse_event_time(&raw)
        .ok_or_else(|| serde::de::Error::custom(format!("invalid event time: {raw:?}")))
}

/// The object an event is about
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventData {
    pub bucket: String,
    pub name: String,
}

/// One delivery of an object-finalized notification
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryEvent {
    pub id: String,
    #[serde(deserialize_with = "deserialize_event_time")]
    pub time: DateTime<Utc>,
    pub data: EventData,
}

impl DeliveryEvent {
    pub fn new(id: impl Into<String>, time: DateTime<Utc>, data: EventData) -> Self {
        Self {
            id: id.into(),
            time,
            data,
        }
    }

    pub fn object(&self) -> ObjectRef {
        ObjectRef::new(&self.data.bucket, &self.data.name)
    }
}
