//! Push delivery endpoint
//!
//! Accepts CloudEvents in both HTTP content modes: structured (the whole
//! event is the JSON body) and binary (attributes in `ce-*` headers, the
//! object payload as the body). A terminal outcome is a `200`; a `5xx` asks
//! the platform to redeliver.

use axum::{
    body::Bytes,
    extract::State,
    http::HeaderMap,
    Json,
};
use chrono::Utc;

use super::AppState;
use crate::error::AppError;
use crate::ingest::event::parse_event_time;
use crate::ingest::{DeliveryEvent, EventData, Outcome};

const CE_ID: &str = "ce-id";
const CE_TIME: &str = "ce-time";

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Result<&'a str, AppError> {
    headers
        .get(name)
        .ok_or_else(|| AppError::BadRequest(format!("missing {name} header")))?
        .to_str()
        .map_err(|_| AppError::BadRequest(format!("{name} header is not valid text")))
}

/// Decode a delivery from either CloudEvents content mode
pub fn decode_event(headers: &HeaderMap, body: &[u8]) -> Result<DeliveryEvent, AppError> {
    if !headers.contains_key(CE_ID) {
        return serde_json::from_slice(body)
            .map_err(|e| AppError::BadRequest(format!("invalid event: {e}")));
    }

    let id = header(headers, CE_ID)?;
    let raw_time = header(headers, CE_TIME)?;
    let time = parse_event_time(raw_time)
        .ok_or_else(|| AppError::BadRequest(format!("invalid event time: {raw_time:?}")))?;
    let data: EventData = serde_json::from_slice(body)
        .map_err(|e| AppError::BadRequest(format!("invalid event data: {e}")))?;

    Ok(DeliveryEvent::new(id, time, data))
}

pub async fn receive_event(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Outcome>, AppError> {
    let event = decode_event(&headers, &body)?;
    let outcome = state.ingestor.handle(&event, Utc::now()).await?;
    Ok(Json(outcome))
}
