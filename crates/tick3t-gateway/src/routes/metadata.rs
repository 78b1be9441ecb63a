use axum::{
    extract::{Path, State},
    routing::get,
    Json, Router,
};
use chrono::DateTime;
use serde::{Deserialize, Serialize};

use crate::error::{ApiError, ApiResult};
use crate::routes::load_json;
use crate::state::AppState;

pub const METADATA_FILE: &str = "nft_metadata.json";

#[derive(Debug, Deserialize)]
struct MetadataFile {
    events: Vec<TicketedEvent>,
}

#[derive(Debug, Deserialize)]
struct TicketedEvent {
    index: serde_json::Value,
    name: String,
    image: String,
    location: String,
    /// Unix seconds.
    time: i64,
    url: String,
}

impl TicketedEvent {
    /// Events are keyed by their index as written, numeric or string.
    fn key(&self) -> String {
        match &self.index {
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct Attribute {
    pub trait_type: &'static str,
    pub value: String,
}

/// ERC-721 token metadata.
#[derive(Debug, Serialize)]
pub struct TicketMetadata {
    pub name: String,
    pub description: String,
    pub image: String,
    pub attributes: Vec<Attribute>,
}

pub fn metadata_router() -> Router<AppState> {
    Router::new().route("/metadata/:event_id/:token_id", get(get_metadata))
}

async fn get_metadata(
    State(state): State<AppState>,
    Path((event_id, token_id)): Path<(String, i64)>,
) -> ApiResult<Json<TicketMetadata>> {
    let file: MetadataFile = load_json(&state.data_file(METADATA_FILE)).await?;
    let event = file
        .events
        .into_iter()
        .find(|e| e.key() == event_id)
        .ok_or_else(|| ApiError::NotFound(format!("Event with ID {event_id} not found")))?;
    if token_id < 1 {
        return Err(ApiError::BadRequest("Invalid token ID".into()));
    }

    let date = DateTime::from_timestamp(event.time, 0)
        .map(|d| d.format("%Y-%m-%d").to_string())
        .ok_or_else(|| ApiError::Data(format!("event {event_id} has invalid time {}", event.time)))?;

    Ok(Json(TicketMetadata {
        name: format!("{} - Ticket #{token_id}", event.name),
        description: format!("Official ticket for {}", event.name),
        image: event.image,
        attributes: vec![
            Attribute { trait_type: "Event Name", value: event.name },
            Attribute { trait_type: "Location", value: event.location },
            Attribute { trait_type: "Date", value: date },
            Attribute { trait_type: "Ticket Number", value: token_id.to_string() },
            Attribute { trait_type: "Event URL", value: event.url },
        ],
    }))
}
