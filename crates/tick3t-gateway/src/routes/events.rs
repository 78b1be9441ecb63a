use axum::{extract::State, routing::get, Json, Router};
use serde::Serialize;
use tick3t_common::{decimal, EventInfo, U256};
use tracing::warn;

use crate::error::ApiResult;
use crate::routes::load_json;
use crate::state::AppState;

pub const SCHEDULE_FILE: &str = "events_data.json";

/// Live contract state plus derived fields for display.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventInfoResponse {
    #[serde(flatten)]
    pub event: EventInfo,
    #[serde(with = "decimal")]
    pub available_tickets: U256,
    pub sold_out: bool,
}

pub fn events_router() -> Router<AppState> {
    Router::new()
        .route("/events", get(list_events))
        .route("/event-info", get(event_info))
}

/// The conference schedule, served as stored.
async fn list_events(State(state): State<AppState>) -> ApiResult<Json<serde_json::Value>> {
    Ok(Json(load_json(&state.data_file(SCHEDULE_FILE)).await?))
}

async fn event_info(State(state): State<AppState>) -> ApiResult<Json<EventInfoResponse>> {
    let event = state
        .events
        .get_event_info()
        .await
        .inspect_err(|e| warn!(error = %e, "event info read failed"))?;
    Ok(Json(EventInfoResponse {
        available_tickets: event.available_tickets(),
        sold_out: event.is_sold_out(),
        event,
    }))
}
