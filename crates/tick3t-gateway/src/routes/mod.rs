pub mod events;
pub mod metadata;
pub mod proof;

use axum::Router;
use serde::de::DeserializeOwned;
use std::path::Path;

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

/// Build the complete API router
pub fn api_router() -> Router<AppState> {
    Router::new()
        .merge(metadata::metadata_router())
        .merge(events::events_router())
        .merge(proof::proof_router())
}

/// Read and parse a JSON data file. Files are re-read on every request so
/// edits take effect without a restart.
pub(crate) async fn load_json<T: DeserializeOwned>(path: &Path) -> ApiResult<T> {
    let raw = tokio::fs::read(path)
        .await
        .map_err(|e| ApiError::Data(format!("{}: {e}", path.display())))?;
    serde_json::from_slice(&raw).map_err(|e| ApiError::Data(format!("{}: {e}", path.display())))
}
