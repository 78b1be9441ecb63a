use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use tick3t_attest::AttestError;
use tick3t_common::Tick3tError;

/// API error response: `{"error": {code, message, status}}`.
#[derive(Debug)]
pub enum ApiError {
    NotFound(String),
    BadRequest(String),
    /// Data files shipped with the gateway are missing or unreadable.
    Data(String),
    Upstream(Tick3tError),
}

impl From<Tick3tError> for ApiError {
    fn from(err: Tick3tError) -> Self {
        ApiError::Upstream(err)
    }
}

impl From<AttestError> for ApiError {
    fn from(err: AttestError) -> Self {
        ApiError::Upstream(err.into())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message, code) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg, "NOT_FOUND"),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg, "BAD_REQUEST"),
            ApiError::Data(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg, "DATA_ERROR"),
            ApiError::Upstream(err) => {
                let status = match &err {
                    Tick3tError::ReadFailed(_) => StatusCode::BAD_GATEWAY,
                    Tick3tError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
                    Tick3tError::NotAuthenticated => StatusCode::UNAUTHORIZED,
                    Tick3tError::SoldOut | Tick3tError::PurchaseInFlight => StatusCode::CONFLICT,
                    _ => StatusCode::INTERNAL_SERVER_ERROR,
                };
                (status, err.to_string(), err.code())
            }
        };

        let body = Json(json!({
            "error": {
                "code": code,
                "message": message,
                "status": status.as_u16()
            }
        }));

        (status, body).into_response()
    }
}

/// Result type for API handlers
pub type ApiResult<T> = Result<T, ApiError>;
