mod error;
mod routes;
mod state;

use axum::{routing::get, Json, Router};
use serde_json::json;
use tick3t_common::config::ProcessEnv;
use tower_http::cors::CorsLayer;
use tracing_subscriber::EnvFilter;

use state::AppState;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let (state, settings) = match AppState::from_source(&ProcessEnv) {
        Ok(loaded) => loaded,
        Err(e) => {
            tracing::error!(error = %e, "invalid configuration");
            std::process::exit(2);
        }
    };

    let listener = match tokio::net::TcpListener::bind(&settings.bind_addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!(addr = %settings.bind_addr, error = %e, "failed to bind");
            std::process::exit(1);
        }
    };
    tracing::info!(
        addr = %settings.bind_addr,
        data_dir = %settings.data_dir.display(),
        "tick3t gateway listening"
    );
    if let Err(e) = axum::serve(listener, app(state)).await {
        tracing::error!(error = %e, "server error");
        std::process::exit(1);
    }
}

fn app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/hello", get(hello))
        .merge(routes::api_router())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn hello() -> Json<serde_json::Value> {
    Json(json!({ "status": "running" }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routes::test_support::{data_dir, state};
    use axum::body::{to_bytes, Body};
    use axum::http::{header, Request, StatusCode};
    use tower::ServiceExt;

    #[tokio::test]
    async fn test_health_and_hello() {
        let app = app(state(data_dir(&[]), None, None));
        for (uri, status) in [("/health", "ok"), ("/hello", "running")] {
            let response = app
                .clone()
                .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK);
            let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
            let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
            assert_eq!(json["status"], status);
        }
    }

    #[tokio::test]
    async fn test_cors_is_permissive() {
        let response = app(state(data_dir(&[]), None, None))
            .oneshot(
                Request::builder()
                    .uri("/hello")
                    .header(header::ORIGIN, "https://tick3t.app")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(
            response.headers().get(header::ACCESS_CONTROL_ALLOW_ORIGIN).unwrap(),
            "*"
        );
    }

    #[test]
    fn test_state_requires_configuration() {
        let env = std::collections::HashMap::<String, String>::new();
        assert!(AppState::from_source(&env).is_err());
    }
}
