use axum::{extract::State, routing::get, Json, Router};
use serde_json::{json, Value};
use tick3t_attest::UnverifiedEmail;
use tracing::info;

use crate::error::{ApiError, ApiResult};
use crate::routes::load_json;
use crate::state::AppState;

pub const EMAIL_FILE: &str = "mail.eml";
pub const DNS_RECORDS_FILE: &str = "dns_records.json";

pub fn proof_router() -> Router<AppState> {
    Router::new().route("/generate-proof", get(generate_proof).post(generate_proof))
}

/// Prove the stored email and return the prover's result.
async fn generate_proof(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    let email_path = state.data_file(EMAIL_FILE);
    let email = tokio::fs::read_to_string(&email_path)
        .await
        .map_err(|e| ApiError::Data(format!("{}: {e}", email_path.display())))?;
    let dns_path = state.data_file(DNS_RECORDS_FILE);
    let dns_records: Vec<String> = if dns_path.exists() {
        load_json(&dns_path).await?
    } else {
        Vec::new()
    };

    let email = UnverifiedEmail::new(email, dns_records);
    info!(record = ?email.dkim_record_name(), "generating email proof");
    let result = state.prover.prove(&email).await?;
    Ok(Json(json!({
        "status": "success",
        "result": {
            "success": true,
            "timestamp": chrono::Utc::now().to_rfc3339(),
            "hash": result.hash,
            "proof": result.proof,
            "raw": result.raw,
            "email": { "dnsRecords": email.dns_records },
        }
    })))
}
