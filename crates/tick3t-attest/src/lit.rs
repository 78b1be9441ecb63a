//! Lit access-control conditions and the encryption gateway client.
//!
//! The threshold encryption itself runs in a Lit gateway sidecar reached
//! over HTTP (`POST /encrypt`, `POST /decrypt`).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tick3t_chain::parse_ether;
use tick3t_common::Address;
use tracing::{debug, info};

use crate::error::AttestError;

/// Placeholder Lit substitutes with the requesting wallet.
pub const USER_ADDRESS: &str = ":userAddress";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConditionKind {
    /// Holds at least one token of an ERC-721 collection.
    Nft,
    /// Holds more than `amount` of an ERC-20 token.
    Tokens,
    /// Native balance of at least `amount`.
    Balance,
}

impl FromStr for ConditionKind {
    type Err = AttestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "nft" => Ok(ConditionKind::Nft),
            "tokens" => Ok(ConditionKind::Tokens),
            "balance" => Ok(ConditionKind::Balance),
            _ => Err(AttestError::InvalidCondition(
                "type must be 'nft' or 'tokens' or 'balance'".into(),
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReturnValueTest {
    pub comparator: String,
    pub value: String,
}

/// One EVM basic access-control condition, in Lit's JSON shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessControlCondition {
    pub contract_address: String,
    pub standard_contract_type: String,
    pub chain: String,
    pub method: String,
    pub parameters: Vec<String>,
    pub return_value_test: ReturnValueTest,
}

impl AccessControlCondition {
    /// Conditions for `kind`. `amount` is a decimal in whole tokens/ether and
    /// is converted to base units exactly; it is ignored for `nft`.
    pub fn build(
        kind: ConditionKind,
        chain: &str,
        contract: &str,
        amount: &str,
    ) -> Result<Vec<Self>, AttestError> {
        let condition = match kind {
            ConditionKind::Nft => Self {
                contract_address: checked_contract(contract)?,
                standard_contract_type: "ERC721".into(),
                chain: chain.into(),
                method: "balanceOf".into(),
                parameters: vec![USER_ADDRESS.into()],
                return_value_test: ReturnValueTest {
                    comparator: ">".into(),
                    value: "0".into(),
                },
            },
            ConditionKind::Tokens => Self {
                contract_address: checked_contract(contract)?,
                standard_contract_type: "ERC20".into(),
                chain: chain.into(),
                method: "balanceOf".into(),
                parameters: vec![USER_ADDRESS.into()],
                return_value_test: ReturnValueTest {
                    comparator: ">".into(),
                    value: wei(amount)?,
                },
            },
            ConditionKind::Balance => Self {
                contract_address: String::new(),
                standard_contract_type: String::new(),
                chain: chain.into(),
                method: "eth_getBalance".into(),
                parameters: vec![USER_ADDRESS.into(), "latest".into()],
                return_value_test: ReturnValueTest {
                    comparator: ">=".into(),
                    value: wei(amount)?,
                },
            },
        };
        Ok(vec![condition])
    }
}

/// Whole ether (or 18-decimal tokens) to a decimal wei string.
fn wei(amount: &str) -> Result<String, AttestError> {
    let amount = amount.trim();
    if amount.starts_with('-') {
        return Err(AttestError::Amount(format!("{amount} is negative")));
    }
    parse_ether(amount)
        .map(|v| v.to_string())
        .map_err(|e| AttestError::Amount(format!("{amount}: {e}")))
}

fn checked_contract(contract: &str) -> Result<String, AttestError> {
    let address: Address = contract
        .parse()
        .map_err(|_| AttestError::InvalidCondition(format!("invalid contract address: {contract}")))?;
    Ok(address.to_string())
}

/// Output of an encryption, stored as JSON between the encrypt and decrypt
/// steps.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncryptedPayload {
    pub ciphertext: String,
    pub data_to_encrypt_hash: String,
    pub access_control_conditions: Vec<AccessControlCondition>,
    pub chain: String,
}

impl EncryptedPayload {
    pub fn load(path: &Path) -> Result<Self, AttestError> {
        let raw = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    pub fn save(&self, path: &Path) -> Result<(), AttestError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }
}

/// Encrypt under access conditions; decrypt if the caller satisfies them.
#[async_trait]
pub trait ConditionalEncryption: Send + Sync {
    async fn encrypt(
        &self,
        message: &str,
        conditions: Vec<AccessControlCondition>,
        chain: &str,
    ) -> Result<EncryptedPayload, AttestError>;

    async fn decrypt(&self, payload: &EncryptedPayload) -> Result<String, AttestError>;
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct EncryptRequest<'a> {
    network: &'a str,
    chain: &'a str,
    data_to_encrypt: &'a str,
    access_control_conditions: &'a [AccessControlCondition],
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct EncryptResponse {
    ciphertext: String,
    data_to_encrypt_hash: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct DecryptRequest<'a> {
    network: &'a str,
    #[serde(flatten)]
    payload: &'a EncryptedPayload,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct DecryptResponse {
    decrypted_string: String,
}

#[derive(Deserialize)]
struct GatewayError {
    error: String,
}

/// HTTP client of the Lit gateway sidecar.
pub struct LitGatewayClient {
    http: reqwest::Client,
    base_url: String,
    network: String,
}

impl LitGatewayClient {
    pub fn new(base_url: impl Into<String>, network: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::builder()
                .timeout(Duration::from_secs(60))
                .build()
                .unwrap_or_else(|_| reqwest::Client::new()),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            network: network.into(),
        }
    }

    pub fn network(&self) -> &str {
        &self.network
    }

    async fn post<B: Serialize, R: for<'de> Deserialize<'de>>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<R, AttestError> {
        let url = format!("{}{path}", self.base_url);
        debug!(url = %url, network = %self.network, "Lit gateway request");
        let resp = self
            .http
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|e| AttestError::Http(e.to_string()))?;

        let status = resp.status();
        let text = resp.text().await.map_err(|e| AttestError::Http(e.to_string()))?;
        if !status.is_success() {
            let message = serde_json::from_str::<GatewayError>(&text)
                .map(|e| e.error)
                .unwrap_or(text);
            return Err(AttestError::Gateway {
                status: status.as_u16(),
                message,
            });
        }
        Ok(serde_json::from_str(&text)?)
    }
}

#[async_trait]
impl ConditionalEncryption for LitGatewayClient {
    async fn encrypt(
        &self,
        message: &str,
        conditions: Vec<AccessControlCondition>,
        chain: &str,
    ) -> Result<EncryptedPayload, AttestError> {
        let resp: EncryptResponse = self
            .post(
                "/encrypt",
                &EncryptRequest {
                    network: &self.network,
                    chain,
                    data_to_encrypt: message,
                    access_control_conditions: &conditions,
                },
            )
            .await?;
        info!(chain, conditions = conditions.len(), "message encrypted");
        Ok(EncryptedPayload {
            ciphertext: resp.ciphertext,
            data_to_encrypt_hash: resp.data_to_encrypt_hash,
            access_control_conditions: conditions,
            chain: chain.to_string(),
        })
    }

    async fn decrypt(&self, payload: &EncryptedPayload) -> Result<String, AttestError> {
        let resp: DecryptResponse = self
            .post(
                "/decrypt",
                &DecryptRequest {
                    network: &self.network,
                    payload,
                },
            )
            .await?;
        info!(chain = %payload.chain, "message decrypted");
        Ok(resp.decrypted_string)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;
    use axum::routing::post;
    use axum::{Json, Router};
    use serde_json::{json, Value};

    const CONTRACT: &str = "0xA80617371A5f511Bf4c1dDf822E6040acaa63e71";

    async fn spawn_gateway() -> String {
        async fn encrypt(Json(body): Json<Value>) -> Json<Value> {
            let message = body["dataToEncrypt"].as_str().unwrap_or_default();
            Json(json!({
                "ciphertext": format!("enc:{message}"),
                "dataToEncryptHash": "abc123",
            }))
        }
        async fn decrypt(Json(body): Json<Value>) -> (StatusCode, Json<Value>) {
            let ct = body["ciphertext"].as_str().unwrap_or_default();
            if body["accessControlConditions"][0]["method"] == "eth_getBalance" {
                return (
                    StatusCode::FORBIDDEN,
                    Json(json!({"error": "access control conditions not met"})),
                );
            }
            (
                StatusCode::OK,
                Json(json!({"decryptedString": ct.trim_start_matches("enc:")})),
            )
        }

        let app = Router::new()
            .route("/encrypt", post(encrypt))
            .route("/decrypt", post(decrypt));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    #[test]
    fn test_nft_condition_shape() {
        let conditions =
            AccessControlCondition::build(ConditionKind::Nft, "baseSepolia", CONTRACT, "1").unwrap();
        assert_eq!(
            serde_json::to_value(&conditions).unwrap(),
            json!([{
                "contractAddress": CONTRACT.to_ascii_lowercase(),
                "standardContractType": "ERC721",
                "chain": "baseSepolia",
                "method": "balanceOf",
                "parameters": [":userAddress"],
                "returnValueTest": {"comparator": ">", "value": "0"}
            }])
        );
    }

    #[test]
    fn test_amounts_are_exact_wei() {
        let tokens =
            AccessControlCondition::build(ConditionKind::Tokens, "baseSepolia", CONTRACT, "100").unwrap();
        assert_eq!(tokens[0].return_value_test.value, "100000000000000000000");
        assert_eq!(tokens[0].standard_contract_type, "ERC20");

        let balance =
            AccessControlCondition::build(ConditionKind::Balance, "baseSepolia", "", "0.1").unwrap();
        assert_eq!(balance[0].return_value_test.value, "100000000000000000");
        assert_eq!(balance[0].return_value_test.comparator, ">=");
        assert_eq!(balance[0].parameters, vec![":userAddress", "latest"]);
        assert!(balance[0].contract_address.is_empty());
    }

    #[test]
    fn test_invalid_inputs() {
        assert!(matches!(
            "erc1155".parse::<ConditionKind>(),
            Err(AttestError::InvalidCondition(_))
        ));
        assert_eq!("NFT".parse::<ConditionKind>().unwrap(), ConditionKind::Nft);
        assert!(AccessControlCondition::build(ConditionKind::Nft, "baseSepolia", "0x123", "1").is_err());
        assert!(matches!(
            AccessControlCondition::build(ConditionKind::Balance, "baseSepolia", "", "lots"),
            Err(AttestError::Amount(_))
        ));
        assert!(matches!(
            AccessControlCondition::build(ConditionKind::Tokens, "baseSepolia", CONTRACT, "-1"),
            Err(AttestError::Amount(_))
        ));
    }

    #[test]
    fn test_payload_file_roundtrip() {
        let path = std::env::temp_dir()
            .join(format!("tick3t-lit-{}", uuid::Uuid::new_v4()))
            .join("encrypted_data.json");
        let payload = EncryptedPayload {
            ciphertext: "ct".into(),
            data_to_encrypt_hash: "hash".into(),
            access_control_conditions: AccessControlCondition::build(
                ConditionKind::Nft,
                "baseSepolia",
                CONTRACT,
                "1",
            )
            .unwrap(),
            chain: "baseSepolia".into(),
        };
        payload.save(&path).unwrap();
        let raw: Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert!(raw.get("dataToEncryptHash").is_some());
        assert_eq!(EncryptedPayload::load(&path).unwrap(), payload);
        let _ = std::fs::remove_dir_all(path.parent().unwrap());
    }

    #[tokio::test]
    async fn test_gateway_encrypt_then_decrypt() {
        let client = LitGatewayClient::new(spawn_gateway().await, "datil-dev");
        let conditions =
            AccessControlCondition::build(ConditionKind::Nft, "baseSepolia", CONTRACT, "1").unwrap();
        let payload = client
            .encrypt("221b Baker St", conditions.clone(), "baseSepolia")
            .await
            .unwrap();
        assert_eq!(payload.ciphertext, "enc:221b Baker St");
        assert_eq!(payload.access_control_conditions, conditions);

        assert_eq!(client.decrypt(&payload).await.unwrap(), "221b Baker St");
    }

    #[tokio::test]
    async fn test_gateway_error_surfaces_message() {
        let client = LitGatewayClient::new(spawn_gateway().await, "datil-dev");
        let conditions =
            AccessControlCondition::build(ConditionKind::Balance, "baseSepolia", "", "1").unwrap();
        let payload = client.encrypt("secret", conditions, "baseSepolia").await.unwrap();
        match client.decrypt(&payload).await {
            Err(AttestError::Gateway { status, message }) => {
                assert_eq!(status, 403);
                assert_eq!(message, "access control conditions not met");
            }
            other => panic!("expected gateway error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_gateway_unreachable() {
        let client = LitGatewayClient::new("http://127.0.0.1:9", "datil-dev");
        let payload = EncryptedPayload {
            ciphertext: String::new(),
            data_to_encrypt_hash: String::new(),
            access_control_conditions: vec![],
            chain: "baseSepolia".into(),
        };
        let err = client.decrypt(&payload);
        assert!(matches!(err.await, Err(AttestError::Http(_))));
    }
}
