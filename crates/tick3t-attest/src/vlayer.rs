//! vlayer email proofs: start proving at the hosted prover, poll for the
//! receipt, and carry the resulting proof into a contract call.

use alloy_primitives::{FixedBytes, B256, U256};
use alloy_sol_types::SolCall;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::{Duration, Instant};
use tick3t_chain::contracts::{self, IEmailProver};
use tick3t_chain::serde_hex::u256;
use tick3t_chain::RpcPool;
use tick3t_common::config::VlayerSettings;
use tick3t_common::Address;
use tracing::{debug, info, warn};

use crate::error::AttestError;

/// A raw MIME email plus the DKIM DNS records it should be checked against.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnverifiedEmail {
    pub email: String,
    pub dns_records: Vec<String>,
}

impl UnverifiedEmail {
    pub fn new(email: impl Into<String>, dns_records: Vec<String>) -> Self {
        Self {
            email: email.into(),
            dns_records,
        }
    }

    /// `<selector>._domainkey.<domain>` from the first DKIM-Signature header.
    pub fn dkim_record_name(&self) -> Option<String> {
        let header = unfolded_header(&self.email, "dkim-signature")?;
        let tag = |name: &str| {
            header.split(';').find_map(|part| {
                let (k, v) = part.split_once('=')?;
                (k.trim() == name).then(|| v.trim().to_string())
            })
        };
        Some(format!("{}._domainkey.{}", tag("s")?, tag("d")?))
    }

    fn to_sol(&self) -> contracts::UnverifiedEmail {
        contracts::UnverifiedEmail {
            email: self.email.clone(),
            dnsRecords: self.dns_records.clone(),
        }
    }
}

/// Header value with continuation lines joined.
fn unfolded_header(email: &str, name: &str) -> Option<String> {
    let mut lines = email.lines();
    let mut value = loop {
        let line = lines.next()?;
        if line.trim().is_empty() {
            return None;
        }
        if let Some((k, v)) = line.split_once(':') {
            if k.eq_ignore_ascii_case(name) {
                break v.trim().to_string();
            }
        }
    };
    for line in lines {
        if line.starts_with(' ') || line.starts_with('\t') {
            value.push(' ');
            value.push_str(line.trim());
        } else {
            break;
        }
    }
    Some(value)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Seal {
    pub verifier_selector: FixedBytes<4>,
    pub seal: [B256; 8],
    pub mode: u8,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallAssumptions {
    pub prover_contract_address: Address,
    pub function_selector: FixedBytes<4>,
    #[serde(with = "u256")]
    pub settle_block_number: U256,
    pub settle_block_hash: B256,
}

/// Proof returned by the prover. Opaque to the purchase flow apart from its
/// ABI encoding as the argument of the proof-gated `buy`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmailProof {
    pub seal: Seal,
    pub call_guest_id: B256,
    #[serde(with = "u256")]
    pub length: U256,
    pub call_assumptions: CallAssumptions,
}

impl EmailProof {
    /// Accepts the proof object itself, `{proof: ..}`, or the prover's
    /// `[proof, ...returnValues]` array.
    pub fn from_prover_result(value: &Value) -> Result<Self, AttestError> {
        let proof = match value {
            Value::Array(items) => items.first(),
            Value::Object(map) => map.get("proof").or(Some(value)),
            _ => None,
        }
        .ok_or_else(|| AttestError::InvalidProof("no proof in prover result".into()))?;
        serde_json::from_value(proof.clone()).map_err(|e| AttestError::InvalidProof(e.to_string()))
    }

    /// The proof as the `Proof` struct proof-verified contract calls take.
    pub fn to_sol(&self) -> contracts::Proof {
        contracts::Proof {
            seal: contracts::Seal {
                verifierSelector: self.seal.verifier_selector,
                seal: self.seal.seal,
                mode: self.seal.mode,
            },
            callGuestId: self.call_guest_id,
            length: self.length,
            callAssumptions: contracts::CallAssumptions {
                proverContractAddress: self.call_assumptions.prover_contract_address.into(),
                functionSelector: self.call_assumptions.function_selector,
                settleBlockNumber: self.call_assumptions.settle_block_number,
                settleBlockHash: self.call_assumptions.settle_block_hash,
            },
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProvingResult {
    pub hash: String,
    pub proof: EmailProof,
    /// Receipt data as returned, including the prover's return values.
    pub raw: Value,
}

enum ReceiptState {
    Pending,
    Done(Value),
}

/// JSON-RPC client of a hosted vlayer prover.
pub struct VlayerProver {
    pool: RpcPool,
    prover: Address,
    chain_id: u64,
    poll_interval: Duration,
    timeout: Duration,
}

impl VlayerProver {
    pub fn new(settings: &VlayerSettings, chain_id: u64) -> Self {
        Self {
            pool: RpcPool::with_timeout(
                chain_id,
                vec![settings.prover_url.clone()],
                Duration::from_secs(60),
            ),
            prover: settings.prover_address,
            chain_id,
            poll_interval: Duration::from_secs(2),
            timeout: Duration::from_secs(600),
        }
    }

    pub fn with_polling(mut self, poll_interval: Duration, timeout: Duration) -> Self {
        self.poll_interval = poll_interval;
        self.timeout = timeout;
        self
    }

    /// Start proving; returns the proving hash.
    pub async fn prove_email(&self, email: &UnverifiedEmail) -> Result<String, AttestError> {
        let data = IEmailProver::mainCall {
            unverifiedEmail: email.to_sol(),
        }
        .abi_encode();
        let call = json!({
            "to": self.prover,
            "data": format!("0x{}", hex::encode(&data)),
        });
        let context = json!({ "chain_id": self.chain_id, "gas_limit": 1_000_000 });
        info!(prover = %self.prover, chain_id = self.chain_id, "requesting email proof");
        let result = self.pool.request("v_call", json!([call, context])).await?;

        result
            .as_str()
            .or_else(|| result.get("hash").and_then(Value::as_str))
            .map(str::to_string)
            .ok_or_else(|| AttestError::ProofFailed(format!("unexpected v_call result: {result}")))
    }

    async fn receipt(&self, hash: &str) -> Result<ReceiptState, AttestError> {
        let result = self
            .pool
            .request("v_getProofReceipt", json!({ "hash": hash }))
            .await?;

        if let Some(err) = result.get("error").filter(|e| !e.is_null()) {
            return Err(AttestError::ProofFailed(err.to_string()));
        }
        let state = result
            .get("state")
            .or_else(|| result.get("status"))
            .and_then(Value::as_str)
            .unwrap_or_default();
        match state {
            "done" | "ready" => result
                .get("data")
                .cloned()
                .map(ReceiptState::Done)
                .ok_or_else(|| AttestError::ProofFailed("receipt has no data".into())),
            "error" | "failed" => Err(AttestError::ProofFailed(result.to_string())),
            _ => Ok(ReceiptState::Pending),
        }
    }

    pub async fn wait_for_proof(&self, hash: &str) -> Result<ProvingResult, AttestError> {
        let started = Instant::now();
        loop {
            match self.receipt(hash).await {
                Ok(ReceiptState::Done(data)) => {
                    let proof = EmailProof::from_prover_result(&data)?;
                    info!(hash, "email proof ready");
                    return Ok(ProvingResult {
                        hash: hash.to_string(),
                        proof,
                        raw: data,
                    });
                }
                Ok(ReceiptState::Pending) => debug!(hash, "proof pending"),
                Err(AttestError::Rpc(e)) if e.is_transport() => {
                    warn!(hash, error = %e, "proof receipt poll failed");
                }
                Err(e) => return Err(e),
            }
            if started.elapsed() >= self.timeout {
                return Err(AttestError::Timeout(self.timeout.as_secs()));
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    pub async fn prove_and_wait(&self, email: &UnverifiedEmail) -> Result<ProvingResult, AttestError> {
        let hash = self.prove_email(email).await?;
        self.wait_for_proof(&hash).await
    }
}

/// Produces email proofs; the gateway and CLI depend on this rather than on
/// the hosted prover directly.
#[async_trait]
pub trait EmailProver: Send + Sync {
    async fn prove(&self, email: &UnverifiedEmail) -> Result<ProvingResult, AttestError>;
}

#[async_trait]
impl EmailProver for VlayerProver {
    async fn prove(&self, email: &UnverifiedEmail) -> Result<ProvingResult, AttestError> {
        self.prove_and_wait(email).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use alloy_sol_types::SolValue;
    use tick3t_chain::mock::MockRpcServer;

    const EMAIL: &str = "DKIM-Signature: v=1; a=rsa-sha256; d=example.com;\r\n s=sel1; h=from:to;\r\nFrom: a@example.com\r\n\r\nhello";

    fn sample_proof_json() -> Value {
        json!({
            "seal": {
                "verifierSelector": "0xdeafbeef",
                "seal": vec![format!("0x{}", "11".repeat(32)); 8],
                "mode": 1
            },
            "callGuestId": format!("0x{}", "22".repeat(32)),
            "length": 832,
            "callAssumptions": {
                "proverContractAddress": "0x38b00d0ba50f32f85883033f63b042750f33d057",
                "functionSelector": "0x12345678",
                "settleBlockNumber": "0x1234",
                "settleBlockHash": format!("0x{}", "33".repeat(32))
            }
        })
    }

    fn prover(url: String) -> VlayerProver {
        VlayerProver::new(
            &VlayerSettings {
                prover_url: url,
                prover_address: "0x38B00d0ba50f32f85883033F63B042750f33d057".parse().unwrap(),
            },
            84532,
        )
        .with_polling(Duration::from_millis(5), Duration::from_secs(5))
    }

    #[test]
    fn test_dkim_record_name() {
        let email = UnverifiedEmail::new(EMAIL, vec![]);
        assert_eq!(email.dkim_record_name().as_deref(), Some("sel1._domainkey.example.com"));
        assert!(UnverifiedEmail::new("From: x\r\n\r\nbody", vec![]).dkim_record_name().is_none());
    }

    #[test]
    fn test_proof_parsing_shapes() {
        let proof = EmailProof::from_prover_result(&sample_proof_json()).unwrap();
        assert_eq!(proof.length, U256::from(832));
        assert_eq!(proof.call_assumptions.settle_block_number, U256::from(0x1234));
        assert_eq!(proof.seal.mode, 1);

        let as_array = json!([sample_proof_json(), "0xreturnvalue"]);
        assert_eq!(EmailProof::from_prover_result(&as_array).unwrap(), proof);
        let wrapped = json!({"proof": sample_proof_json(), "evm_call_result": "0x"});
        assert_eq!(EmailProof::from_prover_result(&wrapped).unwrap(), proof);

        let mut bad = sample_proof_json();
        bad["seal"]["seal"] = json!(["0x11"]);
        assert!(matches!(
            EmailProof::from_prover_result(&bad),
            Err(AttestError::InvalidProof(_))
        ));
    }

    #[test]
    fn test_proof_encodes_as_static_struct() {
        let proof = EmailProof::from_prover_result(&sample_proof_json()).unwrap();
        let encoded = proof.to_sol().abi_encode();
        // 10 seal words, guest id, length, 4 assumption words
        assert_eq!(encoded.len(), 32 * 16);
        assert_eq!(&encoded[..4], &[0xde, 0xaf, 0xbe, 0xef]);
    }

    #[tokio::test]
    async fn test_prove_and_wait_polls_until_done() {
        let polls = Arc::new(AtomicUsize::new(0));
        let counter = polls.clone();
        let server = MockRpcServer::start(move |method, params| match method {
            "v_call" => Ok(json!("0xproofhash")),
            "v_getProofReceipt" => {
                assert_eq!(params["hash"], "0xproofhash");
                if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                    Ok(json!({"state": "pending", "status": 1}))
                } else {
                    Ok(json!({
                        "state": "done",
                        "status": 1,
                        "data": {"proof": sample_proof_json(), "evm_call_result": "0x"}
                    }))
                }
            }
            other => Err((-32601, format!("{other} not found"))),
        })
        .await;

        let email = UnverifiedEmail::new(EMAIL, vec!["v=DKIM1; k=rsa; p=AAAA".into()]);
        let result = prover(server.url()).prove_and_wait(&email).await.unwrap();
        assert_eq!(result.hash, "0xproofhash");
        assert_eq!(result.proof.length, U256::from(832));
        assert_eq!(polls.load(Ordering::SeqCst), 3);

        // calldata is main((string,string[])) with our email
        let call = &server.calls_to("v_call")[0];
        assert_eq!(call[1]["chain_id"], 84532);
        let data = hex::decode(call[0]["data"].as_str().unwrap().trim_start_matches("0x")).unwrap();
        assert_eq!(data[..4], IEmailProver::mainCall::SELECTOR);
        let decoded = IEmailProver::mainCall::abi_decode(&data).unwrap();
        assert_eq!(decoded.unverifiedEmail, email.to_sol());
    }

    #[tokio::test]
    async fn test_prover_error_is_terminal() {
        let server = MockRpcServer::start(|method, _| match method {
            "v_call" => Ok(json!({"hash": "0xh"})),
            _ => Ok(json!({"state": "error", "error": "invalid DKIM signature"})),
        })
        .await;
        let err = prover(server.url())
            .prove_and_wait(&UnverifiedEmail::new(EMAIL, vec![]))
            .await
            .unwrap_err();
        assert!(matches!(err, AttestError::ProofFailed(msg) if msg.contains("DKIM")));
    }

    #[tokio::test]
    async fn test_prover_rejects_call() {
        let server =
            MockRpcServer::start(|_, _| Err((-32000, "email too large".into()))).await;
        let err = prover(server.url())
            .prove_email(&UnverifiedEmail::new(EMAIL, vec![]))
            .await
            .unwrap_err();
        assert!(matches!(err, AttestError::Rpc(_)));
    }
}
