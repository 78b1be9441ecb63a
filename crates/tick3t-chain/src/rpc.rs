use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};
use thiserror::Error;
use tick3t_common::{Address, Tick3tError};
use tracing::{debug, warn};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RpcError {
    #[error("all RPC endpoints failed for chain {chain_id}")]
    AllEndpointsFailed { chain_id: u64 },
    #[error("HTTP error: {0}")]
    Http(String),
    #[error("JSON-RPC error {code}: {message}")]
    JsonRpc { code: i64, message: String },
    #[error("deserialization error: {0}")]
    Deserialize(String),
    #[error("no endpoints configured for chain {0}")]
    NoEndpoints(u64),
}

impl RpcError {
    /// True when the endpoint could not be reached or answered garbage,
    /// as opposed to a well-formed JSON-RPC error.
    pub fn is_transport(&self) -> bool {
        !matches!(self, RpcError::JsonRpc { .. })
    }
}

impl From<RpcError> for Tick3tError {
    fn from(err: RpcError) -> Self {
        match err {
            RpcError::JsonRpc { .. } => Tick3tError::Unknown(err.to_string()),
            other => Tick3tError::ServiceUnavailable(other.to_string()),
        }
    }
}

/// A raw JSON-RPC request.
#[derive(Debug, Serialize)]
pub struct JsonRpcRequest<'a> {
    pub jsonrpc: &'static str,
    pub method: &'a str,
    pub params: &'a serde_json::Value,
    pub id: u64,
}

/// A raw JSON-RPC response.
#[derive(Debug, Deserialize)]
pub struct JsonRpcResponse {
    #[serde(default)]
    pub result: Option<serde_json::Value>,
    #[serde(default)]
    pub error: Option<JsonRpcError>,
}

#[derive(Debug, Deserialize)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
}

/// Consecutive transport failures before an endpoint is tried last.
const DEMOTE_AFTER: u32 = 3;
/// How long a demoted endpoint stays at the back of the queue.
const DEMOTION_WINDOW: Duration = Duration::from_secs(30);

/// One upstream URL and its recent transport record.
#[derive(Debug, Clone)]
struct Endpoint {
    url: String,
    consecutive_failures: u32,
    failed_at: Option<Instant>,
}

impl Endpoint {
    fn new(url: String) -> Self {
        Self {
            url,
            consecutive_failures: 0,
            failed_at: None,
        }
    }

    fn demoted(&self) -> bool {
        self.consecutive_failures >= DEMOTE_AFTER
            && self.failed_at.is_some_and(|at| at.elapsed() <= DEMOTION_WINDOW)
    }

    fn observe(&mut self, reachable: bool) {
        if reachable {
            self.consecutive_failures = 0;
        } else {
            self.consecutive_failures += 1;
            self.failed_at = Some(Instant::now());
        }
    }
}

/// Outcome of a single POST to one endpoint.
enum Attempt {
    /// The endpoint answered with a JSON-RPC envelope (result or error).
    Answered(Result<serde_json::Value, RpcError>),
    /// The endpoint could not be used; try the next one.
    Unreachable(RpcError),
}

/// JSON-RPC client over an ordered set of interchangeable endpoints.
///
/// Used for the chain node as well as the bundler and paymaster, which all
/// speak JSON-RPC 2.0 over HTTP.
pub struct RpcPool {
    chain_id: u64,
    endpoints: Arc<RwLock<Vec<Endpoint>>>,
    http: reqwest::Client,
    request_id: AtomicU64,
}

impl RpcPool {
    pub fn new(chain_id: u64, urls: Vec<String>) -> Self {
        Self::with_timeout(chain_id, urls, Duration::from_secs(15))
    }

    pub fn with_timeout(chain_id: u64, urls: Vec<String>, timeout: Duration) -> Self {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            chain_id,
            endpoints: Arc::new(RwLock::new(urls.into_iter().map(Endpoint::new).collect())),
            http,
            request_id: AtomicU64::new(1),
        }
    }

    pub fn chain_id(&self) -> u64 {
        self.chain_id
    }

    /// Endpoint indices and URLs, demoted endpoints last.
    fn attempt_order(&self) -> Vec<(usize, String)> {
        let eps = self.endpoints.read().unwrap_or_else(|e| e.into_inner());
        let (fresh, demoted): (Vec<_>, Vec<_>) =
            eps.iter().enumerate().partition(|(_, ep)| !ep.demoted());
        fresh
            .into_iter()
            .chain(demoted)
            .map(|(idx, ep)| (idx, ep.url.clone()))
            .collect()
    }

    fn observe(&self, idx: usize, reachable: bool) {
        let mut eps = self.endpoints.write().unwrap_or_else(|e| e.into_inner());
        if let Some(ep) = eps.get_mut(idx) {
            ep.observe(reachable);
        }
    }

    async fn post(&self, url: &str, body: &str) -> Attempt {
        let resp = match self
            .http
            .post(url)
            .header("Content-Type", "application/json")
            .body(body.to_owned())
            .send()
            .await
        {
            Ok(resp) if resp.status().is_success() => resp,
            Ok(resp) => return Attempt::Unreachable(RpcError::Http(format!("HTTP {}", resp.status()))),
            Err(e) => return Attempt::Unreachable(RpcError::Http(e.to_string())),
        };
        match resp.json::<JsonRpcResponse>().await {
            Ok(JsonRpcResponse { error: Some(err), .. }) => Attempt::Answered(Err(RpcError::JsonRpc {
                code: err.code,
                message: err.message,
            })),
            Ok(JsonRpcResponse { result, .. }) => {
                Attempt::Answered(Ok(result.unwrap_or(serde_json::Value::Null)))
            }
            Err(e) => Attempt::Unreachable(RpcError::Deserialize(e.to_string())),
        }
    }

    /// Sends `method` to each endpoint in turn until one answers.
    ///
    /// A JSON-RPC error is an answer and is returned as-is; only transport
    /// and decoding failures move on to the next endpoint.
    pub async fn request(
        &self,
        method: &str,
        params: serde_json::Value,
    ) -> Result<serde_json::Value, RpcError> {
        let order = self.attempt_order();
        if order.is_empty() {
            return Err(RpcError::NoEndpoints(self.chain_id));
        }

        let body = serde_json::to_string(&JsonRpcRequest {
            jsonrpc: "2.0",
            method,
            params: &params,
            id: self.request_id.fetch_add(1, Ordering::Relaxed),
        })
        .map_err(|e| RpcError::Deserialize(e.to_string()))?;

        let mut last_err = None;
        for (idx, url) in order {
            debug!(chain_id = self.chain_id, %url, method, "rpc call");
            match self.post(&url, &body).await {
                Attempt::Answered(outcome) => {
                    self.observe(idx, true);
                    if let Err(RpcError::JsonRpc { code, .. }) = &outcome {
                        debug!(chain_id = self.chain_id, method, code, "rpc error response");
                    }
                    return outcome;
                }
                Attempt::Unreachable(err) => {
                    warn!(chain_id = self.chain_id, %url, method, error = %err, "endpoint unusable");
                    self.observe(idx, false);
                    last_err = Some(err);
                }
            }
        }

        Err(last_err.unwrap_or(RpcError::AllEndpointsFailed {
            chain_id: self.chain_id,
        }))
    }
}

/// Read-side view of an EVM node, as needed by the read client and the
/// smart account factory.
#[async_trait]
pub trait EthClient: Send + Sync {
    fn chain_id(&self) -> u64;

    /// `eth_call` against the latest block.
    async fn call(&self, to: &Address, data: &[u8]) -> Result<Vec<u8>, RpcError>;

    /// `eth_getCode`; empty when nothing is deployed at `address`.
    async fn get_code(&self, address: &Address) -> Result<Vec<u8>, RpcError>;

    async fn gas_price(&self) -> Result<u128, RpcError>;

    async fn max_priority_fee_per_gas(&self) -> Result<u128, RpcError>;
}

/// EVM JSON-RPC client built on top of RpcPool.
pub struct EvmRpcClient {
    pool: Arc<RpcPool>,
}

impl EvmRpcClient {
    pub fn new(pool: Arc<RpcPool>) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &Arc<RpcPool> {
        &self.pool
    }

    async fn quantity(&self, method: &str) -> Result<u128, RpcError> {
        let result = self.pool.request(method, serde_json::json!([])).await?;
        let s = result
            .as_str()
            .ok_or_else(|| RpcError::Deserialize(format!("{method}: expected hex quantity")))?;
        parse_quantity(s)
    }
}

#[async_trait]
impl EthClient for EvmRpcClient {
    fn chain_id(&self) -> u64 {
        self.pool.chain_id
    }

    async fn call(&self, to: &Address, data: &[u8]) -> Result<Vec<u8>, RpcError> {
        let result = self
            .pool
            .request(
                "eth_call",
                serde_json::json!([{"to": to, "data": bytes_to_hex(data)}, "latest"]),
            )
            .await?;
        let s = result
            .as_str()
            .ok_or_else(|| RpcError::Deserialize("expected string call result".into()))?;
        hex_to_bytes(s)
    }

    async fn get_code(&self, address: &Address) -> Result<Vec<u8>, RpcError> {
        let result = self
            .pool
            .request("eth_getCode", serde_json::json!([address, "latest"]))
            .await?;
        let s = result
            .as_str()
            .ok_or_else(|| RpcError::Deserialize("expected string code".into()))?;
        hex_to_bytes(s)
    }

    async fn gas_price(&self) -> Result<u128, RpcError> {
        self.quantity("eth_gasPrice").await
    }

    async fn max_priority_fee_per_gas(&self) -> Result<u128, RpcError> {
        self.quantity("eth_maxPriorityFeePerGas").await
    }
}

/// `0x`-prefixed lowercase hex.
pub fn bytes_to_hex(bytes: &[u8]) -> String {
    format!("0x{}", hex::encode(bytes))
}

pub fn hex_to_bytes(s: &str) -> Result<Vec<u8>, RpcError> {
    let raw = s.strip_prefix("0x").unwrap_or(s);
    hex::decode(raw).map_err(|e| RpcError::Deserialize(format!("invalid hex data: {e}")))
}

/// Hex quantity (`0x1a`) to integer.
pub fn parse_quantity(s: &str) -> Result<u128, RpcError> {
    let raw = s.strip_prefix("0x").unwrap_or(s);
    if raw.is_empty() {
        return Ok(0);
    }
    u128::from_str_radix(raw, 16)
        .map_err(|e| RpcError::Deserialize(format!("invalid hex quantity {s}: {e}")))
}

/// Integer to minimal hex quantity.
pub fn to_quantity(value: u128) -> String {
    format!("{value:#x}")
}
