use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tick3t_chain::serde_hex::quantity;
use tick3t_chain::{EthClient, RpcError, RpcPool};
use tick3t_common::{Address, Tick3tError};
use tracing::{debug, info, warn};

use crate::user_op::UserOperation;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BundlerError {
    #[error("bundler unreachable: {0}")]
    Unavailable(String),
    #[error("bundler rejected user operation: {0}")]
    Rejected(String),
    #[error("unexpected bundler response: {0}")]
    InvalidResponse(String),
    #[error("no receipt for {user_op_hash} after {waited_secs}s")]
    ReceiptTimeout { user_op_hash: String, waited_secs: u64 },
    #[error("bundler does not support entry point {0}")]
    UnsupportedEntryPoint(Address),
}

impl From<RpcError> for BundlerError {
    fn from(err: RpcError) -> Self {
        match err {
            RpcError::JsonRpc { message, .. } => BundlerError::Rejected(message),
            other => BundlerError::Unavailable(other.to_string()),
        }
    }
}

impl From<BundlerError> for Tick3tError {
    fn from(err: BundlerError) -> Self {
        match err {
            BundlerError::Unavailable(_) | BundlerError::UnsupportedEntryPoint(_) => {
                Tick3tError::ServiceUnavailable(err.to_string())
            }
            other => Tick3tError::Unknown(other.to_string()),
        }
    }
}

/// Gas limits reported by `eth_estimateUserOperationGas`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GasEstimate {
    #[serde(with = "quantity")]
    pub call_gas_limit: u128,
    #[serde(with = "quantity")]
    pub verification_gas_limit: u128,
    #[serde(with = "quantity")]
    pub pre_verification_gas: u128,
}

/// Inclusion result of a user operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserOpReceipt {
    pub user_op_hash: String,
    pub success: bool,
    /// Revert reason when `success` is false.
    pub reason: Option<String>,
    /// Hash of the bundle transaction that included the operation.
    pub transaction_hash: String,
}

impl UserOpReceipt {
    fn from_json(value: &Value) -> Result<Self, BundlerError> {
        let field = |v: &Value, name: &str| v.get(name).and_then(Value::as_str).map(str::to_string);
        let transaction_hash = value
            .get("receipt")
            .and_then(|r| field(r, "transactionHash"))
            .ok_or_else(|| BundlerError::InvalidResponse("receipt without transactionHash".into()))?;
        Ok(Self {
            user_op_hash: field(value, "userOpHash").unwrap_or_default(),
            success: value.get("success").and_then(Value::as_bool).unwrap_or(false),
            reason: field(value, "reason").filter(|r| !r.is_empty()),
            transaction_hash,
        })
    }
}

/// ERC-4337 bundler RPC surface used by the smart account.
#[async_trait]
pub trait Bundler: Send + Sync {
    async fn supported_entry_points(&self) -> Result<Vec<Address>, BundlerError>;

    async fn estimate_gas(
        &self,
        op: &UserOperation,
        entry_point: &Address,
    ) -> Result<GasEstimate, BundlerError>;

    /// Returns the user operation hash.
    async fn send_user_operation(
        &self,
        op: &UserOperation,
        entry_point: &Address,
    ) -> Result<String, BundlerError>;

    /// `None` while the operation is not yet included.
    async fn get_user_operation_receipt(
        &self,
        user_op_hash: &str,
    ) -> Result<Option<UserOpReceipt>, BundlerError>;
}

/// Bundler reached over JSON-RPC.
pub struct RpcBundler {
    pool: Arc<RpcPool>,
}

impl RpcBundler {
    pub fn new(pool: Arc<RpcPool>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Bundler for RpcBundler {
    async fn supported_entry_points(&self) -> Result<Vec<Address>, BundlerError> {
        let result = self
            .pool
            .request("eth_supportedEntryPoints", json!([]))
            .await?;
        serde_json::from_value(result).map_err(|e| BundlerError::InvalidResponse(e.to_string()))
    }

    async fn estimate_gas(
        &self,
        op: &UserOperation,
        entry_point: &Address,
    ) -> Result<GasEstimate, BundlerError> {
        let result = self
            .pool
            .request("eth_estimateUserOperationGas", json!([op, entry_point]))
            .await?;
        serde_json::from_value(result).map_err(|e| BundlerError::InvalidResponse(e.to_string()))
    }

    async fn send_user_operation(
        &self,
        op: &UserOperation,
        entry_point: &Address,
    ) -> Result<String, BundlerError> {
        let result = self
            .pool
            .request("eth_sendUserOperation", json!([op, entry_point]))
            .await?;
        let hash = result
            .as_str()
            .ok_or_else(|| BundlerError::InvalidResponse("expected user operation hash".into()))?;
        info!(sender = %op.sender, user_op_hash = hash, "user operation submitted");
        Ok(hash.to_string())
    }

    async fn get_user_operation_receipt(
        &self,
        user_op_hash: &str,
    ) -> Result<Option<UserOpReceipt>, BundlerError> {
        let result = self
            .pool
            .request("eth_getUserOperationReceipt", json!([user_op_hash]))
            .await?;
        if result.is_null() {
            return Ok(None);
        }
        UserOpReceipt::from_json(&result).map(Some)
    }
}

/// Poll until the operation is included, or `timeout` elapses. Transport
/// failures while polling are logged and retried; rejections are returned.
pub async fn wait_for_receipt(
    bundler: &dyn Bundler,
    user_op_hash: &str,
    poll_interval: Duration,
    timeout: Duration,
) -> Result<UserOpReceipt, BundlerError> {
    let started = Instant::now();
    loop {
        match bundler.get_user_operation_receipt(user_op_hash).await {
            Ok(Some(receipt)) => return Ok(receipt),
            Ok(None) => debug!(user_op_hash, "receipt not yet available"),
            Err(BundlerError::Unavailable(e)) => {
                warn!(user_op_hash, error = %e, "receipt poll failed");
            }
            Err(e) => return Err(e),
        }
        if started.elapsed() >= timeout {
            return Err(BundlerError::ReceiptTimeout {
                user_op_hash: user_op_hash.to_string(),
                waited_secs: timeout.as_secs(),
            });
        }
        tokio::time::sleep(poll_interval).await;
    }
}

/// EIP-1559 fee estimation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeeEstimate {
    pub max_fee_per_gas: u128,
    pub max_priority_fee_per_gas: u128,
}

/// Gas/fee estimator with safety margins.
#[derive(Debug, Clone)]
pub struct FeeEstimator {
    /// Multiplier for the node's gas price, in basis points (15000 = 1.5x).
    pub gas_price_margin_bps: u64,
    /// Priority fee used when the node does not report one.
    pub default_priority_fee: u128,
    /// Gas limit margin in basis points.
    pub gas_margin_bps: u64,
}

impl Default for FeeEstimator {
    fn default() -> Self {
        Self {
            gas_price_margin_bps: 15000,         // 1.5x
            default_priority_fee: 1_500_000_000, // 1.5 gwei
            gas_margin_bps: 12000,               // 1.2x
        }
    }
}

impl FeeEstimator {
    pub fn new(gas_price_margin_bps: u64, default_priority_fee: u128, gas_margin_bps: u64) -> Self {
        Self {
            gas_price_margin_bps,
            default_priority_fee,
            gas_margin_bps,
        }
    }

    /// Fees from a current gas price and priority fee.
    pub fn estimate(&self, gas_price: u128, priority_fee: u128) -> FeeEstimate {
        let adjusted = gas_price.saturating_mul(self.gas_price_margin_bps as u128) / 10000;
        FeeEstimate {
            max_fee_per_gas: adjusted.max(priority_fee),
            max_priority_fee_per_gas: priority_fee,
        }
    }

    /// Query the node and apply margins.
    pub async fn fetch(&self, client: &dyn EthClient) -> Result<FeeEstimate, RpcError> {
        let gas_price = client.gas_price().await?;
        let priority_fee = match client.max_priority_fee_per_gas().await {
            Ok(fee) => fee,
            Err(e) => {
                debug!(error = %e, "eth_maxPriorityFeePerGas unavailable, using default");
                self.default_priority_fee
            }
        };
        Ok(self.estimate(gas_price, priority_fee))
    }

    /// Apply gas margin to an estimated gas value.
    pub fn adjust_gas(&self, estimated_gas: u128) -> u128 {
        estimated_gas.saturating_mul(self.gas_margin_bps as u128) / 10000
    }
}
