use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;
use thiserror::Error;
use tick3t_chain::rpc::hex_to_bytes;
use tick3t_chain::serde_hex::quantity;
use tick3t_chain::{RpcError, RpcPool};
use tick3t_common::Tick3tError;
use tracing::{info, warn};

use crate::user_op::UserOperation;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PaymasterError {
    #[error("{0}")]
    Denied(String),
    #[error("paymaster unreachable: {0}")]
    Unavailable(String),
    #[error("unexpected paymaster response: {0}")]
    InvalidResponse(String),
}

impl From<RpcError> for PaymasterError {
    fn from(err: RpcError) -> Self {
        match err {
            RpcError::JsonRpc { message, .. } => PaymasterError::Denied(message),
            other => PaymasterError::Unavailable(other.to_string()),
        }
    }
}

impl From<PaymasterError> for Tick3tError {
    fn from(err: PaymasterError) -> Self {
        match err {
            PaymasterError::Denied(reason) => Tick3tError::SponsorshipDenied(reason),
            PaymasterError::Unavailable(e) => Tick3tError::ServiceUnavailable(e),
            other => Tick3tError::Unknown(other.to_string()),
        }
    }
}

/// Paymaster commitment to cover an operation's gas.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Sponsorship {
    pub paymaster_and_data: Vec<u8>,
    /// Gas limits recomputed by the paymaster, if it returned any.
    pub call_gas_limit: Option<u128>,
    pub verification_gas_limit: Option<u128>,
    pub pre_verification_gas: Option<u128>,
}

impl Sponsorship {
    pub fn apply(&self, op: &mut UserOperation) {
        op.paymaster_and_data = self.paymaster_and_data.clone();
        if let Some(gas) = self.call_gas_limit {
            op.call_gas_limit = gas;
        }
        if let Some(gas) = self.verification_gas_limit {
            op.verification_gas_limit = gas;
        }
        if let Some(gas) = self.pre_verification_gas {
            op.pre_verification_gas = gas;
        }
    }

    fn from_json(value: &Value) -> Result<Self, PaymasterError> {
        let data = value
            .get("paymasterAndData")
            .and_then(Value::as_str)
            .ok_or_else(|| PaymasterError::InvalidResponse("missing paymasterAndData".into()))?;
        let paymaster_and_data =
            hex_to_bytes(data).map_err(|e| PaymasterError::InvalidResponse(e.to_string()))?;
        if paymaster_and_data.is_empty() {
            return Err(PaymasterError::Denied("paymaster returned no sponsorship".into()));
        }
        Ok(Self {
            paymaster_and_data,
            call_gas_limit: optional_quantity(value, "callGasLimit")?,
            verification_gas_limit: optional_quantity(value, "verificationGasLimit")?,
            pre_verification_gas: optional_quantity(value, "preVerificationGas")?,
        })
    }
}

fn optional_quantity(value: &Value, field: &str) -> Result<Option<u128>, PaymasterError> {
    match value.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => n
            .as_u64()
            .map(|n| Some(u128::from(n)))
            .ok_or_else(|| PaymasterError::InvalidResponse(format!("{field}: {n}"))),
        Some(Value::String(s)) => quantity::parse(s)
            .map(Some)
            .map_err(PaymasterError::InvalidResponse),
        Some(other) => Err(PaymasterError::InvalidResponse(format!("{field}: {other}"))),
    }
}

/// Gas sponsorship service.
#[async_trait]
pub trait Paymaster: Send + Sync {
    /// Ask the paymaster to cover `op`. A refusal is [`PaymasterError::Denied`].
    async fn sponsor(&self, op: &UserOperation) -> Result<Sponsorship, PaymasterError>;
}

/// Paymaster speaking `pm_sponsorUserOperation` in sponsored mode.
pub struct RpcPaymaster {
    pool: Arc<RpcPool>,
}

impl RpcPaymaster {
    pub fn new(pool: Arc<RpcPool>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Paymaster for RpcPaymaster {
    async fn sponsor(&self, op: &UserOperation) -> Result<Sponsorship, PaymasterError> {
        let params = json!([op, { "mode": "SPONSORED", "calculateGasLimits": true }]);
        let result = self
            .pool
            .request("pm_sponsorUserOperation", params)
            .await
            .map_err(PaymasterError::from)
            .inspect_err(|e| warn!(sender = %op.sender, error = %e, "sponsorship request failed"))?;
        let sponsorship = Sponsorship::from_json(&result)?;
        info!(sender = %op.sender, "user operation sponsored");
        Ok(sponsorship)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::user_op::tests::sample_op;
    use tick3t_chain::mock::MockRpcServer;

    fn paymaster(url: String) -> RpcPaymaster {
        RpcPaymaster::new(Arc::new(RpcPool::new(84532, vec![url])))
    }

    #[tokio::test]
    async fn test_sponsor_applies_paymaster_data_and_gas() {
        let server = MockRpcServer::fixed(json!({
            "paymasterAndData": "0x00000f79b7faf42eebadba19acc07cd08af44789",
            "callGasLimit": "0x30d40",
            "verificationGasLimit": 90000,
            "preVerificationGas": null
        }))
        .await;
        let pm = paymaster(server.url());
        let mut op = sample_op();
        let sponsorship = pm.sponsor(&op).await.unwrap();
        sponsorship.apply(&mut op);

        assert!(op.is_sponsored());
        assert_eq!(op.paymaster_and_data.len(), 20);
        assert_eq!(op.call_gas_limit, 200_000);
        assert_eq!(op.verification_gas_limit, 90_000);
        assert_eq!(op.pre_verification_gas, 21_000);

        let sent = server.calls_to("pm_sponsorUserOperation");
        assert_eq!(sent[0][1]["mode"], "SPONSORED");
        assert_eq!(sent[0][1]["calculateGasLimits"], true);
    }

    #[tokio::test]
    async fn test_policy_rejection_is_denied() {
        let server = MockRpcServer::start(|_, _| {
            Err((-32602, "sender not whitelisted by sponsorship policy".into()))
        })
        .await;
        let err = paymaster(server.url()).sponsor(&sample_op()).await.unwrap_err();
        assert!(matches!(
            Tick3tError::from(err),
            Tick3tError::SponsorshipDenied(reason) if reason.contains("whitelisted")
        ));
    }

    #[tokio::test]
    async fn test_empty_paymaster_data_is_denied() {
        let server = MockRpcServer::fixed(json!({ "paymasterAndData": "0x" })).await;
        let err = paymaster(server.url()).sponsor(&sample_op()).await.unwrap_err();
        assert!(matches!(err, PaymasterError::Denied(_)));
    }

    #[tokio::test]
    async fn test_unreachable_paymaster() {
        let err = paymaster(MockRpcServer::dead_url().await)
            .sponsor(&sample_op())
            .await
            .unwrap_err();
        assert!(matches!(
            Tick3tError::from(err),
            Tick3tError::ServiceUnavailable(_)
        ));
    }

    #[test]
    fn test_missing_field_is_invalid() {
        assert!(matches!(
            Sponsorship::from_json(&json!({})),
            Err(PaymasterError::InvalidResponse(_))
        ));
    }
}
