use thiserror::Error;
use tick3t_chain::RpcError;
use tick3t_common::Tick3tError;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AttestError {
    #[error("invalid access condition: {0}")]
    InvalidCondition(String),
    #[error("invalid amount: {0}")]
    Amount(String),
    #[error("HTTP error: {0}")]
    Http(String),
    #[error("gateway returned {status}: {message}")]
    Gateway { status: u16, message: String },
    #[error("prover RPC error: {0}")]
    Rpc(#[from] RpcError),
    #[error("proving failed: {0}")]
    ProofFailed(String),
    #[error("proving timed out after {0}s")]
    Timeout(u64),
    #[error("malformed proof: {0}")]
    InvalidProof(String),
    #[error("I/O error: {0}")]
    Io(String),
    #[error("invalid JSON: {0}")]
    Json(String),
}

impl From<std::io::Error> for AttestError {
    fn from(err: std::io::Error) -> Self {
        AttestError::Io(err.to_string())
    }
}

impl From<serde_json::Error> for AttestError {
    fn from(err: serde_json::Error) -> Self {
        AttestError::Json(err.to_string())
    }
}

impl From<AttestError> for Tick3tError {
    fn from(err: AttestError) -> Self {
        match err {
            AttestError::Http(_) => Tick3tError::ServiceUnavailable(err.to_string()),
            AttestError::Rpc(e) if e.is_transport() => Tick3tError::ServiceUnavailable(e.to_string()),
            AttestError::Gateway { status, .. } if status >= 500 => {
                Tick3tError::ServiceUnavailable(err.to_string())
            }
            other => Tick3tError::Unknown(other.to_string()),
        }
    }
}
