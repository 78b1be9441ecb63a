use async_trait::async_trait;
use k256::ecdsa::{RecoveryId, Signature, SigningKey, VerifyingKey};
use thiserror::Error;
use tick3t_common::{Address, SecretBytes, Tick3tError};

use alloy_primitives::{eip191_hash_message, keccak256};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SignerError {
    #[error("invalid private key: {0}")]
    InvalidPrivateKey(String),
    #[error("signing failed: {0}")]
    SigningFailed(String),
    #[error("signature request rejected: {0}")]
    Rejected(String),
    #[error("invalid signature: {0}")]
    InvalidSignature(String),
}

impl From<SignerError> for Tick3tError {
    fn from(err: SignerError) -> Self {
        match err {
            SignerError::InvalidPrivateKey(_) => Tick3tError::Config(err.to_string()),
            other => Tick3tError::Unknown(other.to_string()),
        }
    }
}

/// Signing capability handed out by the wallet session.
///
/// One signer is one owner address; smart accounts are bound to it 1:1.
#[async_trait]
pub trait WalletSigner: Send + Sync {
    fn address(&self) -> Address;

    /// EIP-191 personal-message signature, `r || s || v` with `v` in {27, 28}.
    async fn sign_message(&self, message: &[u8]) -> Result<[u8; 65], SignerError>;
}

/// `keccak256("\x19Ethereum Signed Message:\n" || len || message)`.
pub fn eip191_hash(message: &[u8]) -> [u8; 32] {
    eip191_hash_message(message).0
}

/// Address of an uncompressed secp256k1 public key.
pub fn public_key_address(key: &VerifyingKey) -> Address {
    let point = key.to_encoded_point(false);
    let hash = keccak256(&point.as_bytes()[1..]);
    let mut addr = [0u8; 20];
    addr.copy_from_slice(&hash[12..]);
    Address(addr)
}

/// Recover the signer of an EIP-191 signature.
pub fn recover_address(message: &[u8], signature: &[u8; 65]) -> Result<Address, SignerError> {
    let sig = Signature::from_slice(&signature[..64])
        .map_err(|e| SignerError::InvalidSignature(e.to_string()))?;
    let v = signature[64];
    let recid = RecoveryId::from_byte(v.wrapping_sub(27))
        .ok_or_else(|| SignerError::InvalidSignature(format!("bad recovery byte {v}")))?;
    let key = VerifyingKey::recover_from_prehash(&eip191_hash(message), &sig, recid)
        .map_err(|e| SignerError::InvalidSignature(e.to_string()))?;
    Ok(public_key_address(&key))
}

/// secp256k1 key held in memory. Used by the CLI and tests; browser wallets
/// plug in through [`WalletSigner`] instead.
pub struct LocalWalletSigner {
    key: SecretBytes,
    address: Address,
}

impl LocalWalletSigner {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, SignerError> {
        let signing_key = SigningKey::from_slice(bytes)
            .map_err(|e| SignerError::InvalidPrivateKey(e.to_string()))?;
        let address = public_key_address(signing_key.verifying_key());
        Ok(Self {
            key: SecretBytes(bytes.to_vec()),
            address,
        })
    }

    pub fn from_secret(key: &SecretBytes) -> Result<Self, SignerError> {
        Self::from_bytes(key.as_slice())
    }

    fn sign_hash(&self, hash: &[u8; 32]) -> Result<[u8; 65], SignerError> {
        let signing_key = SigningKey::from_slice(self.key.as_slice())
            .map_err(|e| SignerError::InvalidPrivateKey(e.to_string()))?;
        let (signature, recid) = signing_key
            .sign_prehash_recoverable(hash)
            .map_err(|e| SignerError::SigningFailed(e.to_string()))?;
        let mut out = [0u8; 65];
        out[..64].copy_from_slice(&signature.to_bytes());
        out[64] = 27 + recid.to_byte();
        Ok(out)
    }
}

impl std::fmt::Debug for LocalWalletSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalWalletSigner")
            .field("address", &self.address)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl WalletSigner for LocalWalletSigner {
    fn address(&self) -> Address {
        self.address
    }

    async fn sign_message(&self, message: &[u8]) -> Result<[u8; 65], SignerError> {
        self.sign_hash(&eip191_hash(message))
    }
}
