//! Clients for the external attestation services: Lit conditional
//! encryption and vlayer email proofs. Both do their cryptography remotely;
//! this crate only shapes requests and parses results.

pub mod error;
pub mod lit;
pub mod vlayer;

pub use error::AttestError;
pub use lit::{
    AccessControlCondition, ConditionKind, ConditionalEncryption, EncryptedPayload,
    LitGatewayClient, ReturnValueTest,
};
pub use vlayer::{
    CallAssumptions, EmailProof, EmailProver, ProvingResult, Seal, UnverifiedEmail, VlayerProver,
};
