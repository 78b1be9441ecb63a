pub mod chains;
pub mod contracts;
pub mod factory;
#[cfg(any(test, feature = "test-util"))]
pub mod mock;
pub mod reader;
pub mod rpc;
pub mod serde_hex;
pub mod signer;

// Re-exports for convenience
pub use alloy_primitives::utils::{format_ether, parse_ether, UnitsError};
pub use alloy_primitives::U256;
pub use chains::{ChainConfig, ChainRegistry};
pub use factory::FactoryReader;
pub use reader::{EventReader, EventSource, RefreshHandle, RefreshTask};
pub use rpc::{EthClient, EvmRpcClient, RpcError, RpcPool};
pub use signer::{LocalWalletSigner, SignerError, WalletSigner};
