use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// Configuration for a single EVM network.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChainConfig {
    pub chain_id: u64,
    pub name: String,
    /// Identifier the Lit network uses for this chain in access conditions.
    pub lit_chain: String,
    pub block_explorer: Option<String>,
    pub is_testnet: bool,
}

impl ChainConfig {
    /// Entry for a chain id the registry does not know.
    pub fn custom(chain_id: u64) -> Self {
        Self {
            chain_id,
            name: format!("chain-{chain_id}"),
            lit_chain: format!("chain-{chain_id}"),
            block_explorer: None,
            is_testnet: true,
        }
    }

    pub fn tx_url(&self, tx_hash: &str) -> Option<String> {
        self.block_explorer
            .as_ref()
            .map(|base| format!("{base}/tx/{tx_hash}"))
    }
}

/// Thread-safe chain registry with pre-configured and custom chains.
#[derive(Clone)]
pub struct ChainRegistry {
    chains: Arc<RwLock<HashMap<u64, ChainConfig>>>,
}

impl ChainRegistry {
    /// Create a new registry pre-loaded with well-known chains.
    pub fn new() -> Self {
        let map = Self::default_chains()
            .into_iter()
            .map(|c| (c.chain_id, c))
            .collect();
        Self {
            chains: Arc::new(RwLock::new(map)),
        }
    }

    /// Known config, or a custom entry for unknown ids.
    pub fn get_chain(&self, chain_id: u64) -> ChainConfig {
        self.chains
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&chain_id)
            .cloned()
            .unwrap_or_else(|| ChainConfig::custom(chain_id))
    }

    pub fn is_known(&self, chain_id: u64) -> bool {
        self.chains
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(&chain_id)
    }

    /// Register or replace a chain.
    pub fn add_chain(&self, config: ChainConfig) {
        self.chains
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(config.chain_id, config);
    }

    fn default_chains() -> Vec<ChainConfig> {
        vec![
            ChainConfig {
                chain_id: 1,
                name: "Ethereum".into(),
                lit_chain: "ethereum".into(),
                block_explorer: Some("https://etherscan.io".into()),
                is_testnet: false,
            },
            ChainConfig {
                chain_id: 8453,
                name: "Base".into(),
                lit_chain: "base".into(),
                block_explorer: Some("https://basescan.org".into()),
                is_testnet: false,
            },
            ChainConfig {
                chain_id: 84532,
                name: "Base Sepolia".into(),
                lit_chain: "baseSepolia".into(),
                block_explorer: Some("https://sepolia.basescan.org".into()),
                is_testnet: true,
            },
        ]
    }
}

impl Default for ChainRegistry {
    fn default() -> Self {
        Self::new()
    }
}
