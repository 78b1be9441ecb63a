use std::collections::HashMap;
use std::path::PathBuf;

use thiserror::Error;

use crate::error::Tick3tError;
use crate::types::{Address, SecretBytes};

/// ERC-4337 EntryPoint v0.6.
pub const DEFAULT_ENTRY_POINT: &str = "0x5FF137D4b0FDCD49DcA30c7CF57E578a026d2789";
/// SimpleAccountFactory deployed against EntryPoint v0.6.
pub const DEFAULT_ACCOUNT_FACTORY: &str = "0x9406Cc6185a346906296840746125a0E44976454";
/// Event factory on Base Sepolia.
pub const DEFAULT_EVENT_FACTORY: &str = "0x439AEfC24D2BD67470891B5AAc2663ba0d148cf1";
/// Base Sepolia.
pub const DEFAULT_CHAIN_ID: u64 = 84532;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("missing required configuration: {0}")]
    Missing(&'static str),
    #[error("invalid configuration {name}: {reason}")]
    Invalid { name: &'static str, reason: String },
}

impl From<ConfigError> for Tick3tError {
    fn from(err: ConfigError) -> Self {
        Tick3tError::Config(err.to_string())
    }
}

/// Where configuration values come from. The process environment in
/// binaries, a plain map in tests.
pub trait EnvSource {
    fn get(&self, key: &str) -> Option<String>;
}

pub struct ProcessEnv;

impl EnvSource for ProcessEnv {
    fn get(&self, key: &str) -> Option<String> {
        std::env::var(key).ok()
    }
}

impl EnvSource for HashMap<String, String> {
    fn get(&self, key: &str) -> Option<String> {
        HashMap::get(self, key).cloned()
    }
}

fn optional(src: &dyn EnvSource, name: &'static str) -> Option<String> {
    src.get(name)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn required(src: &dyn EnvSource, name: &'static str) -> Result<String, ConfigError> {
    optional(src, name).ok_or(ConfigError::Missing(name))
}

fn parse_address(name: &'static str, value: &str) -> Result<Address, ConfigError> {
    value.parse().map_err(|e: Tick3tError| ConfigError::Invalid {
        name,
        reason: e.to_string(),
    })
}

fn parse_u64(name: &'static str, value: &str) -> Result<u64, ConfigError> {
    value.parse().map_err(|e: std::num::ParseIntError| ConfigError::Invalid {
        name,
        reason: e.to_string(),
    })
}

/// Chain read endpoint, the ticketing contract and the factory that
/// deploys ticketing contracts.
#[derive(Debug, Clone)]
pub struct ChainSettings {
    pub rpc_urls: Vec<String>,
    pub chain_id: u64,
    pub contract_address: Address,
    pub event_factory: Address,
}

impl ChainSettings {
    pub fn from_source(src: &dyn EnvSource) -> Result<Self, ConfigError> {
        let rpc_urls: Vec<String> = required(src, "TICK3T_RPC_URL")?
            .split(',')
            .map(|u| u.trim().to_string())
            .filter(|u| !u.is_empty())
            .collect();
        if rpc_urls.is_empty() {
            return Err(ConfigError::Missing("TICK3T_RPC_URL"));
        }
        let chain_id = match optional(src, "TICK3T_CHAIN_ID") {
            Some(v) => parse_u64("TICK3T_CHAIN_ID", &v)?,
            None => DEFAULT_CHAIN_ID,
        };
        let contract_address = parse_address(
            "TICK3T_CONTRACT_ADDRESS",
            &required(src, "TICK3T_CONTRACT_ADDRESS")?,
        )?;
        let event_factory = parse_address(
            "TICK3T_EVENT_FACTORY",
            &optional(src, "TICK3T_EVENT_FACTORY").unwrap_or_else(|| DEFAULT_EVENT_FACTORY.into()),
        )?;
        Ok(Self {
            rpc_urls,
            chain_id,
            contract_address,
            event_factory,
        })
    }
}

/// Bundler/paymaster endpoints and smart-account parameters.
#[derive(Debug, Clone)]
pub struct AccountSettings {
    /// Wallet connector environment the signer session belongs to.
    pub environment_id: String,
    pub bundler_url: String,
    pub paymaster_url: String,
    pub entry_point: Address,
    pub account_factory: Address,
    pub salt: u64,
    pub owner_private_key: Option<SecretBytes>,
    pub journal_path: PathBuf,
}

impl AccountSettings {
    pub fn from_source(src: &dyn EnvSource) -> Result<Self, ConfigError> {
        let entry_point = parse_address(
            "TICK3T_ENTRY_POINT",
            &optional(src, "TICK3T_ENTRY_POINT").unwrap_or_else(|| DEFAULT_ENTRY_POINT.into()),
        )?;
        let account_factory = parse_address(
            "TICK3T_ACCOUNT_FACTORY",
            &optional(src, "TICK3T_ACCOUNT_FACTORY")
                .unwrap_or_else(|| DEFAULT_ACCOUNT_FACTORY.into()),
        )?;
        let salt = match optional(src, "TICK3T_ACCOUNT_SALT") {
            Some(v) => parse_u64("TICK3T_ACCOUNT_SALT", &v)?,
            None => 0,
        };
        let owner_private_key = match optional(src, "TICK3T_OWNER_PRIVATE_KEY") {
            Some(hex_key) => {
                let bytes = hex::decode(hex_key.trim_start_matches("0x")).map_err(|e| {
                    ConfigError::Invalid {
                        name: "TICK3T_OWNER_PRIVATE_KEY",
                        reason: e.to_string(),
                    }
                })?;
                if bytes.len() != 32 {
                    return Err(ConfigError::Invalid {
                        name: "TICK3T_OWNER_PRIVATE_KEY",
                        reason: format!("expected 32 bytes, got {}", bytes.len()),
                    });
                }
                Some(SecretBytes(bytes))
            }
            None => None,
        };
        Ok(Self {
            environment_id: required(src, "TICK3T_ENVIRONMENT_ID")?,
            bundler_url: required(src, "TICK3T_BUNDLER_URL")?,
            paymaster_url: required(src, "TICK3T_PAYMASTER_URL")?,
            entry_point,
            account_factory,
            salt,
            owner_private_key,
            journal_path: optional(src, "TICK3T_JOURNAL_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(".tick3t/operations.json")),
        })
    }
}

#[derive(Debug, Clone)]
pub struct TelegramSettings {
    pub bot_token: String,
    pub login_url: String,
}

impl TelegramSettings {
    pub fn from_source(src: &dyn EnvSource) -> Result<Self, ConfigError> {
        Ok(Self {
            bot_token: required(src, "TELEGRAM_BOT_TOKEN")?,
            login_url: required(src, "LOGIN_URL")?,
        })
    }
}

#[derive(Debug, Clone)]
pub struct LitSettings {
    pub network: String,
    pub gateway_url: String,
}

impl LitSettings {
    pub fn from_source(src: &dyn EnvSource) -> Result<Self, ConfigError> {
        Ok(Self {
            network: required(src, "LIT_NETWORK")?,
            gateway_url: optional(src, "LIT_GATEWAY_URL")
                .unwrap_or_else(|| "http://127.0.0.1:7700".into()),
        })
    }
}

#[derive(Debug, Clone)]
pub struct VlayerSettings {
    pub prover_url: String,
    pub prover_address: Address,
}

impl VlayerSettings {
    pub fn from_source(src: &dyn EnvSource) -> Result<Self, ConfigError> {
        Ok(Self {
            prover_url: required(src, "VLAYER_PROVER_URL")?,
            prover_address: parse_address(
                "VLAYER_PROVER_ADDRESS",
                &required(src, "VLAYER_PROVER_ADDRESS")?,
            )?,
        })
    }
}

#[derive(Debug, Clone)]
pub struct GatewaySettings {
    pub bind_addr: String,
    pub data_dir: PathBuf,
}

impl GatewaySettings {
    pub fn from_source(src: &dyn EnvSource) -> Result<Self, ConfigError> {
        Ok(Self {
            bind_addr: optional(src, "TICK3T_BIND_ADDR").unwrap_or_else(|| "0.0.0.0:8000".into()),
            data_dir: optional(src, "TICK3T_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("data")),
        })
    }
}

/// Full configuration. Every required value must be present.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub chain: ChainSettings,
    pub account: AccountSettings,
    pub telegram: TelegramSettings,
    pub lit: LitSettings,
    pub vlayer: VlayerSettings,
    pub gateway: GatewaySettings,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_source(&ProcessEnv)
    }

    pub fn from_source(src: &dyn EnvSource) -> Result<Self, ConfigError> {
        Ok(Self {
            chain: ChainSettings::from_source(src)?,
            account: AccountSettings::from_source(src)?,
            telegram: TelegramSettings::from_source(src)?,
            lit: LitSettings::from_source(src)?,
            vlayer: VlayerSettings::from_source(src)?,
            gateway: GatewaySettings::from_source(src)?,
        })
    }
}
