use std::fmt;
use std::str::FromStr;

use alloy_primitives::U256;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use zeroize::Zeroize;

use crate::error::Tick3tError;

/// 20-byte EVM account address.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Address(pub [u8; 20]);

impl Address {
    pub const ZERO: Address = Address([0u8; 20]);

    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        let arr: [u8; 20] = bytes.try_into().ok()?;
        Some(Self(arr))
    }

    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 20]
    }

    /// Matches `^0x[a-fA-F0-9]{40}$`.
    pub fn is_well_formed(s: &str) -> bool {
        s.len() == 42
            && s.starts_with("0x")
            && s[2..].bytes().all(|b| b.is_ascii_hexdigit())
    }
}

impl From<alloy_primitives::Address> for Address {
    fn from(addr: alloy_primitives::Address) -> Self {
        Self(addr.0 .0)
    }
}

impl From<Address> for alloy_primitives::Address {
    fn from(addr: Address) -> Self {
        alloy_primitives::Address::new(addr.0)
    }
}

impl FromStr for Address {
    type Err = Tick3tError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if !Self::is_well_formed(s) {
            return Err(Tick3tError::InvalidAccount(format!("malformed address: {s}")));
        }
        let bytes = hex::decode(&s[2..])
            .map_err(|e| Tick3tError::InvalidAccount(format!("malformed address: {e}")))?;
        Self::from_slice(&bytes)
            .ok_or_else(|| Tick3tError::InvalidAccount(format!("malformed address: {s}")))
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({self})")
    }
}

impl Serialize for Address {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// On-chain integers as decimal strings in JSON. Accepts decimal or
/// `0x`-prefixed hex on input.
pub mod decimal {
    use alloy_primitives::U256;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &U256, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(value)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<U256, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Snapshot of the on-chain event state returned by `getEventInfo()`.
///
/// Never mutated client-side; re-fetched wholesale.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventInfo {
    pub name: String,
    pub url: String,
    /// Unix seconds.
    pub time: u64,
    pub location: String,
    pub photo: String,
    #[serde(with = "decimal")]
    pub n_tickets: U256,
    #[serde(with = "decimal")]
    pub n_tickets_sold: U256,
    /// Ticket price in wei.
    #[serde(with = "decimal")]
    pub price: U256,
}

impl EventInfo {
    /// Remaining capacity. The contract enforces `n_tickets_sold <= n_tickets`;
    /// the subtraction still saturates so a misbehaving endpoint cannot wrap.
    pub fn available_tickets(&self) -> U256 {
        self.n_tickets.saturating_sub(self.n_tickets_sold)
    }

    pub fn is_sold_out(&self) -> bool {
        self.n_tickets_sold >= self.n_tickets
    }

    pub fn starts_at(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(i64::try_from(self.time).ok()?, 0)
    }
}

/// One minted ticket, as `getTicketInfo(tokenId)` reports it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TicketInfo {
    pub ticket_owner: Address,
    #[serde(with = "decimal")]
    pub ticket_number: U256,
    pub is_valid: bool,
}

/// Arguments of the event factory's `createEvent`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewEvent {
    pub name: String,
    pub url: String,
    /// Unix seconds.
    pub time: u64,
    pub location: String,
    pub photo: String,
    #[serde(with = "decimal")]
    pub n_tickets: U256,
    /// Ticket price in wei.
    #[serde(with = "decimal")]
    pub price: U256,
    /// Token metadata URI for the event's tickets.
    pub uri: String,
}

/// Number of events the factory lists as upcoming and past.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventCounts {
    #[serde(with = "decimal")]
    pub future: U256,
    #[serde(with = "decimal")]
    pub past: U256,
}

/// Outcome of exactly one purchase attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction_hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_op_hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Set when the outcome stands but something around it went wrong,
    /// e.g. the operation could not be journaled for resume.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
}

impl TransactionResult {
    pub fn confirmed(user_op_hash: impl Into<String>, transaction_hash: impl Into<String>) -> Self {
        Self {
            success: true,
            transaction_hash: Some(transaction_hash.into()),
            user_op_hash: Some(user_op_hash.into()),
            error: None,
            warning: None,
        }
    }

    pub fn failed(err: &Tick3tError) -> Self {
        Self {
            success: false,
            transaction_hash: None,
            user_op_hash: None,
            error: Some(err.to_string()),
            warning: None,
        }
    }

    pub fn with_warning(mut self, warning: impl Into<String>) -> Self {
        self.warning = Some(warning.into());
        self
    }

    /// Failure after the operation reached the bundler; the hash stays
    /// available for later lookup.
    pub fn failed_after_submit(user_op_hash: impl Into<String>, err: &Tick3tError) -> Self {
        Self {
            user_op_hash: Some(user_op_hash.into()),
            ..Self::failed(err)
        }
    }
}

/// Sensitive bytes that auto-zero on drop
#[derive(Clone, Zeroize)]
#[zeroize(drop)]
pub struct SecretBytes(pub Vec<u8>);

impl SecretBytes {
    pub fn as_slice(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for SecretBytes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SecretBytes([REDACTED; {} bytes])", self.0.len())
    }
}
