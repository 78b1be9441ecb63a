//! Serde helpers for the hex encodings JSON-RPC services use.

use serde::de::{self, Deserializer};
use serde::{Deserialize, Serializer};

/// `0x`-prefixed byte string.
pub mod bytes {
    use super::*;

    pub fn serialize<S: Serializer>(value: &[u8], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&format!("0x{}", hex::encode(value)))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(d)?;
        hex::decode(s.strip_prefix("0x").unwrap_or(&s)).map_err(de::Error::custom)
    }
}

/// Integer as a hex quantity. Deserialises hex strings, decimal strings and
/// JSON numbers, since services disagree.
pub mod quantity {
    use super::*;

    pub fn serialize<S: Serializer>(value: &u128, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&format!("{value:#x}"))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<u128, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Str(String),
            Num(u64),
        }
        match Raw::deserialize(d)? {
            Raw::Num(n) => Ok(u128::from(n)),
            Raw::Str(s) => parse(&s).map_err(de::Error::custom),
        }
    }

    pub fn parse(s: &str) -> Result<u128, String> {
        match s.strip_prefix("0x") {
            Some("") => Ok(0),
            Some(hex) => u128::from_str_radix(hex, 16).map_err(|e| format!("{s}: {e}")),
            None => s.parse().map_err(|e| format!("{s}: {e}")),
        }
    }
}

/// [`U256`] as a hex quantity, with the same leniency as [`quantity`].
pub mod u256 {
    use super::*;
    use alloy_primitives::U256;
    use std::str::FromStr;

    pub fn serialize<S: Serializer>(value: &U256, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&format!("0x{value:x}"))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<U256, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Str(String),
            Num(u64),
        }
        match Raw::deserialize(d)? {
            Raw::Num(n) => Ok(U256::from(n)),
            Raw::Str(s) if s == "0x" => Ok(U256::ZERO),
            Raw::Str(s) => U256::from_str(&s).map_err(|e| de::Error::custom(format!("{s}: {e}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::{FixedBytes, U256};
    use serde::Serialize;
    use serde_json::json;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Sample {
        #[serde(with = "bytes")]
        data: Vec<u8>,
        #[serde(with = "quantity")]
        gas: u128,
        #[serde(with = "u256")]
        nonce: U256,
        selector: FixedBytes<4>,
    }

    #[test]
    fn test_serialize_shape() {
        let sample = Sample {
            data: vec![0xde, 0xad],
            gas: 21_000,
            nonce: U256::ZERO,
            selector: FixedBytes([0xa9, 0x05, 0x9c, 0xbb]),
        };
        assert_eq!(
            serde_json::to_value(&sample).unwrap(),
            json!({"data": "0xdead", "gas": "0x5208", "nonce": "0x0", "selector": "0xa9059cbb"})
        );
    }

    #[test]
    fn test_quantity_accepts_numbers_and_decimal() {
        let a: Sample = serde_json::from_value(
            json!({"data": "0x", "gas": 21000, "nonce": 7, "selector": "0x00000000"}),
        )
        .unwrap();
        let b: Sample = serde_json::from_value(
            json!({"data": "", "gas": "21000", "nonce": "0x7", "selector": "0x00000000"}),
        )
        .unwrap();
        assert_eq!(a.gas, 21_000);
        assert_eq!(b.gas, 21_000);
        assert_eq!(a.nonce, U256::from(7));
        assert_eq!(b.nonce, U256::from(7));
        assert!(a.data.is_empty());
    }

    #[test]
    fn test_u256_quantity_rejects_garbage() {
        let bad = json!({"data": "0x", "gas": 1, "nonce": "0xzz", "selector": "0x00000000"});
        assert!(serde_json::from_value::<Sample>(bad).is_err());
    }

    #[test]
    fn test_fixed_bytes_length_checked() {
        assert!(serde_json::from_value::<FixedBytes<4>>(json!("0xdeadbeefff")).is_err());
    }
}
