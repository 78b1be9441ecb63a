use alloy_primitives::{keccak256, U256};
use alloy_sol_types::SolValue;
use serde::{Deserialize, Serialize};
use tick3t_chain::serde_hex::{bytes, quantity, u256};
use tick3t_common::Address;

/// Placeholder signature for gas estimation. SimpleAccount recovers an
/// address from it without reverting.
pub const DUMMY_SIGNATURE: [u8; 65] = {
    let mut sig = [0u8; 65];
    let mut i = 0;
    while i < 15 {
        sig[i] = 0xff;
        i += 1;
    }
    sig[15] = 0xf0;
    sig[31] = 0x07;
    i = 32;
    while i < 64 {
        sig[i] = 0xaa;
        i += 1;
    }
    sig[64] = 0x1c;
    sig
};

/// ERC-4337 v0.6 UserOperation in the bundler's JSON shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserOperation {
    pub sender: Address,
    #[serde(with = "u256")]
    pub nonce: U256,
    #[serde(with = "bytes")]
    pub init_code: Vec<u8>,
    #[serde(with = "bytes")]
    pub call_data: Vec<u8>,
    #[serde(with = "quantity")]
    pub call_gas_limit: u128,
    #[serde(with = "quantity")]
    pub verification_gas_limit: u128,
    #[serde(with = "quantity")]
    pub pre_verification_gas: u128,
    #[serde(with = "quantity")]
    pub max_fee_per_gas: u128,
    #[serde(with = "quantity")]
    pub max_priority_fee_per_gas: u128,
    #[serde(with = "bytes")]
    pub paymaster_and_data: Vec<u8>,
    #[serde(with = "bytes")]
    pub signature: Vec<u8>,
}

impl UserOperation {
    /// Everything but the signature, with dynamic fields hashed.
    pub fn pack(&self) -> Vec<u8> {
        (
            alloy_primitives::Address::from(self.sender),
            self.nonce,
            keccak256(&self.init_code),
            keccak256(&self.call_data),
            U256::from(self.call_gas_limit),
            U256::from(self.verification_gas_limit),
            U256::from(self.pre_verification_gas),
            U256::from(self.max_fee_per_gas),
            U256::from(self.max_priority_fee_per_gas),
            keccak256(&self.paymaster_and_data),
        )
            .abi_encode()
    }

    /// `keccak256(abi.encode(keccak256(pack()), entryPoint, chainId))`, the
    /// hash the owner signs and the bundler reports.
    pub fn hash(&self, entry_point: &Address, chain_id: u64) -> [u8; 32] {
        let packed = (
            keccak256(self.pack()),
            alloy_primitives::Address::from(*entry_point),
            U256::from(chain_id),
        );
        keccak256(packed.abi_encode()).0
    }

    /// Total gas this op can consume.
    pub fn total_gas(&self) -> u128 {
        self.call_gas_limit
            .saturating_add(self.verification_gas_limit)
            .saturating_add(self.pre_verification_gas)
    }

    /// Maximum cost in wei.
    pub fn max_cost(&self) -> u128 {
        self.total_gas().saturating_mul(self.max_fee_per_gas)
    }

    pub fn is_sponsored(&self) -> bool {
        !self.paymaster_and_data.is_empty()
    }
}

/// One contract call executed by the smart account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Call {
    pub to: Address,
    /// Wei attached to the call.
    #[serde(default, with = "u256")]
    pub value: U256,
    #[serde(with = "bytes")]
    pub data: Vec<u8>,
}

impl Call {
    pub fn new(to: Address, data: Vec<u8>) -> Self {
        Self {
            to,
            value: U256::ZERO,
            data,
        }
    }

    pub fn with_value(mut self, value: U256) -> Self {
        self.value = value;
        self
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use serde_json::json;

    pub(crate) fn sample_op() -> UserOperation {
        UserOperation {
            sender: Address([1u8; 20]),
            nonce: U256::ZERO,
            init_code: vec![],
            call_data: vec![0xde, 0xad],
            call_gas_limit: 100_000,
            verification_gas_limit: 50_000,
            pre_verification_gas: 21_000,
            max_fee_per_gas: 30_000_000_000,
            max_priority_fee_per_gas: 1_500_000_000,
            paymaster_and_data: vec![],
            signature: vec![0x01; 65],
        }
    }

    #[test]
    fn test_user_op_hash_deterministic() {
        let op = sample_op();
        let ep = Address([0xAA; 20]);
        assert_eq!(op.hash(&ep, 1), op.hash(&ep, 1));
    }

    #[test]
    fn test_user_op_hash_binds_chain_and_entry_point() {
        let op = sample_op();
        let ep = Address([0xAA; 20]);
        assert_ne!(op.hash(&ep, 1), op.hash(&ep, 84532));
        assert_ne!(op.hash(&ep, 1), op.hash(&Address([0xBB; 20]), 1));
    }

    #[test]
    fn test_hash_ignores_signature() {
        let mut op = sample_op();
        let ep = Address([0xAA; 20]);
        let before = op.hash(&ep, 1);
        op.signature = DUMMY_SIGNATURE.to_vec();
        assert_eq!(op.hash(&ep, 1), before);
        op.paymaster_and_data = vec![0x01];
        assert_ne!(op.hash(&ep, 1), before);
    }

    #[test]
    fn test_pack_is_ten_words() {
        let mut op = sample_op();
        op.nonce = U256::from(5);
        let packed = op.pack();
        assert_eq!(packed.len(), 10 * 32);
        assert_eq!(&packed[12..32], &[1u8; 20]);
        assert_eq!(U256::from_be_slice(&packed[32..64]), U256::from(5));
        assert_eq!(&packed[96..128], keccak256([0xde, 0xad]).as_slice());
    }

    #[test]
    fn test_total_gas_and_cost() {
        let op = sample_op();
        assert_eq!(op.total_gas(), 171_000);
        assert_eq!(op.max_cost(), 171_000 * 30_000_000_000);
    }

    #[test]
    fn test_bundler_json_shape() {
        let json = serde_json::to_value(sample_op()).unwrap();
        assert_eq!(json["sender"], format!("0x{}", "01".repeat(20)));
        assert_eq!(json["nonce"], "0x0");
        let mut later = sample_op();
        later.nonce = U256::from(26);
        assert_eq!(serde_json::to_value(later).unwrap()["nonce"], "0x1a");
        assert_eq!(json["initCode"], "0x");
        assert_eq!(json["callData"], "0xdead");
        assert_eq!(json["callGasLimit"], "0x186a0");
        assert_eq!(json["paymasterAndData"], "0x");
        let back: UserOperation = serde_json::from_value(json).unwrap();
        assert_eq!(back, sample_op());
    }

    #[test]
    fn test_dummy_signature_layout() {
        assert_eq!(
            hex::encode(DUMMY_SIGNATURE),
            "fffffffffffffffffffffffffffffff000000000000000000000000000000007aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa1c"
        );
    }

    #[test]
    fn test_call_value_defaults_to_zero() {
        let call: Call = serde_json::from_value(json!({
            "to": format!("0x{}", "22".repeat(20)),
            "data": "0xa6f2ae3a"
        }))
        .unwrap();
        assert_eq!(call.value, U256::ZERO);
    }
}
