//! In-process doubles for the chain node, bundler and paymaster.

use alloy_primitives::U256;
use alloy_sol_types::{SolCall, SolValue};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tick3t_chain::contracts::{IEntryPoint, IEventTicketing, ISimpleAccountFactory};
use tick3t_chain::mock::encode_event_info;
use tick3t_chain::{EthClient, LocalWalletSigner, RpcError};
use tick3t_common::{Address, EventInfo};

use crate::bundler::{Bundler, BundlerError, GasEstimate, UserOpReceipt};
use crate::paymaster::{Paymaster, PaymasterError, Sponsorship};
use crate::user_op::UserOperation;

pub const TEST_CHAIN_ID: u64 = 84532;

/// Deterministic owner key for tests.
pub fn test_signer(seed: u8) -> Arc<LocalWalletSigner> {
    let mut key = [0x11u8; 32];
    key[31] = seed;
    Arc::new(LocalWalletSigner::from_bytes(&key).unwrap())
}

pub fn sample_event(n_tickets: u64, n_tickets_sold: u64) -> EventInfo {
    EventInfo {
        name: "ETHGlobal Bangkok".into(),
        url: "https://ethglobal.com/events/bangkok".into(),
        time: 1_731_600_000,
        location: "QSNCC, Bangkok".into(),
        photo: "https://example.com/bangkok.png".into(),
        n_tickets: U256::from(n_tickets),
        n_tickets_sold: U256::from(n_tickets_sold),
        price: U256::from(10_000_000_000_000_000u64),
    }
}

/// Chain node answering the account factory, entry point and ticket contract.
pub struct StubChain {
    pub counterfactual: Mutex<Address>,
    pub code: Mutex<Vec<u8>>,
    pub nonce: Mutex<U256>,
    pub event: Mutex<Option<EventInfo>>,
    pub unreachable: AtomicBool,
    pub calls: Mutex<Vec<(Address, Vec<u8>)>>,
    /// Delay applied to `eth_call`.
    pub latency: Mutex<Duration>,
    /// `getAddress` calls currently in progress, and the most seen at once.
    pub resolving: AtomicUsize,
    pub peak_resolving: AtomicUsize,
}

impl StubChain {
    pub fn new(counterfactual: Address) -> Arc<Self> {
        Arc::new(Self {
            counterfactual: Mutex::new(counterfactual),
            code: Mutex::new(Vec::new()),
            nonce: Mutex::new(U256::ZERO),
            event: Mutex::new(None),
            unreachable: AtomicBool::new(false),
            calls: Mutex::new(Vec::new()),
            latency: Mutex::new(Duration::ZERO),
            resolving: AtomicUsize::new(0),
            peak_resolving: AtomicUsize::new(0),
        })
    }

    pub fn set_event(&self, event: EventInfo) {
        *self.event.lock().unwrap() = Some(event);
    }

    pub fn set_deployed(&self, deployed: bool) {
        *self.code.lock().unwrap() = if deployed { vec![0x60, 0x80] } else { vec![] };
    }

    pub fn calls_with_selector(&self, sel: [u8; 4]) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, data)| data.starts_with(&sel))
            .count()
    }

    fn check_reachable(&self) -> Result<(), RpcError> {
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(RpcError::Http("connection refused".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl EthClient for StubChain {
    fn chain_id(&self) -> u64 {
        TEST_CHAIN_ID
    }

    async fn call(&self, to: &Address, data: &[u8]) -> Result<Vec<u8>, RpcError> {
        let sel = &data[..4.min(data.len())];
        let resolving = sel == ISimpleAccountFactory::getAddressCall::SELECTOR;
        if resolving {
            let now = self.resolving.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak_resolving.fetch_max(now, Ordering::SeqCst);
        }
        let latency = *self.latency.lock().unwrap();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        if resolving {
            self.resolving.fetch_sub(1, Ordering::SeqCst);
        }
        self.check_reachable()?;
        self.calls.lock().unwrap().push((*to, data.to_vec()));
        if resolving {
            let address = alloy_primitives::Address::from(*self.counterfactual.lock().unwrap());
            return Ok(address.abi_encode());
        }
        if sel == IEntryPoint::getNonceCall::SELECTOR {
            return Ok(self.nonce.lock().unwrap().abi_encode());
        }
        if sel == IEventTicketing::getEventInfoCall::SELECTOR {
            if let Some(event) = self.event.lock().unwrap().as_ref() {
                return Ok(encode_event_info(event));
            }
        }
        Err(RpcError::JsonRpc {
            code: 3,
            message: "execution reverted".into(),
        })
    }

    async fn get_code(&self, _address: &Address) -> Result<Vec<u8>, RpcError> {
        self.check_reachable()?;
        Ok(self.code.lock().unwrap().clone())
    }

    async fn gas_price(&self) -> Result<u128, RpcError> {
        self.check_reachable()?;
        Ok(1_000_000_000)
    }

    async fn max_priority_fee_per_gas(&self) -> Result<u128, RpcError> {
        self.check_reachable()?;
        Ok(100_000_000)
    }
}

/// Bundler that accepts everything and includes it on the next poll.
pub struct StubBundler {
    pub entry_points: Vec<Address>,
    pub sent: Mutex<Vec<UserOperation>>,
    pub receipts: Mutex<HashMap<String, UserOpReceipt>>,
    pub unreachable: AtomicBool,
    /// Delay before `eth_sendUserOperation` answers.
    pub send_latency: Mutex<Duration>,
    /// When set, included operations report `success = false`.
    pub revert_reason: Mutex<Option<String>>,
    /// When false, receipts never arrive.
    pub include: AtomicBool,
    pub estimates: AtomicUsize,
}

impl StubBundler {
    pub fn new(entry_point: Address) -> Arc<Self> {
        Arc::new(Self {
            entry_points: vec![entry_point],
            sent: Mutex::new(Vec::new()),
            receipts: Mutex::new(HashMap::new()),
            unreachable: AtomicBool::new(false),
            send_latency: Mutex::new(Duration::ZERO),
            revert_reason: Mutex::new(None),
            include: AtomicBool::new(true),
            estimates: AtomicUsize::new(0),
        })
    }

    pub fn sent_count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }

    pub fn last_sent(&self) -> Option<UserOperation> {
        self.sent.lock().unwrap().last().cloned()
    }

    fn check_reachable(&self) -> Result<(), BundlerError> {
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(BundlerError::Unavailable("connection refused".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl Bundler for StubBundler {
    async fn supported_entry_points(&self) -> Result<Vec<Address>, BundlerError> {
        self.check_reachable()?;
        Ok(self.entry_points.clone())
    }

    async fn estimate_gas(&self, _op: &UserOperation, _entry_point: &Address) -> Result<GasEstimate, BundlerError> {
        self.check_reachable()?;
        self.estimates.fetch_add(1, Ordering::SeqCst);
        Ok(GasEstimate {
            call_gas_limit: 100_000,
            verification_gas_limit: 150_000,
            pre_verification_gas: 50_000,
        })
    }

    async fn send_user_operation(&self, op: &UserOperation, entry_point: &Address) -> Result<String, BundlerError> {
        let latency = *self.send_latency.lock().unwrap();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        self.check_reachable()?;
        let hash = format!("0x{}", hex::encode(op.hash(entry_point, TEST_CHAIN_ID)));
        self.sent.lock().unwrap().push(op.clone());
        if self.include.load(Ordering::SeqCst) {
            let reason = self.revert_reason.lock().unwrap().clone();
            self.receipts.lock().unwrap().insert(
                hash.clone(),
                UserOpReceipt {
                    user_op_hash: hash.clone(),
                    success: reason.is_none(),
                    reason,
                    transaction_hash: format!("0x{}", "ab".repeat(32)),
                },
            );
        }
        Ok(hash)
    }

    async fn get_user_operation_receipt(&self, user_op_hash: &str) -> Result<Option<UserOpReceipt>, BundlerError> {
        self.check_reachable()?;
        Ok(self.receipts.lock().unwrap().get(user_op_hash).cloned())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaymasterMode {
    Approve,
    Deny(String),
    Unreachable,
}

pub struct StubPaymaster {
    pub mode: Mutex<PaymasterMode>,
    pub requests: AtomicUsize,
}

impl StubPaymaster {
    pub fn new(mode: PaymasterMode) -> Arc<Self> {
        Arc::new(Self {
            mode: Mutex::new(mode),
            requests: AtomicUsize::new(0),
        })
    }

    pub fn set_mode(&self, mode: PaymasterMode) {
        *self.mode.lock().unwrap() = mode;
    }
}

#[async_trait]
impl Paymaster for StubPaymaster {
    async fn sponsor(&self, _op: &UserOperation) -> Result<Sponsorship, PaymasterError> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        let mode = self.mode.lock().unwrap().clone();
        match mode {
            PaymasterMode::Approve => Ok(Sponsorship {
                paymaster_and_data: vec![0x00, 0x00, 0x0f, 0x79, 0xb7, 0xfa],
                call_gas_limit: None,
                verification_gas_limit: Some(200_000),
                pre_verification_gas: None,
            }),
            PaymasterMode::Deny(reason) => Err(PaymasterError::Denied(reason)),
            PaymasterMode::Unreachable => Err(PaymasterError::Unavailable("connection refused".into())),
        }
    }
}
