//! Sponsored contract calls: ticket purchases and event creation.
//!
//! One attempt runs `Idle -> Building -> Sponsoring -> Submitted ->
//! Confirmed | Failed`. The current state is published on a watch channel;
//! terminal states persist until the next attempt starts.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use alloy_primitives::U256;
use alloy_sol_types::SolCall;
use tick3t_attest::EmailProof;
use tick3t_chain::contracts::{IEventFactory, IEventTicketing};
use tick3t_common::{Address, EventInfo, NewEvent, Tick3tError, TransactionResult};
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::account::{AccountError, SendPhase, SmartAccountHandle};
use crate::bundler::BundlerError;
use crate::journal::{JournalEntry, OperationJournal};
use crate::user_op::Call;

/// Warning attached to results whose submission could not be journaled.
pub const NOT_JOURNALED: &str = "operation was not journaled and cannot be resumed after a restart";

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum PurchaseState {
    #[default]
    Idle,
    Building,
    Sponsoring,
    Submitted {
        user_op_hash: String,
        /// False when the journal write failed.
        journaled: bool,
    },
    Confirmed {
        user_op_hash: String,
        transaction_hash: String,
    },
    Failed {
        error: Tick3tError,
        /// Set when the failure happened after submission.
        user_op_hash: Option<String>,
    },
}

impl PurchaseState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, PurchaseState::Confirmed { .. } | PurchaseState::Failed { .. })
    }

    pub fn label(&self) -> &'static str {
        match self {
            PurchaseState::Idle => "idle",
            PurchaseState::Building => "building",
            PurchaseState::Sponsoring => "sponsoring",
            PurchaseState::Submitted { .. } => "submitted",
            PurchaseState::Confirmed { .. } => "confirmed",
            PurchaseState::Failed { .. } => "failed",
        }
    }
}

/// Ticket purchase variants. They differ only in argument encoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PurchaseCall {
    PlainBuy,
    ProofGatedBuy(EmailProof),
}

impl PurchaseCall {
    pub fn encode(&self) -> Vec<u8> {
        match self {
            PurchaseCall::PlainBuy => IEventTicketing::buy_0Call {}.abi_encode(),
            PurchaseCall::ProofGatedBuy(proof) => IEventTicketing::buy_1Call {
                proof: proof.to_sol(),
            }
            .abi_encode(),
        }
    }
}

/// Event factory operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FactoryCall {
    CreateEvent(NewEvent),
}

impl FactoryCall {
    pub fn encode(&self) -> Vec<u8> {
        match self {
            FactoryCall::CreateEvent(event) => IEventFactory::createEventCall {
                name: event.name.clone(),
                url: event.url.clone(),
                time: U256::from(event.time),
                location: event.location.clone(),
                photo: event.photo.clone(),
                nTickets: event.n_tickets,
                price: event.price,
                uri: event.uri.clone(),
            }
            .abi_encode(),
        }
    }
}

/// Clears the in-flight flag when the attempt ends, however it ends.
struct InFlight<'a>(&'a AtomicBool);

impl<'a> InFlight<'a> {
    fn claim(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Runs sponsored operations for one ticket contract. At most one attempt,
/// purchase or event creation, is in flight at a time.
pub struct TransactionOrchestrator {
    contract: Address,
    journal: Arc<dyn OperationJournal>,
    state: watch::Sender<PurchaseState>,
    in_flight: AtomicBool,
}

impl TransactionOrchestrator {
    pub fn new(contract: Address, journal: Arc<dyn OperationJournal>) -> Self {
        let (state, _) = watch::channel(PurchaseState::Idle);
        Self {
            contract,
            journal,
            state,
            in_flight: AtomicBool::new(false),
        }
    }

    pub fn contract(&self) -> Address {
        self.contract
    }

    pub fn state(&self) -> PurchaseState {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<PurchaseState> {
        self.state.subscribe()
    }

    pub fn is_in_flight(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    /// The contract call for `call`, paying exactly the contract-reported
    /// price. Fails with `SoldOut` when no tickets remain.
    pub fn build_call(&self, event: &EventInfo, call: &PurchaseCall) -> Result<Call, Tick3tError> {
        if event.is_sold_out() {
            return Err(Tick3tError::SoldOut);
        }
        Ok(Call::new(self.contract, call.encode()).with_value(event.price))
    }

    fn transition(&self, next: PurchaseState) {
        info!(state = next.label(), "operation state");
        self.state.send_replace(next);
    }

    fn fail(&self, error: Tick3tError, user_op_hash: Option<String>) -> TransactionResult {
        warn!(code = error.code(), error = %error, "operation failed");
        let result = match &user_op_hash {
            Some(hash) => TransactionResult::failed_after_submit(hash.clone(), &error),
            None => TransactionResult::failed(&error),
        };
        self.transition(PurchaseState::Failed { error, user_op_hash });
        result
    }

    /// Execute one purchase. Never retries; the result is terminal.
    pub async fn purchase(
        &self,
        account: Option<&SmartAccountHandle>,
        event: &EventInfo,
        call: PurchaseCall,
    ) -> TransactionResult {
        let Some(_guard) = InFlight::claim(&self.in_flight) else {
            warn!("purchase rejected, another attempt is in flight");
            return TransactionResult::failed(&Tick3tError::PurchaseInFlight);
        };

        self.transition(PurchaseState::Building);
        let Some(account) = account else {
            return self.fail(Tick3tError::AccountNotReady, None);
        };
        let tx = match self.build_call(event, &call) {
            Ok(tx) => tx,
            Err(e) => return self.fail(e, None),
        };
        self.submit(account, tx).await
    }

    /// Create an event through `factory` as a sponsored operation. Shares
    /// the state channel and in-flight guard with purchases.
    pub async fn create_event(
        &self,
        account: Option<&SmartAccountHandle>,
        factory: Address,
        event: &NewEvent,
    ) -> TransactionResult {
        let Some(_guard) = InFlight::claim(&self.in_flight) else {
            warn!("event creation rejected, another attempt is in flight");
            return TransactionResult::failed(&Tick3tError::PurchaseInFlight);
        };

        self.transition(PurchaseState::Building);
        let Some(account) = account else {
            return self.fail(Tick3tError::AccountNotReady, None);
        };
        info!(factory = %factory, name = %event.name, n_tickets = %event.n_tickets, "creating event");
        let tx = Call::new(factory, FactoryCall::CreateEvent(event.clone()).encode());
        self.submit(account, tx).await
    }

    /// Sponsor, sign and submit `tx`, journal it, then settle.
    async fn submit(&self, account: &SmartAccountHandle, tx: Call) -> TransactionResult {
        let sent = account
            .send_with_progress(std::slice::from_ref(&tx), |phase| {
                if phase == SendPhase::Sponsoring {
                    self.transition(PurchaseState::Sponsoring);
                }
            })
            .await;
        let submitted = match sent {
            Ok(submitted) => submitted,
            Err(e) => return self.fail(e.into(), None),
        };
        let user_op_hash = submitted.user_op_hash;

        let journaled = match self
            .journal
            .record_submitted(JournalEntry::submitted(
                user_op_hash.clone(),
                account.address(),
                tx.to,
                tx.value,
            ))
            .await
        {
            Ok(()) => true,
            Err(e) => {
                error!(user_op_hash = %user_op_hash, error = %e, "failed to journal submitted operation");
                false
            }
        };
        self.transition(PurchaseState::Submitted {
            user_op_hash: user_op_hash.clone(),
            journaled,
        });

        let result = self.settle(account, user_op_hash).await;
        if journaled {
            result
        } else {
            result.with_warning(NOT_JOURNALED)
        }
    }

    /// Wait for the receipt of a submitted operation and record the outcome.
    async fn settle(&self, account: &SmartAccountHandle, user_op_hash: String) -> TransactionResult {
        match account.wait_for_receipt(&user_op_hash).await {
            Ok(receipt) if receipt.success => {
                if let Err(e) = self
                    .journal
                    .mark_confirmed(&user_op_hash, &receipt.transaction_hash)
                    .await
                {
                    error!(user_op_hash = %user_op_hash, error = %e, "failed to journal confirmation");
                }
                info!(user_op_hash = %user_op_hash, tx = %receipt.transaction_hash, "operation confirmed");
                self.transition(PurchaseState::Confirmed {
                    user_op_hash: user_op_hash.clone(),
                    transaction_hash: receipt.transaction_hash.clone(),
                });
                TransactionResult::confirmed(user_op_hash, receipt.transaction_hash)
            }
            Ok(receipt) => {
                let reason = receipt.reason.unwrap_or_else(|| "execution reverted".into());
                let error = Tick3tError::Unknown(format!(
                    "user operation reverted in {}: {reason}",
                    receipt.transaction_hash
                ));
                self.record_failure(&user_op_hash, &error).await;
                self.fail(error, Some(user_op_hash))
            }
            // Still pending on chain: keep the journal entry for resume.
            Err(AccountError::Bundler(e @ (BundlerError::ReceiptTimeout { .. } | BundlerError::Unavailable(_)))) => {
                self.fail(e.into(), Some(user_op_hash))
            }
            Err(e) => {
                let error = Tick3tError::from(e);
                self.record_failure(&user_op_hash, &error).await;
                self.fail(error, Some(user_op_hash))
            }
        }
    }

    async fn record_failure(&self, user_op_hash: &str, error: &Tick3tError) {
        if let Err(e) = self.journal.mark_failed(user_op_hash, &error.to_string()).await {
            error!(user_op_hash, error = %e, "failed to journal failure");
        }
    }

    /// Settle operations of `account` that were submitted but never confirmed,
    /// oldest first.
    pub async fn resume(&self, account: &SmartAccountHandle) -> Result<Vec<TransactionResult>, Tick3tError> {
        let _guard = InFlight::claim(&self.in_flight).ok_or(Tick3tError::PurchaseInFlight)?;
        let pending = self.journal.pending(&account.address()).await?;
        info!(account = %account.address(), pending = pending.len(), "resuming journaled operations");

        let mut results = Vec::with_capacity(pending.len());
        for entry in pending {
            self.transition(PurchaseState::Submitted {
                user_op_hash: entry.user_op_hash.clone(),
                journaled: true,
            });
            results.push(self.settle(account, entry.user_op_hash).await);
        }
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::account::{AccountOptions, SmartAccountFactory};
    use crate::bundler::FeeEstimator;
    use crate::journal::{JournalError, MemoryJournal, OperationStatus};
    use crate::testing::{sample_event, test_signer, PaymasterMode, StubBundler, StubChain, StubPaymaster};
    use async_trait::async_trait;
    use std::time::Duration;
    use tick3t_chain::contracts::ISimpleAccount;
    use tick3t_common::config::{DEFAULT_ACCOUNT_FACTORY, DEFAULT_ENTRY_POINT, DEFAULT_EVENT_FACTORY};

    const CONTRACT: Address = Address([0xC0; 20]);

    struct Fixture {
        bundler: Arc<StubBundler>,
        paymaster: Arc<StubPaymaster>,
        journal: Arc<MemoryJournal>,
        handle: SmartAccountHandle,
        orchestrator: Arc<TransactionOrchestrator>,
    }

    /// Journal whose `record_submitted` always fails.
    struct BrokenJournal(Arc<MemoryJournal>);

    #[async_trait]
    impl OperationJournal for BrokenJournal {
        async fn record_submitted(&self, _entry: JournalEntry) -> Result<(), JournalError> {
            Err(JournalError::Io(std::io::Error::other("disk full")))
        }

        async fn mark_confirmed(&self, user_op_hash: &str, transaction_hash: &str) -> Result<(), JournalError> {
            self.0.mark_confirmed(user_op_hash, transaction_hash).await
        }

        async fn mark_failed(&self, user_op_hash: &str, error: &str) -> Result<(), JournalError> {
            self.0.mark_failed(user_op_hash, error).await
        }

        async fn pending(&self, account: &Address) -> Result<Vec<JournalEntry>, JournalError> {
            self.0.pending(account).await
        }

        async fn entries(&self) -> Result<Vec<JournalEntry>, JournalError> {
            self.0.entries().await
        }
    }

    async fn fixture() -> Fixture {
        let journal = Arc::new(MemoryJournal::new());
        fixture_with(journal.clone(), journal).await
    }

    async fn broken_journal_fixture() -> Fixture {
        let memory = Arc::new(MemoryJournal::new());
        fixture_with(memory.clone(), Arc::new(BrokenJournal(memory))).await
    }

    async fn fixture_with(journal: Arc<MemoryJournal>, backend: Arc<dyn OperationJournal>) -> Fixture {
        let options = AccountOptions {
            entry_point: DEFAULT_ENTRY_POINT.parse().unwrap(),
            factory: DEFAULT_ACCOUNT_FACTORY.parse().unwrap(),
            salt: 0,
            fees: FeeEstimator::default(),
            receipt_poll_interval: Duration::from_millis(1),
            receipt_timeout: Duration::from_millis(50),
        };
        let chain = StubChain::new(Address([0x5A; 20]));
        let bundler = StubBundler::new(options.entry_point);
        let paymaster = StubPaymaster::new(PaymasterMode::Approve);
        let factory = SmartAccountFactory::new(chain, bundler.clone(), paymaster.clone(), options);
        let handle = factory.connect(test_signer(1)).await.unwrap();
        let orchestrator = Arc::new(TransactionOrchestrator::new(CONTRACT, backend));
        Fixture {
            bundler,
            paymaster,
            journal,
            handle,
            orchestrator,
        }
    }

    /// `(to, value, data)` of the account's `execute` call.
    fn executed_call(call_data: &[u8]) -> (Address, U256, Vec<u8>) {
        let call = ISimpleAccount::executeCall::abi_decode(call_data).unwrap();
        (call.dest.into(), call.value, call.func.to_vec())
    }

    #[tokio::test]
    async fn test_plain_buy_confirms() {
        let f = fixture().await;
        let result = f
            .orchestrator
            .purchase(Some(&f.handle), &sample_event(10, 3), PurchaseCall::PlainBuy)
            .await;

        assert!(result.success, "{result:?}");
        assert!(result.transaction_hash.is_some());
        let hash = result.user_op_hash.clone().unwrap();
        assert_eq!(
            f.orchestrator.state(),
            PurchaseState::Confirmed {
                user_op_hash: hash.clone(),
                transaction_hash: result.transaction_hash.unwrap(),
            }
        );
        let entries = f.journal.entries().await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].user_op_hash, hash);
        assert_eq!(entries[0].status, OperationStatus::Confirmed);
        assert!(!f.orchestrator.is_in_flight());
    }

    #[tokio::test]
    async fn test_buy_attaches_exact_price() {
        let f = fixture().await;
        let event = sample_event(10, 0);
        assert_eq!(event.price, U256::from(10_000_000_000_000_000u64));

        let call = f.orchestrator.build_call(&event, &PurchaseCall::PlainBuy).unwrap();
        assert_eq!(call.value, event.price);
        assert_eq!(call.to, CONTRACT);
        assert_eq!(call.data, IEventTicketing::buy_0Call::SELECTOR.to_vec());

        f.orchestrator
            .purchase(Some(&f.handle), &event, PurchaseCall::PlainBuy)
            .await;
        let op = f.bundler.last_sent().unwrap();
        let (to, value, data) = executed_call(&op.call_data);
        assert_eq!(to, CONTRACT);
        assert_eq!(value, event.price);
        assert_eq!(data, IEventTicketing::buy_0Call::SELECTOR.to_vec());
    }

    #[tokio::test]
    async fn test_sponsorship_denied_never_submits() {
        let f = fixture().await;
        f.paymaster.set_mode(PaymasterMode::Deny("sender not allowed".into()));
        let mut states = f.orchestrator.subscribe();

        let result = f
            .orchestrator
            .purchase(Some(&f.handle), &sample_event(10, 3), PurchaseCall::PlainBuy)
            .await;

        assert!(!result.success);
        assert!(result.user_op_hash.is_none());
        assert!(matches!(
            f.orchestrator.state(),
            PurchaseState::Failed {
                error: Tick3tError::SponsorshipDenied(_),
                user_op_hash: None
            }
        ));
        assert_eq!(f.bundler.sent_count(), 0);
        assert!(f.journal.entries().await.unwrap().is_empty());
        assert!(states.has_changed().unwrap());
        assert!(matches!(*states.borrow_and_update(), PurchaseState::Failed { .. }));
    }

    #[tokio::test]
    async fn test_concurrent_purchases_submit_at_most_once() {
        let f = fixture().await;
        *f.bundler.send_latency.lock().unwrap() = Duration::from_millis(30);
        let event = sample_event(10, 3);

        let a = {
            let (o, h, e) = (f.orchestrator.clone(), f.handle.clone(), event.clone());
            tokio::spawn(async move { o.purchase(Some(&h), &e, PurchaseCall::PlainBuy).await })
        };
        let b = {
            let (o, h, e) = (f.orchestrator.clone(), f.handle.clone(), event.clone());
            tokio::spawn(async move { o.purchase(Some(&h), &e, PurchaseCall::PlainBuy).await })
        };
        let results = [a.await.unwrap(), b.await.unwrap()];

        assert_eq!(f.bundler.sent_count(), 1);
        assert_eq!(results.iter().filter(|r| r.success).count(), 1);
        let rejected = results.iter().find(|r| !r.success).unwrap();
        assert_eq!(
            rejected.error.as_deref(),
            Some(Tick3tError::PurchaseInFlight.to_string().as_str())
        );
    }

    #[tokio::test]
    async fn test_missing_account_is_not_ready() {
        let f = fixture().await;
        let result = f
            .orchestrator
            .purchase(None, &sample_event(10, 3), PurchaseCall::PlainBuy)
            .await;
        assert_eq!(result, TransactionResult::failed(&Tick3tError::AccountNotReady));
        assert!(matches!(
            f.orchestrator.state(),
            PurchaseState::Failed {
                error: Tick3tError::AccountNotReady,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_sold_out_fails_fast() {
        let f = fixture().await;
        let result = f
            .orchestrator
            .purchase(Some(&f.handle), &sample_event(10, 10), PurchaseCall::PlainBuy)
            .await;
        assert_eq!(result, TransactionResult::failed(&Tick3tError::SoldOut));
        assert_eq!(f.paymaster.requests.load(Ordering::SeqCst), 0);
        assert_eq!(f.bundler.estimates.load(Ordering::SeqCst), 0);
        assert_eq!(f.bundler.sent_count(), 0);
    }

    #[tokio::test]
    async fn test_reverted_operation_fails_after_submit() {
        let f = fixture().await;
        *f.bundler.revert_reason.lock().unwrap() = Some("Event sold out".into());
        let result = f
            .orchestrator
            .purchase(Some(&f.handle), &sample_event(10, 3), PurchaseCall::PlainBuy)
            .await;
        assert!(!result.success);
        assert!(result.user_op_hash.is_some());
        assert!(result.error.unwrap().contains("Event sold out"));
        let entries = f.journal.entries().await.unwrap();
        assert_eq!(entries[0].status, OperationStatus::Failed);
    }

    #[tokio::test]
    async fn test_unconfirmed_operation_is_resumable() {
        let f = fixture().await;
        f.bundler.include.store(false, Ordering::SeqCst);
        let result = f
            .orchestrator
            .purchase(Some(&f.handle), &sample_event(10, 3), PurchaseCall::PlainBuy)
            .await;
        assert!(!result.success);
        let hash = result.user_op_hash.unwrap();
        let pending = f.journal.pending(&f.handle.address()).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].value, "10000000000000000");

        // The operation lands later.
        f.bundler.receipts.lock().unwrap().insert(
            hash.clone(),
            crate::bundler::UserOpReceipt {
                user_op_hash: hash.clone(),
                success: true,
                reason: None,
                transaction_hash: "0xfeed".into(),
            },
        );
        let resumed = f.orchestrator.resume(&f.handle).await.unwrap();
        assert_eq!(resumed, vec![TransactionResult::confirmed(hash, "0xfeed")]);
        assert!(f.journal.pending(&f.handle.address()).await.unwrap().is_empty());
        assert_eq!(f.bundler.sent_count(), 1);
    }

    #[test]
    fn test_proof_gated_encoding() {
        let proof = EmailProof::from_prover_result(&serde_json::json!({
            "seal": {
                "verifierSelector": "0xdeafbeef",
                "seal": vec![format!("0x{}", "11".repeat(32)); 8],
                "mode": 1
            },
            "callGuestId": format!("0x{}", "22".repeat(32)),
            "length": 900,
            "callAssumptions": {
                "proverContractAddress": format!("0x{}", "33".repeat(20)),
                "functionSelector": "0x12345678",
                "settleBlockNumber": "0x10",
                "settleBlockHash": format!("0x{}", "44".repeat(32))
            }
        }))
        .unwrap();
        let data = PurchaseCall::ProofGatedBuy(proof.clone()).encode();
        assert_eq!(data[..4], IEventTicketing::buy_1Call::SELECTOR);
        assert_eq!(data.len(), 4 + 32 * 16);
        let decoded = IEventTicketing::buy_1Call::abi_decode(&data).unwrap();
        assert_eq!(decoded.proof, proof.to_sol());
        assert_eq!(PurchaseCall::PlainBuy.encode(), IEventTicketing::buy_0Call::SELECTOR.to_vec());
    }

    fn new_event() -> NewEvent {
        NewEvent {
            name: "Rust Meetup".into(),
            url: "https://example.com/rust".into(),
            time: 1_767_225_600,
            location: "Lisbon".into(),
            photo: "ipfs://photo".into(),
            n_tickets: U256::from(50),
            price: U256::from(1_000_000_000_000_000u64),
            uri: "ipfs://metadata".into(),
        }
    }

    #[test]
    fn test_create_event_encoding() {
        let data = FactoryCall::CreateEvent(new_event()).encode();
        let decoded = IEventFactory::createEventCall::abi_decode(&data).unwrap();
        assert_eq!(decoded.name, "Rust Meetup");
        assert_eq!(decoded.time, U256::from(1_767_225_600u64));
        assert_eq!(decoded.nTickets, U256::from(50));
        assert_eq!(decoded.price, U256::from(1_000_000_000_000_000u64));
        assert_eq!(decoded.uri, "ipfs://metadata");
    }

    #[tokio::test]
    async fn test_create_event_is_sponsored_call_to_factory() {
        let f = fixture().await;
        let factory: Address = DEFAULT_EVENT_FACTORY.parse().unwrap();
        let result = f
            .orchestrator
            .create_event(Some(&f.handle), factory, &new_event())
            .await;

        assert!(result.success, "{result:?}");
        assert!(result.warning.is_none());
        let op = f.bundler.last_sent().unwrap();
        assert!(op.is_sponsored());
        let (to, value, data) = executed_call(&op.call_data);
        assert_eq!(to, factory);
        // The ticket price is a field of the event, not value sent with it
        assert_eq!(value, U256::ZERO);
        assert_eq!(data[..4], IEventFactory::createEventCall::SELECTOR);

        let entries = f.journal.entries().await.unwrap();
        assert_eq!(entries[0].target, factory);
        assert_eq!(entries[0].value, "0");
        assert_eq!(entries[0].status, OperationStatus::Confirmed);
    }

    #[tokio::test]
    async fn test_create_event_requires_account_and_respects_in_flight() {
        let f = fixture().await;
        let factory: Address = DEFAULT_EVENT_FACTORY.parse().unwrap();
        let result = f.orchestrator.create_event(None, factory, &new_event()).await;
        assert_eq!(result, TransactionResult::failed(&Tick3tError::AccountNotReady));

        *f.bundler.send_latency.lock().unwrap() = Duration::from_millis(30);
        let buying = {
            let (o, h) = (f.orchestrator.clone(), f.handle.clone());
            tokio::spawn(async move { o.purchase(Some(&h), &sample_event(10, 3), PurchaseCall::PlainBuy).await })
        };
        tokio::time::sleep(Duration::from_millis(5)).await;
        let rejected = f
            .orchestrator
            .create_event(Some(&f.handle), factory, &new_event())
            .await;
        assert_eq!(rejected, TransactionResult::failed(&Tick3tError::PurchaseInFlight));
        assert!(buying.await.unwrap().success);
        assert_eq!(f.bundler.sent_count(), 1);
    }

    #[tokio::test]
    async fn test_journal_failure_is_surfaced_on_result() {
        let f = broken_journal_fixture().await;
        let result = f
            .orchestrator
            .purchase(Some(&f.handle), &sample_event(10, 3), PurchaseCall::PlainBuy)
            .await;

        // The purchase itself still goes through
        assert!(result.success, "{result:?}");
        assert_eq!(result.warning.as_deref(), Some(NOT_JOURNALED));
        assert!(f.journal.entries().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_journal_failure_is_visible_in_submitted_state() {
        let f = broken_journal_fixture().await;
        f.bundler.include.store(false, Ordering::SeqCst);
        let mut states = f.orchestrator.subscribe();
        let attempt = {
            let (o, h) = (f.orchestrator.clone(), f.handle.clone());
            tokio::spawn(async move { o.purchase(Some(&h), &sample_event(10, 3), PurchaseCall::PlainBuy).await })
        };

        let submitted = tokio::time::timeout(
            Duration::from_secs(1),
            states.wait_for(|s| matches!(s, PurchaseState::Submitted { .. })),
        )
        .await
        .unwrap()
        .unwrap()
        .clone();
        assert!(matches!(submitted, PurchaseState::Submitted { journaled: false, .. }));

        let result = attempt.await.unwrap();
        assert!(!result.success);
        assert!(result.user_op_hash.is_some());
        assert_eq!(result.warning.as_deref(), Some(NOT_JOURNALED));
    }
}
