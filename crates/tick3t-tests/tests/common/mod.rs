#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;
use tick3t_aa::testing::{test_signer, PaymasterMode, StubBundler, StubChain, StubPaymaster};
use tick3t_aa::{
    AccountOptions, FeeEstimator, MemoryJournal, OperationJournal, SmartAccountFactory,
    SmartAccountHandle, TransactionOrchestrator,
};
use tick3t_auth::WalletSession;
use tick3t_chain::EventReader;
use tick3t_common::config::{DEFAULT_ACCOUNT_FACTORY, DEFAULT_ENTRY_POINT};
use tick3t_common::{Address, EventInfo};

pub const TICKETS: Address = Address([0xC0; 20]);
pub const ACCOUNT: Address = Address([0x5A; 20]);

pub fn options() -> AccountOptions {
    AccountOptions {
        entry_point: DEFAULT_ENTRY_POINT.parse().unwrap(),
        factory: DEFAULT_ACCOUNT_FACTORY.parse().unwrap(),
        salt: 0,
        fees: FeeEstimator::default(),
        receipt_poll_interval: Duration::from_millis(1),
        receipt_timeout: Duration::from_millis(50),
    }
}

/// One wallet session wired through the whole purchase stack, with every
/// remote service stubbed in process.
pub struct Harness {
    pub chain: Arc<StubChain>,
    pub bundler: Arc<StubBundler>,
    pub paymaster: Arc<StubPaymaster>,
    pub session: WalletSession,
    pub factory: Arc<SmartAccountFactory>,
    pub reader: Arc<EventReader>,
    pub journal: Arc<dyn OperationJournal>,
    pub orchestrator: Arc<TransactionOrchestrator>,
}

impl Harness {
    pub fn new(event: EventInfo) -> Self {
        Self::with_journal(event, Arc::new(MemoryJournal::new()))
    }

    pub fn with_journal(event: EventInfo, journal: Arc<dyn OperationJournal>) -> Self {
        let options = options();
        let chain = StubChain::new(ACCOUNT);
        chain.set_event(event);
        let bundler = StubBundler::new(options.entry_point);
        let paymaster = StubPaymaster::new(PaymasterMode::Approve);
        let factory = Arc::new(SmartAccountFactory::new(
            chain.clone(),
            bundler.clone(),
            paymaster.clone(),
            options,
        ));
        Self {
            reader: Arc::new(EventReader::new(chain.clone(), TICKETS)),
            orchestrator: Arc::new(TransactionOrchestrator::new(TICKETS, journal.clone())),
            chain,
            bundler,
            paymaster,
            session: WalletSession::new("test-environment"),
            factory,
            journal,
        }
    }

    pub async fn sign_in(&self, seed: u8) -> SmartAccountHandle {
        self.session.connect(test_signer(seed));
        self.factory.connect_session(&self.session).await.unwrap()
    }
}
