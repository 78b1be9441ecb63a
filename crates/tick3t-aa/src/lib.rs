pub mod account;
pub mod bundler;
pub mod journal;
pub mod orchestrator;
pub mod paymaster;
#[cfg(any(test, feature = "test-util"))]
pub mod testing;
pub mod user_op;

// Re-exports for convenience
pub use account::{AccountError, AccountOptions, SendPhase, SmartAccountFactory, SmartAccountHandle, SubmittedOperation};
pub use bundler::{wait_for_receipt, Bundler, BundlerError, FeeEstimate, FeeEstimator, GasEstimate, RpcBundler, UserOpReceipt};
pub use journal::{FileJournal, JournalEntry, JournalError, MemoryJournal, OperationJournal, OperationStatus};
pub use orchestrator::{FactoryCall, PurchaseCall, PurchaseState, TransactionOrchestrator, NOT_JOURNALED};
pub use paymaster::{Paymaster, PaymasterError, RpcPaymaster, Sponsorship};
pub use user_op::{Call, UserOperation, DUMMY_SIGNATURE};
