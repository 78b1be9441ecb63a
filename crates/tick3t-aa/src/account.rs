//! Counterfactual SimpleAccount smart accounts, one per wallet signer.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use alloy_primitives::aliases::U192;
use alloy_primitives::U256;
use alloy_sol_types::SolCall;
use thiserror::Error;
use tick3t_auth::{SessionEvent, WalletSession};
use tick3t_chain::contracts::{IEntryPoint, ISimpleAccount, ISimpleAccountFactory};
use tick3t_chain::{EthClient, RpcError, SignerError, WalletSigner};
use tick3t_common::config::AccountSettings;
use tick3t_common::{Address, Tick3tError};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::bundler::{self, Bundler, BundlerError, FeeEstimator, UserOpReceipt};
use crate::paymaster::{Paymaster, PaymasterError};
use crate::user_op::{Call, UserOperation, DUMMY_SIGNATURE};

#[derive(Debug, Error)]
pub enum AccountError {
    #[error("wallet not authenticated")]
    NotAuthenticated,
    #[error("{0} disconnected while its smart account was being created")]
    Disconnected(Address),
    #[error("invalid smart account address: {0}")]
    InvalidAccount(String),
    #[error("invalid call batch: {0}")]
    InvalidCalls(String),
    #[error("a send is already in flight for {0}")]
    SendInFlight(Address),
    #[error(transparent)]
    Rpc(#[from] RpcError),
    #[error(transparent)]
    Bundler(#[from] BundlerError),
    #[error(transparent)]
    Paymaster(#[from] PaymasterError),
    #[error(transparent)]
    Signer(#[from] SignerError),
}

impl From<AccountError> for Tick3tError {
    fn from(err: AccountError) -> Self {
        match err {
            AccountError::NotAuthenticated | AccountError::Disconnected(_) => Tick3tError::NotAuthenticated,
            AccountError::InvalidAccount(msg) => Tick3tError::InvalidAccount(msg),
            AccountError::SendInFlight(_) => Tick3tError::PurchaseInFlight,
            AccountError::Rpc(e) => e.into(),
            AccountError::Bundler(e) => e.into(),
            AccountError::Paymaster(e) => e.into(),
            AccountError::Signer(e) => e.into(),
            other @ AccountError::InvalidCalls(_) => Tick3tError::Unknown(other.to_string()),
        }
    }
}

/// Where and how smart accounts are created and operated.
#[derive(Debug, Clone)]
pub struct AccountOptions {
    pub entry_point: Address,
    pub factory: Address,
    pub salt: u64,
    pub fees: FeeEstimator,
    pub receipt_poll_interval: Duration,
    pub receipt_timeout: Duration,
}

impl AccountOptions {
    pub fn from_settings(settings: &AccountSettings) -> Self {
        Self {
            entry_point: settings.entry_point,
            factory: settings.account_factory,
            salt: settings.salt,
            fees: FeeEstimator::default(),
            receipt_poll_interval: Duration::from_secs(2),
            receipt_timeout: Duration::from_secs(120),
        }
    }

    pub fn with_receipt_polling(mut self, poll_interval: Duration, timeout: Duration) -> Self {
        self.receipt_poll_interval = poll_interval;
        self.receipt_timeout = timeout;
        self
    }
}

/// Progress of a send, reported before each step starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendPhase {
    Building,
    Sponsoring,
}

/// A user operation the bundler has accepted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmittedOperation {
    pub user_op_hash: String,
    pub user_op: UserOperation,
}

/// Account state for one owner.
///
/// `creating` serialises creation. `epoch` is unique per slot and changes on
/// every disconnect, so a creation that started before a disconnect cannot
/// publish its handle afterwards.
struct AccountSlot {
    creating: Arc<tokio::sync::Mutex<()>>,
    handle: Option<SmartAccountHandle>,
    epoch: u64,
}

/// Creates and caches smart-account handles, one per signer address.
pub struct SmartAccountFactory {
    client: Arc<dyn EthClient>,
    bundler: Arc<dyn Bundler>,
    paymaster: Arc<dyn Paymaster>,
    options: AccountOptions,
    accounts: Mutex<HashMap<Address, AccountSlot>>,
    epochs: AtomicU64,
}

impl SmartAccountFactory {
    pub fn new(
        client: Arc<dyn EthClient>,
        bundler: Arc<dyn Bundler>,
        paymaster: Arc<dyn Paymaster>,
        options: AccountOptions,
    ) -> Self {
        Self {
            client,
            bundler,
            paymaster,
            options,
            accounts: Mutex::new(HashMap::new()),
            epochs: AtomicU64::new(0),
        }
    }

    fn accounts(&self) -> MutexGuard<'_, HashMap<Address, AccountSlot>> {
        self.accounts.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn next_epoch(&self) -> u64 {
        self.epochs.fetch_add(1, Ordering::Relaxed)
    }

    pub fn options(&self) -> &AccountOptions {
        &self.options
    }

    /// Handle for the session's current signer.
    pub async fn connect_session(&self, session: &WalletSession) -> Result<SmartAccountHandle, AccountError> {
        let signer = session.signer().map_err(|_| AccountError::NotAuthenticated)?;
        self.connect(signer).await
    }

    /// Handle bound to `signer`.
    ///
    /// At most one creation per owner runs at a time, including across a
    /// disconnect and reconnect; later callers wait for it and reuse its
    /// handle. A failed creation leaves nothing cached. A caller whose owner
    /// is disconnected before its creation finishes gets
    /// [`AccountError::Disconnected`] and no handle.
    pub async fn connect(&self, signer: Arc<dyn WalletSigner>) -> Result<SmartAccountHandle, AccountError> {
        let owner = signer.address();
        let (creating, epoch) = {
            let mut accounts = self.accounts();
            let slot = accounts.entry(owner).or_insert_with(|| AccountSlot {
                creating: Arc::new(tokio::sync::Mutex::new(())),
                handle: None,
                epoch: self.next_epoch(),
            });
            if let Some(handle) = &slot.handle {
                return Ok(handle.clone());
            }
            (Arc::clone(&slot.creating), slot.epoch)
        };

        let _creating = creating.lock().await;
        match self.accounts().get(&owner) {
            Some(slot) if slot.epoch == epoch => {
                if let Some(handle) = &slot.handle {
                    return Ok(handle.clone());
                }
            }
            _ => return Err(AccountError::Disconnected(owner)),
        }

        let handle = self.create(signer).await?;
        let mut accounts = self.accounts();
        match accounts.get_mut(&owner) {
            Some(slot) if slot.epoch == epoch => {
                slot.handle = Some(handle.clone());
                Ok(handle)
            }
            _ => {
                warn!(owner = %owner, account = %handle.address(), "owner disconnected during creation; handle dropped");
                Err(AccountError::Disconnected(owner))
            }
        }
    }

    /// Cached handle for `owner`, if one was created.
    pub fn handle(&self, owner: &Address) -> Option<SmartAccountHandle> {
        self.accounts().get(owner).and_then(|slot| slot.handle.clone())
    }

    /// Discard the handle for `owner` and invalidate any creation in
    /// progress. Returns whether the owner had a handle or a creation.
    pub fn disconnect(&self, owner: &Address) -> bool {
        let mut accounts = self.accounts();
        let Some(slot) = accounts.get_mut(owner) else {
            return false;
        };
        slot.handle = None;
        slot.epoch = self.next_epoch();
        // Keep the slot while a creation holds its lock so a reconnect
        // queues behind that creation instead of starting a second one.
        if slot.creating.try_lock().is_ok() {
            accounts.remove(owner);
        }
        info!(owner = %owner, "smart account handle discarded");
        true
    }

    /// Drop handles when their signer disconnects from `session`.
    pub fn follow_session(self: &Arc<Self>, session: &WalletSession) -> JoinHandle<()> {
        let factory = Arc::clone(self);
        let mut events = session.subscribe();
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(SessionEvent::Disconnected(owner)) => {
                        factory.disconnect(&owner);
                    }
                    Ok(SessionEvent::Connected(owner)) => {
                        debug!(owner = %owner, "signer connected");
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(missed = n, "session events lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }

    async fn create(&self, signer: Arc<dyn WalletSigner>) -> Result<SmartAccountHandle, AccountError> {
        let owner = signer.address();
        let entry_point = self.options.entry_point;
        let supported = self.bundler.supported_entry_points().await?;
        if !supported.contains(&entry_point) {
            return Err(BundlerError::UnsupportedEntryPoint(entry_point).into());
        }

        let address = self.counterfactual_address(&owner).await?;
        let deployed = !self.client.get_code(&address).await?.is_empty();
        info!(owner = %owner, account = %address, deployed, "smart account ready");

        Ok(SmartAccountHandle {
            inner: Arc::new(HandleInner {
                address,
                owner,
                signer,
                client: Arc::clone(&self.client),
                bundler: Arc::clone(&self.bundler),
                paymaster: Arc::clone(&self.paymaster),
                options: self.options.clone(),
                deployed: AtomicBool::new(deployed),
                send_lock: tokio::sync::Mutex::new(()),
            }),
        })
    }

    async fn counterfactual_address(&self, owner: &Address) -> Result<Address, AccountError> {
        let call = ISimpleAccountFactory::getAddressCall {
            owner: (*owner).into(),
            salt: U256::from(self.options.salt),
        };
        let raw = self.client.call(&self.options.factory, &call.abi_encode()).await?;
        let address = ISimpleAccountFactory::getAddressCall::abi_decode_returns(&raw).map_err(|_| {
            AccountError::InvalidAccount(format!("factory returned 0x{}", hex::encode(&raw)))
        })?;
        validate_account_address(address.into())
    }
}

fn validate_account_address(address: Address) -> Result<Address, AccountError> {
    let text = address.to_string();
    if !Address::is_well_formed(&text) || address.is_zero() {
        return Err(AccountError::InvalidAccount(text));
    }
    Ok(address)
}

/// Smart account bound to one signer. Clones share state.
#[derive(Clone)]
pub struct SmartAccountHandle {
    inner: Arc<HandleInner>,
}

struct HandleInner {
    address: Address,
    owner: Address,
    signer: Arc<dyn WalletSigner>,
    client: Arc<dyn EthClient>,
    bundler: Arc<dyn Bundler>,
    paymaster: Arc<dyn Paymaster>,
    options: AccountOptions,
    deployed: AtomicBool,
    send_lock: tokio::sync::Mutex<()>,
}

impl std::fmt::Debug for SmartAccountHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SmartAccountHandle")
            .field("address", &self.inner.address)
            .field("owner", &self.inner.owner)
            .finish()
    }
}

impl SmartAccountHandle {
    pub fn address(&self) -> Address {
        self.inner.address
    }

    pub fn owner(&self) -> Address {
        self.inner.owner
    }

    pub fn chain_id(&self) -> u64 {
        self.inner.client.chain_id()
    }

    pub fn entry_point(&self) -> Address {
        self.inner.options.entry_point
    }

    /// True if two handles share the same underlying account state.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Whether the account contract exists on chain. Until it does, every
    /// operation carries the factory init code.
    pub async fn is_deployed(&self) -> Result<bool, AccountError> {
        if self.inner.deployed.load(Ordering::Acquire) {
            return Ok(true);
        }
        let deployed = !self.inner.client.get_code(&self.inner.address).await?.is_empty();
        if deployed {
            self.inner.deployed.store(true, Ordering::Release);
        }
        Ok(deployed)
    }

    /// Next EntryPoint nonce (key 0).
    pub async fn nonce(&self) -> Result<U256, AccountError> {
        let call = IEntryPoint::getNonceCall {
            sender: self.inner.address.into(),
            key: U192::ZERO,
        };
        let raw = self
            .inner
            .client
            .call(&self.inner.options.entry_point, &call.abi_encode())
            .await?;
        IEntryPoint::getNonceCall::abi_decode_returns(&raw)
            .map_err(|e| RpcError::Deserialize(format!("getNonce returned malformed data: {e}")).into())
    }

    /// `factory ++ createAccount(owner, salt)`.
    pub fn init_code(&self) -> Vec<u8> {
        let options = &self.inner.options;
        let mut code = options.factory.as_bytes().to_vec();
        let create = ISimpleAccountFactory::createAccountCall {
            owner: self.inner.owner.into(),
            salt: U256::from(options.salt),
        };
        code.extend(create.abi_encode());
        code
    }

    /// Account call data executing `calls`.
    pub fn encode_calls(calls: &[Call]) -> Result<Vec<u8>, AccountError> {
        match calls {
            [] => Err(AccountError::InvalidCalls("no calls".into())),
            [call] => Ok(ISimpleAccount::executeCall {
                dest: call.to.into(),
                value: call.value,
                func: call.data.clone().into(),
            }
            .abi_encode()),
            many => {
                if many.iter().any(|c| !c.value.is_zero()) {
                    return Err(AccountError::InvalidCalls(
                        "batched calls cannot carry value".into(),
                    ));
                }
                Ok(ISimpleAccount::executeBatchCall {
                    dest: many.iter().map(|c| c.to.into()).collect(),
                    func: many.iter().map(|c| c.data.clone().into()).collect(),
                }
                .abi_encode())
            }
        }
    }

    /// Unsigned, unsponsored operation for `calls` with estimated gas.
    pub async fn build_user_op(&self, calls: &[Call]) -> Result<UserOperation, AccountError> {
        let inner = &self.inner;
        let call_data = Self::encode_calls(calls)?;
        let init_code = if self.is_deployed().await? {
            Vec::new()
        } else {
            self.init_code()
        };
        let nonce = self.nonce().await?;
        let fees = inner.options.fees.fetch(inner.client.as_ref()).await?;

        let mut op = UserOperation {
            sender: inner.address,
            nonce,
            init_code,
            call_data,
            call_gas_limit: 0,
            verification_gas_limit: 0,
            pre_verification_gas: 0,
            max_fee_per_gas: fees.max_fee_per_gas,
            max_priority_fee_per_gas: fees.max_priority_fee_per_gas,
            paymaster_and_data: Vec::new(),
            signature: DUMMY_SIGNATURE.to_vec(),
        };
        let gas = inner.bundler.estimate_gas(&op, &inner.options.entry_point).await?;
        op.call_gas_limit = inner.options.fees.adjust_gas(gas.call_gas_limit);
        op.verification_gas_limit = inner.options.fees.adjust_gas(gas.verification_gas_limit);
        op.pre_verification_gas = gas.pre_verification_gas;
        debug!(
            account = %inner.address,
            %nonce,
            deploying = !op.init_code.is_empty(),
            total_gas = op.total_gas(),
            "user operation built"
        );
        Ok(op)
    }

    /// Attach paymaster sponsorship.
    pub async fn sponsor(&self, op: &mut UserOperation) -> Result<(), AccountError> {
        let sponsorship = self.inner.paymaster.sponsor(op).await?;
        sponsorship.apply(op);
        Ok(())
    }

    /// Owner signature over the user operation hash.
    pub async fn sign(&self, op: &mut UserOperation) -> Result<(), AccountError> {
        let hash = op.hash(&self.inner.options.entry_point, self.chain_id());
        let signature = self.inner.signer.sign_message(&hash).await?;
        op.signature = signature.to_vec();
        Ok(())
    }

    /// Build, sponsor, sign and submit `calls`.
    pub async fn send(&self, calls: &[Call]) -> Result<SubmittedOperation, AccountError> {
        self.send_with_progress(calls, |_| {}).await
    }

    /// [`send`](Self::send), reporting each phase to `progress`. Fails with
    /// [`AccountError::SendInFlight`] while another send is running.
    pub async fn send_with_progress<F>(&self, calls: &[Call], mut progress: F) -> Result<SubmittedOperation, AccountError>
    where
        F: FnMut(SendPhase) + Send,
    {
        let inner = &self.inner;
        let _guard = inner
            .send_lock
            .try_lock()
            .map_err(|_| AccountError::SendInFlight(inner.address))?;

        progress(SendPhase::Building);
        let mut op = self.build_user_op(calls).await?;

        progress(SendPhase::Sponsoring);
        self.sponsor(&mut op).await?;
        self.sign(&mut op).await?;

        let user_op_hash = inner
            .bundler
            .send_user_operation(&op, &inner.options.entry_point)
            .await?;
        Ok(SubmittedOperation { user_op_hash, user_op: op })
    }

    /// Poll the bundler until `user_op_hash` is included.
    pub async fn wait_for_receipt(&self, user_op_hash: &str) -> Result<UserOpReceipt, AccountError> {
        let options = &self.inner.options;
        let receipt = bundler::wait_for_receipt(
            self.inner.bundler.as_ref(),
            user_op_hash,
            options.receipt_poll_interval,
            options.receipt_timeout,
        )
        .await?;
        if receipt.success {
            // Any included op from this sender implies the account exists.
            self.inner.deployed.store(true, Ordering::Release);
        }
        Ok(receipt)
    }
}
