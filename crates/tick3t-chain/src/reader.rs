//! Read client for one ticketing contract: `getEventInfo()` and the
//! per-ticket views.

use alloy_primitives::U256;
use alloy_sol_types::SolCall;
use async_trait::async_trait;
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tick3t_common::{Address, EventInfo, Result, Tick3tError, TicketInfo};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::contracts::IEventTicketing;
use crate::rpc::EthClient;

/// Anything that can produce a fresh event snapshot.
#[async_trait]
pub trait EventSource: Send + Sync {
    async fn get_event_info(&self) -> Result<EventInfo>;
}

/// Stateless reader; every call goes to the node. No caching.
pub struct EventReader {
    client: Arc<dyn EthClient>,
    contract: Address,
}

impl EventReader {
    pub fn new(client: Arc<dyn EthClient>, contract: Address) -> Self {
        Self { client, contract }
    }

    pub fn contract(&self) -> Address {
        self.contract
    }

    /// Decode raw `getEventInfo()` return data.
    pub fn decode_event_info(data: &[u8]) -> Result<EventInfo> {
        IEventTicketing::getEventInfoCall::abi_decode_returns(data)
            .map_err(|e| Tick3tError::ReadFailed(e.to_string()))?
            .try_into()
    }

    /// `eth_call` a view on the contract and decode its return data.
    /// Transport and decode failures both surface as `ReadFailed`.
    async fn view<C: SolCall>(&self, call: C) -> Result<C::Return> {
        let raw = self
            .client
            .call(&self.contract, &call.abi_encode())
            .await
            .map_err(|e| {
                warn!(contract = %self.contract, view = C::SIGNATURE, error = %e, "view call failed");
                Tick3tError::ReadFailed(e.to_string())
            })?;
        C::abi_decode_returns(&raw).map_err(|e| {
            warn!(contract = %self.contract, view = C::SIGNATURE, error = %e, len = raw.len(), "view decode failed");
            Tick3tError::ReadFailed(e.to_string())
        })
    }

    pub async fn get_ticket_info(&self, token_id: U256) -> Result<TicketInfo> {
        debug!(contract = %self.contract, %token_id, "reading ticket info");
        let ticket = self
            .view(IEventTicketing::getTicketInfoCall { tokenId: token_id })
            .await?;
        Ok(ticket.into())
    }

    pub async fn has_ticket(&self, owner: Address) -> Result<bool> {
        self.view(IEventTicketing::hasTicketCall {
            owner: owner.into(),
        })
        .await
    }

    /// Whether `token_id` is a ticket that can still be redeemed.
    pub async fn verify_ticket(&self, token_id: U256) -> Result<bool> {
        self.view(IEventTicketing::verifyTicketCall { tokenId: token_id })
            .await
    }
}

#[async_trait]
impl EventSource for EventReader {
    async fn get_event_info(&self) -> Result<EventInfo> {
        debug!(contract = %self.contract, chain_id = self.client.chain_id(), "reading event info");
        self.view(IEventTicketing::getEventInfoCall {})
            .await?
            .try_into()
    }
}

/// Cloneable trigger for an immediate refresh.
#[derive(Clone)]
pub struct RefreshHandle {
    trigger: Arc<Notify>,
}

impl RefreshHandle {
    pub fn refresh_now(&self) {
        self.trigger.notify_one();
    }
}

/// Scheduled background refresh of an [`EventSource`].
///
/// Fetches once immediately, then after every `interval` plus a random
/// jitter in `[0, jitter]`. Every outcome goes to the sink in fetch order;
/// a failed fetch is logged and handed over as `Err`, and the schedule
/// continues. The task stops on [`RefreshTask::cancel`] or when dropped.
pub struct RefreshTask {
    handle: JoinHandle<()>,
    trigger: Arc<Notify>,
}

impl RefreshTask {
    pub fn spawn<S, F>(source: Arc<S>, interval: Duration, jitter: Duration, mut sink: F) -> Self
    where
        S: EventSource + ?Sized + 'static,
        F: FnMut(Result<EventInfo>) + Send + 'static,
    {
        let trigger = Arc::new(Notify::new());
        let notified = trigger.clone();
        let handle = tokio::spawn(async move {
            loop {
                let outcome = source.get_event_info().await;
                if let Err(e) = &outcome {
                    warn!(error = %e, "scheduled refresh failed");
                }
                sink(outcome);
                let delay = jittered(interval, jitter);
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = notified.notified() => debug!("refresh requested"),
                }
            }
        });
        Self { handle, trigger }
    }

    pub fn handle(&self) -> RefreshHandle {
        RefreshHandle {
            trigger: self.trigger.clone(),
        }
    }

    pub fn refresh_now(&self) {
        self.trigger.notify_one();
    }

    pub fn cancel(&self) {
        self.handle.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

impl Drop for RefreshTask {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

fn jittered(interval: Duration, jitter: Duration) -> Duration {
    let max = jitter.as_millis() as u64;
    if max == 0 {
        return interval;
    }
    interval + Duration::from_millis(rand::thread_rng().gen_range(0..=max))
}
