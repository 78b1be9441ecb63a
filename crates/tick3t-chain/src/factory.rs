//! Read client for the event factory's listing views.

use alloy_sol_types::SolCall;
use std::sync::Arc;
use tick3t_common::{Address, EventCounts, Result, Tick3tError};
use tracing::{debug, warn};

use crate::contracts::IEventFactory;
use crate::rpc::EthClient;

/// Lists the ticketing contracts an event factory has deployed. No caching.
pub struct FactoryReader {
    client: Arc<dyn EthClient>,
    factory: Address,
}

impl FactoryReader {
    pub fn new(client: Arc<dyn EthClient>, factory: Address) -> Self {
        Self { client, factory }
    }

    pub fn factory(&self) -> Address {
        self.factory
    }

    async fn view<C: SolCall>(&self, call: C) -> Result<C::Return> {
        debug!(factory = %self.factory, view = C::SIGNATURE, "reading factory");
        let raw = self
            .client
            .call(&self.factory, &call.abi_encode())
            .await
            .map_err(|e| {
                warn!(factory = %self.factory, view = C::SIGNATURE, error = %e, "factory call failed");
                Tick3tError::ReadFailed(e.to_string())
            })?;
        C::abi_decode_returns(&raw).map_err(|e| {
            warn!(factory = %self.factory, view = C::SIGNATURE, error = %e, len = raw.len(), "factory decode failed");
            Tick3tError::ReadFailed(e.to_string())
        })
    }

    /// Events that have not started yet.
    pub async fn future_events(&self) -> Result<Vec<Address>> {
        let events = self.view(IEventFactory::getFutureEventsCall {}).await?;
        Ok(events.into_iter().map(Address::from).collect())
    }

    pub async fn past_events(&self) -> Result<Vec<Address>> {
        let events = self.view(IEventFactory::getPastEventsCall {}).await?;
        Ok(events.into_iter().map(Address::from).collect())
    }

    /// Events created by `owner`, past and future.
    pub async fn events_by_owner(&self, owner: Address) -> Result<Vec<Address>> {
        let events = self
            .view(IEventFactory::getEventsByOwnerCall {
                owner: owner.into(),
            })
            .await?;
        Ok(events.into_iter().map(Address::from).collect())
    }

    pub async fn event_counts(&self) -> Result<EventCounts> {
        let counts = self.view(IEventFactory::getEventCountsCall {}).await?;
        Ok(EventCounts {
            future: counts.future,
            past: counts.past,
        })
    }
}
