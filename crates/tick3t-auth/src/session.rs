//! Wallet session provider: owns the connected signer for one wallet
//! environment and announces connect/disconnect so account handles can
//! follow the session lifetime.

use std::sync::{Arc, RwLock};

use tick3t_chain::WalletSigner;
use tick3t_common::{Address, Result, Tick3tError};
use tokio::sync::broadcast;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    Connected(Address),
    Disconnected(Address),
}

pub struct WalletSession {
    environment_id: String,
    signer: RwLock<Option<Arc<dyn WalletSigner>>>,
    events: broadcast::Sender<SessionEvent>,
}

impl WalletSession {
    pub fn new(environment_id: impl Into<String>) -> Self {
        let (events, _) = broadcast::channel(16);
        Self {
            environment_id: environment_id.into(),
            signer: RwLock::new(None),
            events,
        }
    }

    pub fn environment_id(&self) -> &str {
        &self.environment_id
    }

    /// Install `signer`, replacing any previous one.
    pub fn connect(&self, signer: Arc<dyn WalletSigner>) -> Address {
        let address = signer.address();
        let previous = self
            .signer
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .replace(signer);

        if let Some(prev) = previous.map(|s| s.address()) {
            if prev != address {
                let _ = self.events.send(SessionEvent::Disconnected(prev));
            }
        }
        info!(environment_id = %self.environment_id, owner = %address, "wallet connected");
        let _ = self.events.send(SessionEvent::Connected(address));
        address
    }

    pub fn disconnect(&self) -> Option<Address> {
        let previous = self
            .signer
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .take()?;
        let address = previous.address();
        info!(environment_id = %self.environment_id, owner = %address, "wallet disconnected");
        let _ = self.events.send(SessionEvent::Disconnected(address));
        Some(address)
    }

    /// The connected signer, or `NotAuthenticated`.
    pub fn signer(&self) -> Result<Arc<dyn WalletSigner>> {
        self.signer
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
            .ok_or(Tick3tError::NotAuthenticated)
    }

    pub fn address(&self) -> Option<Address> {
        self.signer
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .map(|s| s.address())
    }

    pub fn is_authenticated(&self) -> bool {
        self.address().is_some()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }
}
