//! Builds the read client and the purchase stack from configuration.

use std::sync::Arc;
use tick3t_aa::{
    AccountOptions, FileJournal, RpcBundler, RpcPaymaster, SmartAccountFactory, SmartAccountHandle,
    TransactionOrchestrator,
};
use tick3t_auth::WalletSession;
use tick3t_chain::{EthClient, EventReader, EvmRpcClient, FactoryReader, LocalWalletSigner, RpcPool};
use tick3t_common::config::{AccountSettings, ChainSettings, ProcessEnv};
use tick3t_common::{Result, Tick3tError};

pub fn chain_client(chain: &ChainSettings) -> Arc<dyn EthClient> {
    let pool = Arc::new(RpcPool::new(chain.chain_id, chain.rpc_urls.clone()));
    Arc::new(EvmRpcClient::new(pool))
}

pub fn event_reader() -> Result<Arc<EventReader>> {
    let chain = ChainSettings::from_source(&ProcessEnv)?;
    Ok(Arc::new(EventReader::new(chain_client(&chain), chain.contract_address)))
}

pub fn factory_reader() -> Result<FactoryReader> {
    let chain = ChainSettings::from_source(&ProcessEnv)?;
    Ok(FactoryReader::new(chain_client(&chain), chain.event_factory))
}

/// Everything a purchase needs, connected for the configured owner key.
pub struct PurchaseStack {
    pub chain: ChainSettings,
    pub reader: EventReader,
    pub session: WalletSession,
    pub account: SmartAccountHandle,
    pub orchestrator: TransactionOrchestrator,
}

impl PurchaseStack {
    pub async fn connect() -> Result<Self> {
        let chain = ChainSettings::from_source(&ProcessEnv)?;
        let settings = AccountSettings::from_source(&ProcessEnv)?;
        let client = chain_client(&chain);

        let bundler = RpcBundler::new(Arc::new(RpcPool::new(
            chain.chain_id,
            vec![settings.bundler_url.clone()],
        )));
        let paymaster = RpcPaymaster::new(Arc::new(RpcPool::new(
            chain.chain_id,
            vec![settings.paymaster_url.clone()],
        )));
        let factory = SmartAccountFactory::new(
            client.clone(),
            Arc::new(bundler),
            Arc::new(paymaster),
            AccountOptions::from_settings(&settings),
        );

        // the CLI stands in for the wallet connector with a local key
        let key = settings
            .owner_private_key
            .as_ref()
            .ok_or(Tick3tError::NotAuthenticated)?;
        let signer = LocalWalletSigner::from_secret(key)?;
        let session = WalletSession::new(settings.environment_id.clone());
        session.connect(Arc::new(signer));

        let account = factory.connect_session(&session).await?;

        let journal = Arc::new(FileJournal::new(settings.journal_path.clone()));
        Ok(Self {
            reader: EventReader::new(client, chain.contract_address),
            orchestrator: TransactionOrchestrator::new(chain.contract_address, journal),
            chain,
            session,
            account,
        })
    }
}
