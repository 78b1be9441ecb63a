use std::path::PathBuf;
use std::sync::Arc;

use tick3t_attest::{EmailProver, VlayerProver};
use tick3t_chain::{EventReader, EventSource, EvmRpcClient, RpcPool};
use tick3t_common::config::{ChainSettings, ConfigError, EnvSource, GatewaySettings, VlayerSettings};

/// Shared services behind the HTTP routes
#[derive(Clone)]
pub struct AppState {
    pub data_dir: PathBuf,
    pub events: Arc<dyn EventSource>,
    pub prover: Arc<dyn EmailProver>,
}

impl AppState {
    pub fn new(data_dir: impl Into<PathBuf>, events: Arc<dyn EventSource>, prover: Arc<dyn EmailProver>) -> Self {
        Self {
            data_dir: data_dir.into(),
            events,
            prover,
        }
    }

    /// Wire the read client and prover from configuration.
    pub fn from_source(src: &dyn EnvSource) -> Result<(Self, GatewaySettings), ConfigError> {
        let chain = ChainSettings::from_source(src)?;
        let vlayer = VlayerSettings::from_source(src)?;
        let gateway = GatewaySettings::from_source(src)?;

        let pool = Arc::new(RpcPool::new(chain.chain_id, chain.rpc_urls.clone()));
        let client = Arc::new(EvmRpcClient::new(pool));
        let events = Arc::new(EventReader::new(client, chain.contract_address));
        let prover = Arc::new(VlayerProver::new(&vlayer, chain.chain_id));

        Ok((Self::new(gateway.data_dir.clone(), events, prover), gateway))
    }

    pub fn data_file(&self, name: &str) -> PathBuf {
        self.data_dir.join(name)
    }
}
