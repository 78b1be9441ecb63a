use serde::Serialize;
use serde_json::{json, Value};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tick3t_aa::{PurchaseCall, PurchaseState};
use tick3t_attest::{
    AccessControlCondition, ConditionKind, ConditionalEncryption, EmailProof, EmailProver,
    EncryptedPayload, LitGatewayClient, UnverifiedEmail, VlayerProver,
};
use tick3t_auth::{TelegramLogin, TelegramLoginIssuer};
use tick3t_chain::{parse_ether, ChainRegistry, EventSource, RefreshTask, U256};
use tick3t_common::config::{LitSettings, ProcessEnv, TelegramSettings, VlayerSettings};
use tick3t_common::{Address, NewEvent, Result, Tick3tError, TransactionResult};
use tracing::info;

use tick3t_cli::PurchasePanel;

use crate::wiring::{self, PurchaseStack};

fn to_json<T: Serialize>(value: &T) -> Result<Value> {
    serde_json::to_value(value).map_err(|e| Tick3tError::Unknown(e.to_string()))
}

fn read_file(path: &Path) -> Result<String> {
    std::fs::read_to_string(path)
        .map_err(|e| Tick3tError::Config(format!("cannot read {}: {e}", path.display())))
}

/// Accepts the output of `email-proof` or a bare prover result.
pub fn load_proof(path: &Path) -> Result<EmailProof> {
    let value: Value = serde_json::from_str(&read_file(path)?)
        .map_err(|e| Tick3tError::Config(format!("{} is not JSON: {e}", path.display())))?;
    Ok(EmailProof::from_prover_result(&value)?)
}

/// Purchase result plus an explorer link when the chain has one.
pub fn purchase_output(chain_id: u64, result: &TransactionResult) -> Result<Value> {
    let mut value = to_json(result)?;
    let explorer = result
        .transaction_hash
        .as_deref()
        .and_then(|tx| ChainRegistry::new().get_chain(chain_id).tx_url(tx));
    if let (Some(url), Some(map)) = (explorer, value.as_object_mut()) {
        map.insert("explorerUrl".into(), Value::String(url));
    }
    Ok(value)
}

pub async fn event() -> Result<Value> {
    let reader = wiring::event_reader()?;
    let event = reader.get_event_info().await?;
    Ok(json!({
        "event": event,
        "availableTickets": event.available_tickets().to_string(),
        "soldOut": event.is_sold_out(),
    }))
}

pub async fn watch(interval: u64, jitter: u64) -> Result<Value> {
    let reader = wiring::event_reader()?;
    let refreshes = Arc::new(AtomicU64::new(0));
    let counter = refreshes.clone();
    let mut panel = PurchasePanel::new();

    let task = RefreshTask::spawn(
        reader,
        Duration::from_secs(interval.max(1)),
        Duration::from_secs(jitter),
        move |outcome| {
            counter.fetch_add(1, Ordering::Relaxed);
            panel.refresh(outcome);
            println!("{}\n", panel.render());
        },
    );

    tokio::signal::ctrl_c()
        .await
        .map_err(|e| Tick3tError::Unknown(format!("signal handler: {e}")))?;
    task.cancel();
    info!("watch stopped");
    Ok(json!({ "refreshes": refreshes.load(Ordering::Relaxed) }))
}

pub async fn ticket_info(token_id: U256) -> Result<Value> {
    let reader = wiring::event_reader()?;
    let ticket = reader.get_ticket_info(token_id).await?;
    Ok(json!({ "tokenId": token_id.to_string(), "ticket": ticket }))
}

pub async fn has_ticket(owner: Address) -> Result<Value> {
    let reader = wiring::event_reader()?;
    Ok(json!({ "owner": owner, "hasTicket": reader.has_ticket(owner).await? }))
}

pub async fn verify_ticket(token_id: U256) -> Result<Value> {
    let reader = wiring::event_reader()?;
    let valid = reader.verify_ticket(token_id).await?;
    Ok(json!({ "tokenId": token_id.to_string(), "valid": valid }))
}

pub async fn events(past: bool, owner: Option<Address>) -> Result<Value> {
    let factory = wiring::factory_reader()?;
    let events = match (owner, past) {
        (Some(owner), _) => factory.events_by_owner(owner).await?,
        (None, true) => factory.past_events().await?,
        (None, false) => factory.future_events().await?,
    };
    Ok(json!({ "factory": factory.factory(), "events": events }))
}

pub async fn event_counts() -> Result<Value> {
    let factory = wiring::factory_reader()?;
    to_json(&factory.event_counts().await?)
}

/// Ether amount such as `0.01` to wei.
pub fn price_in_wei(ether: &str) -> Result<U256> {
    let ether = ether.trim();
    if ether.starts_with('-') {
        return Err(Tick3tError::Config(format!("negative price: {ether}")));
    }
    parse_ether(ether).map_err(|e| Tick3tError::Config(format!("invalid price {ether}: {e}")))
}

pub async fn create_event(event: NewEvent) -> Result<Value> {
    let stack = PurchaseStack::connect().await?;
    let factory = stack.chain.event_factory;
    let result = stack
        .orchestrator
        .create_event(Some(&stack.account), factory, &event)
        .await;
    let mut value = purchase_output(stack.chain.chain_id, &result)?;
    if let Some(map) = value.as_object_mut() {
        map.insert("factory".into(), json!(factory));
    }
    Ok(value)
}

pub async fn account() -> Result<Value> {
    let stack = PurchaseStack::connect().await?;
    let deployed = stack.account.is_deployed().await?;
    Ok(json!({
        "address": stack.account.address(),
        "owner": stack.account.owner(),
        "deployed": deployed,
        "chainId": stack.account.chain_id(),
        "entryPoint": stack.account.entry_point(),
        "environmentId": stack.session.environment_id(),
    }))
}

pub async fn buy(proof: Option<&Path>) -> Result<Value> {
    let call = match proof {
        Some(path) => PurchaseCall::ProofGatedBuy(load_proof(path)?),
        None => PurchaseCall::PlainBuy,
    };
    let stack = PurchaseStack::connect().await?;

    let panel = Arc::new(Mutex::new(PurchasePanel::new()));
    let event = {
        let read = stack.reader.get_event_info().await;
        let mut view = panel.lock().unwrap_or_else(PoisonError::into_inner);
        view.set_account_ready(true);
        match read {
            Ok(event) => {
                view.set_event(event.clone());
                event
            }
            Err(e) => {
                view.set_read_error(&e);
                eprintln!("{}", view.render());
                return Err(e);
            }
        }
    };

    let refused = {
        let mut view = panel.lock().unwrap_or_else(PoisonError::into_inner);
        view.begin_purchase().err()
    };
    if let Some(e) = refused {
        eprintln!("{}", panel.lock().unwrap_or_else(PoisonError::into_inner).render());
        return to_json(&TransactionResult::failed(&e));
    }

    let mut progress = stack.orchestrator.subscribe();
    let observer = panel.clone();
    let watcher = tokio::spawn(async move {
        while progress.changed().await.is_ok() {
            let state: PurchaseState = progress.borrow_and_update().clone();
            info!(state = state.label(), "purchase progress");
            observer
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .observe(&state);
            if state.is_terminal() {
                break;
            }
        }
    });

    let result = stack
        .orchestrator
        .purchase(Some(&stack.account), &event, call)
        .await;
    watcher.abort();

    let mut view = panel.lock().unwrap_or_else(PoisonError::into_inner);
    view.finish_purchase(result.clone());
    eprintln!("{}", view.render());
    purchase_output(stack.chain.chain_id, &result)
}

pub async fn resume() -> Result<Value> {
    let stack = PurchaseStack::connect().await?;
    let results = stack.orchestrator.resume(&stack.account).await?;
    let settled = results
        .iter()
        .map(|r| purchase_output(stack.chain.chain_id, r))
        .collect::<Result<Vec<_>>>()?;
    Ok(json!({
        "success": results.iter().all(|r| r.success),
        "account": stack.account.address(),
        "results": settled,
    }))
}

pub async fn lit_encrypt(
    kind: &str,
    amount: &str,
    contract: &str,
    message: &str,
    chain: &str,
    out: &Path,
) -> Result<Value> {
    let settings = LitSettings::from_source(&ProcessEnv)?;
    let kind: ConditionKind = kind.parse()?;
    let conditions = AccessControlCondition::build(kind, chain, contract, amount)?;
    let client = LitGatewayClient::new(settings.gateway_url, settings.network);
    let payload = client.encrypt(message, conditions, chain).await?;
    payload.save(out)?;
    info!(file = %out.display(), network = client.network(), "encrypted data saved");
    Ok(json!({
        "ciphertext": payload.ciphertext,
        "dataToEncryptHash": payload.data_to_encrypt_hash,
        "file": out.display().to_string(),
    }))
}

pub async fn lit_decrypt(file: &Path) -> Result<Value> {
    let settings = LitSettings::from_source(&ProcessEnv)?;
    let payload = EncryptedPayload::load(file)?;
    let client = LitGatewayClient::new(settings.gateway_url, settings.network);
    let decrypted = client.decrypt(&payload).await?;
    Ok(json!({ "decryptedString": decrypted }))
}

pub async fn email_proof(eml: &Path, dns_records: Option<&Path>, chain_id: u64) -> Result<Value> {
    let settings = VlayerSettings::from_source(&ProcessEnv)?;
    let records: Vec<String> = match dns_records {
        Some(path) => serde_json::from_str(&read_file(path)?)
            .map_err(|e| Tick3tError::Config(format!("{} is not a JSON string array: {e}", path.display())))?,
        None => Vec::new(),
    };
    let email = UnverifiedEmail::new(read_file(eml)?, records);
    if let Some(name) = email.dkim_record_name() {
        info!(record = %name, "proving email");
    }
    let prover = VlayerProver::new(&settings, chain_id);
    let result = prover.prove(&email).await?;
    Ok(json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "hash": result.hash,
        "proof": result.proof,
        "raw": result.raw,
        "email": { "dnsRecords": email.dns_records },
    }))
}

pub fn telegram_link(login: TelegramLogin) -> Result<Value> {
    let settings = TelegramSettings::from_source(&ProcessEnv)?;
    let link = TelegramLoginIssuer::new(&settings).issue(&login)?;
    to_json(&link)
}
