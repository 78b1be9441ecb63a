//! Text rendition of the event page: event details, availability and the
//! purchase button state.

use tick3t_aa::PurchaseState;
use tick3t_chain::{format_ether, U256};
use tick3t_common::{EventInfo, Tick3tError, TransactionResult};

/// Wei as ether without trailing zeros, e.g. `0.01`.
pub fn ether(wei: U256) -> String {
    let full = format_ether(wei);
    match full.split_once('.') {
        Some((whole, frac)) => {
            let frac = frac.trim_end_matches('0');
            if frac.is_empty() {
                whole.to_string()
            } else {
                format!("{whole}.{frac}")
            }
        }
        None => full,
    }
}

#[derive(Debug, Default)]
pub struct PurchasePanel {
    event: Option<EventInfo>,
    account_ready: bool,
    is_buying: bool,
    phase: Option<&'static str>,
    last_result: Option<TransactionResult>,
    error: Option<String>,
    read_error: Option<String>,
}

impl PurchasePanel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn event(&self) -> Option<&EventInfo> {
        self.event.as_ref()
    }

    pub fn is_buying(&self) -> bool {
        self.is_buying
    }

    pub fn last_result(&self) -> Option<&TransactionResult> {
        self.last_result.as_ref()
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Why the most recent refresh failed, until the next one succeeds.
    pub fn read_error(&self) -> Option<&str> {
        self.read_error.as_deref()
    }

    /// A fresh snapshot replaces the previous one wholesale.
    pub fn set_event(&mut self, event: EventInfo) {
        self.event = Some(event);
        self.read_error = None;
    }

    /// A failed refresh keeps the last good snapshot on screen.
    pub fn set_read_error(&mut self, err: &Tick3tError) {
        self.read_error = Some(err.to_string());
    }

    /// Applies one refresh outcome.
    pub fn refresh(&mut self, outcome: Result<EventInfo, Tick3tError>) {
        match outcome {
            Ok(event) => self.set_event(event),
            Err(e) => self.set_read_error(&e),
        }
    }

    pub fn set_account_ready(&mut self, ready: bool) {
        self.account_ready = ready;
    }

    pub fn can_purchase(&self) -> bool {
        match &self.event {
            Some(event) => !self.is_buying && self.account_ready && !event.is_sold_out(),
            None => false,
        }
    }

    /// Button press. Rejects the click unless a purchase may start.
    pub fn begin_purchase(&mut self) -> Result<(), Tick3tError> {
        if self.is_buying {
            return Err(Tick3tError::PurchaseInFlight);
        }
        let event = self
            .event
            .as_ref()
            .ok_or_else(|| Tick3tError::ReadFailed("event not loaded".into()))?;
        if !self.account_ready {
            return Err(Tick3tError::AccountNotReady);
        }
        if event.is_sold_out() {
            return Err(Tick3tError::SoldOut);
        }
        self.is_buying = true;
        self.phase = None;
        self.error = None;
        Ok(())
    }

    pub fn observe(&mut self, state: &PurchaseState) {
        if self.is_buying {
            self.phase = Some(state.label());
        }
    }

    pub fn finish_purchase(&mut self, result: TransactionResult) {
        self.is_buying = false;
        self.phase = None;
        self.error = result.error.clone();
        self.last_result = Some(result);
    }

    fn status_line(&self) -> String {
        let Some(event) = &self.event else {
            return match &self.read_error {
                Some(err) => format!("Status: {err}"),
                None => "Status: loading event...".into(),
            };
        };
        if self.is_buying {
            return format!("Status: purchasing ({})", self.phase.unwrap_or("starting"));
        }
        if let Some(err) = &self.error {
            return format!("Status: error: {err}");
        }
        if let Some(err) = &self.read_error {
            return format!("Status: refresh failed, showing last snapshot: {err}");
        }
        if let Some(TransactionResult {
            success: true,
            transaction_hash: Some(tx),
            ..
        }) = &self.last_result
        {
            return format!("Status: ticket purchased (tx {tx})");
        }
        if event.is_sold_out() {
            "Status: sold out".into()
        } else if !self.account_ready {
            "Status: connect a wallet to buy".into()
        } else {
            "Status: ready to buy".into()
        }
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        if let Some(event) = &self.event {
            let date = event
                .starts_at()
                .map(|d| d.format("%Y-%m-%d %H:%M UTC").to_string())
                .unwrap_or_else(|| "date unknown".into());
            out.push_str(&format!("{}\n", event.name));
            out.push_str(&format!("{} | {date}\n", event.location));
            out.push_str(&format!("{}\n", event.url));
            out.push_str(&format!("Price: {} ETH\n", ether(event.price)));
            out.push_str(&format!(
                "Tickets: {}/{} available\n",
                event.available_tickets(),
                event.n_tickets
            ));
            let button = if self.can_purchase() { "[ Buy ticket ]" } else { "[ Buy ticket ] (disabled)" };
            out.push_str(&format!("{button}\n"));
        }
        out.push_str(&self.status_line());
        out
    }
}
