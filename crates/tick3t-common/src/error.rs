use thiserror::Error;

/// Failure taxonomy surfaced to callers of the purchase and read flows.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Tick3tError {
    #[error("wallet not authenticated")]
    NotAuthenticated,

    #[error("smart account not ready")]
    AccountNotReady,

    #[error("service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("sponsorship denied: {0}")]
    SponsorshipDenied(String),

    #[error("failed to read event info: {0}")]
    ReadFailed(String),

    #[error("invalid smart account: {0}")]
    InvalidAccount(String),

    #[error("event is sold out")]
    SoldOut,

    #[error("a purchase is already in flight")]
    PurchaseInFlight,

    #[error("configuration error: {0}")]
    Config(String),

    #[error("{0}")]
    Unknown(String),
}

impl Tick3tError {
    /// Stable machine-readable code, used by the gateway and CLI JSON output.
    pub fn code(&self) -> &'static str {
        match self {
            Tick3tError::NotAuthenticated => "NOT_AUTHENTICATED",
            Tick3tError::AccountNotReady => "ACCOUNT_NOT_READY",
            Tick3tError::ServiceUnavailable(_) => "SERVICE_UNAVAILABLE",
            Tick3tError::SponsorshipDenied(_) => "SPONSORSHIP_DENIED",
            Tick3tError::ReadFailed(_) => "READ_FAILED",
            Tick3tError::InvalidAccount(_) => "INVALID_ACCOUNT",
            Tick3tError::SoldOut => "SOLD_OUT",
            Tick3tError::PurchaseInFlight => "PURCHASE_IN_FLIGHT",
            Tick3tError::Config(_) => "CONFIG_ERROR",
            Tick3tError::Unknown(_) => "UNKNOWN",
        }
    }
}

pub type Result<T> = std::result::Result<T, Tick3tError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_is_human_readable() {
        let err = Tick3tError::SponsorshipDenied("policy rejected sender".into());
        assert_eq!(err.to_string(), "sponsorship denied: policy rejected sender");
        assert_eq!(Tick3tError::SoldOut.to_string(), "event is sold out");
    }

    #[test]
    fn test_codes_are_distinct() {
        let errs = [
            Tick3tError::NotAuthenticated,
            Tick3tError::AccountNotReady,
            Tick3tError::ServiceUnavailable(String::new()),
            Tick3tError::SponsorshipDenied(String::new()),
            Tick3tError::ReadFailed(String::new()),
            Tick3tError::InvalidAccount(String::new()),
            Tick3tError::SoldOut,
            Tick3tError::PurchaseInFlight,
            Tick3tError::Config(String::new()),
            Tick3tError::Unknown(String::new()),
        ];
        let mut codes: Vec<_> = errs.iter().map(|e| e.code()).collect();
        codes.sort();
        codes.dedup();
        assert_eq!(codes.len(), errs.len());
    }
}
