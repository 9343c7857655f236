use rust_decimal::Decimal;
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CalcError {
    #[error("requested {requested} leaves {remaining} after fees, below minimum unit {minimum}")]
    InsufficientAmount {
        requested: Decimal,
        remaining: Decimal,
        minimum: Decimal,
    },

    #[error("pricing snapshot is stale: age {age_secs}s exceeds window {window_secs}s")]
    StalePricing { age_secs: u64, window_secs: u64 },

    #[error("snapshot priced for {snapshot} but intent transfers {intent}")]
    TokenMismatch { intent: String, snapshot: String },

    #[error("requested amount must be positive, got {0}")]
    NonPositiveAmount(Decimal),

    #[error("requested amount {0} is too large to price")]
    AmountOutOfRange(Decimal),
}

impl CalcError {
    /// The caller should fetch a fresh snapshot and compute again
    pub fn needs_refetch(&self) -> bool {
        matches!(self, CalcError::StalePricing { .. })
    }
}

#[derive(Debug, Error)]
pub enum PricingError {
    #[error("no pricing configured for token {0}")]
    UnknownToken(String),

    #[error("pricing source unavailable: {0}")]
    Unavailable(String),
}
