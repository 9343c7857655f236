use async_trait::async_trait;
use payflow_types::Clock;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::{PricingError, PricingSnapshot};

/// Source of pricing snapshots (market data feed boundary)
#[async_trait]
pub trait PricingSource: Send + Sync {
    async fn snapshot(&self, token: &str) -> Result<PricingSnapshot, PricingError>;
}

/// Fee parameters of one token
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenFees {
    pub network_fee: Decimal,
    pub platform_fee_bps: u32,
    pub min_transfer_unit: Decimal,
    pub decimals: u32,
}

/// Pricing from a fixed fee table, stamped with the current time on every fetch
pub struct StaticPricing {
    tokens: HashMap<String, TokenFees>,
    clock: Arc<dyn Clock>,
}

impl StaticPricing {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            tokens: HashMap::new(),
            clock,
        }
    }

    pub fn with_token(mut self, token: impl Into<String>, fees: TokenFees) -> Self {
        self.tokens.insert(token.into(), fees);
        self
    }

    pub fn tokens(&self) -> impl Iterator<Item = &str> {
        self.tokens.keys().map(String::as_str)
    }
}

#[async_trait]
impl PricingSource for StaticPricing {
    async fn snapshot(&self, token: &str) -> Result<PricingSnapshot, PricingError> {
        let fees = self
            .tokens
            .get(token)
            .ok_or_else(|| PricingError::UnknownToken(token.to_string()))?;

        Ok(PricingSnapshot {
            token: token.to_string(),
            captured_at: self.clock.now(),
            network_fee: fees.network_fee,
            platform_fee_bps: fees.platform_fee_bps,
            min_transfer_unit: fees.min_transfer_unit,
            decimals: fees.decimals,
        })
    }
}

/// Pricing source returning preset snapshots verbatim (for testing)
#[derive(Default)]
pub struct MockPricing {
    snapshots: RwLock<HashMap<String, PricingSnapshot>>,
    fetches: AtomicU64,
}

impl MockPricing {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_snapshot(&self, snapshot: PricingSnapshot) {
        self.snapshots
            .write()
            .await
            .insert(snapshot.token.clone(), snapshot);
    }

    /// Number of snapshots handed out so far
    pub fn fetch_count(&self) -> u64 {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PricingSource for MockPricing {
    async fn snapshot(&self, token: &str) -> Result<PricingSnapshot, PricingError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        self.snapshots
            .read()
            .await
            .get(token)
            .cloned()
            .ok_or_else(|| PricingError::UnknownToken(token.to_string()))
    }
}
