use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Amounts computed for a single transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeBreakdown {
    /// Amount delivered to the destination account
    pub transfer_amount: Decimal,

    /// Fee paid to the ledger for inclusion
    pub network_fee: Decimal,

    /// Fee retained by the platform
    pub platform_fee: Decimal,
}

impl FeeBreakdown {
    /// Total debited from the source account
    pub fn total(&self) -> Decimal {
        self.transfer_amount + self.network_fee + self.platform_fee
    }
}
