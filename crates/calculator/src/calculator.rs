use payflow_types::{FeeBreakdown, PaymentIntent};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

use crate::CalcError;

const BPS_DENOMINATOR: u32 = 10_000;

/// Market and fee inputs captured at a single instant for one token
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PricingSnapshot {
    pub token: String,

    /// Unix seconds at which the inputs were observed
    pub captured_at: u64,

    /// Flat fee paid to the ledger, in token units
    pub network_fee: Decimal,

    /// Platform fee in basis points of the requested amount
    pub platform_fee_bps: u32,

    /// Smallest amount the ledger accepts as a transfer
    pub min_transfer_unit: Decimal,

    /// Decimal places of the token; amounts are truncated to this precision
    pub decimals: u32,
}

impl PricingSnapshot {
    pub fn age_secs(&self, now: u64) -> u64 {
        now.saturating_sub(self.captured_at)
    }
}

/// Computes the amounts of a transfer from a pricing snapshot.
///
/// Holds only configuration, so one instance is shared by every worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Calculator {
    freshness_window_secs: u64,
}

impl Calculator {
    pub fn new(freshness_window_secs: u64) -> Self {
        Self {
            freshness_window_secs,
        }
    }

    pub fn freshness_window_secs(&self) -> u64 {
        self.freshness_window_secs
    }

    /// Split the requested amount into transfer, network fee and platform fee.
    ///
    /// Fees are deducted from the requested amount, so `total()` never exceeds
    /// it. The platform fee and transfer amount are rounded toward zero at the
    /// token's precision.
    pub fn compute(
        &self,
        intent: &PaymentIntent,
        snapshot: &PricingSnapshot,
        now: u64,
    ) -> Result<FeeBreakdown, CalcError> {
        if intent.token != snapshot.token {
            return Err(CalcError::TokenMismatch {
                intent: intent.token.clone(),
                snapshot: snapshot.token.clone(),
            });
        }

        let age_secs = snapshot.age_secs(now);
        if age_secs > self.freshness_window_secs {
            return Err(CalcError::StalePricing {
                age_secs,
                window_secs: self.freshness_window_secs,
            });
        }

        let requested = intent.requested_amount;
        if requested <= Decimal::ZERO {
            return Err(CalcError::NonPositiveAmount(requested));
        }

        let platform_fee = requested
            .checked_mul(Decimal::from(snapshot.platform_fee_bps))
            .and_then(|scaled| scaled.checked_div(Decimal::from(BPS_DENOMINATOR)))
            .ok_or(CalcError::AmountOutOfRange(requested))?
            .round_dp_with_strategy(snapshot.decimals, RoundingStrategy::ToZero);
        let network_fee = snapshot.network_fee;

        let remaining = requested
            .checked_sub(network_fee)
            .and_then(|rest| rest.checked_sub(platform_fee))
            .ok_or(CalcError::AmountOutOfRange(requested))?
            .round_dp_with_strategy(snapshot.decimals, RoundingStrategy::ToZero);

        if remaining < snapshot.min_transfer_unit || remaining <= Decimal::ZERO {
            return Err(CalcError::InsufficientAmount {
                requested,
                remaining,
                minimum: snapshot.min_transfer_unit,
            });
        }

        Ok(FeeBreakdown {
            transfer_amount: remaining,
            network_fee,
            platform_fee,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use payflow_types::NewPaymentIntent;
    use rust_decimal_macros::dec;

    const NOW: u64 = 1_700_000_000;

    fn intent(amount: Decimal) -> PaymentIntent {
        NewPaymentIntent::new("key", "chat:1", "src", "dst", amount, "APT")
            .into_intent("intent-1".to_string(), NOW)
    }

    fn snapshot(network_fee: Decimal, platform_fee_bps: u32) -> PricingSnapshot {
        PricingSnapshot {
            token: "APT".to_string(),
            captured_at: NOW - 5,
            network_fee,
            platform_fee_bps,
            min_transfer_unit: dec!(0.00000001),
            decimals: 8,
        }
    }

    #[test]
    fn test_flat_fee_is_deducted() {
        let calc = Calculator::new(60);
        let fees = calc
            .compute(&intent(dec!(100)), &snapshot(dec!(2), 0), NOW)
            .unwrap();

        assert_eq!(fees.transfer_amount, dec!(98));
        assert_eq!(fees.network_fee, dec!(2));
        assert_eq!(fees.platform_fee, Decimal::ZERO);
        assert_eq!(fees.total(), dec!(100));
    }

    #[test]
    fn test_platform_fee_split() {
        let calc = Calculator::new(60);
        // 1% platform fee plus 1 unit network fee
        let fees = calc
            .compute(&intent(dec!(100)), &snapshot(dec!(1), 100), NOW)
            .unwrap();

        assert_eq!(fees.platform_fee, dec!(1));
        assert_eq!(fees.transfer_amount, dec!(98));
    }

    #[test]
    fn test_platform_fee_truncates_to_token_precision() {
        let calc = Calculator::new(60);
        let mut snap = snapshot(Decimal::ZERO, 33);
        snap.decimals = 2;

        // 0.33% of 10.01 = 0.033033 -> 0.03
        let fees = calc.compute(&intent(dec!(10.01)), &snap, NOW).unwrap();
        assert_eq!(fees.platform_fee, dec!(0.03));
        assert_eq!(fees.transfer_amount, dec!(9.98));
    }

    #[test]
    fn test_compute_is_deterministic() {
        let calc = Calculator::new(60);
        let intent = intent(dec!(12.3456789));
        let snap = snapshot(dec!(0.0015), 250);

        let first = calc.compute(&intent, &snap, NOW).unwrap();
        for _ in 0..10 {
            assert_eq!(calc.compute(&intent, &snap, NOW).unwrap(), first);
        }
    }

    #[test]
    fn test_insufficient_amount() {
        let calc = Calculator::new(60);
        let err = calc
            .compute(&intent(dec!(2)), &snapshot(dec!(2), 0), NOW)
            .unwrap_err();
        assert!(matches!(err, CalcError::InsufficientAmount { .. }));

        let mut snap = snapshot(dec!(0.5), 0);
        snap.min_transfer_unit = dec!(1);
        let err = calc.compute(&intent(dec!(1.2)), &snap, NOW).unwrap_err();
        assert!(matches!(err, CalcError::InsufficientAmount { .. }));
    }

    #[test]
    fn test_stale_pricing_rejected() {
        let calc = Calculator::new(30);
        let mut snap = snapshot(dec!(1), 0);
        snap.captured_at = NOW - 31;

        let err = calc.compute(&intent(dec!(100)), &snap, NOW).unwrap_err();
        assert_eq!(
            err,
            CalcError::StalePricing {
                age_secs: 31,
                window_secs: 30
            }
        );
        assert!(err.needs_refetch());

        // Exactly at the window edge is still fresh
        snap.captured_at = NOW - 30;
        assert!(calc.compute(&intent(dec!(100)), &snap, NOW).is_ok());
    }

    #[test]
    fn test_token_mismatch() {
        let calc = Calculator::new(60);
        let mut snap = snapshot(dec!(1), 0);
        snap.token = "USDC".to_string();

        assert!(matches!(
            calc.compute(&intent(dec!(100)), &snap, NOW),
            Err(CalcError::TokenMismatch { .. })
        ));
    }

    #[test]
    fn test_overflowing_amount_is_rejected() {
        let calc = Calculator::new(60);
        let err = calc
            .compute(&intent(Decimal::MAX), &snapshot(dec!(2), 50), NOW)
            .unwrap_err();
        assert_eq!(err, CalcError::AmountOutOfRange(Decimal::MAX));

        // Without a percentage fee the same amount is still payable
        let fees = calc
            .compute(&intent(Decimal::MAX), &snapshot(dec!(2), 0), NOW)
            .unwrap();
        assert_eq!(fees.transfer_amount, Decimal::MAX - dec!(2));
    }

    #[test]
    fn test_non_positive_amount() {
        let calc = Calculator::new(60);
        assert!(matches!(
            calc.compute(&intent(Decimal::ZERO), &snapshot(dec!(0), 0), NOW),
            Err(CalcError::NonPositiveAmount(_))
        ));
    }
}
