//! Fee computation for the payflow pipeline
//!
//! The [`Calculator`] is a pure function of a payment intent, a
//! [`PricingSnapshot`] and the current time. Recomputing after a crash with
//! the same snapshot yields the same [`FeeBreakdown`](payflow_types::FeeBreakdown),
//! so retries never change what is charged.
//!
//! Snapshots come from a [`PricingSource`]; market data feeds live outside
//! this crate.

pub mod calculator;
pub mod error;
pub mod pricing;

pub use calculator::*;
pub use error::*;
pub use pricing::*;
