//! Ledger client boundary
//!
//! The pipeline only needs three things from a ledger: broadcast a
//! transfer, report the status of a broadcast, and find an earlier
//! broadcast by its client reference. [`SimulatedLedger`] implements the
//! boundary in-process for tests and local runs.

pub mod client;
pub mod simulated;

pub use client::*;
pub use simulated::*;
