//! Durable state of payment intents and recurring definitions
//!
//! Every intent mutation goes through [`PaymentStore`], whose operations are
//! atomic compare-and-swap steps on the intent status and claim. Two
//! backends share the same lifecycle rules: [`InMemoryStore`] for tests and
//! single-process runs, and [`SqliteStore`] for durable deployments.

pub mod error;
pub mod lifecycle;
pub mod memory;
pub mod sqlite_store;
pub mod store;

pub use error::*;
pub use memory::*;
pub use sqlite_store::*;
pub use store::*;
