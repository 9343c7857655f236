pub mod clock;
pub mod event;
pub mod fee;
pub mod intent;
pub mod recurring;
pub mod task;

pub use clock::*;
pub use event::*;
pub use fee::*;
pub use intent::*;
pub use recurring::*;
pub use task::*;

/// Identifier of a payment intent
pub type IntentId = String;
