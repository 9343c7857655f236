//! Task queue adapter
//!
//! The queue hands out [`TaskMessage`](payflow_types::TaskMessage)s with a
//! visibility timeout: a claimed message stays hidden until it is
//! acknowledged, released, or the timeout lapses, after which it is
//! delivered again. Delivery is therefore at-least-once; exactly-once effect
//! is the job of the payment store's claim.

pub mod error;
pub mod memory;
pub mod queue;
pub mod sqlite_queue;

pub use error::*;
pub use memory::*;
pub use queue::*;
pub use sqlite_queue::*;
