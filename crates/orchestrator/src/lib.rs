//! Consumer workers, reaper and scheduler of the payment pipeline
//!
//! Workers pull task messages from a shared [`TaskQueue`](payflow_queue::TaskQueue),
//! take the claim on the referenced intent through the
//! [`PaymentStore`](payflow_store::PaymentStore), and drive it through
//! `Claimed → Submitting → Submitted → Confirming → Confirmed | Failed`.
//! Workers keep no state of their own between tasks: everything that must
//! survive a crash lives in the store, so any worker can resume any intent.

pub mod backoff;
pub mod context;
pub mod error;
pub mod intake;
pub mod notify;
pub mod pool;
pub mod reaper;
pub mod scheduler;
pub mod worker;

#[cfg(test)]
mod testkit;

pub use backoff::ExponentialBackoff;
pub use context::PipelineContext;
pub use error::{IntakeError, SchedulerError, WorkerError};
pub use intake::PaymentIntake;
pub use notify::{ChannelNotifier, Notifier, NotifyError, RecordingNotifier, TracingNotifier};
pub use pool::{PoolHandle, WorkerPool};
pub use reaper::{Reaper, ReaperConfig, SweepReport};
pub use scheduler::{
    AmountResolver, FormulaTable, Scheduler, SchedulerConfig, TickReport,
};
pub use worker::{TaskOutcome, Worker, WorkerConfig};
