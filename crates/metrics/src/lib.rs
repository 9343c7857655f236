//! Metrics and monitoring for the payflow pipeline
//!
//! Prometheus counters and histograms for intent lifecycle, ledger
//! submissions, confirmation latency, scheduler firings and queue depth,
//! plus tracing initialisation and an HTTP endpoint for scraping.
//!
//! # Example
//!
//! ```no_run
//! use payflow_metrics::{MetricsCollector, MetricsServer};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() {
//!     let collector = Arc::new(MetricsCollector::new());
//!     collector.record_intent_created();
//!
//!     let server = MetricsServer::new(collector.clone(), "0.0.0.0:9090".to_string());
//!     server.serve().await.unwrap();
//! }
//! ```

pub mod collector;
pub mod http;
pub mod metrics;
pub mod tracing;

pub use collector::{MetricsCollector, MetricsError, SubmissionOutcome};
pub use http::{MetricsServer, MetricsServerError};
pub use crate::tracing::{init_tracing, CorrelationId, IntentSpan, LogEventLayer, TracingError};
