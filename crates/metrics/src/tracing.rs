use tracing::{Event, Level, Subscriber};
use tracing_subscriber::{
    fmt,
    layer::{Context, SubscriberExt},
    util::SubscriberInitExt,
    EnvFilter, Layer,
};

use crate::metrics::LOG_EVENTS;

/// Initialize the global subscriber.
///
/// `RUST_LOG` overrides `level` when set. `json` switches between JSON lines
/// and human-readable output.
pub fn init_tracing(level: &str, json: bool) -> Result<(), TracingError> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let json_layer = json.then(|| {
        fmt::layer()
            .with_target(true)
            .with_thread_ids(true)
            .with_level(true)
            .json()
    });
    let text_layer = (!json).then(|| fmt::layer().with_target(true).with_level(true));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(json_layer)
        .with(text_layer)
        .with(LogEventLayer)
        .try_init()
        .map_err(|e| TracingError::InitError(e.to_string()))?;

    Ok(())
}

/// Tracing layer that counts warn and error events
pub struct LogEventLayer;

impl<S: Subscriber> Layer<S> for LogEventLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let level = *event.metadata().level();
        if level == Level::ERROR {
            LOG_EVENTS.with_label_values(&["error"]).inc();
        } else if level == Level::WARN {
            LOG_EVENTS.with_label_values(&["warn"]).inc();
        }
    }
}

/// Correlation ID for following one intent through every component
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CorrelationId(uuid::Uuid);

impl CorrelationId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }

    pub fn as_str(&self) -> String {
        self.0.to_string()
    }
}

impl Default for CorrelationId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Span context for one worker's handling of an intent
#[derive(Debug, Clone)]
pub struct IntentSpan {
    pub correlation_id: CorrelationId,
    pub intent_id: String,
    pub worker_id: String,
}

impl IntentSpan {
    pub fn new(intent_id: impl Into<String>, worker_id: impl Into<String>) -> Self {
        Self {
            correlation_id: CorrelationId::new(),
            intent_id: intent_id.into(),
            worker_id: worker_id.into(),
        }
    }

    /// Span to instrument the handling future with
    pub fn span(&self) -> tracing::Span {
        tracing::info_span!(
            "intent",
            correlation_id = %self.correlation_id,
            intent_id = %self.intent_id,
            worker_id = %self.worker_id,
        )
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TracingError {
    #[error("tracing initialization error: {0}")]
    InitError(String),
}
