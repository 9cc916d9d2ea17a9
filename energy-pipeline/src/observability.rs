use std::fmt;

use once_cell::sync::OnceCell;
use tracing_subscriber::EnvFilter;

static TRACING: OnceCell<()> = OnceCell::new();

/// Install the process-wide fmt subscriber. Only the first call has any effect.
pub fn init_tracing() {
    TRACING.get_or_init(|| {
        let filter = EnvFilter::from_default_env()
            .add_directive("energy_pipeline=info".parse().unwrap_or_else(|_| "info".parse().unwrap()));

        // Another subscriber may already be installed (e.g. by a test harness).
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .try_init();
    });
}

/// Named handle for pipeline progress messages.
///
/// Every event is emitted inside a span carrying the logger name, so lines
/// from different pipeline stages stay distinguishable with targets hidden.
#[derive(Debug, Clone)]
pub struct Logger {
    name: String,
    span: tracing::Span,
}

impl Logger {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn info(&self, message: impl fmt::Display) {
        self.span.in_scope(|| tracing::info!("{message}"));
    }

    pub fn warn(&self, message: impl fmt::Display) {
        self.span.in_scope(|| tracing::warn!("{message}"));
    }

    pub fn error(&self, message: impl fmt::Display) {
        self.span.in_scope(|| tracing::error!("{message}"));
    }
}

pub fn get_logger(name: &str) -> Logger {
    init_tracing();
    Logger {
        name: name.to_string(),
        span: tracing::info_span!("logger", name = %name),
    }
}
