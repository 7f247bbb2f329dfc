//! Tracing setup for the library and the `wasmcg` binary.
//!
//! Events go to stderr so stdout stays free for the rendered graph.
//! Filtering follows `RUST_LOG` and defaults to `info`.

use std::sync::Once;
use tracing::debug;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

static INIT: Once = Once::new();

/// How log events are rendered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    /// One JSON object per line, with the current span attached
    Json,
}

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Install the global subscriber. Only the first call has an effect.
pub fn init(format: LogFormat) {
    INIT.call_once(|| {
        let registry = tracing_subscriber::registry().with(env_filter());
        // a test harness may already have installed a subscriber
        let _ = match format {
            LogFormat::Text => registry
                .with(
                    fmt::layer()
                        .with_writer(std::io::stderr)
                        .with_span_events(FmtSpan::CLOSE)
                        .with_target(true),
                )
                .try_init(),
            LogFormat::Json => registry
                .with(
                    fmt::layer()
                        .json()
                        .with_writer(std::io::stderr)
                        .with_span_events(FmtSpan::CLOSE)
                        .with_current_span(true),
                )
                .try_init(),
        };
        debug!(?format, "wasmcg tracing initialized");
    });
}

/// Human-readable output.
pub fn init_tracing() {
    init(LogFormat::Text);
}

/// JSON lines output.
pub fn init_tracing_json() {
    init(LogFormat::Json);
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing::{info, info_span};

    #[test]
    fn init_is_idempotent() {
        init_tracing();
        init_tracing();
        init_tracing_json();
    }

    #[test]
    fn events_inside_stage_spans() {
        init_tracing();
        let _span = info_span!("classify", functions = 12).entered();
        info!(module = "vtable.wasm", sites = 3, "Classified indirect calls");
    }
}
