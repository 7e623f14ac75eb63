//! Tracing setup for the `gateway` binary (design ambient stack: "Logging").
//!
//! `RUST_LOG` selects the filter (default `info`); when `GATEWAY_LOG_DIR` is set, logs are
//! additionally written to a daily-rotated file there using [`crate::log_format::TextWithSpanIds`]
//! so `trace_id`/`span_id` survive even without a terminal.

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

use crate::log_format::TextWithSpanIds;

/// Must be kept alive for the lifetime of the process: dropping it stops the background
/// flush thread for the file appender.
pub struct LoggingGuard(#[allow(dead_code)] Option<WorkerGuard>);

/// Initializes the global tracing subscriber. Call once, at process start.
pub fn init() -> Result<LoggingGuard, Box<dyn std::error::Error>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let stderr_layer = tracing_subscriber::fmt::layer()
        .event_format(TextWithSpanIds::new())
        .with_writer(std::io::stderr)
        .with_filter(filter);

    let (file_layer, guard) = match std::env::var("GATEWAY_LOG_DIR") {
        Ok(dir) => {
            let appender = tracing_appender::rolling::daily(&dir, "gateway.log");
            let (non_blocking, guard) = tracing_appender::non_blocking(appender);
            let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
            let layer = tracing_subscriber::fmt::layer()
                .event_format(TextWithSpanIds::new())
                .with_ansi(false)
                .with_writer(non_blocking)
                .with_filter(filter);
            (Some(layer), Some(guard))
        }
        Err(_) => (None, None),
    };

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(file_layer)
        .try_init()?;

    Ok(LoggingGuard(guard))
}
