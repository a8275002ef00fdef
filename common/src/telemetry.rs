use tracing::subscriber::{set_global_default, SetGlobalDefaultError};
use tracing::Subscriber;
use tracing_bunyan_formatter::{BunyanFormattingLayer, JsonStorageLayer};
use tracing_log::{log_tracer::SetLoggerError, LogTracer};
use tracing_subscriber::{fmt::MakeWriter, layer::SubscriberExt, EnvFilter, Registry};

use crate::helper::error_chain_fmt;

/// Composes the layers of the `tracing` subscriber used by the client and its binaries.
///
/// The `Registry` stores span data and relationships, the `EnvFilter` discards spans
/// and events below the wanted level, and the bunyan layers output every record as JSON
/// with the fields of its parent spans (collection name, batch index, ...).
///
/// # Arguments
/// - `name`: name of the app, outputted with each record
/// - `fallback_env_filter`: filter level used when the `RUST_LOG` env variable is not set
/// - `sink`: where the records are written to (`std::io::stdout`, `std::io::sink` during tests)
///
/// # Returns
/// `impl Subscriber` so the caller does not have to spell out the layered type.
pub fn get_tracing_subscriber<Sink>(
    name: String,
    fallback_env_filter: String,
    sink: Sink,
) -> impl Subscriber + Send + Sync
where
    // The sink is a `MakeWriter` for all choices of the lifetime `'a` (HRTB)
    Sink: for<'a> MakeWriter<'a> + Send + Sync + 'static,
{
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback_env_filter));

    let formatting_layer = BunyanFormattingLayer::new(name, sink);

    Registry::default()
        .with(env_filter)
        .with(JsonStorageLayer)
        .with(formatting_layer)
}

/// Registers a subscriber as the global default and redirects `log` records to it.
///
/// Can only succeed once per process: a second call returns an error.
pub fn init_tracing_subscriber(
    subscriber: impl Subscriber + Send + Sync,
) -> Result<(), TelemetryError> {
    LogTracer::init()?;
    set_global_default(subscriber)?;

    Ok(())
}

#[derive(thiserror::Error)]
pub enum TelemetryError {
    #[error("Failed to redirect log records to tracing")]
    LoggerError(#[from] SetLoggerError),
    #[error("Failed to set the global tracing subscriber")]
    SubscriberError(#[from] SetGlobalDefaultError),
}

impl std::fmt::Debug for TelemetryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        error_chain_fmt(self, f)
    }
}
