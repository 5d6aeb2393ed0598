//! Standard `tracing` initialisers shared by every binary that embeds the gateway.
//!
//! Configuration and transport (which format to ship, where logs go) stay external per the
//! purpose-and-scope boundary; this module only fixes how the core itself emits structured
//! logs so adapters and demos don't each reinvent an `EnvFilter` setup.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Initialises human-readable logging. Honors `RUST_LOG`, defaulting to `info`.
pub fn init_logging() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::filter::EnvFilter::builder()
                .with_default_directive(tracing_subscriber::filter::LevelFilter::INFO.into())
                .from_env_lossy(),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Initialises JSON logging, suitable for log aggregators.
pub fn init_json_logging() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::filter::EnvFilter::builder()
                .with_default_directive(tracing_subscriber::filter::LevelFilter::INFO.into())
                .from_env_lossy(),
        )
        .with(tracing_subscriber::fmt::layer().json().flatten_event(true))
        .init();
}
