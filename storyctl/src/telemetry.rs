//! Tracing initialization.
//!
//! Installs a `tracing-subscriber` registry with an [`EnvFilter`] read from `RUST_LOG`
//! (default `info`) and a fmt layer in either human-readable or JSON form:
//!
//! ```bash
//! RUST_LOG=storyctl=debug,tower_http=info storyctl -f config.yaml
//! ```

use tracing::info;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::config::LogFormat;

/// Initialize tracing for the process.
///
/// Fails if a global subscriber has already been installed.
pub fn init_telemetry(format: LogFormat) -> anyhow::Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    match format {
        LogFormat::Pretty => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer())
                .try_init()?;
        }
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().json().with_current_span(true))
                .try_init()?;
        }
    }

    info!(?format, "Telemetry initialized");
    Ok(())
}
