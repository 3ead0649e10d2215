//! Logging bootstrap
//!
//! `RUST_LOG` takes precedence over the configured level.

use crate::config::DebugConfig;
use tracing_subscriber::EnvFilter;

/// Install the global tracing subscriber
///
/// Returns false if a subscriber was already installed.
pub fn init(config: &DebugConfig) -> bool {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_level.as_filter()));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    let installed = if config.log_json {
        builder.json().try_init().is_ok()
    } else {
        builder.try_init().is_ok()
    };

    if installed {
        tracing::debug!("Logging initialized at {:?}", config.log_level);
    }
    installed
}
