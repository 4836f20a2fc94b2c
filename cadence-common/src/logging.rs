//! Tracing subscriber bootstrap

use crate::config::LoggingConfig;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Environment variable holding a filter directive
pub const LOG_ENV_VAR: &str = "CADENCE_LOG";

/// Install the global tracing subscriber
///
/// `CADENCE_LOG` wins over the configured level. Safe to call more than once;
/// later calls are no-ops, which lets tests and front-ends both initialize.
pub fn init_tracing(config: &LoggingConfig) {
    let filter = EnvFilter::try_from_env(LOG_ENV_VAR)
        .or_else(|_| EnvFilter::try_new(&config.level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(config.with_target))
        .try_init();
}
