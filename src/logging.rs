use tracing_subscriber::EnvFilter;

use crate::config;

/// Install the global `tracing` subscriber.
///
/// `RUST_LOG` wins over the built-in filter. Safe to call more than once;
/// later calls (and test harnesses that already installed one) are ignored.
pub fn init_tracing() {
    let result = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config::default_log_filter())),
        )
        .try_init();

    if result.is_ok() {
        tracing::debug!(version = config::APP_VERSION, "Tracing initialized");
    }
}
