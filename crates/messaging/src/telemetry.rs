use tracing_subscriber::EnvFilter;

use crate::config::MessagingConfig;

/// Install the global fmt subscriber. `RUST_LOG` takes precedence over the
/// configured level. Returns false if a subscriber was already installed.
pub fn init_tracing(config: &MessagingConfig) -> bool {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level)),
        )
        .try_init()
        .is_ok()
}
