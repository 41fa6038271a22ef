use std::str::FromStr;
use tracing::Level;

use crate::config::LoggingConfig;

/// Install the global fmt subscriber. A subscriber that is already installed is kept.
pub fn init_tracing(config: &LoggingConfig) {
    let level = Level::from_str(&config.level).unwrap_or(Level::INFO);

    let installed = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(config.with_target)
        .try_init()
        .is_ok();

    if installed {
        tracing::debug!("Tracing initialized at level {}", level);
    }
}
