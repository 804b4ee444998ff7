use anyhow::Result;
use tracing_subscriber::EnvFilter;

use crate::config::AppConfig;

const FALLBACK_DIRECTIVES: &str = "info";

// RUST_LOG wins over the configured level when present.
pub fn init_tracing(config: &AppConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(directives(&config.log_level)));
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false);

    let installed = if config.is_production() {
        subscriber
            .json()
            .flatten_event(true)
            .with_current_span(false)
            .try_init()
    } else {
        subscriber.compact().try_init()
    };
    installed.map_err(|err| anyhow::anyhow!("tracing subscriber already installed: {err}"))
}

fn directives(configured: &str) -> String {
    let configured = configured.trim();
    if configured.is_empty() || EnvFilter::try_new(configured).is_err() {
        return FALLBACK_DIRECTIVES.to_string();
    }
    configured.to_string()
}
