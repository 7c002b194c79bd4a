use anyhow::{Context, Result};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const DEFAULT_FILTER: &str = "info,owge_sync_client=debug";

/// Installs the global subscriber. `RUST_LOG` overrides the default filter;
/// `OWGE_LOG_TARGETS=0` hides the `owge.*` targets in the output.
pub fn init() -> Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER)))
        .with(tracing_subscriber::fmt::layer().with_target(!env_falsy("OWGE_LOG_TARGETS")))
        .try_init()
        .context("failed to initialise tracing subscriber")
}

fn env_falsy(key: &str) -> bool {
    match std::env::var(key) {
        Ok(val) => matches!(
            val.to_ascii_lowercase().as_str(),
            "0" | "false" | "no" | "off"
        ),
        Err(_) => false,
    }
}
