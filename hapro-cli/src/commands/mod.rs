pub mod config;
pub mod routes;
pub mod start;
pub mod token;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;

use hapro_core::{config::load_or_default_at, RelayConfig};

/// `--config`, shared by every command that needs settings.
#[derive(Args, Debug)]
pub struct ConfigSource {
    /// Relay settings file (YAML). A missing file means defaults.
    #[arg(long, env = "HAPRO_CONFIG", default_value = "/data/relay.yaml")]
    pub config: PathBuf,
}

impl ConfigSource {
    /// File settings overlaid with the process environment.
    pub fn load(&self) -> Result<RelayConfig> {
        let mut config = load_or_default_at(&self.config)
            .with_context(|| format!("failed to load {}", self.config.display()))?;
        config
            .apply_env(|key| std::env::var(key).ok())
            .context("invalid environment override")?;
        Ok(config)
    }
}
