//! `hapro config`: effective settings after file and environment overlay.

use anyhow::{Context, Result};
use clap::Args;

use super::ConfigSource;

#[derive(Args, Debug)]
pub struct ConfigArgs {
    #[command(flatten)]
    pub source: ConfigSource,

    /// Emit JSON instead of YAML.
    #[arg(long)]
    pub json: bool,
}

impl ConfigArgs {
    pub fn run(self) -> Result<()> {
        let config = self.source.load()?.redacted();
        if self.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&config).context("failed to encode config")?
            );
        } else {
            print!("{}", config.to_yaml()?);
        }
        Ok(())
    }
}
