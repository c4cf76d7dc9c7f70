//! `hapro start`: run the relay in the foreground.

use anyhow::{Context, Result};
use clap::Args;

use hapro_daemon::start_blocking;

use super::ConfigSource;

#[derive(Args, Debug)]
pub struct StartArgs {
    #[command(flatten)]
    pub source: ConfigSource,
}

impl StartArgs {
    pub fn run(self) -> Result<()> {
        let config = self.source.load()?;
        start_blocking(config).context("relay exited with error")
    }
}
