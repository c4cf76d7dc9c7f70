//! `hapro token`: one credentials exchange, for checking the secret and the
//! token endpoint. The token itself is never printed.

use anyhow::{Context, Result};
use clap::Args;

use hapro_client::{ClientCredentials, TokenSource};

use super::ConfigSource;

#[derive(Args, Debug)]
pub struct TokenArgs {
    #[command(flatten)]
    pub source: ConfigSource,
}

impl TokenArgs {
    pub fn run(self) -> Result<()> {
        let config = self.source.load()?;
        let endpoint = config.token_url().context("no token endpoint configured")?;

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .context("failed to start async runtime")?;
        let grant = runtime
            .block_on(async {
                let http = reqwest::Client::builder().build()?;
                ClientCredentials::new(http, &config).fetch_token().await
            })
            .with_context(|| format!("token exchange against {endpoint} failed"))?;

        println!(
            "token acquired from {endpoint} (client {}, expires in {}s)",
            config.client_id, grant.expires_in
        );
        Ok(())
    }
}
