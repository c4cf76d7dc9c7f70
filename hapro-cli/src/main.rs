//! hapro: local relay between the home-automation host and the external
//! service.
//!
//! # Usage
//!
//! ```text
//! hapro start  [--config PATH]
//! hapro routes
//! hapro config [--config PATH] [--json]
//! hapro token  [--config PATH]
//! ```

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};

use commands::{config::ConfigArgs, routes::RoutesArgs, start::StartArgs, token::TokenArgs};

// ---------------------------------------------------------------------------
// CLI entry point
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(
    name = "hapro",
    version,
    about = "Relay backups and host events to the external service",
    long_about = None,
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the relay in the foreground (watcher, event relay, HTTP surface).
    Start(StartArgs),

    /// Print the HTTP route table.
    Routes(RoutesArgs),

    /// Print the effective configuration with secrets redacted.
    Config(ConfigArgs),

    /// Perform one client-credentials exchange and report the token lifetime.
    Token(TokenArgs),
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Start(args) => args.run(),
        Commands::Routes(args) => args.run(),
        Commands::Config(args) => args.run(),
        Commands::Token(args) => args.run(),
    }
}
