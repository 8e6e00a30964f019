//! kextlog CLI - consumer side of the kextlog record stream.

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod commands;

use commands::{Cli, Commands};

#[tokio::main]
async fn main() -> Result<()> {
    // diagnostics go to stderr so stdout carries only records
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "kextlog=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    match cli.command {
        #[cfg(unix)]
        Commands::Listen(args) => commands::listen::execute(args).await,
        Commands::Read(args) => commands::read::run(&args),
        Commands::Version => {
            println!("kextlog {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}
