use clap::Parser;
use sshfan::cli::Cli;
use sshfan::models::EXIT_INTERNAL;
use std::io::Write;
use tracing::error;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse CLI arguments
    let cli = Cli::parse();

    // Initialize logging
    cli.init_logging()?;

    // Run and report
    let code = match cli.execute().await {
        Ok(code) => code,
        Err(e) => {
            error!("{:#}", e);
            EXIT_INTERNAL
        }
    };
    std::io::stdout().flush()?;

    // Exit without waiting for sessions abandoned at the deadline
    std::process::exit(code)
}
