use anyhow::Result;
use clap::Parser;
use umbrella_sync::cli::{run, Cli};
use umbrella_sync::logging::init_tracing;

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    // Logs go to stderr so `config get` output stays clean; a copy is appended to `--log`.
    init_tracing(&cli.log)?;
    tracing::info!(
        log = %cli.log.display(),
        "CLI application startup: tracing initialised, environment loaded"
    );

    let result = run(cli).await;
    match &result {
        Ok(_) => tracing::info!("CLI completed successfully"),
        Err(e) => tracing::error!(error = %e, "CLI exited with error"),
    }
    result
}
