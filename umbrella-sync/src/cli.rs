//! This module implements the CLI interface for umbrella-sync: command parsing, config
//! editing and the `sync` entrypoint.
//!
//! All reconciliation logic (normalization, diffing, chunked mutation, the ignore loop) lives in
//! the [`umbrella-sync-core`] crate. This module only wires the config store and the HTTP client
//! into it and turns the outcome into an exit status.
//!
//! ## Global options
//! - `--config <path>`: config file (default `$HOME/.umbrellasync/config.yaml`).
//! - `--log <path>`: log file, appended to (default `./umbrellasync.log`).
//!
//! ## Commands
//! - `sync`: mirror every configured blocklist file into its destination list.
//! - `config get|set|clear <key>`: inspect and edit the config file.
//!
//! ## Exit status
//! `sync` fails when the config cannot be loaded, when the initial list fetch fails, or when
//! every file failed. Individual file failures are logged and do not change the exit status.
//!
//! [`umbrella-sync-core`]: ../../umbrella-sync-core/

use crate::client::UmbrellaClient;
use crate::load_config::{default_config_path, load_config, ConfigKey, ConfigStore};
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use umbrella_sync_core::synchronise::{synchronise, SynchroniseReport};

/// CLI for umbrella-sync: keep Umbrella destination lists in step with local blocklists.
#[derive(Debug, Parser)]
#[clap(
    name = "umbrella-sync",
    version,
    about = "Synchronise local blocklist files with Umbrella destination lists"
)]
pub struct Cli {
    /// Path to the YAML config file (default: $HOME/.umbrellasync/config.yaml)
    #[clap(long, global = true)]
    pub config: Option<PathBuf>,

    /// Log file; events are appended to it
    #[clap(long, global = true, default_value = "umbrellasync.log")]
    pub log: PathBuf,

    #[clap(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Synchronise every configured file with its destination list
    Sync,
    /// Inspect or edit the config file
    Config {
        #[clap(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Debug, Subcommand)]
pub enum ConfigAction {
    /// Print the value stored under a key
    Get {
        #[clap(value_enum)]
        key: ConfigKey,
    },
    /// Store a value; `files` and `highvolumedomains` append to their list
    Set {
        #[clap(value_enum)]
        key: ConfigKey,
        value: String,
    },
    /// Remove a key
    Clear {
        #[clap(value_enum)]
        key: ConfigKey,
    },
}

/// Async CLI entrypoint for main() and integration tests.
pub async fn run(cli: Cli) -> Result<()> {
    tracing::info!("trace_initialised");

    let config_path = match cli.config {
        Some(path) => path,
        None => default_config_path()?,
    };

    match cli.command {
        Commands::Sync => {
            if !config_path.is_file() {
                tracing::error!(config_path = ?config_path, "Config file not found");
                anyhow::bail!("Config file {:?} not found", config_path);
            }
            let store = load_config(&config_path)?;
            tracing::info!(command = "sync", config_path = ?config_path, "Starting synchronisation process");
            let report = sync(&store).await?;
            tracing::info!(
                command = "sync",
                synced = report.synced().count(),
                failed = report.failed().count(),
                "Synchronisation complete"
            );
            Ok(())
        }
        Commands::Config { action } => config(&config_path, action),
    }
}

async fn sync(store: &ConfigStore) -> Result<SynchroniseReport> {
    let files = store.files().context("Invalid `files` in config")?;
    if files.is_empty() {
        tracing::warn!(
            command = "sync",
            "No files configured; add one with `config set files <path>`"
        );
        return Ok(SynchroniseReport::default());
    }

    let api = store.api_settings().context("Invalid API settings")?;
    let settings = store.sync_settings().context("Invalid sync settings")?;
    let client = UmbrellaClient::new(&api).context("Failed to construct Umbrella client")?;

    let report = match synchronise(&files, &client, store, &settings).await {
        Ok(report) => report,
        Err(e) => {
            tracing::error!(command = "sync", error = %e, "Synchronisation failed");
            return Err(anyhow::Error::new(e).context("Synchronisation failed"));
        }
    };

    for (path, error) in report.failed() {
        tracing::error!(command = "sync", file = %path.display(), error = %error, "File not synchronised");
    }
    if report.all_failed() {
        anyhow::bail!("All {} configured files failed to synchronise", report.files.len());
    }
    Ok(report)
}

fn config(config_path: &Path, action: ConfigAction) -> Result<()> {
    let store = load_config(config_path)?;
    match action {
        ConfigAction::Get { key } => {
            let value = store
                .get_display(key)
                .with_context(|| format!("Failed to read {}", key.as_str()))?;
            println!("{value}");
        }
        ConfigAction::Set { key, value } => {
            store
                .set(key, &value)
                .with_context(|| format!("Failed to set {}", key.as_str()))?;
        }
        ConfigAction::Clear { key } => {
            store
                .clear(key)
                .with_context(|| format!("Failed to clear {}", key.as_str()))?;
        }
    }
    Ok(())
}
