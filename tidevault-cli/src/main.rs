//! Tidevault CLI
//!
//! Command-line client for deterministic vaults over a directory-backed
//! development transport.
//!
//! # Commands
//! - `init` - Generate a fresh storage code
//! - `mkdir` - Create a folder chain in the vault
//! - `upload` - Upload a local file and flush all logs
//! - `download` - Download a vault file to a local path
//! - `ls` - List a folder or show a file's block map
//! - `flush` - Flush parity, meta and assurance logs

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod commands;
mod vault;

use commands::{download, flush, init, ls, mkdir, upload};
use vault::VaultOpts;

#[derive(Parser)]
#[command(name = "tidevault")]
#[command(about = "Deterministic vault over an append-only blob transport")]
#[command(version)]
struct Cli {
    /// Directory acting as the blob transport
    #[arg(long, env = "TIDEVAULT_STORE_DIR", default_value = "./tidevault-store", global = true)]
    store_dir: PathBuf,

    /// Directory holding per-vault catalog state
    #[arg(long, env = "TIDEVAULT_STATE_DIR", default_value = "./tidevault-state", global = true)]
    state_dir: PathBuf,

    /// Vault storage code (64 hex characters)
    #[arg(long, env = "TIDEVAULT_STORAGE_CODE", global = true)]
    storage_code: Option<String>,

    /// Vault password
    #[arg(long, env = "TIDEVAULT_PASSWORD", global = true)]
    password: Option<String>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate a fresh storage code
    Init,

    /// Create a folder chain in the vault
    Mkdir {
        /// Absolute vault path, e.g. /backups/2026
        remote: String,
    },

    /// Upload a local file and flush all logs
    Upload {
        /// Local file to upload
        local: PathBuf,

        /// Absolute vault path to store it at
        remote: String,
    },

    /// Download a vault file to a local path
    Download {
        /// Absolute vault path
        remote: String,

        /// Local output path
        local: PathBuf,
    },

    /// List a folder or show a file's block map
    Ls {
        /// Absolute vault path (default: the root folder)
        #[arg(default_value = "/")]
        remote: String,
    },

    /// Flush parity, meta and assurance logs
    Flush,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if cli.verbose {
        tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "warn".into()),
            )
            .init();
    }

    if let Commands::Init = cli.command {
        return init::run();
    }

    let opts = VaultOpts {
        store_dir: cli.store_dir,
        state_dir: cli.state_dir,
        storage_code: cli
            .storage_code
            .ok_or_else(|| anyhow::anyhow!("missing --storage-code (or TIDEVAULT_STORAGE_CODE)"))?,
        password: cli
            .password
            .ok_or_else(|| anyhow::anyhow!("missing --password (or TIDEVAULT_PASSWORD)"))?,
    };

    match cli.command {
        Commands::Init => unreachable!("handled above"),
        Commands::Mkdir { remote } => mkdir::run(&opts, &remote).await,
        Commands::Upload { local, remote } => upload::run(&opts, &local, &remote).await,
        Commands::Download { remote, local } => download::run(&opts, &remote, &local).await,
        Commands::Ls { remote } => ls::run(&opts, &remote).await,
        Commands::Flush => flush::run(&opts).await,
    }
}
