//! Vault construction from CLI options

use anyhow::{Context, Result};
use std::path::PathBuf;
use tidevault_core::VaultConfig;
use tidevault_engine::{DirServiceFactory, Engine};

/// Connection options shared by every vault command
pub struct VaultOpts {
    pub store_dir: PathBuf,
    pub state_dir: PathBuf,
    pub storage_code: String,
    pub password: String,
}

/// Open the vault engine and mirror the remote assurance log
pub async fn open(opts: &VaultOpts) -> Result<Engine> {
    let factory = DirServiceFactory::new(opts.store_dir.clone());
    let engine = Engine::open(
        &opts.storage_code,
        &opts.password,
        VaultConfig::default(),
        Box::new(factory),
        &opts.state_dir,
    )
    .context("failed to open vault")?;

    engine.load().await.context("failed to load assurance log")?;
    Ok(engine)
}
