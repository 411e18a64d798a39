//! Mkdir command: create a folder chain

use crate::vault::{self, VaultOpts};
use anyhow::{Context, Result};

pub async fn run(opts: &VaultOpts, remote: &str) -> Result<()> {
    let engine = vault::open(opts).await?;

    engine
        .new_directory(remote)
        .await
        .with_context(|| format!("failed to create {remote}"))?;
    engine.flush_meta().await.context("failed to flush meta")?;
    engine
        .flush_assurances()
        .await
        .context("failed to flush assurances")?;

    println!("Created {remote}");
    Ok(())
}
