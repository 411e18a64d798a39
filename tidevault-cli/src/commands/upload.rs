//! Upload command
//!
//! Uploads one local file and flushes every log so the data is reachable
//! from any machine with the credentials.

use crate::vault::{self, VaultOpts};
use anyhow::{Context, Result};
use std::path::Path;

pub async fn run(opts: &VaultOpts, local: &Path, remote: &str) -> Result<()> {
    if !local.is_file() {
        anyhow::bail!("not a file: {}", local.display());
    }

    let engine = vault::open(opts).await?;

    engine
        .upload_file(local, remote)
        .await
        .with_context(|| format!("failed to upload {}", local.display()))?;
    engine.flush_meta().await.context("failed to flush meta")?;
    engine
        .force_flush_parity()
        .await
        .context("failed to flush parity")?;
    engine
        .flush_assurances()
        .await
        .context("failed to flush assurances")?;

    println!("Uploaded {} to {remote}", local.display());
    Ok(())
}
