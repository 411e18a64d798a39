//! Flush command
//!
//! Forces the partial parity collection closed and writes every pending
//! meta and assurance record.

use crate::vault::{self, VaultOpts};
use anyhow::{Context, Result};

pub async fn run(opts: &VaultOpts) -> Result<()> {
    let engine = vault::open(opts).await?;

    engine.flush_meta().await.context("failed to flush meta")?;
    engine
        .force_flush_parity()
        .await
        .context("failed to flush parity")?;
    engine
        .flush_assurances()
        .await
        .context("failed to flush assurances")?;

    println!("Vault flushed");
    Ok(())
}
