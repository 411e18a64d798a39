//! Download command
//!
//! Reassembles a vault file from its block map.

use crate::vault::{self, VaultOpts};
use anyhow::{Context, Result};
use std::path::Path;
use tokio::io::AsyncWriteExt;

pub async fn run(opts: &VaultOpts, remote: &str, local: &Path) -> Result<()> {
    let engine = vault::open(opts).await?;

    let meta = engine
        .download_meta_for_path(remote)
        .await
        .with_context(|| format!("failed to read meta for {remote}"))?
        .with_context(|| format!("no such path: {remote}"))?;
    if !meta.is_file() {
        anyhow::bail!("{remote} is a folder");
    }

    let mut output = tokio::fs::File::create(local)
        .await
        .with_context(|| format!("failed to create {}", local.display()))?;

    let mut total = 0u64;
    for block in meta.blocks() {
        let id = engine.generator().raw_or_parity_id(&block.hash);
        let bytes = engine
            .download_chunk(id, true)
            .await
            .with_context(|| format!("failed to download block at offset {}", block.start))?;
        output.write_all(&bytes).await?;
        total += bytes.len() as u64;
    }
    output.flush().await?;

    println!("Downloaded {remote} ({total} bytes) to {}", local.display());
    Ok(())
}
