//! Ls command
//!
//! Lists a folder's children, or the block map of a file.

use crate::vault::{self, VaultOpts};
use anyhow::{Context, Result};
use tidevault_core::MetaKind;

pub async fn run(opts: &VaultOpts, remote: &str) -> Result<()> {
    let engine = vault::open(opts).await?;

    let meta = engine
        .download_meta_for_path(remote)
        .await
        .with_context(|| format!("failed to read meta for {remote}"))?;
    let Some(meta) = meta else {
        anyhow::bail!("no such path: {remote}");
    };

    if meta.is_file() {
        let blocks = meta.blocks();
        println!("{remote}: file, {} blocks", blocks.len());
        for block in blocks {
            println!("  {:>12}  {:>10}  {}", block.start, block.size, block.hash);
        }
    } else {
        for (name, kind, size) in meta.children() {
            match kind {
                MetaKind::Folder => println!("{name}/"),
                MetaKind::File => println!("{name}  {}", size.unwrap_or(0)),
            }
        }
    }
    Ok(())
}
