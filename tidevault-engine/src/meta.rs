//! Virtual filesystem meta path
//!
//! Paths map to per-path append-only command logs on the transport. A
//! folder's children exist as `AddFolder`/`AddFile` commands in the folder's
//! own log; a file's extents are `AddBlock` commands in the file's log. A
//! path with no log of its own can still exist through its parent's
//! commands (an empty folder or a zero-block file), so kind resolution
//! consults both.
//!
//! Everything here runs under the meta semaphore except
//! `download_meta_for_path`, which is read-only.

use crate::engine::Engine;
use std::collections::BTreeMap;
use tidevault_catalog::{MetaCacheRow, MetaFlush};
use tidevault_core::{
    ContentHash, IndexId, MetaCommand, MetaKind, MetaSegment, Result, VaultError,
};
use futures::StreamExt;
use tracing::debug;

/// Concurrent meta-record downloads per path
const META_DOWNLOAD_CONCURRENCY: usize = 10;

/// One extent of an uploaded file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockRef {
    pub hash: ContentHash,
    pub start: u64,
    pub size: u32,
}

/// The decoded meta state of one path
#[derive(Debug, Clone)]
pub struct PathMeta {
    pub kind: MetaKind,
    pub commands: Vec<MetaCommand>,
}

impl PathMeta {
    pub fn is_file(&self) -> bool {
        self.kind == MetaKind::File
    }

    /// Block map of a file path, in command order
    pub fn blocks(&self) -> Vec<BlockRef> {
        self.commands
            .iter()
            .filter_map(|command| match command {
                MetaCommand::AddBlock { hash, size, start } => Some(BlockRef {
                    hash: *hash,
                    start: *start,
                    size: *size,
                }),
                _ => None,
            })
            .collect()
    }

    /// Children of a folder path: (name, kind, file size if a file)
    pub fn children(&self) -> Vec<(String, MetaKind, Option<u64>)> {
        self.commands
            .iter()
            .filter_map(|command| match command {
                MetaCommand::AddFolder { name } => {
                    Some((name.clone(), MetaKind::Folder, None))
                }
                MetaCommand::AddFile { name, size } => {
                    Some((name.clone(), MetaKind::File, Some(*size)))
                }
                MetaCommand::AddBlock { .. } => None,
            })
            .collect()
    }
}

/// Split a remote path into validated segments; `/` yields no segments.
pub(crate) fn normalize_remote_path(path: &str) -> Result<Vec<String>> {
    if path == "/" {
        return Ok(Vec::new());
    }
    if !path.starts_with('/') {
        return Err(VaultError::InvalidPath(format!(
            "path must be absolute: {path}"
        )));
    }
    if path.contains('\0') {
        return Err(VaultError::InvalidPath("path contains NUL".to_string()));
    }

    let mut segments = Vec::new();
    for segment in path.split('/').skip(1) {
        if segment.is_empty() {
            return Err(VaultError::InvalidPath(format!(
                "empty path segment in {path}"
            )));
        }
        if segment == "." || segment == ".." {
            return Err(VaultError::InvalidPath(format!(
                "path must be canonical: {path}"
            )));
        }
        segments.push(segment.to_string());
    }
    Ok(segments)
}

fn display_path(canonical: &str) -> &str {
    if canonical.is_empty() {
        "/"
    } else {
        canonical
    }
}

impl Engine {
    /// The kind a path has from its own records alone
    fn path_kind_own(&self, canonical: &str) -> Result<Option<MetaKind>> {
        if let Some(kind) = self
            .catalog
            .meta_type_at_path_in_transient_cache(canonical)?
        {
            return Ok(Some(kind));
        }
        if self
            .catalog
            .find_assurance_by_index_id(&self.generator.meta_file_id(0, canonical))?
            .is_some()
        {
            return Ok(Some(MetaKind::File));
        }
        if self
            .catalog
            .find_assurance_by_index_id(&self.generator.meta_folder_id(0, canonical))?
            .is_some()
        {
            return Ok(Some(MetaKind::Folder));
        }
        Ok(None)
    }

    /// Next free meta log slot for a path
    fn next_meta_slot(&self, canonical: &str, kind: MetaKind) -> Result<u32> {
        let mut slot = 0u32;
        loop {
            let id = self.meta_id(slot, canonical, kind);
            if self.catalog.find_assurance_by_index_id(&id)?.is_none() {
                return Ok(slot);
            }
            slot += 1;
        }
    }

    fn meta_id(&self, slot: u32, canonical: &str, kind: MetaKind) -> IndexId {
        match kind {
            MetaKind::File => self.generator.meta_file_id(slot, canonical),
            MetaKind::Folder => self.generator.meta_folder_id(slot, canonical),
        }
    }

    /// All commands of a path: flushed meta log slots in order, then
    /// transient commands ordered by index.
    async fn collect_commands(
        &self,
        canonical: &str,
        kind: MetaKind,
    ) -> Result<Vec<MetaCommand>> {
        let slots = self.next_meta_slot(canonical, kind)?;
        let ids: Vec<IndexId> = (0..slots)
            .map(|slot| self.meta_id(slot, canonical, kind))
            .collect();

        let mut commands = Vec::new();
        let mut downloads = futures::stream::iter(
            ids.into_iter().map(|id| self.download_chunk(id, true)),
        )
        .buffered(META_DOWNLOAD_CONCURRENCY);
        while let Some(bytes) = downloads.next().await {
            let segment = MetaSegment::decode(&bytes?)?;
            commands.extend(segment.commands);
        }

        for row in self.catalog.commands_in_transient_cache(Some(canonical))? {
            commands.push(row.command);
        }
        Ok(commands)
    }

    /// Resolve the kind of a path, consulting its own records and its
    /// parent's child commands.
    async fn resolve_kind(&self, segments: &[String]) -> Result<Option<MetaKind>> {
        let canonical = segments.join("/");
        if let Some(kind) = self.path_kind_own(&canonical)? {
            return Ok(Some(kind));
        }
        if segments.is_empty() {
            return Ok(None);
        }

        let parent = segments[..segments.len() - 1].join("/");
        let name = segments.last().expect("nonempty segments");
        for command in self.collect_commands(&parent, MetaKind::Folder).await? {
            match command {
                MetaCommand::AddFolder { name: child } if child == *name => {
                    return Ok(Some(MetaKind::Folder));
                }
                MetaCommand::AddFile { name: child, .. } if child == *name => {
                    return Ok(Some(MetaKind::File));
                }
                _ => {}
            }
        }
        Ok(None)
    }

    /// Decode the full meta state of a path, `None` if the path does not
    /// exist in either namespace.
    pub async fn download_meta_for_path(&self, path: &str) -> Result<Option<PathMeta>> {
        let segments = normalize_remote_path(path)?;
        let canonical = segments.join("/");

        let Some(kind) = self.resolve_kind(&segments).await? else {
            return Ok(None);
        };
        let commands = self.collect_commands(&canonical, kind).await?;
        Ok(Some(PathMeta { kind, commands }))
    }

    /// Record a file (or just its folder chain) in the virtual filesystem.
    pub async fn push_file_to_meta(
        &self,
        blocks: Option<&[BlockRef]>,
        file_size: u64,
        remote: &str,
    ) -> Result<()> {
        self.push_meta(blocks, file_size, remote, false).await
    }

    /// Create the folder chain for a path without a terminal file.
    pub async fn new_directory(&self, remote: &str) -> Result<()> {
        let base = remote.trim_end_matches('/');
        let probe = format!("{base}/.ignore");
        self.push_meta(None, 0, &probe, true).await
    }

    async fn push_meta(
        &self,
        blocks: Option<&[BlockRef]>,
        file_size: u64,
        remote: &str,
        ignore_file: bool,
    ) -> Result<()> {
        let _guard = self.meta_sem.lock().await;

        let segments = normalize_remote_path(remote)?;
        let Some(file_name) = segments.last().cloned() else {
            return Err(VaultError::InvalidPath(
                "path has no file name".to_string(),
            ));
        };
        let file_path = segments.join("/");

        // Ancestor folder paths: root, then every proper prefix
        let mut ancestors: Vec<String> = vec![String::new()];
        for i in 0..segments.len() - 1 {
            ancestors.push(segments[..=i].join("/"));
        }

        // No ancestor may exist as a file, and the final path must be fresh
        for ancestor in &ancestors {
            if self.path_kind_own(ancestor)? == Some(MetaKind::File) {
                return Err(VaultError::MetaEntryOverwrite(format!(
                    "directory {} would overwrite a file",
                    display_path(ancestor)
                )));
            }
        }
        if !ignore_file {
            match self.path_kind_own(&file_path)? {
                Some(MetaKind::Folder) => {
                    return Err(VaultError::MetaEntryOverwrite(format!(
                        "a folder exists at {}",
                        display_path(&file_path)
                    )));
                }
                Some(MetaKind::File) => {
                    return Err(VaultError::MetaEntryOverwrite(format!(
                        "{} already exists and the store is write-once",
                        display_path(&file_path)
                    )));
                }
                None => {}
            }
        }

        let mut push_list: Vec<MetaCacheRow> = Vec::new();

        for (i, parent) in ancestors.iter().enumerate() {
            let commands = self.collect_commands(parent, MetaKind::Folder).await?;
            let transient = self.catalog.commands_in_transient_cache(Some(parent))?.len();
            let next_index =
                self.next_meta_slot(parent, MetaKind::Folder)? + transient as u32;
            let child_is_file = i + 1 == ancestors.len();

            if !child_is_file {
                let child = &segments[i];
                let mut present = false;
                for command in &commands {
                    match command {
                        MetaCommand::AddFile { name, .. } if name == child => {
                            return Err(VaultError::MetaEntryOverwrite(format!(
                                "directory {} would overwrite a file",
                                display_path(&segments[..=i].join("/"))
                            )));
                        }
                        MetaCommand::AddFolder { name } if name == child => present = true,
                        _ => {}
                    }
                }
                if !present {
                    push_list.push(MetaCacheRow {
                        path: parent.clone(),
                        index: next_index,
                        is_new: next_index == 0,
                        command: MetaCommand::AddFolder {
                            name: child.clone(),
                        },
                    });
                }
            } else if !ignore_file {
                for command in &commands {
                    match command {
                        MetaCommand::AddFolder { name } if *name == file_name => {
                            return Err(VaultError::MetaEntryOverwrite(format!(
                                "a folder exists at {}",
                                display_path(&file_path)
                            )));
                        }
                        MetaCommand::AddFile { name, .. } if *name == file_name => {
                            return Err(VaultError::MetaEntryOverwrite(format!(
                                "{} already exists and the store is write-once",
                                display_path(&file_path)
                            )));
                        }
                        _ => {}
                    }
                }
                push_list.push(MetaCacheRow {
                    path: parent.clone(),
                    index: next_index,
                    is_new: next_index == 0,
                    command: MetaCommand::AddFile {
                        name: file_name.clone(),
                        size: file_size,
                    },
                });
            }
        }

        if !ignore_file {
            if let Some(blocks) = blocks {
                for (j, block) in blocks.iter().enumerate() {
                    push_list.push(MetaCacheRow {
                        path: file_path.clone(),
                        index: j as u32,
                        is_new: j == 0,
                        command: MetaCommand::AddBlock {
                            hash: block.hash,
                            size: block.size,
                            start: block.start,
                        },
                    });
                }
            }
        }

        debug!(remote, commands = push_list.len(), "meta commands cached");
        self.catalog.add_commands_to_transient_cache(&push_list)
    }

    /// Write all transient meta commands to their per-path logs. The cache
    /// rows covered by each record are removed in the same transaction that
    /// records the upload's assurance.
    pub async fn flush_meta(&self) -> Result<()> {
        let _guard = self.meta_sem.lock().await;

        let mut groups: BTreeMap<String, Vec<MetaCacheRow>> = BTreeMap::new();
        for row in self.catalog.commands_in_transient_cache(None)? {
            groups.entry(row.path.clone()).or_default().push(row);
        }

        for (path, mut rows) in groups {
            rows.sort_by_key(|row| row.index);
            let kind = rows[0].command.target_kind();
            let next_slot = self.next_meta_slot(&path, kind)?;

            let commands: Vec<MetaCommand> =
                rows.iter().map(|row| row.command.clone()).collect();
            let parts = MetaSegment::pack_commands(commands, self.config.segment_size)?;

            let mut consumed = 0usize;
            for (k, part) in parts.into_iter().enumerate() {
                let count = part.commands.len();
                let bound = rows[consumed + count - 1].index + 1;
                consumed += count;

                let payload = part.encode()?;
                let hash = ContentHash::compute(&payload);
                let id = self.meta_id(next_slot + k as u32, &path, kind);

                self.upload_flights
                    .run(id, || async {
                        self.flush_parity(false).await?;
                        self.upload_chunk_inner(
                            &payload,
                            &hash,
                            &id,
                            false,
                            Some(MetaFlush {
                                path: &path,
                                index_smaller_than: bound,
                            }),
                        )
                        .await
                    })
                    .await?;
                debug!(path = %display_path(&path), slot = next_slot + k as u32, "meta record flushed");
            }
        }
        Ok(())
    }
}
