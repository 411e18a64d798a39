//! Engine orchestration: upload, download, parity and assurance flushing
//!
//! The engine ties the deterministic keyspace, the segment codec, the
//! catalog and the transport pool together. Meta-path operations live in
//! the `meta` module; everything here is the blob side.
//!
//! Locking order: `meta` semaphore before `parity` semaphore. The parity
//! semaphore serializes parity closing against assurance-log growth so the
//! two interleave atomically at collection boundaries.

use crate::cache::ChunkCache;
use crate::meta::BlockRef;
use crate::pool::ConnectionPool;
use crate::singleflight::Singleflight;
use crate::transport::{ServiceFactory, TransportChunk};
use bytes::Bytes;
use futures::future::BoxFuture;
use std::path::Path;
use std::sync::Arc;
use tidevault_catalog::{AssuranceRow, Catalog, MetaFlush};
use tidevault_core::{
    create_parity, repair_with_parity, AssuranceSegment, ContentHash, Generator, IndexId, Result,
    SegmentCodec, ShardInfo, VaultConfig, VaultError,
};
use tokio::io::AsyncReadExt;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

/// The storage engine of one vault
#[derive(Clone)]
pub struct Engine {
    pub(crate) config: VaultConfig,
    pub(crate) generator: Generator,
    pub(crate) codec: SegmentCodec,
    pub(crate) catalog: Arc<Catalog>,
    pool: ConnectionPool,
    pub(crate) upload_flights: Arc<Singleflight<()>>,
    download_flights: Arc<Singleflight<Bytes>>,
    cache: Arc<ChunkCache>,
    pub(crate) meta_sem: Arc<tokio::sync::Mutex<()>>,
    parity_sem: Arc<tokio::sync::Mutex<()>>,
    chunk_window: Arc<Semaphore>,
}

impl Engine {
    /// Open a vault: derive the keyspace from credentials and bind the
    /// catalog directory named by the vault's public hash.
    pub fn open(
        storage_code: &str,
        password: &str,
        config: VaultConfig,
        factory: Box<dyn ServiceFactory>,
        state_root: &Path,
    ) -> Result<Self> {
        let generator = Generator::from_credentials(storage_code, password)?;
        let dir = state_root.join(generator.public_hash());
        std::fs::create_dir_all(&dir).map_err(|e| VaultError::Io(e.to_string()))?;
        let catalog = Catalog::open(&dir, config.parity_data_count)?;
        Self::with_catalog(generator, config, factory, catalog)
    }

    /// Build an engine over an already-open catalog
    pub fn with_catalog(
        generator: Generator,
        config: VaultConfig,
        factory: Box<dyn ServiceFactory>,
        catalog: Catalog,
    ) -> Result<Self> {
        config.validate()?;
        catalog.ensure_fingerprint(&generator.public_hash())?;

        let codec = SegmentCodec::new(config.segment_size);
        let pool = ConnectionPool::new(factory, config.total_connections, config.upload_connections);
        let chunk_window = Arc::new(Semaphore::new(config.chunk_upload_window()));

        Ok(Self {
            generator,
            codec,
            catalog: Arc::new(catalog),
            pool,
            upload_flights: Arc::new(Singleflight::new()),
            download_flights: Arc::new(Singleflight::new()),
            cache: Arc::new(ChunkCache::default()),
            meta_sem: Arc::new(tokio::sync::Mutex::new(())),
            parity_sem: Arc::new(tokio::sync::Mutex::new(())),
            chunk_window,
            config,
        })
    }

    /// The identifier generator of this vault
    pub fn generator(&self) -> &Generator {
        &self.generator
    }

    /// Deterministic public fingerprint of this vault
    pub fn public_hash(&self) -> String {
        self.generator.public_hash()
    }

    // ===== Assurance load =====

    /// Mirror the remote assurance log into the catalog.
    ///
    /// Walks slots upward from the fetch cursor; the log ends at the first
    /// slot where no replication yields a decodable assurance segment.
    pub async fn load(&self) -> Result<()> {
        if self.catalog.get_all_assurances_fetched()? {
            return Ok(());
        }

        let mut slot = self
            .catalog
            .last_fetched_assurance_id()?
            .map(|s| s + 1)
            .unwrap_or(0);

        loop {
            let mut found = None;
            for replication in 0..self.config.assurance_replication_search_count {
                match self
                    .download_chunk_basic(&self.generator.assurance_id(slot), replication)
                    .await
                {
                    Ok(Some(bytes)) => match AssuranceSegment::decode(&bytes) {
                        Ok(segment) => {
                            found = Some(segment);
                            break;
                        }
                        Err(e) => {
                            debug!(slot, replication, error = %e, "undecodable assurance candidate")
                        }
                    },
                    Ok(None) => {}
                    Err(e) if e.is_transport() => return Err(e),
                    Err(e) => {
                        debug!(slot, replication, error = %e, "unreadable assurance candidate")
                    }
                }
            }

            match found {
                Some(segment) => {
                    self.catalog.add_fetched_assurances(&[segment], slot)?;
                    slot += 1;
                }
                None => break,
            }
        }

        self.catalog.set_all_assurances_fetched()?;
        info!(slots = slot, "assurance log mirrored");
        Ok(())
    }

    // ===== Upload path =====

    /// Upload a local file: stream it in segment-size chunks, then push the
    /// block map to the meta log.
    pub async fn upload_file(&self, local: &Path, remote: &str) -> Result<()> {
        let mut file = tokio::fs::File::open(local)
            .await
            .map_err(|e| VaultError::Io(e.to_string()))?;

        let mut blocks: Vec<BlockRef> = Vec::new();
        let mut start = 0u64;
        let mut tasks: JoinSet<Result<()>> = JoinSet::new();

        loop {
            let mut buf = vec![0u8; self.config.segment_size];
            let mut filled = 0;
            while filled < buf.len() {
                let n = file
                    .read(&mut buf[filled..])
                    .await
                    .map_err(|e| VaultError::Io(e.to_string()))?;
                if n == 0 {
                    break;
                }
                filled += n;
            }
            if filled == 0 {
                break;
            }
            buf.truncate(filled);

            let bytes = Bytes::from(buf);
            let hash = ContentHash::compute(&bytes);
            blocks.push(BlockRef {
                hash,
                start,
                size: filled as u32,
            });
            start += filled as u64;

            let permit = self
                .chunk_window
                .clone()
                .acquire_owned()
                .await
                .expect("upload window closed");
            let engine = self.clone();
            tasks.spawn(async move {
                let _permit = permit;
                engine.upload_chunk(bytes, hash).await
            });
        }

        while let Some(joined) = tasks.join_next().await {
            joined.map_err(|e| VaultError::Io(e.to_string()))??;
        }

        debug!(remote, size = start, chunks = blocks.len(), "file chunks uploaded");
        self.push_file_to_meta(Some(&blocks), start, remote).await
    }

    /// Upload one raw chunk; returns its index identifier
    pub async fn upload_file_chunk(
        &self,
        bytes: Bytes,
        hash: Option<ContentHash>,
    ) -> Result<IndexId> {
        let hash = hash.unwrap_or_else(|| ContentHash::compute(&bytes));
        let id = self.generator.raw_or_parity_id(&hash);
        self.upload_chunk(bytes, hash).await?;
        Ok(id)
    }

    /// Deduplicated chunk upload: flush any ready parity collections, then
    /// store the chunk.
    pub(crate) async fn upload_chunk(&self, bytes: Bytes, hash: ContentHash) -> Result<()> {
        let id = self.generator.raw_or_parity_id(&hash);
        self.upload_flights
            .run(id, || async {
                self.flush_parity(false).await?;
                self.upload_chunk_inner(&bytes, &hash, &id, false, None)
                    .await
            })
            .await
    }

    /// Record-keeping upload: idempotent against the catalog, walking
    /// replications until one locator accepts the blob.
    pub(crate) async fn upload_chunk_inner(
        &self,
        bytes: &[u8],
        hash: &ContentHash,
        id: &IndexId,
        is_parity: bool,
        meta_flush: Option<MetaFlush<'_>>,
    ) -> Result<()> {
        if self.catalog.find_assurance_by_index_id(id)?.is_some() {
            // Already stored; a meta flush riding along must still clear its
            // covered commands or they would be replayed forever.
            if let Some(flush) = meta_flush {
                self.catalog
                    .commands_flushed_for_path(flush.path, flush.index_smaller_than)?;
            }
            return Ok(());
        }

        let compressed = self.codec.compress(bytes)?;

        for replication in 0..self.config.replication_attempt_count {
            if self.upload_chunk_basic(&compressed, id, replication).await? {
                if is_parity {
                    // Parity rows record the raw shard length; repair needs it
                    self.catalog
                        .add_parity_assurance(id, replication, hash, bytes.len() as u32)?;
                } else {
                    self.catalog.add_data_assurance(
                        id,
                        replication,
                        hash,
                        compressed.len() as u32,
                        &compressed,
                        meta_flush,
                    )?;
                }
                self.cache.insert(id, Bytes::copy_from_slice(bytes));
                debug!(id = %id.to_hex(), replication, is_parity, "chunk stored");
                return Ok(());
            }
            // Another blob occupies this locator; try the next replication
        }

        Err(VaultError::UploadExhausted {
            attempts: self.config.replication_attempt_count,
        })
    }

    /// Codec + transport store of one already-compressed payload.
    /// `Ok(false)` means the locator is occupied by a foreign blob.
    async fn upload_chunk_basic(
        &self,
        compressed: &[u8],
        id: &IndexId,
        replication: u32,
    ) -> Result<bool> {
        let locator = self.generator.derive_locator(id, replication);
        let key = self.generator.segment_key(&locator);
        let ciphertext = self.codec.encode_compressed(compressed, &key)?;

        let mut session = self.pool.acquire_upload().await?;
        session
            .upload(TransportChunk {
                locator,
                subject: random_subject(),
                payload: Bytes::from(ciphertext),
            })
            .await
    }

    /// Fetch and decode the blob of one (IndexId, replication).
    /// `Ok(None)` means no blob at the locator.
    pub(crate) async fn download_chunk_basic(
        &self,
        id: &IndexId,
        replication: u32,
    ) -> Result<Option<Vec<u8>>> {
        let locator = self.generator.derive_locator(id, replication);
        let key = self.generator.segment_key(&locator);

        let body = {
            let mut session = self.pool.acquire_download().await?;
            session.get_body(&locator).await?
        };

        match body {
            None => Ok(None),
            Some(payload) => Ok(Some(self.codec.decode(&payload, &key)?)),
        }
    }

    // ===== Parity flushing =====

    /// Close the current partial parity collection and flush it
    pub async fn force_flush_parity(&self) -> Result<()> {
        self.flush_parity(true).await
    }

    /// Compute and upload parity for every ready collection.
    ///
    /// Holds the parity semaphore, so it is mutually exclusive with itself
    /// and with assurance flushing.
    pub(crate) async fn flush_parity(&self, force: bool) -> Result<()> {
        let _guard = self.parity_sem.lock().await;

        if force {
            self.catalog.force_parity_processing_state()?;
        }

        let ready = self.catalog.get_processing_parity_relations()?;
        for (collection_id, members) in ready {
            let mut inputs = Vec::with_capacity(members.len());
            for member in &members {
                let payload = self
                    .catalog
                    .get_tmp_compressed(&member.plain_hash)?
                    .ok_or_else(|| {
                        VaultError::Catalog(format!(
                            "missing tmp payload for {}",
                            member.plain_hash
                        ))
                    })?;
                inputs.push(payload);
            }

            let shards = create_parity(&inputs, self.config.parity_count)?;
            let mut parity_hashes = Vec::with_capacity(shards.len());
            for shard in &shards {
                let hash = ContentHash::compute(shard);
                let id = self.generator.raw_or_parity_id(&hash);
                self.upload_flights
                    .run(id, || async {
                        self.upload_chunk_inner(shard, &hash, &id, true, None).await
                    })
                    .await?;
                parity_hashes.push(hash);
            }

            self.catalog
                .close_parity_relations(collection_id, &parity_hashes)?;
            info!(collection_id, members = members.len(), "parity collection closed");
        }
        Ok(())
    }

    // ===== Assurance flushing =====

    /// Write the unflushed portion of the assurance log to the next free
    /// slots, with per-slot replication and read-back recovery.
    pub async fn flush_assurances(&self) -> Result<()> {
        let _guard = self.parity_sem.lock().await;

        let Some((aggregate, state)) = self
            .catalog
            .new_aggregated_assurance_segment_with_flush_state()?
        else {
            return Ok(());
        };

        let mut encoded = Vec::new();
        for part in aggregate.into_bounded_segments(self.config.segment_size)? {
            encoded.push(part.encode()?);
        }

        let next_slot = self
            .catalog
            .last_fetched_assurance_id()?
            .map(|s| s + 1)
            .unwrap_or(0);

        for i in (state.flushed_count as usize)..encoded.len() {
            let slot = next_slot + i as u32;
            let id = self.generator.assurance_id(slot);
            let payload = &encoded[i];
            let compressed = self.codec.compress(payload)?;

            let mut runs = 0u32;
            let mut invalid = 0u32;
            let mut replication = 0u32;
            // Bounded work per slot: the running cap grows with bad luck but
            // never past the search cap.
            while replication
                < self
                    .config
                    .assurance_replication_search_count
                    .min(self.config.assurance_replication_default_count + invalid)
            {
                let stored = self.upload_chunk_basic(&compressed, &id, replication).await?;
                runs += 1;
                if !stored {
                    // Occupied locator: a prior interrupted flush may have
                    // written the identical content there already.
                    match self.download_chunk_basic(&id, replication).await {
                        Ok(Some(existing)) if existing == *payload => {
                            debug!(slot, replication, "recovered prior assurance write")
                        }
                        Ok(_) => invalid += 1,
                        Err(e) if e.is_transport() => return Err(e),
                        Err(_) => invalid += 1,
                    }
                }
                replication += 1;
            }

            let valid = runs - invalid;
            if valid < self.config.assurance_replication_default_count {
                return Err(VaultError::InsufficientAssuranceReplication {
                    valid,
                    required: self.config.assurance_replication_default_count,
                });
            }

            self.catalog.increment_flushed_count()?;
            debug!(slot, valid, "assurance slot written");
        }

        self.catalog
            .mark_aggregation_flushed(next_slot, encoded.len() as u32)?;
        info!(
            base_slot = next_slot,
            segments = encoded.len(),
            "assurance aggregation flushed"
        );
        Ok(())
    }

    // ===== Download path =====

    /// Deduplicated chunk download with optional parity repair
    pub async fn download_chunk(&self, id: IndexId, parity_aware: bool) -> Result<Bytes> {
        self.download_flights
            .run(id, || self.download_chunk_uncached(id, parity_aware))
            .await
    }

    /// Boxed form for the repair recursion (repairing a member must not
    /// recursively repair its own members).
    fn download_chunk_flat(&self, id: IndexId) -> BoxFuture<'_, Result<Bytes>> {
        Box::pin(self.download_chunk(id, false))
    }

    async fn download_chunk_uncached(&self, id: IndexId, parity_aware: bool) -> Result<Bytes> {
        if let Some(bytes) = self.cache.get(&id) {
            return Ok(bytes);
        }

        let row = self
            .catalog
            .find_assurance_by_index_id(&id)?
            .ok_or_else(|| VaultError::NotFound(format!("no assurance for {}", id.to_hex())))?;

        match self.download_chunk_basic(&id, row.replication).await {
            Ok(Some(plain)) => {
                let bytes = Bytes::from(plain);
                self.cache.insert(&id, bytes.clone());
                return Ok(bytes);
            }
            Ok(None) => {
                if !parity_aware {
                    return Err(VaultError::NotFound(format!(
                        "blob missing for {}",
                        id.to_hex()
                    )));
                }
                warn!(id = %id.to_hex(), "stored blob missing, attempting parity repair");
            }
            Err(e) if e.is_transport() => return Err(e),
            Err(e) => {
                if !parity_aware {
                    return Err(e);
                }
                warn!(id = %id.to_hex(), error = %e, "stored blob corrupt, attempting parity repair");
            }
        }

        let recovered = self.repair_chunk(&row).await?;
        self.cache.insert(&id, recovered.clone());
        Ok(recovered)
    }

    /// Rebuild a lost chunk from the other members of its parity collection
    async fn repair_chunk(&self, row: &AssuranceRow) -> Result<Bytes> {
        let members = self.catalog.get_parity_relations_for_hash(&row.plain_hash)?;
        if members.is_empty() {
            return Err(VaultError::NotFound(format!(
                "no parity relations for {}",
                row.plain_hash
            )));
        }

        let mut data_info: Vec<ShardInfo> = Vec::new();
        let mut parity_info: Vec<ShardInfo> = Vec::new();
        let mut ours: Option<(bool, usize)> = None;

        for member in &members {
            let member_row = self
                .catalog
                .find_assurance_by_plain_hash(&member.plain_hash)?
                .ok_or_else(|| {
                    VaultError::Catalog(format!(
                        "parity member {} has no assurance",
                        member.plain_hash
                    ))
                })?;
            let real_length = member_row.stored_length as usize;
            let is_ours = member.plain_hash == row.plain_hash;

            let info = if is_ours {
                ShardInfo::broken(real_length)
            } else if !member.is_parity {
                // Data members repair in compressed space: use the retained
                // tmp payload, or re-download and re-compress (zstd at a
                // fixed level is deterministic).
                if let Some(tmp) = self.catalog.get_tmp_compressed(&member.plain_hash)? {
                    ShardInfo {
                        data: Some(tmp),
                        real_length,
                    }
                } else {
                    match self.download_chunk_flat(member_row.index_id).await {
                        Ok(plain) => ShardInfo {
                            data: Some(self.codec.compress(&plain)?),
                            real_length,
                        },
                        Err(e) if e.is_transport() => return Err(e),
                        Err(_) => ShardInfo::broken(real_length),
                    }
                }
            } else {
                match self.download_chunk_flat(member_row.index_id).await {
                    Ok(shard) => ShardInfo {
                        data: Some(shard.to_vec()),
                        real_length,
                    },
                    Err(e) if e.is_transport() => return Err(e),
                    Err(_) => ShardInfo::broken(real_length),
                }
            };

            if member.is_parity {
                if is_ours {
                    ours = Some((true, parity_info.len()));
                }
                parity_info.push(info);
            } else {
                if is_ours {
                    ours = Some((false, data_info.len()));
                }
                data_info.push(info);
            }
        }

        let (ours_is_parity, ours_index) = ours.ok_or_else(|| {
            VaultError::Catalog("requested hash absent from its own collection".to_string())
        })?;
        let broken = data_info
            .iter()
            .chain(parity_info.iter())
            .filter(|s| s.is_broken())
            .count();

        repair_with_parity(&mut data_info, &mut parity_info)?;

        let repaired = if ours_is_parity {
            parity_info[ours_index].data.take()
        } else {
            data_info[ours_index].data.take()
        }
        .ok_or_else(|| VaultError::ParityCoding("reconstruction left a hole".to_string()))?;

        let recovered = if ours_is_parity {
            repaired
        } else {
            self.codec.decompress(&repaired)?
        };

        if !row.plain_hash.verify(&recovered) {
            return Err(VaultError::NotEnoughParity {
                broken,
                parity: parity_info.len(),
            });
        }

        info!(hash = %row.plain_hash, broken, "chunk recovered via parity");
        Ok(Bytes::from(recovered))
    }
}

fn random_subject() -> String {
    use rand::RngCore;
    let mut bytes = [0u8; 12];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}
