//! Sled-backed vault catalog
//!
//! The only persistent local state of a vault: the assurance mirror, parity
//! relation collections, the transient meta-command cache and the flush
//! bookkeeping. One database directory per vault, named by the vault's
//! public hash. Multi-row mutations run as single sled transactions.

use crate::rows::{AssuranceRow, FlushState, MetaCacheRow, ParityRow};
use sled::transaction::{ConflictableTransactionError, TransactionalTree};
use sled::Transactional;
use std::collections::BTreeMap;
use std::path::Path;
use tidevault_core::{
    AssuranceSegment, ContentHash, IndexId, MetaKind, ParityRelationEntry, Result, SegmentEntry,
    VaultError,
};
use tracing::{debug, info};

const KV_FINGERPRINT: &str = "fingerprint";
const KV_NEXT_SEQ: &str = "next_seq";
const KV_NEXT_COLLECTION: &str = "next_collection_id";
const KV_OPEN_COLLECTION: &str = "open_collection";
const KV_OPEN_COUNT: &str = "open_count";
const KV_READY: &str = "ready";
const KV_FLUSHED_BELOW: &str = "flushed_below";
const KV_PENDING_FLUSH: &str = "pending_flush";
const KV_LAST_FETCHED_SLOT: &str = "last_fetched_slot";
const KV_ALL_FETCHED: &str = "all_fetched";

/// Transient-cache removal to perform atomically with an assurance insert
#[derive(Debug, Clone, Copy)]
pub struct MetaFlush<'a> {
    pub path: &'a str,
    pub index_smaller_than: u32,
}

/// The persistent catalog of one vault
pub struct Catalog {
    db: sled::Db,
    assurances: sled::Tree,
    by_hash: sled::Tree,
    parity: sled::Tree,
    parity_by_hash: sled::Tree,
    parity_tmp: sled::Tree,
    meta_cache: sled::Tree,
    kv: sled::Tree,

    /// Data members per parity collection (N)
    parity_data_count: usize,
}

type TxResult<T> = std::result::Result<T, ConflictableTransactionError<String>>;

impl Catalog {
    /// Open or create a catalog directory
    pub fn open<P: AsRef<Path>>(path: P, parity_data_count: usize) -> Result<Self> {
        info!(path = ?path.as_ref(), "opening vault catalog");
        let db = sled::open(path.as_ref()).map_err(storage_err)?;
        Self::with_db(db, parity_data_count)
    }

    /// Open an in-memory catalog (for testing)
    pub fn open_temporary(parity_data_count: usize) -> Result<Self> {
        let db = sled::Config::new()
            .temporary(true)
            .open()
            .map_err(storage_err)?;
        Self::with_db(db, parity_data_count)
    }

    fn with_db(db: sled::Db, parity_data_count: usize) -> Result<Self> {
        let tree = |name: &str| db.open_tree(name).map_err(storage_err);
        Ok(Self {
            assurances: tree("assurances")?,
            by_hash: tree("assurances_by_hash")?,
            parity: tree("parity")?,
            parity_by_hash: tree("parity_by_hash")?,
            parity_tmp: tree("parity_tmp")?,
            meta_cache: tree("meta_cache")?,
            kv: tree("kv")?,
            db,
            parity_data_count,
        })
    }

    /// Bind the catalog to a vault fingerprint; rejects a directory that was
    /// written by different credentials.
    pub fn ensure_fingerprint(&self, public_hash: &str) -> Result<()> {
        match self.kv.get(KV_FINGERPRINT).map_err(storage_err)? {
            None => {
                self.kv
                    .insert(KV_FINGERPRINT, public_hash.as_bytes())
                    .map_err(storage_err)?;
                Ok(())
            }
            Some(stored) if stored.as_ref() == public_hash.as_bytes() => Ok(()),
            Some(_) => Err(VaultError::Configuration(
                "catalog belongs to a different vault".to_string(),
            )),
        }
    }

    /// Flush the underlying database to disk
    pub fn flush(&self) -> Result<()> {
        self.db.flush().map_err(storage_err)?;
        Ok(())
    }

    // ===== Assurance lookups =====

    pub fn find_assurance_by_index_id(&self, id: &IndexId) -> Result<Option<AssuranceRow>> {
        get_value(&self.assurances, id.as_bytes())
    }

    pub fn find_assurance_by_plain_hash(&self, hash: &ContentHash) -> Result<Option<AssuranceRow>> {
        match self.by_hash.get(hash.as_bytes()).map_err(storage_err)? {
            Some(id_bytes) => {
                let row = get_value(&self.assurances, &id_bytes)?;
                Ok(row)
            }
            None => Ok(None),
        }
    }

    // ===== Assurance inserts =====

    /// Record a confirmed parity blob. Parity blobs never carry tmp data and
    /// never open a new parity relation.
    pub fn add_parity_assurance(
        &self,
        id: &IndexId,
        replication: u32,
        hash: &ContentHash,
        stored_length: u32,
    ) -> Result<()> {
        (&self.assurances, &self.by_hash, &self.kv)
            .transaction(|(assurances, by_hash, kv)| {
                if assurances.get(id.as_bytes())?.is_some() {
                    return Ok(());
                }
                let seq = bump_u64(kv, KV_NEXT_SEQ)?;
                let row = AssuranceRow {
                    index_id: *id,
                    replication,
                    plain_hash: *hash,
                    stored_length,
                    log_slot: None,
                    seq,
                };
                assurances.insert(id.as_bytes().to_vec(), encode(&row)?)?;
                by_hash.insert(hash.as_bytes().to_vec(), id.as_bytes().to_vec())?;
                Ok(())
            })
            .map_err(txn_err)?;
        debug!(id = %id.to_hex(), replication, "recorded parity assurance");
        Ok(())
    }

    /// Record a confirmed data blob together with its compressed payload,
    /// enrolling it in the open parity collection. When `meta_flush` is set,
    /// the covered transient meta commands are removed in the same
    /// transaction.
    pub fn add_data_assurance(
        &self,
        id: &IndexId,
        replication: u32,
        hash: &ContentHash,
        stored_length: u32,
        compressed: &[u8],
        meta_flush: Option<MetaFlush<'_>>,
    ) -> Result<()> {
        // TransactionalTree cannot iterate, so the cache keys covered by the
        // meta flush are collected up front; the meta semaphore keeps the
        // set stable until the transaction commits.
        let flushed_keys = match meta_flush {
            Some(flush) => self.meta_cache_keys_below(flush.path, flush.index_smaller_than)?,
            None => Vec::new(),
        };

        let data_count = self.parity_data_count as u32;
        (
            &self.assurances,
            &self.by_hash,
            &self.parity,
            &self.parity_by_hash,
            &self.parity_tmp,
            &self.meta_cache,
            &self.kv,
        )
            .transaction(|(assurances, by_hash, parity, parity_by_hash, parity_tmp, meta_cache, kv)| {
                for key in &flushed_keys {
                    meta_cache.remove(key.clone())?;
                }

                if assurances.get(id.as_bytes())?.is_some() {
                    return Ok(());
                }

                let seq = bump_u64(kv, KV_NEXT_SEQ)?;
                let row = AssuranceRow {
                    index_id: *id,
                    replication,
                    plain_hash: *hash,
                    stored_length,
                    log_slot: None,
                    seq,
                };
                assurances.insert(id.as_bytes().to_vec(), encode(&row)?)?;
                by_hash.insert(hash.as_bytes().to_vec(), id.as_bytes().to_vec())?;

                // Enroll in the open collection, allocating one on demand
                let collection_id = match kv.get(KV_OPEN_COLLECTION)? {
                    Some(raw) => be_u64(&raw),
                    None => {
                        let cid = bump_u64(kv, KV_NEXT_COLLECTION)? + 1;
                        kv.insert(KV_OPEN_COLLECTION, cid.to_be_bytes().to_vec())?;
                        kv.insert(KV_OPEN_COUNT, 0u32.to_be_bytes().to_vec())?;
                        cid
                    }
                };

                let relation_seq = bump_u64(kv, KV_NEXT_SEQ)?;
                let relation = ParityRow {
                    collection_id,
                    plain_hash: *hash,
                    is_parity: false,
                    seq: relation_seq,
                };
                parity.insert(parity_key(collection_id, hash), encode(&relation)?)?;
                parity_by_hash.insert(hash.as_bytes().to_vec(), collection_id.to_be_bytes().to_vec())?;
                parity_tmp.insert(hash.as_bytes().to_vec(), compressed.to_vec())?;

                let count = kv
                    .get(KV_OPEN_COUNT)?
                    .map(|raw| be_u32(&raw))
                    .unwrap_or(0)
                    + 1;
                if count >= data_count {
                    let mut ready = read_ready(kv)?;
                    ready.push(collection_id);
                    kv.insert(KV_READY, encode(&ready)?)?;

                    let next = bump_u64(kv, KV_NEXT_COLLECTION)? + 1;
                    kv.insert(KV_OPEN_COLLECTION, next.to_be_bytes().to_vec())?;
                    kv.insert(KV_OPEN_COUNT, 0u32.to_be_bytes().to_vec())?;
                } else {
                    kv.insert(KV_OPEN_COUNT, count.to_be_bytes().to_vec())?;
                }
                Ok(())
            })
            .map_err(txn_err)?;
        debug!(id = %id.to_hex(), replication, length = stored_length, "recorded data assurance");
        Ok(())
    }

    // ===== Parity relations =====

    /// Compressed payload of a data member, kept until its collection closes
    pub fn get_tmp_compressed(&self, hash: &ContentHash) -> Result<Option<Vec<u8>>> {
        Ok(self
            .parity_tmp
            .get(hash.as_bytes())
            .map_err(storage_err)?
            .map(|v| v.to_vec()))
    }

    /// Mark the current partial collection ready even if it has fewer than N
    /// members.
    pub fn force_parity_processing_state(&self) -> Result<()> {
        self.kv
            .transaction(|kv| {
                let count = kv.get(KV_OPEN_COUNT)?.map(|raw| be_u32(&raw)).unwrap_or(0);
                if count == 0 {
                    return Ok(());
                }
                let open = match kv.get(KV_OPEN_COLLECTION)? {
                    Some(raw) => be_u64(&raw),
                    None => return Ok(()),
                };

                let mut ready = read_ready(kv)?;
                ready.push(open);
                kv.insert(KV_READY, encode(&ready)?)?;

                let next = bump_u64(kv, KV_NEXT_COLLECTION)? + 1;
                kv.insert(KV_OPEN_COLLECTION, next.to_be_bytes().to_vec())?;
                kv.insert(KV_OPEN_COUNT, 0u32.to_be_bytes().to_vec())?;
                Ok(())
            })
            .map_err(txn_err)?;
        Ok(())
    }

    /// Collections ready to be closed, each with its members in insertion
    /// order.
    pub fn get_processing_parity_relations(&self) -> Result<BTreeMap<u64, Vec<ParityRow>>> {
        let ready: Vec<u64> = match self.kv.get(KV_READY).map_err(storage_err)? {
            Some(raw) => bincode::deserialize(&raw)?,
            None => Vec::new(),
        };

        let mut out = BTreeMap::new();
        for collection_id in ready {
            out.insert(collection_id, self.collection_members(collection_id)?);
        }
        Ok(out)
    }

    /// Close a collection: record its M parity members and drop the tmp
    /// payloads of the N data members.
    pub fn close_parity_relations(
        &self,
        collection_id: u64,
        parity_hashes: &[ContentHash],
    ) -> Result<()> {
        let data_hashes: Vec<ContentHash> = self
            .collection_members(collection_id)?
            .into_iter()
            .filter(|row| !row.is_parity)
            .map(|row| row.plain_hash)
            .collect();

        (
            &self.parity,
            &self.parity_by_hash,
            &self.parity_tmp,
            &self.kv,
        )
            .transaction(|(parity, parity_by_hash, parity_tmp, kv)| {
                for hash in parity_hashes {
                    let seq = bump_u64(kv, KV_NEXT_SEQ)?;
                    let row = ParityRow {
                        collection_id,
                        plain_hash: *hash,
                        is_parity: true,
                        seq,
                    };
                    parity.insert(parity_key(collection_id, hash), encode(&row)?)?;
                    parity_by_hash
                        .insert(hash.as_bytes().to_vec(), collection_id.to_be_bytes().to_vec())?;
                }

                for hash in &data_hashes {
                    parity_tmp.remove(hash.as_bytes().to_vec())?;
                }

                let ready: Vec<u64> = read_ready(kv)?
                    .into_iter()
                    .filter(|cid| *cid != collection_id)
                    .collect();
                kv.insert(KV_READY, encode(&ready)?)?;
                Ok(())
            })
            .map_err(txn_err)?;
        debug!(collection_id, parity = parity_hashes.len(), "closed parity collection");
        Ok(())
    }

    /// All members of the collection containing `hash`, in insertion order
    pub fn get_parity_relations_for_hash(&self, hash: &ContentHash) -> Result<Vec<ParityRow>> {
        match self.parity_by_hash.get(hash.as_bytes()).map_err(storage_err)? {
            Some(raw) => self.collection_members(be_u64(&raw)),
            None => Ok(Vec::new()),
        }
    }

    fn collection_members(&self, collection_id: u64) -> Result<Vec<ParityRow>> {
        let mut rows: Vec<ParityRow> = Vec::new();
        for item in self.parity.scan_prefix(collection_id.to_be_bytes()) {
            let (_, value) = item.map_err(storage_err)?;
            rows.push(bincode::deserialize(&value)?);
        }
        rows.sort_by_key(|row| row.seq);
        Ok(rows)
    }

    // ===== Assurance log aggregation =====

    /// The unflushed portion of the assurance log as one aggregated segment,
    /// or the pinned aggregation of an interrupted flush. `None` when there
    /// is nothing to flush.
    pub fn new_aggregated_assurance_segment_with_flush_state(
        &self,
    ) -> Result<Option<(AssuranceSegment, FlushState)>> {
        let state = match get_value::<FlushState>(&self.kv, KV_PENDING_FLUSH.as_bytes())? {
            Some(pending) => pending,
            None => {
                // `flushed_below` is the first sequence not yet on the log
                let flushed_below = self.read_kv_u64(KV_FLUSHED_BELOW)?;
                let next_seq = self.read_kv_u64(KV_NEXT_SEQ)?;
                if flushed_below >= next_seq {
                    return Ok(None);
                }
                let state = FlushState {
                    min_seq: flushed_below,
                    max_seq: next_seq - 1,
                    flushed_count: 0,
                };
                put_value(&self.kv, KV_PENDING_FLUSH.as_bytes(), &state)?;
                state
            }
        };

        let segment = self.build_aggregation(state.min_seq, state.max_seq)?;
        if segment.is_empty() {
            self.kv.remove(KV_PENDING_FLUSH).map_err(storage_err)?;
            return Ok(None);
        }
        Ok(Some((segment, state)))
    }

    fn build_aggregation(&self, min_seq: u64, max_seq: u64) -> Result<AssuranceSegment> {
        let mut segments: Vec<(u64, SegmentEntry)> = Vec::new();
        for item in self.assurances.iter() {
            let (_, value) = item.map_err(storage_err)?;
            let row: AssuranceRow = bincode::deserialize(&value)?;
            if row.seq >= min_seq && row.seq <= max_seq {
                segments.push((
                    row.seq,
                    SegmentEntry {
                        index_id: row.index_id,
                        replication: row.replication,
                        plain_hash: row.plain_hash,
                        stored_length: row.stored_length,
                    },
                ));
            }
        }
        segments.sort_by_key(|(seq, _)| *seq);

        let mut relations: Vec<(u64, ParityRelationEntry)> = Vec::new();
        for item in self.parity.iter() {
            let (_, value) = item.map_err(storage_err)?;
            let row: ParityRow = bincode::deserialize(&value)?;
            if row.seq >= min_seq && row.seq <= max_seq {
                relations.push((
                    row.seq,
                    ParityRelationEntry {
                        collection_id: row.collection_id,
                        plain_hash: row.plain_hash,
                        is_parity: row.is_parity,
                    },
                ));
            }
        }
        relations.sort_by_key(|(seq, _)| *seq);

        Ok(AssuranceSegment {
            segments: segments.into_iter().map(|(_, entry)| entry).collect(),
            parity_relations: relations.into_iter().map(|(_, entry)| entry).collect(),
        })
    }

    /// One more segment of the pending aggregation reached its slot
    pub fn increment_flushed_count(&self) -> Result<()> {
        let mut state: FlushState = get_value(&self.kv, KV_PENDING_FLUSH.as_bytes())?
            .ok_or_else(|| VaultError::Catalog("no pending assurance flush".to_string()))?;
        state.flushed_count += 1;
        put_value(&self.kv, KV_PENDING_FLUSH.as_bytes(), &state)
    }

    /// The whole pending aggregation reached the log; advance the watermark
    /// and the fetched-slot cursor past our own writes.
    pub fn mark_aggregation_flushed(&self, base_slot: u32, segment_count: u32) -> Result<()> {
        let state: FlushState = get_value(&self.kv, KV_PENDING_FLUSH.as_bytes())?
            .ok_or_else(|| VaultError::Catalog("no pending assurance flush".to_string()))?;

        self.kv
            .transaction(|kv| {
                kv.insert(KV_FLUSHED_BELOW, (state.max_seq + 1).to_be_bytes().to_vec())?;
                kv.insert(
                    KV_LAST_FETCHED_SLOT,
                    (base_slot + segment_count - 1).to_be_bytes().to_vec(),
                )?;
                kv.remove(KV_PENDING_FLUSH)?;
                Ok(())
            })
            .map_err(txn_err)?;

        // Stamp the slot onto the flushed rows; informational only
        for item in self.assurances.iter() {
            let (key, value) = item.map_err(storage_err)?;
            let mut row: AssuranceRow = bincode::deserialize(&value)?;
            if row.seq >= state.min_seq && row.seq <= state.max_seq && row.log_slot.is_none() {
                row.log_slot = Some(base_slot);
                self.assurances
                    .insert(key, bincode::serialize(&row)?)
                    .map_err(storage_err)?;
            }
        }
        Ok(())
    }

    // ===== Assurance log fetch =====

    /// Mirror assurance segments read from the log at `slot` into the
    /// catalog. Fetched rows are already on the transport, so the flush
    /// watermark advances past them.
    pub fn add_fetched_assurances(&self, segments: &[AssuranceSegment], slot: u32) -> Result<()> {
        (
            &self.assurances,
            &self.by_hash,
            &self.parity,
            &self.parity_by_hash,
            &self.kv,
        )
            .transaction(|(assurances, by_hash, parity, parity_by_hash, kv)| {
                for segment in segments {
                    for entry in &segment.segments {
                        if assurances.get(entry.index_id.as_bytes())?.is_some() {
                            continue;
                        }
                        let seq = bump_u64(kv, KV_NEXT_SEQ)?;
                        let row = AssuranceRow {
                            index_id: entry.index_id,
                            replication: entry.replication,
                            plain_hash: entry.plain_hash,
                            stored_length: entry.stored_length,
                            log_slot: Some(slot),
                            seq,
                        };
                        assurances.insert(entry.index_id.as_bytes().to_vec(), encode(&row)?)?;
                        by_hash.insert(
                            entry.plain_hash.as_bytes().to_vec(),
                            entry.index_id.as_bytes().to_vec(),
                        )?;
                    }

                    for relation in &segment.parity_relations {
                        let key = parity_key(relation.collection_id, &relation.plain_hash);
                        if parity.get(key.clone())?.is_some() {
                            continue;
                        }
                        let seq = bump_u64(kv, KV_NEXT_SEQ)?;
                        let row = ParityRow {
                            collection_id: relation.collection_id,
                            plain_hash: relation.plain_hash,
                            is_parity: relation.is_parity,
                            seq,
                        };
                        parity.insert(key, encode(&row)?)?;
                        parity_by_hash.insert(
                            relation.plain_hash.as_bytes().to_vec(),
                            relation.collection_id.to_be_bytes().to_vec(),
                        )?;
                    }
                }

                let next_seq = kv.get(KV_NEXT_SEQ)?.map(|raw| be_u64(&raw)).unwrap_or(0);
                kv.insert(KV_FLUSHED_BELOW, next_seq.to_be_bytes().to_vec())?;
                kv.insert(KV_LAST_FETCHED_SLOT, slot.to_be_bytes().to_vec())?;
                Ok(())
            })
            .map_err(txn_err)?;
        debug!(slot, "mirrored fetched assurance segments");
        Ok(())
    }

    /// Last assurance log slot known to exist remotely
    pub fn last_fetched_assurance_id(&self) -> Result<Option<u32>> {
        Ok(self
            .kv
            .get(KV_LAST_FETCHED_SLOT)
            .map_err(storage_err)?
            .map(|raw| be_u32(&raw)))
    }

    pub fn set_all_assurances_fetched(&self) -> Result<()> {
        self.kv
            .insert(KV_ALL_FETCHED, vec![1u8])
            .map_err(storage_err)?;
        Ok(())
    }

    pub fn get_all_assurances_fetched(&self) -> Result<bool> {
        Ok(self.kv.get(KV_ALL_FETCHED).map_err(storage_err)?.is_some())
    }

    // ===== Transient meta cache =====

    /// Cached commands, for one path or all paths, ordered by (path, index)
    pub fn commands_in_transient_cache(&self, path: Option<&str>) -> Result<Vec<MetaCacheRow>> {
        let iter = match path {
            Some(p) => self.meta_cache.scan_prefix(meta_prefix(p)),
            None => self.meta_cache.iter(),
        };

        let mut rows = Vec::new();
        for item in iter {
            let (_, value) = item.map_err(storage_err)?;
            rows.push(bincode::deserialize::<MetaCacheRow>(&value)?);
        }
        Ok(rows)
    }

    /// The kind a path has in the transient cache, if it appears there
    pub fn meta_type_at_path_in_transient_cache(&self, path: &str) -> Result<Option<MetaKind>> {
        let rows = self.commands_in_transient_cache(Some(path))?;
        Ok(rows.first().map(|row| row.command.target_kind()))
    }

    pub fn add_commands_to_transient_cache(&self, rows: &[MetaCacheRow]) -> Result<()> {
        let mut batch = sled::Batch::default();
        for row in rows {
            batch.insert(meta_key(&row.path, row.index), bincode::serialize(row)?);
        }
        self.meta_cache.apply_batch(batch).map_err(storage_err)?;
        Ok(())
    }

    /// Drop cached commands for a path with index below the bound
    pub fn commands_flushed_for_path(&self, path: &str, index_smaller_than: u32) -> Result<()> {
        let mut batch = sled::Batch::default();
        for key in self.meta_cache_keys_below(path, index_smaller_than)? {
            batch.remove(key);
        }
        self.meta_cache.apply_batch(batch).map_err(storage_err)?;
        Ok(())
    }

    fn meta_cache_keys_below(&self, path: &str, index_smaller_than: u32) -> Result<Vec<Vec<u8>>> {
        let mut keys = Vec::new();
        for item in self.meta_cache.scan_prefix(meta_prefix(path)) {
            let (key, value) = item.map_err(storage_err)?;
            let row: MetaCacheRow = bincode::deserialize(&value)?;
            if row.index < index_smaller_than {
                keys.push(key.to_vec());
            }
        }
        Ok(keys)
    }

    fn read_kv_u64(&self, key: &str) -> Result<u64> {
        Ok(self
            .kv
            .get(key)
            .map_err(storage_err)?
            .map(|raw| be_u64(&raw))
            .unwrap_or(0))
    }
}

// ===== Key and value helpers =====

fn parity_key(collection_id: u64, hash: &ContentHash) -> Vec<u8> {
    let mut key = Vec::with_capacity(8 + 32);
    key.extend_from_slice(&collection_id.to_be_bytes());
    key.extend_from_slice(hash.as_bytes());
    key
}

fn meta_prefix(path: &str) -> Vec<u8> {
    let mut prefix = Vec::with_capacity(path.len() + 1);
    prefix.extend_from_slice(path.as_bytes());
    prefix.push(0x00);
    prefix
}

fn meta_key(path: &str, index: u32) -> Vec<u8> {
    let mut key = meta_prefix(path);
    key.extend_from_slice(&index.to_be_bytes());
    key
}

fn be_u64(raw: &[u8]) -> u64 {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&raw[..8]);
    u64::from_be_bytes(bytes)
}

fn be_u32(raw: &[u8]) -> u32 {
    let mut bytes = [0u8; 4];
    bytes.copy_from_slice(&raw[..4]);
    u32::from_be_bytes(bytes)
}

/// Post-increment a u64 counter inside a transaction, returning the value
/// before the bump.
fn bump_u64(kv: &TransactionalTree, key: &str) -> TxResult<u64> {
    let current = kv.get(key)?.map(|raw| be_u64(&raw)).unwrap_or(0);
    kv.insert(key, (current + 1).to_be_bytes().to_vec())?;
    Ok(current)
}

fn read_ready(kv: &TransactionalTree) -> TxResult<Vec<u64>> {
    match kv.get(KV_READY)? {
        Some(raw) => {
            bincode::deserialize(&raw).map_err(|e| ConflictableTransactionError::Abort(e.to_string()))
        }
        None => Ok(Vec::new()),
    }
}

fn encode<V: serde::Serialize>(value: &V) -> TxResult<Vec<u8>> {
    bincode::serialize(value).map_err(|e| ConflictableTransactionError::Abort(e.to_string()))
}

fn get_value<V: serde::de::DeserializeOwned>(tree: &sled::Tree, key: &[u8]) -> Result<Option<V>> {
    match tree.get(key).map_err(storage_err)? {
        Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
        None => Ok(None),
    }
}

fn put_value<V: serde::Serialize>(tree: &sled::Tree, key: &[u8], value: &V) -> Result<()> {
    tree.insert(key, bincode::serialize(value)?)
        .map_err(storage_err)?;
    Ok(())
}

fn storage_err(err: sled::Error) -> VaultError {
    VaultError::Catalog(err.to_string())
}

fn txn_err(err: sled::transaction::TransactionError<String>) -> VaultError {
    match err {
        sled::transaction::TransactionError::Abort(message) => VaultError::Catalog(message),
        sled::transaction::TransactionError::Storage(e) => VaultError::Catalog(e.to_string()),
    }
}
