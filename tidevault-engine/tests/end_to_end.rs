//! End-to-end tests for the Tidevault engine
//!
//! Each test drives the full pipeline against a shared in-memory transport:
//! upload → parity → assurance flush → fresh engine → load → meta → download.
//!
//! Run with: cargo test --test end_to_end

use bytes::Bytes;
use std::sync::Arc;
use tempfile::TempDir;
use tidevault_catalog::Catalog;
use tidevault_core::{
    generate_storage_code, ContentHash, Generator, MetaKind, VaultConfig, VaultError,
};
use tidevault_engine::{Engine, MemoryServiceFactory, MemoryStore};

const SEGMENT_SIZE: usize = 8 * 1024;
const PARITY_DATA: usize = 4;
const PARITY: usize = 2;

fn test_config() -> VaultConfig {
    VaultConfig::default()
        .with_segment_size(SEGMENT_SIZE)
        .with_parity(PARITY_DATA, PARITY)
}

/// A fresh engine (empty catalog) over a shared transport
fn engine_over(store: &Arc<MemoryStore>, storage_code: &str) -> Engine {
    let generator = Generator::from_credentials(storage_code, "test password").unwrap();
    let catalog = Catalog::open_temporary(PARITY_DATA).unwrap();
    let factory = MemoryServiceFactory::new(store.clone());
    Engine::with_catalog(generator, test_config(), Box::new(factory), catalog).unwrap()
}

/// Generate test file data of specified size
fn generate_file(size: usize) -> Vec<u8> {
    // Incompressible-ish pattern so compression does not trivialize sizes
    (0..size)
        .map(|i| (i as u32).wrapping_mul(2654435761).to_le_bytes()[1])
        .collect()
}

async fn write_local(dir: &TempDir, name: &str, payload: &[u8]) -> std::path::PathBuf {
    let path = dir.path().join(name);
    tokio::fs::write(&path, payload).await.unwrap();
    path
}

#[tokio::test]
async fn test_empty_vault_and_directory_roundtrip() {
    let store = MemoryStore::new();
    let code = generate_storage_code();

    let engine = engine_over(&store, &code);
    engine.load().await.unwrap();
    assert!(engine.download_meta_for_path("/").await.unwrap().is_none());

    engine.new_directory("/a").await.unwrap();
    engine.flush_meta().await.unwrap();
    engine.flush_assurances().await.unwrap();

    // A fresh engine with an empty catalog sees the folder through the log
    let fresh = engine_over(&store, &code);
    fresh.load().await.unwrap();

    let meta = fresh.download_meta_for_path("/a").await.unwrap().unwrap();
    assert_eq!(meta.kind, MetaKind::Folder);
    assert!(meta.children().is_empty());

    let root = fresh.download_meta_for_path("/").await.unwrap().unwrap();
    assert_eq!(root.children(), vec![("a".to_string(), MetaKind::Folder, None)]);
}

#[tokio::test]
async fn test_single_file_round_trip() {
    let store = MemoryStore::new();
    let code = generate_storage_code();
    let dir = TempDir::new().unwrap();

    let payload = generate_file(3 * SEGMENT_SIZE + 100);
    let local = write_local(&dir, "x.bin", &payload).await;

    let engine = engine_over(&store, &code);
    engine.load().await.unwrap();
    engine.upload_file(&local, "/x.bin").await.unwrap();
    engine.flush_assurances().await.unwrap();
    engine.flush_meta().await.unwrap();
    engine.flush_assurances().await.unwrap();

    let fresh = engine_over(&store, &code);
    fresh.load().await.unwrap();

    let meta = fresh.download_meta_for_path("/x.bin").await.unwrap().unwrap();
    assert!(meta.is_file());
    let blocks = meta.blocks();
    assert_eq!(blocks.len(), 4);
    assert!(blocks.windows(2).all(|w| w[0].start < w[1].start));
    assert_eq!(
        blocks.iter().map(|b| b.size as usize).sum::<usize>(),
        payload.len()
    );

    let mut rebuilt = Vec::new();
    for block in &blocks {
        let id = fresh.generator().raw_or_parity_id(&block.hash);
        let bytes = fresh.download_chunk(id, true).await.unwrap();
        rebuilt.extend_from_slice(&bytes);
    }
    assert_eq!(rebuilt, payload);

    // The parent folder lists the file with its size
    let root = fresh.download_meta_for_path("/").await.unwrap().unwrap();
    assert_eq!(
        root.children(),
        vec![("x.bin".to_string(), MetaKind::File, Some(payload.len() as u64))]
    );
}

#[tokio::test]
async fn test_overwrite_rejected() {
    let store = MemoryStore::new();
    let code = generate_storage_code();
    let dir = TempDir::new().unwrap();

    let engine = engine_over(&store, &code);
    engine.load().await.unwrap();
    let first = write_local(&dir, "first", &generate_file(512)).await;
    engine.upload_file(&first, "/x.bin").await.unwrap();
    engine.flush_assurances().await.unwrap();
    engine.flush_meta().await.unwrap();
    engine.flush_assurances().await.unwrap();

    // Same engine: rejected out of the transient/local state
    let other = write_local(&dir, "other", b"different content").await;
    let result = engine.upload_file(&other, "/x.bin").await;
    assert!(matches!(result, Err(VaultError::MetaEntryOverwrite(_))));

    // Fresh engine over the flushed log: still rejected
    let fresh = engine_over(&store, &code);
    fresh.load().await.unwrap();
    let result = fresh.upload_file(&other, "/x.bin").await;
    assert!(matches!(result, Err(VaultError::MetaEntryOverwrite(_))));
}

#[tokio::test]
async fn test_namespace_disjointness() {
    let store = MemoryStore::new();
    let code = generate_storage_code();
    let dir = TempDir::new().unwrap();
    let local = write_local(&dir, "payload", &generate_file(256)).await;

    let engine = engine_over(&store, &code);
    engine.load().await.unwrap();

    engine.new_directory("/y").await.unwrap();
    let result = engine.upload_file(&local, "/y").await;
    assert!(matches!(result, Err(VaultError::MetaEntryOverwrite(_))));

    engine.upload_file(&local, "/z.bin").await.unwrap();
    let result = engine.new_directory("/z.bin").await;
    assert!(matches!(result, Err(VaultError::MetaEntryOverwrite(_))));

    // A file cannot shadow a folder deeper in the chain either
    let result = engine.upload_file(&local, "/z.bin/sub/file").await;
    assert!(matches!(result, Err(VaultError::MetaEntryOverwrite(_))));
}

#[tokio::test]
async fn test_invalid_paths_rejected() {
    let store = MemoryStore::new();
    let engine = engine_over(&store, &generate_storage_code());

    for path in ["relative", "/a//b", "/a/../b", "/"] {
        let result = engine.push_file_to_meta(None, 0, path).await;
        assert!(
            matches!(result, Err(VaultError::InvalidPath(_))),
            "path {path:?} should be rejected"
        );
    }
}

/// Upload N distinct chunks and close their parity collection, returning
/// the chunk hashes in upload order.
async fn upload_collection(engine: &Engine) -> Vec<ContentHash> {
    let mut hashes = Vec::new();
    for tag in 0..PARITY_DATA as u8 {
        let mut payload = generate_file(SEGMENT_SIZE / 2 + tag as usize * 97);
        payload[0] = tag; // distinct content per chunk
        let hash = ContentHash::compute(&payload);
        engine
            .upload_file_chunk(Bytes::from(payload), Some(hash))
            .await
            .unwrap();
        hashes.push(hash);
    }
    engine.force_flush_parity().await.unwrap();
    hashes
}

fn remove_all_replications(store: &Arc<MemoryStore>, engine: &Engine, hash: &ContentHash) {
    let id = engine.generator().raw_or_parity_id(hash);
    let config = test_config();
    let mut removed = false;
    for replication in 0..config.replication_attempt_count {
        removed |= store.remove_blob(&engine.generator().derive_locator(&id, replication));
    }
    assert!(removed, "expected at least one stored replication");
}

#[tokio::test]
async fn test_parity_repairs_deleted_chunk() {
    let store = MemoryStore::new();
    let code = generate_storage_code();

    let engine = engine_over(&store, &code);
    engine.load().await.unwrap();
    let hashes = upload_collection(&engine).await;
    engine.flush_assurances().await.unwrap();

    // Fresh engine so nothing is cached locally, then lose one data blob
    let fresh = engine_over(&store, &code);
    fresh.load().await.unwrap();
    remove_all_replications(&store, &fresh, &hashes[1]);

    let id = fresh.generator().raw_or_parity_id(&hashes[1]);
    let recovered = fresh.download_chunk(id, true).await.unwrap();
    assert_eq!(ContentHash::compute(&recovered), hashes[1]);
}

#[tokio::test]
async fn test_parity_gives_up_past_m_losses() {
    let store = MemoryStore::new();
    let code = generate_storage_code();

    let engine = engine_over(&store, &code);
    engine.load().await.unwrap();
    let hashes = upload_collection(&engine).await;
    engine.flush_assurances().await.unwrap();

    let fresh = engine_over(&store, &code);
    fresh.load().await.unwrap();

    // M + 1 data members gone: repair must fail, not fabricate data
    for hash in hashes.iter().take(PARITY + 1) {
        remove_all_replications(&store, &fresh, hash);
    }

    let id = fresh.generator().raw_or_parity_id(&hashes[0]);
    let result = fresh.download_chunk(id, true).await;
    assert!(matches!(result, Err(VaultError::NotEnoughParity { .. })));
}

#[tokio::test]
async fn test_chunk_upload_idempotent() {
    let store = MemoryStore::new();
    let engine = engine_over(&store, &generate_storage_code());
    engine.load().await.unwrap();

    let payload = Bytes::from(generate_file(1024));
    engine
        .upload_file_chunk(payload.clone(), None)
        .await
        .unwrap();
    let uploads_after_first = store.upload_calls();

    // Second upload of identical content never touches the transport
    engine.upload_file_chunk(payload, None).await.unwrap();
    assert_eq!(store.upload_calls(), uploads_after_first);
}

#[tokio::test]
async fn test_download_dedup_single_transport_call() {
    let store = MemoryStore::new();
    let code = generate_storage_code();

    let engine = engine_over(&store, &code);
    engine.load().await.unwrap();
    let payload = generate_file(2048);
    let hash = ContentHash::compute(&payload);
    let id = engine
        .upload_file_chunk(Bytes::from(payload.clone()), Some(hash))
        .await
        .unwrap();
    engine.flush_assurances().await.unwrap();

    let fresh = engine_over(&store, &code);
    fresh.load().await.unwrap();

    let before = store.get_body_calls();
    let mut tasks = Vec::new();
    for _ in 0..32 {
        let engine = fresh.clone();
        tasks.push(tokio::spawn(async move {
            engine.download_chunk(id, true).await
        }));
    }
    for task in tasks {
        let bytes = task.await.unwrap().unwrap();
        assert_eq!(bytes.as_ref(), payload.as_slice());
    }
    assert_eq!(store.get_body_calls() - before, 1);
}

#[tokio::test]
async fn test_assurance_slots_grow_in_order() {
    let store = MemoryStore::new();
    let code = generate_storage_code();

    let engine = engine_over(&store, &code);
    engine.load().await.unwrap();

    let first_id = engine
        .upload_file_chunk(Bytes::from(generate_file(100)), None)
        .await
        .unwrap();
    engine.flush_assurances().await.unwrap();

    engine
        .upload_file_chunk(Bytes::from(generate_file(200)), None)
        .await
        .unwrap();
    engine.flush_assurances().await.unwrap();

    // Slots 0 and 1 exist on the transport at their primary replication:
    // the second flush landed strictly after the first.
    let generator = Generator::from_credentials(&code, "test password").unwrap();
    let config = test_config();
    for slot in 0..2u32 {
        let id = generator.assurance_id(slot);
        let mut found = false;
        for replication in 0..config.assurance_replication_search_count {
            found |= store.remove_blob(&generator.derive_locator(&id, replication));
        }
        assert!(found, "assurance slot {slot} missing from transport");
    }

    // With every replication of both slots deleted the log reads as empty,
    // so a blind client learns nothing about the stored chunks
    let probe = engine_over(&store, &code);
    probe.load().await.unwrap();
    let result = probe.download_chunk(first_id, true).await;
    assert!(matches!(result, Err(VaultError::NotFound(_))));
}

#[tokio::test]
async fn test_nothing_to_flush_is_noop() {
    let store = MemoryStore::new();
    let engine = engine_over(&store, &generate_storage_code());
    engine.load().await.unwrap();

    engine.flush_assurances().await.unwrap();
    engine.flush_meta().await.unwrap();
    engine.force_flush_parity().await.unwrap();
    assert_eq!(store.blob_count(), 0);
}

#[tokio::test]
async fn test_download_unknown_chunk_is_not_found() {
    let store = MemoryStore::new();
    let engine = engine_over(&store, &generate_storage_code());
    engine.load().await.unwrap();

    let id = engine
        .generator()
        .raw_or_parity_id(&ContentHash::compute(b"never uploaded"));
    let result = engine.download_chunk(id, true).await;
    assert!(matches!(result, Err(VaultError::NotFound(_))));
}
