//! Segment codec and wire record formats
//!
//! The on-wire pipeline for every blob is
//! `compress → frame → pad → encrypt`, so all ciphertexts of a vault are
//! indistinguishable in length. Decoding reverses the chain.
//!
//! Two record formats ride inside segments: [`AssuranceSegment`] (the index
//! log) and [`MetaSegment`] (virtual filesystem commands). Both are
//! bincode-encoded and split at entry granularity when an encoding would
//! exceed the segment size, so every written slot decodes standalone.

use crate::crypto::{self, ContentHash, SegmentKey};
use crate::error::{Result, VaultError};
use crate::keys::IndexId;
use serde::{Deserialize, Serialize};

/// zstd level used for all segment payloads
const COMPRESSION_LEVEL: i32 = 3;

/// Length-prefix frame overhead
const FRAME_LEN: usize = 4;

/// Compression / framing / padding / encryption for one vault
#[derive(Debug, Clone)]
pub struct SegmentCodec {
    segment_size: usize,
}

impl SegmentCodec {
    /// Create a codec for the given plaintext segment size
    pub fn new(segment_size: usize) -> Self {
        Self { segment_size }
    }

    /// Plaintext size bound per segment
    pub fn segment_size(&self) -> usize {
        self.segment_size
    }

    /// Largest accepted plaintext payload. Data chunks are bounded by the
    /// segment size; parity shards live in compressed space and may exceed
    /// it by the compression overhead of an incompressible chunk.
    fn max_plain_len(&self) -> usize {
        self.segment_size + self.segment_size / 64 + 512
    }

    /// Padded frame length: maximal payload plus slack for incompressible
    /// payloads (zstd can expand slightly) plus the length prefix.
    fn padded_frame_len(&self) -> usize {
        self.segment_size + self.segment_size / 32 + 1024 + FRAME_LEN
    }

    /// Compress a plaintext payload
    pub fn compress(&self, plain: &[u8]) -> Result<Vec<u8>> {
        if plain.len() > self.max_plain_len() {
            return Err(VaultError::SegmentTooLarge {
                size: plain.len(),
                max: self.max_plain_len(),
            });
        }
        zstd::encode_all(plain, COMPRESSION_LEVEL).map_err(|e| VaultError::Io(e.to_string()))
    }

    /// Decompress a payload produced by [`compress`](Self::compress)
    pub fn decompress(&self, compressed: &[u8]) -> Result<Vec<u8>> {
        zstd::decode_all(compressed).map_err(|e| VaultError::InvalidFormat(e.to_string()))
    }

    /// Frame, pad and encrypt an already-compressed payload
    pub fn encode_compressed(&self, compressed: &[u8], key: &SegmentKey) -> Result<Vec<u8>> {
        let padded_len = self.padded_frame_len();
        if FRAME_LEN + compressed.len() > padded_len {
            return Err(VaultError::SegmentTooLarge {
                size: compressed.len(),
                max: padded_len - FRAME_LEN,
            });
        }

        let mut frame = Vec::with_capacity(padded_len);
        frame.extend_from_slice(&(compressed.len() as u32).to_le_bytes());
        frame.extend_from_slice(compressed);
        frame.resize(padded_len, 0);

        crypto::encrypt(&frame, key)
    }

    /// Run the full encode chain on a plaintext payload
    pub fn encode(&self, plain: &[u8], key: &SegmentKey) -> Result<Vec<u8>> {
        let compressed = self.compress(plain)?;
        self.encode_compressed(&compressed, key)
    }

    /// Reverse the chain: decrypt, unframe, decompress
    pub fn decode(&self, ciphertext: &[u8], key: &SegmentKey) -> Result<Vec<u8>> {
        let frame = crypto::decrypt(ciphertext, key)?;
        if frame.len() != self.padded_frame_len() {
            return Err(VaultError::InvalidFormat(format!(
                "unexpected frame length {}",
                frame.len()
            )));
        }

        let mut len_bytes = [0u8; FRAME_LEN];
        len_bytes.copy_from_slice(&frame[..FRAME_LEN]);
        let len = u32::from_le_bytes(len_bytes) as usize;
        if FRAME_LEN + len > frame.len() {
            return Err(VaultError::InvalidFormat(format!(
                "frame claims {} payload bytes",
                len
            )));
        }

        self.decompress(&frame[FRAME_LEN..FRAME_LEN + len])
    }
}

// ===== Assurance records =====

/// One confirmed blob: (IndexId, replication, plain hash, stored length)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentEntry {
    pub index_id: IndexId,
    pub replication: u32,
    pub plain_hash: ContentHash,
    pub stored_length: u32,
}

/// Membership of one blob hash in a parity collection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParityRelationEntry {
    pub collection_id: u64,
    pub plain_hash: ContentHash,
    pub is_parity: bool,
}

/// One record of the assurance log
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssuranceSegment {
    pub segments: Vec<SegmentEntry>,
    pub parity_relations: Vec<ParityRelationEntry>,
}

impl AssuranceSegment {
    /// Encode to wire bytes
    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    /// Decode from wire bytes
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        bincode::deserialize(bytes).map_err(|e| VaultError::InvalidFormat(e.to_string()))
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty() && self.parity_relations.is_empty()
    }

    /// Split into records whose encodings stay within `max_encoded` bytes.
    ///
    /// Entry order is preserved: all segment entries first, then all parity
    /// relations, spilling into further records as needed.
    pub fn into_bounded_segments(self, max_encoded: usize) -> Result<Vec<AssuranceSegment>> {
        let base = bincode::serialized_size(&AssuranceSegment::default())? as usize;
        let mut out: Vec<AssuranceSegment> = Vec::new();
        let mut current = AssuranceSegment::default();
        let mut current_size = base;

        for entry in self.segments {
            let entry_size = bincode::serialized_size(&entry)? as usize;
            if current_size + entry_size > max_encoded && !current.is_empty() {
                out.push(std::mem::take(&mut current));
                current_size = base;
            }
            current.segments.push(entry);
            current_size += entry_size;
        }

        for relation in self.parity_relations {
            let entry_size = bincode::serialized_size(&relation)? as usize;
            if current_size + entry_size > max_encoded && !current.is_empty() {
                out.push(std::mem::take(&mut current));
                current_size = base;
            }
            current.parity_relations.push(relation);
            current_size += entry_size;
        }

        if !current.is_empty() {
            out.push(current);
        }
        Ok(out)
    }
}

// ===== Meta records =====

/// Whether a path names a file or a folder; the namespaces are disjoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MetaKind {
    File,
    Folder,
}

/// One virtual-filesystem command
///
/// Commands for a path accumulate monotonically; later commands extend but
/// never modify earlier ones.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MetaCommand {
    /// Child folder reference inside a folder path
    AddFolder { name: String },
    /// Child file reference inside a folder path
    AddFile { name: String, size: u64 },
    /// Extent of a file-path chunk
    AddBlock {
        hash: ContentHash,
        size: u32,
        start: u64,
    },
}

impl MetaCommand {
    /// The kind of path this command can appear on
    pub fn target_kind(&self) -> MetaKind {
        match self {
            MetaCommand::AddBlock { .. } => MetaKind::File,
            MetaCommand::AddFolder { .. } | MetaCommand::AddFile { .. } => MetaKind::Folder,
        }
    }
}

/// One record of a per-path meta log
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetaSegment {
    pub commands: Vec<MetaCommand>,
}

impl MetaSegment {
    /// Encode to wire bytes
    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    /// Decode from wire bytes
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        bincode::deserialize(bytes).map_err(|e| VaultError::InvalidFormat(e.to_string()))
    }

    /// Pack an ordered command list into records bounded by `max_encoded`.
    pub fn pack_commands(commands: Vec<MetaCommand>, max_encoded: usize) -> Result<Vec<MetaSegment>> {
        let base = bincode::serialized_size(&MetaSegment::default())? as usize;
        let mut out: Vec<MetaSegment> = Vec::new();
        let mut current = MetaSegment::default();
        let mut current_size = base;

        for command in commands {
            let entry_size = bincode::serialized_size(&command)? as usize;
            if current_size + entry_size > max_encoded && !current.commands.is_empty() {
                out.push(std::mem::take(&mut current));
                current_size = base;
            }
            current.commands.push(command);
            current_size += entry_size;
        }

        if !current.commands.is_empty() {
            out.push(current);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::KEY_SIZE;

    fn codec() -> SegmentCodec {
        SegmentCodec::new(16 * 1024)
    }

    fn key(byte: u8) -> SegmentKey {
        SegmentKey::from_bytes([byte; KEY_SIZE])
    }

    fn entry(tag: u8) -> SegmentEntry {
        SegmentEntry {
            index_id: IndexId::from_bytes([tag; 32]),
            replication: tag as u32,
            plain_hash: ContentHash::compute(&[tag]),
            stored_length: 100 + tag as u32,
        }
    }

    #[test]
    fn test_codec_roundtrip() {
        let codec = codec();
        let key = key(1);
        let plain = b"the quick brown fox jumps over the lazy dog".repeat(10);

        let ciphertext = codec.encode(&plain, &key).unwrap();
        let decoded = codec.decode(&ciphertext, &key).unwrap();
        assert_eq!(decoded, plain);
    }

    #[test]
    fn test_ciphertexts_indistinguishable_in_length() {
        let codec = codec();
        let key = key(2);

        // Empty, tiny, compressible, incompressible and maximal payloads
        // must all produce identically sized ciphertexts.
        let incompressible: Vec<u8> = (0..codec.segment_size())
            .map(|i| (i as u32).wrapping_mul(2654435761).to_le_bytes()[0])
            .collect();
        let payloads: Vec<Vec<u8>> = vec![
            Vec::new(),
            b"x".to_vec(),
            vec![0u8; codec.segment_size()],
            incompressible,
        ];

        let lengths: Vec<usize> = payloads
            .iter()
            .map(|p| codec.encode(p, &key).unwrap().len())
            .collect();
        assert!(lengths.windows(2).all(|w| w[0] == w[1]));
    }

    #[test]
    fn test_oversized_plaintext_rejected() {
        let codec = codec();
        let plain = vec![0u8; codec.segment_size() * 2];
        assert!(matches!(
            codec.encode(&plain, &key(3)),
            Err(VaultError::SegmentTooLarge { .. })
        ));
    }

    #[test]
    fn test_wrong_locator_key_fails() {
        let codec = codec();
        let ciphertext = codec.encode(b"payload", &key(4)).unwrap();
        assert!(matches!(
            codec.decode(&ciphertext, &key(5)),
            Err(VaultError::Decryption(_))
        ));
    }

    #[test]
    fn test_assurance_segment_roundtrip() {
        let segment = AssuranceSegment {
            segments: vec![entry(1), entry(2)],
            parity_relations: vec![ParityRelationEntry {
                collection_id: 7,
                plain_hash: ContentHash::compute(b"p"),
                is_parity: true,
            }],
        };

        let bytes = segment.encode().unwrap();
        let decoded = AssuranceSegment::decode(&bytes).unwrap();
        assert_eq!(decoded, segment);
    }

    #[test]
    fn test_decode_garbage_is_invalid_format() {
        assert!(matches!(
            AssuranceSegment::decode(&[0xFF; 7]),
            Err(VaultError::InvalidFormat(_))
        ));
        assert!(matches!(
            MetaSegment::decode(&[0xFF; 7]),
            Err(VaultError::InvalidFormat(_))
        ));
    }

    #[test]
    fn test_bounded_split_preserves_order() {
        let segment = AssuranceSegment {
            segments: (0..40).map(|i| entry(i as u8)).collect(),
            parity_relations: (0..10)
                .map(|i| ParityRelationEntry {
                    collection_id: i,
                    plain_hash: ContentHash::compute(&i.to_le_bytes()),
                    is_parity: false,
                })
                .collect(),
        };
        let original = segment.clone();

        let parts = segment.into_bounded_segments(512).unwrap();
        assert!(parts.len() > 1);
        for part in &parts {
            assert!(part.encode().unwrap().len() <= 512);
        }

        let rejoined = AssuranceSegment {
            segments: parts.iter().flat_map(|p| p.segments.clone()).collect(),
            parity_relations: parts
                .iter()
                .flat_map(|p| p.parity_relations.clone())
                .collect(),
        };
        assert_eq!(rejoined, original);
    }

    #[test]
    fn test_pack_commands_bounded() {
        let commands: Vec<MetaCommand> = (0..50)
            .map(|i| MetaCommand::AddFile {
                name: format!("file-{i}"),
                size: i,
            })
            .collect();

        let packed = MetaSegment::pack_commands(commands.clone(), 256).unwrap();
        assert!(packed.len() > 1);
        for segment in &packed {
            assert!(segment.encode().unwrap().len() <= 256);
        }

        let rejoined: Vec<MetaCommand> = packed
            .into_iter()
            .flat_map(|segment| segment.commands)
            .collect();
        assert_eq!(rejoined, commands);
    }

    #[test]
    fn test_command_target_kinds() {
        assert_eq!(
            MetaCommand::AddFolder { name: "d".into() }.target_kind(),
            MetaKind::Folder
        );
        assert_eq!(
            MetaCommand::AddFile {
                name: "f".into(),
                size: 1
            }
            .target_kind(),
            MetaKind::Folder
        );
        assert_eq!(
            MetaCommand::AddBlock {
                hash: ContentHash::compute(b"b"),
                size: 1,
                start: 0
            }
            .target_kind(),
            MetaKind::File
        );
    }
}
