//! Reed-Solomon parity over segment payloads
//!
//! A parity collection groups N data payloads with M parity shards. Inputs
//! are logically padded to the longest member; parity length equals that
//! padded length. Repair reconstructs any combination of up to M broken
//! members in place.

use crate::error::{Result, VaultError};
use reed_solomon_erasure::galois_8::ReedSolomon;

/// One member of a repair operation.
///
/// `data` is `None` for broken members; `real_length` is the unpadded
/// payload length recorded in the member's assurance row.
#[derive(Debug, Clone)]
pub struct ShardInfo {
    pub data: Option<Vec<u8>>,
    pub real_length: usize,
}

impl ShardInfo {
    /// A member whose payload is available
    pub fn present(data: Vec<u8>) -> Self {
        let real_length = data.len();
        Self {
            data: Some(data),
            real_length,
        }
    }

    /// A broken member of known unpadded length
    pub fn broken(real_length: usize) -> Self {
        Self {
            data: None,
            real_length,
        }
    }

    pub fn is_broken(&self) -> bool {
        self.data.is_none()
    }
}

/// Compute M parity shards over N data payloads.
///
/// All inputs are padded to the longest payload; each returned shard has
/// that padded length.
pub fn create_parity(data: &[Vec<u8>], parity_count: usize) -> Result<Vec<Vec<u8>>> {
    if data.is_empty() || parity_count == 0 {
        return Err(VaultError::ParityCoding(
            "parity geometry must be nonzero".to_string(),
        ));
    }

    let shard_len = data.iter().map(Vec::len).max().unwrap_or(0).max(1);

    let mut shards: Vec<Vec<u8>> = data
        .iter()
        .map(|payload| {
            let mut shard = payload.clone();
            shard.resize(shard_len, 0);
            shard
        })
        .collect();
    for _ in 0..parity_count {
        shards.push(vec![0u8; shard_len]);
    }

    let rs = ReedSolomon::new(data.len(), parity_count)?;
    rs.encode(&mut shards)?;

    Ok(shards.split_off(data.len()))
}

/// Reconstruct broken members in place.
///
/// Fails with [`VaultError::NotEnoughParity`] when more members are broken
/// than parity shards exist. Repaired data members are truncated back to
/// their `real_length`.
pub fn repair_with_parity(
    data_info: &mut [ShardInfo],
    parity_info: &mut [ShardInfo],
) -> Result<()> {
    let n = data_info.len();
    let m = parity_info.len();

    let broken = data_info
        .iter()
        .chain(parity_info.iter())
        .filter(|s| s.is_broken())
        .count();
    if broken == 0 {
        return Ok(());
    }
    if broken > m {
        return Err(VaultError::NotEnoughParity { broken, parity: m });
    }

    // Every present parity shard carries the padded length; when all parity
    // is broken the data members must all be present, so the maximum present
    // length is the padded length either way.
    let shard_len = data_info
        .iter()
        .chain(parity_info.iter())
        .filter_map(|s| s.data.as_ref().map(Vec::len))
        .max()
        .unwrap_or(0)
        .max(1);

    let mut shards: Vec<Option<Vec<u8>>> = Vec::with_capacity(n + m);
    for info in data_info.iter() {
        shards.push(info.data.as_ref().map(|payload| {
            let mut shard = payload.clone();
            shard.resize(shard_len, 0);
            shard
        }));
    }
    for info in parity_info.iter() {
        match info.data.as_ref() {
            Some(shard) if shard.len() != shard_len => {
                return Err(VaultError::ParityCoding(format!(
                    "parity shard length {} does not match padded length {}",
                    shard.len(),
                    shard_len
                )));
            }
            Some(shard) => shards.push(Some(shard.clone())),
            None => shards.push(None),
        }
    }

    let rs = ReedSolomon::new(n, m)?;
    rs.reconstruct(&mut shards)?;

    for (info, shard) in data_info.iter_mut().zip(shards.iter_mut().take(n)) {
        if info.is_broken() {
            let mut payload = shard.take().ok_or_else(|| {
                VaultError::ParityCoding("reconstruction left a hole".to_string())
            })?;
            payload.truncate(info.real_length);
            info.data = Some(payload);
        }
    }
    for (info, shard) in parity_info.iter_mut().zip(shards.iter_mut().skip(n)) {
        if info.is_broken() {
            info.data = shard.take();
        }
    }

    Ok(())
}
