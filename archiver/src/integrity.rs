//! Integrity hash of a sealed object, matching the storage chain's checksum
//! scheme.
//!
//! The object is cut into segments of the chain-configured size. The primary
//! digest is a SHA-256 over the per-segment SHA-256 checksums. Each segment
//! is additionally Reed-Solomon encoded into `data + parity` shards; digest
//! `i + 1` is the SHA-256 over the per-segment checksums of shard `i`. The
//! output therefore holds `1 + data_shards + parity_shards` digests, compared
//! element-wise against the on-chain object metadata.

use crate::Error;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use bundle_client::StorageParams;
use reed_solomon_erasure::galois_8::ReedSolomon;
use sha2::{Digest, Sha256};

fn checksum(data: &[u8]) -> [u8; 32] {
    Sha256::digest(data).into()
}

/// SHA-256 over a concatenated checksum list.
fn integrity_root(checksums: &[[u8; 32]]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    for piece in checksums {
        hasher.update(piece);
    }
    hasher.finalize().into()
}

/// Splits one segment into `data_shards` equal pieces (zero-padded) and
/// extends them with `parity_shards` Reed-Solomon parity pieces.
fn encode_segment(
    segment: &[u8],
    data_shards: usize,
    parity_shards: usize,
) -> Result<Vec<Vec<u8>>, Error> {
    if data_shards == 0 {
        return Err(Error::Internal("data_shards must be positive".to_string()));
    }
    let shard_size = segment.len().div_ceil(data_shards).max(1);
    let mut shards: Vec<Vec<u8>> = Vec::with_capacity(data_shards + parity_shards);
    for i in 0..data_shards {
        let start = (i * shard_size).min(segment.len());
        let end = ((i + 1) * shard_size).min(segment.len());
        let mut shard = segment[start..end].to_vec();
        shard.resize(shard_size, 0);
        shards.push(shard);
    }
    if parity_shards > 0 {
        shards.extend(std::iter::repeat_with(|| vec![0u8; shard_size]).take(parity_shards));
        let rs = ReedSolomon::new(data_shards, parity_shards)
            .map_err(|e| Error::Internal(format!("reed-solomon setup: {e:?}")))?;
        rs.encode(&mut shards)
            .map_err(|e| Error::Internal(format!("reed-solomon encode: {e:?}")))?;
    }
    Ok(shards)
}

/// Computes the full digest list for `data` under `params`.
pub fn compute_integrity_hash(
    data: &[u8],
    params: &StorageParams,
) -> Result<Vec<[u8; 32]>, Error> {
    let ec_shards = params.data_shards + params.parity_shards;
    let mut segment_checksums: Vec<[u8; 32]> = vec![];
    let mut shard_checksums: Vec<Vec<[u8; 32]>> = vec![vec![]; ec_shards];

    let segment_size = params.segment_size.max(1) as usize;
    for segment in data.chunks(segment_size) {
        segment_checksums.push(checksum(segment));
        let shards = encode_segment(segment, params.data_shards, params.parity_shards)?;
        for (index, shard) in shards.iter().enumerate() {
            shard_checksums[index].push(checksum(shard));
        }
    }

    let mut hash_list = Vec::with_capacity(1 + ec_shards);
    hash_list.push(integrity_root(&segment_checksums));
    for checksums in &shard_checksums {
        hash_list.push(integrity_root(checksums));
    }
    Ok(hash_list)
}

/// The digest list Base64-encoded, the form the chain metadata uses.
pub fn compute_integrity_hash_base64(
    data: &[u8],
    params: &StorageParams,
) -> Result<Vec<String>, Error> {
    Ok(compute_integrity_hash(data, params)?
        .iter()
        .map(|digest| BASE64.encode(digest))
        .collect())
}
