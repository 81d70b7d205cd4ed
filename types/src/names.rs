//! Bundle and blob object name grammar.
//!
//! Bundles cover a contiguous block-id range and are named
//! `blobs_s{start}_e{end}`; a re-uploaded replacement appends
//! `_calibrated_{unix_seconds}`. Blob objects are named
//! `blob_h{block_id}_i{index}`. Parsing tolerates the calibrated suffix so a
//! replacement bundle still reports the range it owns.

use std::fmt;

const BUNDLE_PREFIX: &str = "blobs_s";
const BLOB_PREFIX: &str = "blob_h";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NameError {
    InvalidBundleName(String),
    InvalidBlobName(String),
}

impl fmt::Display for NameError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NameError::InvalidBundleName(name) => write!(f, "invalid bundle name {name}"),
            NameError::InvalidBlobName(name) => write!(f, "invalid blob name {name}"),
        }
    }
}

impl std::error::Error for NameError {}

pub fn get_bundle_name(start_id: u64, end_id: u64) -> String {
    format!("blobs_s{start_id}_e{end_id}")
}

pub fn get_blob_name(block_id: u64, index: u64) -> String {
    format!("blob_h{block_id}_i{index}")
}

/// Name of the replacement bundle created by the re-upload procedure.
pub fn get_calibrated_bundle_name(original: &str, now_unix: i64) -> String {
    format!("{original}_calibrated_{now_unix}")
}

/// Recovers `(start_id, end_id)` from a bundle name, calibrated or not.
pub fn parse_bundle_name(name: &str) -> Result<(u64, u64), NameError> {
    let err = || NameError::InvalidBundleName(name.to_string());
    let rest = name.strip_prefix(BUNDLE_PREFIX).ok_or_else(err)?;
    let (start, rest) = rest.split_once("_e").ok_or_else(err)?;
    let end = rest.split('_').next().ok_or_else(err)?;
    let start_id = start.parse::<u64>().map_err(|_| err())?;
    let end_id = end.parse::<u64>().map_err(|_| err())?;
    Ok((start_id, end_id))
}

/// Recovers `(block_id, index)` from a blob object name.
pub fn parse_blob_name(name: &str) -> Result<(u64, u64), NameError> {
    let err = || NameError::InvalidBlobName(name.to_string());
    let rest = name.strip_prefix(BLOB_PREFIX).ok_or_else(err)?;
    let (block_id, index) = rest.split_once("_i").ok_or_else(err)?;
    let block_id = block_id.parse::<u64>().map_err(|_| err())?;
    let index = index.parse::<u64>().map_err(|_| err())?;
    Ok((block_id, index))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bundle_name_round_trip() {
        assert_eq!(get_bundle_name(8762203, 8762222), "blobs_s8762203_e8762222");
        assert_eq!(
            parse_bundle_name("blobs_s8762203_e8762222").unwrap(),
            (8762203, 8762222)
        );
        for (s, e) in [(0, 0), (1, 1), (100, 109), (u64::MAX - 1, u64::MAX)] {
            assert_eq!(parse_bundle_name(&get_bundle_name(s, e)).unwrap(), (s, e));
        }
    }

    #[test]
    fn calibrated_bundle_name_keeps_range() {
        let name = get_calibrated_bundle_name("blobs_s200_e209", 1_700_000_000);
        assert_eq!(name, "blobs_s200_e209_calibrated_1700000000");
        assert_eq!(parse_bundle_name(&name).unwrap(), (200, 209));
    }

    #[test]
    fn blob_name_round_trip() {
        assert_eq!(get_blob_name(1234, 5), "blob_h1234_i5");
        for (h, i) in [(0, 0), (8762203, 3), (u64::MAX, 6)] {
            assert_eq!(parse_blob_name(&get_blob_name(h, i)).unwrap(), (h, i));
        }
    }

    #[test]
    fn malformed_names_rejected() {
        assert!(parse_bundle_name("bundle_s1_e2").is_err());
        assert!(parse_bundle_name("blobs_s1").is_err());
        assert!(parse_bundle_name("blobs_sx_e2").is_err());
        assert!(parse_blob_name("blob_1_2").is_err());
        assert!(parse_blob_name("blob_h1_ix").is_err());
    }
}
