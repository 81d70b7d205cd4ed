//! Shared identifiers for the blob archival pipeline: bundle and blob name
//! grammar, block identifier parsing for the query surface, and the chain
//! variant selector.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

mod names;

pub use names::{
    get_blob_name, get_bundle_name, get_calibrated_bundle_name, parse_blob_name, parse_bundle_name,
    NameError,
};

/// Length in bytes of a beacon block root.
pub const ROOT_LENGTH: usize = 32;

/// Which upstream chain pair the archiver runs against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChainVariant {
    /// Ethereum beacon chain (consensus-layer sidecars).
    Ethereum,
    /// BSC execution chain (sidecars served over JSON-RPC).
    Bsc,
}

impl fmt::Display for ChainVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChainVariant::Ethereum => write!(f, "ethereum"),
            ChainVariant::Bsc => write!(f, "bsc"),
        }
    }
}

/// A block identifier supplied by a query-surface caller.
///
/// Accepts a `0x`-prefixed 32-byte block root or a decimal slot/height. The
/// beacon-API aliases `genesis` and `finalized` are not served by the archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockId {
    Root([u8; ROOT_LENGTH]),
    Id(u64),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockIdError {
    UnsupportedAlias(String),
    InvalidRootLength(usize),
    Invalid(String),
}

impl fmt::Display for BlockIdError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BlockIdError::UnsupportedAlias(alias) => {
                write!(f, "block identifier {alias} not supported, only <slot> and <block root>")
            }
            BlockIdError::InvalidRootLength(len) => {
                write!(f, "invalid block root of length {len}")
            }
            BlockIdError::Invalid(s) => write!(f, "invalid block identifier {s}"),
        }
    }
}

impl std::error::Error for BlockIdError {}

impl FromStr for BlockId {
    type Err = BlockIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "genesis" | "finalized" => Err(BlockIdError::UnsupportedAlias(s.to_string())),
            _ => {
                if let Some(stripped) = s.strip_prefix("0x") {
                    let bytes = hex::decode(stripped)
                        .map_err(|_| BlockIdError::Invalid(s.to_string()))?;
                    if bytes.len() != ROOT_LENGTH {
                        return Err(BlockIdError::InvalidRootLength(bytes.len()));
                    }
                    let mut root = [0u8; ROOT_LENGTH];
                    root.copy_from_slice(&bytes);
                    Ok(BlockId::Root(root))
                } else {
                    s.parse::<u64>()
                        .map(BlockId::Id)
                        .map_err(|_| BlockIdError::Invalid(s.to_string()))
                }
            }
        }
    }
}

impl BlockId {
    /// Hex encoding of the root without the `0x` prefix, as stored in the
    /// catalog.
    pub fn root_hex(&self) -> Option<String> {
        match self {
            BlockId::Root(root) => Some(hex::encode(root)),
            BlockId::Id(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn block_id_rejects_aliases() {
        assert!(matches!(
            "genesis".parse::<BlockId>(),
            Err(BlockIdError::UnsupportedAlias(_))
        ));
        assert!(matches!(
            "finalized".parse::<BlockId>(),
            Err(BlockIdError::UnsupportedAlias(_))
        ));
    }

    #[test]
    fn block_id_parses_decimal() {
        assert_eq!("8762203".parse::<BlockId>(), Ok(BlockId::Id(8762203)));
    }

    #[test]
    fn block_id_parses_root() {
        let root_hex = "a141b1d7d67f6cfd71b6d2c853d1e5e87e54dbad1ce81aa2b1f0ecc01c9442f4";
        let id = format!("0x{root_hex}").parse::<BlockId>().unwrap();
        assert_eq!(id.root_hex().unwrap(), root_hex);
    }

    #[test]
    fn block_id_rejects_short_root() {
        assert!(matches!(
            "0xdeadbeef".parse::<BlockId>(),
            Err(BlockIdError::InvalidRootLength(4))
        ));
    }
}
