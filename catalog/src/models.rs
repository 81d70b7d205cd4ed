//! Row types for the three persisted entities.
//!
//! The schema is the union of both chain variants: beacon rows fill the
//! consensus fields (`signature`, `state_root`, `body_root`, inclusion
//! proof), BSC rows fill `tx_index`. Unused columns stay at their defaults.

/// Block lifecycle: `Processed` when the sync loop persists it, `Verified`
/// once the verify loop confirms its bundle, `Skipped` when a startup
/// reconfiguration jumps the cursor past it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockStatus {
    Processed,
    Verified,
    Skipped,
}

impl BlockStatus {
    pub fn code(self) -> i64 {
        match self {
            BlockStatus::Processed => 0,
            BlockStatus::Verified => 1,
            BlockStatus::Skipped => 2,
        }
    }

    pub fn from_code(code: i64) -> Self {
        match code {
            1 => BlockStatus::Verified,
            2 => BlockStatus::Skipped,
            _ => BlockStatus::Processed,
        }
    }
}

/// Bundle lifecycle: `Finalizing → Finalized → Sealed`, with `Deprecated` as
/// the divergent terminal for skipped or re-uploaded bundles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BundleStatus {
    Finalizing,
    Finalized,
    Sealed,
    Deprecated,
}

impl BundleStatus {
    pub fn code(self) -> i64 {
        match self {
            BundleStatus::Finalizing => 0,
            BundleStatus::Finalized => 1,
            BundleStatus::Sealed => 2,
            BundleStatus::Deprecated => 3,
        }
    }

    pub fn from_code(code: i64) -> Self {
        match code {
            1 => BundleStatus::Finalized,
            2 => BundleStatus::Sealed,
            3 => BundleStatus::Deprecated,
            _ => BundleStatus::Finalizing,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Block {
    pub slot: u64,
    pub root: String,
    pub parent_root: String,
    pub state_root: String,
    pub body_root: String,
    pub signature: String,
    pub proposer_index: u64,
    pub el_block_height: u64,
    pub blob_count: i64,
    pub bundle_name: String,
    pub status: BlockStatus,
}

impl Block {
    /// Placeholder row for a forked block id: no payload beyond the id and
    /// the window that absorbed it.
    pub fn forked(slot: u64, bundle_name: &str) -> Self {
        Self {
            slot,
            root: String::new(),
            parent_root: String::new(),
            state_root: String::new(),
            body_root: String::new(),
            signature: String::new(),
            proposer_index: 0,
            el_block_height: 0,
            blob_count: 0,
            bundle_name: bundle_name.to_string(),
            status: BlockStatus::Processed,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Blob {
    pub name: String,
    pub slot: u64,
    pub idx: i64,
    pub tx_hash: String,
    pub to_addr: String,
    pub versioned_hash: String,
    pub tx_index: Option<i64>,
    pub kzg_commitment: String,
    pub kzg_proof: String,
    pub commitment_inclusion_proof: String,
    pub bundle_name: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Bundle {
    pub name: String,
    pub status: BundleStatus,
    pub calibrated: bool,
    pub created_time: i64,
}
