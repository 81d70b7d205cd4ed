//! Sidecar view assembly from catalog rows and bundle objects.

use crate::ApiError;
use bundle_client::BundleClient;
use catalog::{Blob, Block, Catalog};
use lru::LruCache;
use parking_lot::Mutex;
use serde::Serialize;
use std::num::NonZeroUsize;
use std::sync::Arc;
use types::BlockId;

/// Blocks worth of sidecar responses kept in memory.
const CACHE_BLOCKS: usize = 4096;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BlockHeaderView {
    pub slot: String,
    pub proposer_index: String,
    pub parent_root: String,
    pub state_root: String,
    pub body_root: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SignedBlockHeaderView {
    pub message: BlockHeaderView,
    pub signature: String,
}

/// The sidecar shape served to consumers; hex fields are `0x`-prefixed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SidecarView {
    pub blob: String,
    pub index: String,
    pub kzg_commitment: String,
    pub kzg_proof: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub kzg_commitment_inclusion_proof: Vec<String>,
    pub signed_block_header: SignedBlockHeaderView,
}

fn prefixed(value: &str) -> String {
    if value.starts_with("0x") {
        value.to_string()
    } else {
        format!("0x{value}")
    }
}

pub struct BlobService {
    catalog: Catalog,
    bundle_client: Arc<BundleClient>,
    bucket: String,
    cache: Mutex<LruCache<u64, Vec<SidecarView>>>,
}

impl BlobService {
    pub fn new(catalog: Catalog, bundle_client: Arc<BundleClient>, bucket: String) -> Self {
        Self {
            catalog,
            bundle_client,
            bucket,
            cache: Mutex::new(LruCache::new(
                NonZeroUsize::new(CACHE_BLOCKS).expect("cache size is non-zero"),
            )),
        }
    }

    /// Sidecars for a block id or root, optionally filtered by index.
    ///
    /// The cache only serves and stores complete answers; filtered queries
    /// always go to the catalog and bundle service.
    pub async fn get_blob_sidecars(
        &self,
        block_id: &BlockId,
        indices: &[i64],
    ) -> Result<Vec<SidecarView>, ApiError> {
        let block = self.resolve_block(block_id)?;

        if indices.is_empty() {
            if let Some(cached) = self.cache.lock().get(&block.slot) {
                return Ok(cached.clone());
            }
        }

        let blobs = self.catalog.get_blobs_by_block_id(block.slot, indices)?;
        if blobs.is_empty() && block.blob_count > 0 && indices.is_empty() {
            return Err(ApiError::internal(format!(
                "blob rows missing for block {}",
                block.slot
            )));
        }

        let mut sidecars = vec![];
        for blob in &blobs {
            sidecars.push(self.build_sidecar(&block, blob).await?);
        }

        if indices.is_empty() {
            self.cache.lock().put(block.slot, sidecars.clone());
        }
        Ok(sidecars)
    }

    fn resolve_block(&self, block_id: &BlockId) -> Result<Block, ApiError> {
        let block = match block_id {
            BlockId::Id(id) => self.catalog.get_block_by_id(*id)?,
            BlockId::Root(_) => {
                let root = block_id.root_hex().unwrap_or_default();
                self.catalog.get_block_by_root(&root)?
            }
        };
        block.ok_or_else(|| ApiError::not_found("block not found in the archive"))
    }

    async fn build_sidecar(&self, block: &Block, blob: &Blob) -> Result<SidecarView, ApiError> {
        let object = self
            .bundle_client
            .get_object(&self.bucket, &blob.bundle_name, &blob.name)
            .await?;

        let inclusion_proof = blob
            .commitment_inclusion_proof
            .split(',')
            .filter(|part| !part.is_empty())
            .map(|part| part.to_string())
            .collect();

        Ok(SidecarView {
            blob: object,
            index: blob.idx.to_string(),
            kzg_commitment: prefixed(&blob.kzg_commitment),
            kzg_proof: prefixed(&blob.kzg_proof),
            kzg_commitment_inclusion_proof: inclusion_proof,
            signed_block_header: SignedBlockHeaderView {
                message: BlockHeaderView {
                    slot: block.slot.to_string(),
                    proposer_index: block.proposer_index.to_string(),
                    parent_root: prefixed(&block.parent_root),
                    state_root: prefixed(&block.state_root),
                    body_root: prefixed(&block.body_root),
                },
                signature: prefixed(&block.signature),
            },
        })
    }
}
