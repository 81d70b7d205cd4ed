//! Builds catalog rows from upstream chain data.
//!
//! Hex roots and signatures are stored without their `0x` prefix; KZG fields
//! keep the upstream string form. Blob-carrying transactions are correlated
//! by walking the execution block's transactions in order and handing each
//! versioned hash to the next unfilled blob slot.

use crate::Error;
use catalog::{Blob, Block, BlockStatus};
use chain_source::{ChainSource, GeneralSidecar, GetBlockResponse, Transaction};
use types::get_blob_name;

/// Beacon block versions the field mapping understands.
const SUPPORTED_VERSIONS: &[&str] = &["deneb", "electra"];

fn strip_hex(value: &str) -> String {
    value.trim_start_matches("0x").to_string()
}

/// Validates a `0x`-prefixed hex field and returns it without the prefix.
fn decode_hex_field(field: &'static str, value: &str) -> Result<String, Error> {
    let stripped = value.trim_start_matches("0x");
    hex::decode(stripped).map_err(|_| Error::Internal(format!("invalid hex {field}: {value}")))?;
    Ok(stripped.to_string())
}

fn parse_sidecar_index(index: &str) -> Result<i64, Error> {
    index
        .parse::<i64>()
        .map_err(|_| Error::Internal(format!("invalid sidecar index {index}")))
}

/// Assigns `tx_hash`, `to_addr` and successive versioned hashes from the
/// block's blob transactions to blobs in order.
pub(crate) fn correlate_blob_transactions(blobs: &mut [Blob], transactions: &[Transaction]) {
    let mut blob_index = 0;
    for tx in transactions.iter().filter(|tx| tx.is_blob_tx()) {
        for versioned_hash in &tx.blob_versioned_hashes {
            let Some(blob) = blobs.get_mut(blob_index) else {
                return;
            };
            blob.tx_hash = strip_hex(&tx.hash);
            blob.to_addr = tx.to.clone().unwrap_or_default();
            blob.versioned_hash = versioned_hash.clone();
            blob_index += 1;
        }
    }
}

/// Builds the block and blob rows for a finalized beacon slot.
pub(crate) async fn beacon_block_and_blobs(
    chain: &ChainSource,
    block: &GetBlockResponse,
    sidecars: &[GeneralSidecar],
    slot: u64,
    bundle_name: &str,
) -> Result<(Block, Vec<Blob>), Error> {
    if !SUPPORTED_VERSIONS.contains(&block.version.as_str()) {
        return Err(Error::Internal(format!(
            "unexpected block version {}",
            block.version
        )));
    }

    let message = &block.data.message;
    let header = chain.get_beacon_header(slot).await?;
    let root = decode_hex_field("header root", &header.data.root)?;
    let signature = decode_hex_field("header signature", &header.data.header.signature)?;

    let block_row = Block {
        slot,
        root,
        parent_root: strip_hex(&message.parent_root),
        state_root: strip_hex(&message.state_root),
        // Same value as the hash-tree-root of the block body, already
        // computed by the node that served the header.
        body_root: strip_hex(&header.data.header.message.body_root),
        signature,
        proposer_index: message.proposer_index,
        el_block_height: message.body.execution_payload.block_number,
        blob_count: sidecars.len() as i64,
        bundle_name: bundle_name.to_string(),
        status: BlockStatus::Processed,
    };

    let mut blobs = vec![];
    for sidecar in sidecars {
        let idx = parse_sidecar_index(&sidecar.sidecar.index)?;
        blobs.push(Blob {
            name: get_blob_name(slot, idx as u64),
            slot,
            idx,
            tx_hash: String::new(),
            to_addr: String::new(),
            versioned_hash: String::new(),
            tx_index: None,
            kzg_commitment: sidecar.sidecar.kzg_commitment.clone(),
            kzg_proof: sidecar.sidecar.kzg_proof.clone(),
            commitment_inclusion_proof: sidecar
                .sidecar
                .kzg_commitment_inclusion_proof
                .join(","),
            bundle_name: bundle_name.to_string(),
        });
    }

    if !blobs.is_empty() {
        let el_block = chain.block_by_number(block_row.el_block_height).await?;
        correlate_blob_transactions(&mut blobs, &el_block.transactions);
    }
    Ok((block_row, blobs))
}

/// Builds the block and blob rows for a finalized BSC height.
pub(crate) async fn bsc_block_and_blobs(
    chain: &ChainSource,
    sidecars: &[GeneralSidecar],
    height: u64,
    bundle_name: &str,
) -> Result<(Block, Vec<Blob>), Error> {
    let header = chain.get_block_header(height).await?;
    let block_row = Block {
        slot: height,
        root: strip_hex(&header.hash),
        parent_root: strip_hex(&header.parent_hash),
        state_root: String::new(),
        body_root: String::new(),
        signature: String::new(),
        proposer_index: 0,
        el_block_height: height,
        blob_count: sidecars.len() as i64,
        bundle_name: bundle_name.to_string(),
        status: BlockStatus::Processed,
    };

    let mut blobs = vec![];
    for sidecar in sidecars {
        let idx = parse_sidecar_index(&sidecar.sidecar.index)?;
        blobs.push(Blob {
            name: get_blob_name(height, idx as u64),
            slot: height,
            idx,
            tx_hash: sidecar.tx_hash.as_deref().map(strip_hex).unwrap_or_default(),
            to_addr: String::new(),
            versioned_hash: String::new(),
            tx_index: sidecar.tx_index,
            kzg_commitment: sidecar.sidecar.kzg_commitment.clone(),
            kzg_proof: sidecar.sidecar.kzg_proof.clone(),
            commitment_inclusion_proof: String::new(),
            bundle_name: bundle_name.to_string(),
        });
    }

    if !blobs.is_empty() {
        let el_block = chain.block_by_number(height).await?;
        correlate_blob_transactions(&mut blobs, &el_block.transactions);
    }
    Ok((block_row, blobs))
}

/// Dispatches on the configured chain variant. `block` must be present for
/// the beacon variant and is ignored for BSC.
pub(crate) async fn to_block_and_blobs(
    chain: &ChainSource,
    block: Option<&GetBlockResponse>,
    sidecars: &[GeneralSidecar],
    block_id: u64,
    bundle_name: &str,
) -> Result<(Block, Vec<Blob>), Error> {
    match chain.variant() {
        types::ChainVariant::Ethereum => {
            let block = block.ok_or_else(|| {
                Error::Internal("beacon block missing for field mapping".to_string())
            })?;
            beacon_block_and_blobs(chain, block, sidecars, block_id, bundle_name).await
        }
        types::ChainVariant::Bsc => {
            bsc_block_and_blobs(chain, sidecars, block_id, bundle_name).await
        }
    }
}
