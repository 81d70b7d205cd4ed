//! The sync loop: advances a monotone block cursor, stages sidecars into the
//! current bundle window, seals windows at their boundary and persists block
//! and blob rows.
//!
//! Every step is idempotent — staged files overwrite, catalog writes upsert,
//! and the bundle service tolerates replays — so any transient error simply
//! retries the same block id on the next tick.

use crate::assembler::{Assembler, BundleDetail};
use crate::metrics::SYNCED_BLOCK_ID;
use crate::{convert, ArchiverConfig, Error, EXECUTION_PAUSE, LOOP_SLEEP, PAUSE};
use bundle_client::BundleClient;
use catalog::{Block, BlockStatus, BundleStatus, Catalog};
use chain_source::ChainSource;
use metrics::set_gauge;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};
use types::{parse_bundle_name, ChainVariant};

pub struct Syncer {
    catalog: Catalog,
    chain: Arc<ChainSource>,
    assembler: Assembler,
    bundle_client: Arc<BundleClient>,
    start_block_id: u64,
    create_bundle_interval: u64,
    current: Option<BundleDetail>,
    /// Pause when the cursor has caught up with the chain; shortened in
    /// tests.
    pub(crate) pause: Duration,
    pub(crate) execution_pause: Duration,
}

impl Syncer {
    pub fn new(
        catalog: Catalog,
        chain: Arc<ChainSource>,
        assembler: Assembler,
        bundle_client: Arc<BundleClient>,
        config: &ArchiverConfig,
    ) -> Self {
        Self {
            catalog,
            chain,
            assembler,
            bundle_client,
            start_block_id: config.start_block_id,
            create_bundle_interval: config.create_bundle_interval,
            current: None,
            pause: PAUSE,
            execution_pause: EXECUTION_PAUSE,
        }
    }

    /// The cursor never regresses: the configured start, or one past the
    /// latest persisted block, whichever is higher.
    pub fn calc_next_block_id(&self) -> Result<u64, Error> {
        let mut next = self.start_block_id;
        if let Some(latest) = self.catalog.get_latest_processed_block()? {
            if next <= latest.slot {
                next = latest.slot + 1;
            }
        }
        Ok(next)
    }

    /// Restores the bundle window after a restart.
    ///
    /// With no `Finalizing` bundle on record a fresh window opens at the
    /// cursor. An existing window is adopted in place, unless the operator
    /// moved the configured start past its end; then its blocks are marked
    /// `Skipped`, the bundle `Deprecated`, and a fresh window opens.
    pub fn load_progress_and_resume(&mut self) -> Result<(), Error> {
        let next = self.calc_next_block_id()?;
        let detail = match self.catalog.get_latest_finalizing_bundle()? {
            None => BundleDetail::new(next, next + self.create_bundle_interval - 1),
            Some(bundle) => {
                let (start, end) = parse_bundle_name(&bundle.name)?;
                if next > end {
                    self.catalog
                        .update_blocks_status(start, end, BlockStatus::Skipped)?;
                    self.catalog
                        .update_bundle_status(&bundle.name, BundleStatus::Deprecated)?;
                    info!(
                        configured_start = next,
                        bundle_end = end,
                        "Configured start is past the recorded bundle, resuming from it"
                    );
                    BundleDetail::new(next, next + self.create_bundle_interval - 1)
                } else {
                    BundleDetail::new(start, end)
                }
            }
        };
        info!(
            bundle = %detail.name,
            start = detail.start_id,
            finalize = detail.finalize_id,
            "Sync window loaded"
        );
        self.current = Some(detail);
        Ok(())
    }

    /// Runs forever; recoverable errors retry the same block id next tick.
    pub async fn run(mut self) {
        if self.current.is_none() {
            if let Err(e) = self.load_progress_and_resume() {
                error!(error = %e, "Failed to load sync progress");
                return;
            }
        }
        loop {
            sleep(LOOP_SLEEP).await;
            if let Err(e) = self.step().await {
                error!(error = %e, "Sync step failed");
            }
        }
    }

    pub(crate) async fn step(&mut self) -> Result<(), Error> {
        let block_id = self.calc_next_block_id()?;

        let mut forked = false;
        let mut beacon_block = None;
        match self.chain.variant() {
            ChainVariant::Bsc => {
                let finalized = self.chain.get_finalized_block_num().await?;
                if block_id >= finalized {
                    debug!(block_id, finalized, "Waiting for finality");
                    sleep(self.execution_pause).await;
                    return Ok(());
                }
            }
            ChainVariant::Ethereum => match self.chain.get_beacon_block(block_id).await {
                Ok(block) => {
                    if !block.finalized {
                        info!(slot = block_id, "Current block is not finalized yet");
                        sleep(self.pause).await;
                        return Ok(());
                    }
                    beacon_block = Some(block);
                }
                // A 404 is either a slot ahead of the head or an orphaned
                // slot; only a fresh head query can tell the two apart.
                Err(e) if e.is_not_found() => {
                    let head = self.chain.get_latest_beacon_block().await?;
                    let head_slot = head.data.message.slot;
                    if block_id >= head_slot {
                        debug!(slot = block_id, head_slot, "Cursor is at the head");
                        sleep(self.pause).await;
                        return Ok(());
                    }
                    forked = true;
                }
                Err(e) => return Err(e.into()),
            },
        }

        let sidecars = if forked {
            vec![]
        } else {
            self.chain.get_blob(block_id).await?
        };

        let detail = self
            .current
            .clone()
            .ok_or_else(|| Error::Internal("no active bundle window".to_string()))?;
        if block_id == detail.start_id {
            self.assembler.open_window(&detail)?;
        }
        if !forked {
            self.assembler.stage(block_id, &detail.name, &sidecars)?;
        }
        if block_id == detail.finalize_id {
            self.seal_window(&detail).await?;
            self.current = Some(detail.next(self.create_bundle_interval));
        }

        if forked {
            warn!(block_id, bundle = %detail.name, "Recording forked block placeholder");
            self.catalog
                .save_block_and_blobs(&Block::forked(block_id, &detail.name), &[])?;
        } else {
            let (block_row, blob_rows) = convert::to_block_and_blobs(
                &self.chain,
                beacon_block.as_ref(),
                &sidecars,
                block_id,
                &detail.name,
            )
            .await?;
            self.catalog.save_block_and_blobs(&block_row, &blob_rows)?;
            info!(block_id, blobs = blob_rows.len(), "Saved block and blobs");
        }
        set_gauge(&SYNCED_BLOCK_ID, block_id as i64);
        Ok(())
    }

    /// Seals the window. If the service refuses because the bundle expired,
    /// the remote bundle is deleted, the whole range re-staged from the
    /// chain, and the seal retried once.
    async fn seal_window(&self, detail: &BundleDetail) -> Result<(), Error> {
        match self.assembler.seal_and_upload(&detail.name).await {
            Ok(()) => Ok(()),
            Err(Error::Bundle(bundle_client::Error::Expired)) => {
                warn!(bundle = %detail.name, "Bundle expired before finalize, re-staging");
                self.bundle_client
                    .delete_bundle(&detail.name, self.assembler.bucket())
                    .await?;
                self.restage_range(detail).await?;
                self.assembler.seal_and_upload(&detail.name).await
            }
            Err(e) => Err(e),
        }
    }

    async fn restage_range(&self, detail: &BundleDetail) -> Result<(), Error> {
        for block_id in detail.start_id..=detail.finalize_id {
            match self.chain.get_blob(block_id).await {
                Ok(sidecars) => self.assembler.stage(block_id, &detail.name, &sidecars)?,
                // Forked ids never contributed sidecars.
                Err(e) if e.is_not_found() => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }
}
