//! The verify loop: proves that what the archive holds matches both the
//! chain source and the storage backend, block by block in ascending order.
//!
//! Work selection is the earliest `Processed` block; its bundle gates the
//! checks. Integrity failures never leave this module — they trigger the
//! re-upload procedure, which deprecates the bundle and rebuilds the whole
//! range under a `_calibrated_` replacement name while preserving every
//! catalog row's identity.

use crate::assembler::stage_sidecars;
use crate::integrity::compute_integrity_hash_base64;
use crate::metrics::VERIFIED_BLOCK_ID;
use crate::{convert, unix_now, ArchiverConfig, Error, VerificationMode, LOOP_SLEEP, PAUSE};
use bundle_client::{BundleClient, RemoteBundleStatus, SpClient};
use catalog::{Block, BlockStatus, Bundle, BundleStatus, Catalog};
use chain_source::ChainSource;
use metrics::set_gauge;
use sha2::{Digest, Sha256};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};
use types::{get_calibrated_bundle_name, parse_bundle_name, ChainVariant};

/// One pass over the verification work queue.
#[derive(Debug, PartialEq, Eq)]
enum Step {
    /// Something was verified, sealed or re-uploaded.
    Progress,
    /// Nothing to do yet; back off before polling again.
    Idle,
}

pub struct Verifier {
    catalog: Catalog,
    chain: Arc<ChainSource>,
    bundle_client: Arc<BundleClient>,
    sp_client: Arc<SpClient>,
    bucket: String,
    temp_dir: PathBuf,
    mode: VerificationMode,
    reupload_threshold_secs: i64,
    pub(crate) pause: Duration,
}

impl Verifier {
    pub fn new(
        catalog: Catalog,
        chain: Arc<ChainSource>,
        bundle_client: Arc<BundleClient>,
        sp_client: Arc<SpClient>,
        config: &ArchiverConfig,
    ) -> Self {
        Self {
            catalog,
            chain,
            bundle_client,
            sp_client,
            bucket: config.bucket_name.clone(),
            temp_dir: config.temp_dir.clone(),
            mode: config.verification_mode,
            reupload_threshold_secs: config.reupload_bundle_threshold_secs as i64,
            pause: PAUSE,
        }
    }

    /// Runs forever; recoverable errors retry the same block next tick.
    pub async fn run(self) {
        loop {
            sleep(LOOP_SLEEP).await;
            match self.step().await {
                Ok(Step::Progress) => {}
                Ok(Step::Idle) => sleep(self.pause).await,
                Err(e) => error!(error = %e, "Verify step failed"),
            }
        }
    }

    async fn step(&self) -> Result<Step, Error> {
        let Some(verify_block) = self.catalog.get_earliest_unverified_block()? else {
            return Ok(Step::Idle);
        };
        let block_id = verify_block.slot;
        let bundle_name = verify_block.bundle_name.clone();
        let (start, end) = parse_bundle_name(&bundle_name)?;

        let bundle = self.catalog.get_bundle(&bundle_name)?.ok_or_else(|| {
            Error::Internal(format!("bundle row {bundle_name} missing for block {block_id}"))
        })?;
        match bundle.status {
            // Not uploaded yet; the sync loop is still filling the window.
            BundleStatus::Finalizing => return Ok(Step::Idle),
            BundleStatus::Deprecated => {
                // A re-upload was interrupted before the replacement rows
                // landed; the next recalibration rebuilds them.
                warn!(bundle = %bundle_name, "Unverified block references a deprecated bundle");
                self.recalibrate(&bundle_name, start, end).await?;
                return Ok(Step::Progress);
            }
            BundleStatus::Finalized | BundleStatus::Sealed => {}
        }

        if block_id == start || self.mode == VerificationMode::Bundle {
            match self.check_remote_bundle(&bundle, start, end).await? {
                RemoteCheck::Proceed => {}
                RemoteCheck::RangeSealed => return Ok(Step::Progress),
                RemoteCheck::Wait => return Ok(Step::Idle),
                RemoteCheck::Reupload(reason) => {
                    warn!(bundle = %bundle_name, reason, "Bundle failed remote check, re-uploading");
                    self.recalibrate(&bundle_name, start, end).await?;
                    return Ok(Step::Progress);
                }
            }
        }

        match self.mode {
            VerificationMode::Bundle => {
                match self.verify_bundle_integrity(&bundle_name, start, end).await {
                    Ok(()) => {
                        self.catalog
                            .update_blocks_status(start, end, BlockStatus::Verified)?;
                        self.catalog
                            .update_bundle_status(&bundle_name, BundleStatus::Sealed)?;
                        set_gauge(&VERIFIED_BLOCK_ID, end as i64);
                        info!(bundle = %bundle_name, start, end, "Verified bundle integrity");
                        Ok(Step::Progress)
                    }
                    Err(Error::VerificationFailed(reason)) => {
                        warn!(bundle = %bundle_name, reason, "Bundle integrity failed, re-uploading");
                        self.recalibrate(&bundle_name, start, end).await?;
                        Ok(Step::Progress)
                    }
                    Err(e) => Err(e),
                }
            }
            VerificationMode::PerBlob => {
                if verify_block.blob_count == 0 {
                    self.mark_block_verified(block_id, &bundle_name, end)?;
                    return Ok(Step::Progress);
                }
                match self.verify_block_blobs(&verify_block, &bundle_name).await {
                    Ok(()) => {
                        self.mark_block_verified(block_id, &bundle_name, end)?;
                        Ok(Step::Progress)
                    }
                    Err(Error::VerificationFailed(reason)) => {
                        warn!(block_id, bundle = %bundle_name, reason, "Blob verification failed, re-uploading");
                        self.recalibrate(&bundle_name, start, end).await?;
                        Ok(Step::Progress)
                    }
                    Err(e) => Err(e),
                }
            }
        }
    }

    fn mark_block_verified(
        &self,
        block_id: u64,
        bundle_name: &str,
        window_end: u64,
    ) -> Result<(), Error> {
        self.catalog
            .update_block_status(block_id, BlockStatus::Verified)?;
        set_gauge(&VERIFIED_BLOCK_ID, block_id as i64);
        debug!(block_id, "Verified block");
        if block_id == window_end {
            self.catalog
                .update_bundle_status(bundle_name, BundleStatus::Sealed)?;
            info!(bundle = bundle_name, "Sealed bundle");
        }
        Ok(())
    }

    async fn check_remote_bundle(
        &self,
        bundle: &Bundle,
        start: u64,
        end: u64,
    ) -> Result<RemoteCheck, Error> {
        match self
            .bundle_client
            .get_bundle_info(&self.bucket, &bundle.name)
            .await
        {
            Err(bundle_client::Error::BundleNotExist) => {
                let blobs = self.catalog.get_blobs_between_blocks(start, end)?;
                if blobs.is_empty() {
                    // An all-empty window never produced a remote bundle;
                    // there is nothing to check.
                    self.catalog
                        .update_blocks_status(start, end, BlockStatus::Verified)?;
                    self.catalog
                        .update_bundle_status(&bundle.name, BundleStatus::Sealed)?;
                    set_gauge(&VERIFIED_BLOCK_ID, end as i64);
                    info!(bundle = %bundle.name, "Sealed empty bundle");
                    Ok(RemoteCheck::RangeSealed)
                } else {
                    Ok(RemoteCheck::Reupload("bundle missing from service"))
                }
            }
            Err(e) => Err(e.into()),
            Ok(info) => match info.status() {
                RemoteBundleStatus::SealedOnChain => Ok(RemoteCheck::Proceed),
                RemoteBundleStatus::Finalized | RemoteBundleStatus::CreatedOnChain => {
                    // Prefer the service's own creation timestamp; the local
                    // row predates the upload.
                    let created = if info.created_timestamp > 0 {
                        info.created_timestamp
                    } else {
                        bundle.created_time
                    };
                    if unix_now() - created > self.reupload_threshold_secs {
                        Ok(RemoteCheck::Reupload("bundle not sealed within threshold"))
                    } else {
                        debug!(bundle = %bundle.name, "Waiting for the bundle to seal");
                        Ok(RemoteCheck::Wait)
                    }
                }
                RemoteBundleStatus::Expired => Ok(RemoteCheck::Reupload("bundle expired")),
                RemoteBundleStatus::Bundling | RemoteBundleStatus::Unknown(_) => {
                    Err(Error::Internal(format!(
                        "unexpected remote status {:?} for finalized bundle {}",
                        info.status(),
                        bundle.name
                    )))
                }
            },
        }
    }

    /// Per-blob integrity: every stored object must byte-match a fresh chain
    /// read, with the catalog row agreeing on index and KZG proof.
    async fn verify_block_blobs(&self, block: &Block, bundle_name: &str) -> Result<(), Error> {
        let block_id = block.slot;
        let sidecars = self.chain.get_blob(block_id).await?;
        if sidecars.len() != block.blob_count as usize {
            return Err(Error::VerificationFailed("blob count mismatch".to_string()));
        }
        let blob_metas = self.catalog.get_blobs_by_block_id(block_id, &[])?;
        if blob_metas.len() != sidecars.len() {
            return Err(Error::VerificationFailed(
                "blob row count mismatch".to_string(),
            ));
        }

        for (sidecar, meta) in sidecars.iter().zip(blob_metas.iter()) {
            let object = match self
                .bundle_client
                .get_object(&self.bucket, bundle_name, &meta.name)
                .await
            {
                Ok(object) => object,
                Err(bundle_client::Error::ObjectNotExist) => {
                    return Err(Error::VerificationFailed(format!(
                        "object {} missing from bundle",
                        meta.name
                    )));
                }
                Err(e) => return Err(e.into()),
            };

            let expected_idx = sidecar.sidecar.index.parse::<i64>().map_err(|_| {
                Error::VerificationFailed(format!("sidecar index {}", sidecar.sidecar.index))
            })?;
            if meta.idx != expected_idx {
                return Err(Error::VerificationFailed("index mismatch".to_string()));
            }
            if hex_digest(&sidecar.sidecar.kzg_proof)? != hex_digest(&meta.kzg_proof)? {
                return Err(Error::VerificationFailed("kzg proof mismatch".to_string()));
            }
            if hex_digest(&object)? != hex_digest(&sidecar.sidecar.blob)? {
                return Err(Error::VerificationFailed(
                    "blob content mismatch".to_string(),
                ));
            }
        }
        Ok(())
    }

    /// Bundle-level integrity: rebuild the bundle from a fresh chain read and
    /// compare Reed-Solomon checksums against the sealed on-chain metadata.
    async fn verify_bundle_integrity(
        &self,
        bundle_name: &str,
        start: u64,
        end: u64,
    ) -> Result<(), Error> {
        let scratch = self.temp_dir.join(format!("{bundle_name}_verify"));
        std::fs::create_dir_all(&scratch)?;
        let result = self
            .rebuild_and_compare(&scratch, bundle_name, start, end)
            .await;
        let _ = std::fs::remove_dir_all(&scratch);
        result
    }

    async fn rebuild_and_compare(
        &self,
        scratch: &std::path::Path,
        bundle_name: &str,
        start: u64,
        end: u64,
    ) -> Result<(), Error> {
        for block_id in start..=end {
            match self.chain.get_blob(block_id).await {
                Ok(sidecars) => stage_sidecars(scratch, block_id, &sidecars)?,
                Err(e) if e.is_not_found() => continue,
                Err(e) => return Err(e.into()),
            }
        }

        let builder = bundle_client::build_bundle_from_dir(scratch).map_err(Error::Bundle)?;
        let artifact = match builder.finalize() {
            Ok(artifact) => artifact,
            Err(bundle_client::Error::EmptyBundle) => {
                return Err(Error::VerificationFailed(
                    "rebuilt bundle is empty but a remote bundle exists".to_string(),
                ));
            }
            Err(e) => return Err(e.into()),
        };

        let params = self.sp_client.get_params().await?;
        let expected = compute_integrity_hash_base64(&artifact, &params)?;
        let meta = self.sp_client.get_object_meta(&self.bucket, bundle_name).await?;
        if meta.checksums.len() != expected.len() {
            return Err(Error::VerificationFailed(format!(
                "checksum count mismatch: chain {} local {}",
                meta.checksums.len(),
                expected.len()
            )));
        }
        for (i, (ours, chain)) in expected.iter().zip(meta.checksums.iter()).enumerate() {
            if ours != chain {
                return Err(Error::VerificationFailed(format!(
                    "checksum {i} mismatch"
                )));
            }
        }
        Ok(())
    }

    /// The re-upload procedure: deprecate the old bundle, rebuild the whole
    /// range from the chain under a calibrated replacement name, replace the
    /// catalog rows in place, and upload.
    async fn recalibrate(&self, old_name: &str, start: u64, end: u64) -> Result<(), Error> {
        self.catalog
            .update_bundle_status(old_name, BundleStatus::Deprecated)?;
        let new_name = get_calibrated_bundle_name(old_name, unix_now());
        self.catalog.create_bundle(&Bundle {
            name: new_name.clone(),
            status: BundleStatus::Finalizing,
            calibrated: true,
            created_time: unix_now(),
        })?;
        info!(old = old_name, new = %new_name, "Re-uploading bundle");

        let dir = self.temp_dir.join(&new_name);
        std::fs::create_dir_all(&dir)?;

        for block_id in start..=end {
            let mut beacon_block = None;
            if self.chain.variant() == ChainVariant::Ethereum {
                match self.chain.get_beacon_block(block_id).await {
                    Ok(block) => beacon_block = Some(block),
                    Err(e) if e.is_not_found() => {
                        // Forked slot: placeholder row, nothing staged.
                        self.catalog
                            .save_block_and_blobs(&Block::forked(block_id, &new_name), &[])?;
                        continue;
                    }
                    Err(e) => return Err(e.into()),
                }
            }
            let sidecars = match self.chain.get_blob(block_id).await {
                Ok(sidecars) => sidecars,
                Err(e) if e.is_not_found() => {
                    self.catalog
                        .save_block_and_blobs(&Block::forked(block_id, &new_name), &[])?;
                    continue;
                }
                Err(e) => return Err(e.into()),
            };
            stage_sidecars(&dir, block_id, &sidecars)?;
            let (block_row, blob_rows) = convert::to_block_and_blobs(
                &self.chain,
                beacon_block.as_ref(),
                &sidecars,
                block_id,
                &new_name,
            )
            .await?;
            // Upsert replaces the old rows while keeping their primary keys.
            self.catalog.save_block_and_blobs(&block_row, &blob_rows)?;
        }

        let artifact = self.temp_dir.join(format!("{new_name}.bundle"));
        match self
            .bundle_client
            .upload_and_finalize_bundle(&new_name, &self.bucket, &dir, &artifact)
            .await
        {
            Ok(()) => {}
            Err(e) if e.is_tolerable_upload_error() => {}
            Err(e) => return Err(e.into()),
        }
        std::fs::remove_dir_all(&dir)?;
        match std::fs::remove_file(&artifact) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        self.catalog
            .update_bundle_status(&new_name, BundleStatus::Finalized)?;
        info!(bundle = %new_name, "Re-uploaded bundle finalized");
        Ok(())
    }
}

enum RemoteCheck {
    /// The remote bundle is sealed; integrity checks may run.
    Proceed,
    /// The whole range was resolved (empty window short-circuit).
    RangeSealed,
    /// The bundle has not sealed yet and is still within the threshold.
    Wait,
    Reupload(&'static str),
}

/// SHA-256 over the hex-decoded payload. Hex fields arrive with or without a
/// `0x` prefix depending on the source.
fn hex_digest(value: &str) -> Result<[u8; 32], Error> {
    let stripped = value.trim().trim_start_matches("0x");
    let bytes = hex::decode(stripped)
        .map_err(|_| Error::VerificationFailed(format!("invalid hex payload: {stripped:.16}")))?;
    Ok(Sha256::digest(&bytes).into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use sensitive_url::SensitiveUrl;
    use tempfile::TempDir;

    fn config(temp: &TempDir, server_url: &str, mode: &str) -> ArchiverConfig {
        serde_json::from_value(serde_json::json!({
            "chain": "ethereum",
            "bucket_name": "bucket",
            "start_block_id": 100,
            "create_bundle_interval": 1,
            "bundle_service_endpoints": [server_url],
            "rpc_endpoints": [server_url],
            "beacon_rpc_endpoints": [server_url],
            "chain_endpoint": server_url,
            "temp_dir": temp.path().join("staging"),
            "private_key": hex::encode([7u8; 32]),
            "verification_mode": mode,
        }))
        .unwrap()
    }

    fn verifier_with(temp: &TempDir, server_url: &str, mode: &str) -> Verifier {
        logging::create_test_tracing_subscriber();
        let config = config(temp, server_url, mode);
        let catalog = Catalog::open(&temp.path().join("catalog.sqlite"), 2).unwrap();
        let url = SensitiveUrl::parse(server_url).unwrap();
        let chain = Arc::new(
            ChainSource::new(ChainVariant::Ethereum, url.clone(), Some(url.clone())).unwrap(),
        );
        let bundle_client = Arc::new(
            BundleClient::new(url.clone(), &config.private_key_bytes().unwrap()).unwrap(),
        );
        let sp_client = Arc::new(SpClient::new(url).unwrap());
        std::fs::create_dir_all(temp.path().join("staging")).unwrap();
        Verifier::new(catalog, chain, bundle_client, sp_client, &config)
    }

    fn block_row(slot: u64, blob_count: i64, bundle: &str) -> Block {
        Block {
            slot,
            root: String::new(),
            parent_root: String::new(),
            state_root: String::new(),
            body_root: String::new(),
            signature: String::new(),
            proposer_index: 0,
            el_block_height: 1234,
            blob_count,
            bundle_name: bundle.to_string(),
            status: BlockStatus::Processed,
        }
    }

    fn blob_row(slot: u64, idx: i64, bundle: &str) -> catalog::Blob {
        catalog::Blob {
            name: types::get_blob_name(slot, idx as u64),
            slot,
            idx,
            tx_hash: String::new(),
            to_addr: String::new(),
            versioned_hash: String::new(),
            tx_index: None,
            kzg_commitment: "0xaa".to_string(),
            kzg_proof: "0xbb".to_string(),
            commitment_inclusion_proof: String::new(),
            bundle_name: bundle.to_string(),
        }
    }

    fn seed_bundle(verifier: &Verifier, name: &str, status: BundleStatus, created_time: i64) {
        verifier
            .catalog
            .create_bundle(&Bundle {
                name: name.to_string(),
                status: BundleStatus::Finalizing,
                calibrated: false,
                created_time,
            })
            .unwrap();
        verifier.catalog.update_bundle_status(name, status).unwrap();
    }

    async fn mock_bundle_info(server: &mut mockito::Server, name: &str, status: i32, created: i64) {
        let path = format!("/v1/queryBundle/bucket/{name}");
        server
            .mock("GET", path.as_str())
            .with_status(200)
            .with_body(format!(
                r#"{{"bundleName":"{name}","bucketName":"bucket","status":{status},"createdTimestamp":{created}}}"#
            ))
            .create_async()
            .await;
    }

    #[tokio::test]
    async fn idle_when_no_unverified_blocks() {
        let temp = TempDir::new().unwrap();
        let server = mockito::Server::new_async().await;
        let verifier = verifier_with(&temp, &server.url(), "per_blob");
        assert_eq!(verifier.step().await.unwrap(), Step::Idle);
    }

    #[tokio::test]
    async fn finalizing_bundle_gates_verification() {
        let temp = TempDir::new().unwrap();
        let server = mockito::Server::new_async().await;
        let verifier = verifier_with(&temp, &server.url(), "per_blob");
        seed_bundle(&verifier, "blobs_s100_e100", BundleStatus::Finalizing, unix_now());
        verifier
            .catalog
            .save_block_and_blobs(&block_row(100, 0, "blobs_s100_e100"), &[])
            .unwrap();

        assert_eq!(verifier.step().await.unwrap(), Step::Idle);
        assert_eq!(
            verifier.catalog.get_block_by_id(100).unwrap().unwrap().status,
            BlockStatus::Processed
        );
    }

    #[tokio::test]
    async fn zero_blob_window_end_seals_bundle() {
        let temp = TempDir::new().unwrap();
        let mut server = mockito::Server::new_async().await;
        mock_bundle_info(&mut server, "blobs_s100_e100", 3, unix_now()).await;
        let verifier = verifier_with(&temp, &server.url(), "per_blob");
        seed_bundle(&verifier, "blobs_s100_e100", BundleStatus::Finalized, unix_now());
        verifier
            .catalog
            .save_block_and_blobs(&block_row(100, 0, "blobs_s100_e100"), &[])
            .unwrap();

        assert_eq!(verifier.step().await.unwrap(), Step::Progress);
        assert_eq!(
            verifier.catalog.get_block_by_id(100).unwrap().unwrap().status,
            BlockStatus::Verified
        );
        assert_eq!(
            verifier
                .catalog
                .get_bundle("blobs_s100_e100")
                .unwrap()
                .unwrap()
                .status,
            BundleStatus::Sealed
        );
    }

    #[tokio::test]
    async fn missing_remote_bundle_with_empty_range_short_circuits() {
        let temp = TempDir::new().unwrap();
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/v1/queryBundle/bucket/blobs_s100_e101")
            .with_status(404)
            .create_async()
            .await;
        let verifier = verifier_with(&temp, &server.url(), "per_blob");
        seed_bundle(&verifier, "blobs_s100_e101", BundleStatus::Finalized, unix_now());
        verifier
            .catalog
            .save_block_and_blobs(&block_row(100, 0, "blobs_s100_e101"), &[])
            .unwrap();
        verifier
            .catalog
            .save_block_and_blobs(&block_row(101, 0, "blobs_s100_e101"), &[])
            .unwrap();

        assert_eq!(verifier.step().await.unwrap(), Step::Progress);
        for slot in [100, 101] {
            assert_eq!(
                verifier.catalog.get_block_by_id(slot).unwrap().unwrap().status,
                BlockStatus::Verified
            );
        }
        assert_eq!(
            verifier
                .catalog
                .get_bundle("blobs_s100_e101")
                .unwrap()
                .unwrap()
                .status,
            BundleStatus::Sealed
        );
    }

    #[tokio::test]
    async fn unsealed_bundle_within_threshold_waits() {
        let temp = TempDir::new().unwrap();
        let mut server = mockito::Server::new_async().await;
        mock_bundle_info(&mut server, "blobs_s100_e100", 1, unix_now()).await;
        let verifier = verifier_with(&temp, &server.url(), "per_blob");
        seed_bundle(&verifier, "blobs_s100_e100", BundleStatus::Finalized, unix_now());
        verifier
            .catalog
            .save_block_and_blobs(&block_row(100, 0, "blobs_s100_e100"), &[])
            .unwrap();

        assert_eq!(verifier.step().await.unwrap(), Step::Idle);
    }

    async fn mock_chain_for_recalibrate(server: &mut mockito::Server, slot: u64, blob_hex: &str) {
        server
            .mock("GET", format!("/eth/v2/beacon/blocks/{slot}").as_str())
            .with_status(200)
            .with_body(format!(
                r#"{{
                  "version": "deneb",
                  "finalized": true,
                  "data": {{
                    "message": {{
                      "slot": "{slot}",
                      "proposer_index": "7",
                      "parent_root": "0x0101",
                      "state_root": "0x0202",
                      "body": {{ "execution_payload": {{ "block_number": "1234" }} }}
                    }},
                    "signature": "0x0404"
                  }}
                }}"#
            ))
            .create_async()
            .await;
        server
            .mock(
                "GET",
                format!("/eth/v1/beacon/blob_sidecars/{slot}").as_str(),
            )
            .with_status(200)
            .with_body(format!(
                r#"{{"data":[{{"index":"0","blob":"{blob_hex}","kzg_commitment":"0xaa","kzg_proof":"0xbb"}}]}}"#
            ))
            .create_async()
            .await;
        server
            .mock("GET", format!("/eth/v1/beacon/headers/{slot}").as_str())
            .with_status(200)
            .with_body(format!(
                r#"{{
                  "data": {{
                    "root": "0x0505",
                    "canonical": true,
                    "header": {{
                      "message": {{
                        "slot": "{slot}",
                        "proposer_index": "7",
                        "parent_root": "0x0101",
                        "state_root": "0x0202",
                        "body_root": "0x0303"
                      }},
                      "signature": "0x0404"
                    }}
                  }}
                }}"#
            ))
            .create_async()
            .await;
        server
            .mock("POST", "/")
            .with_status(200)
            .with_body(
                r#"{
                  "jsonrpc": "2.0",
                  "id": 1,
                  "result": {
                    "hash": "0xabc0",
                    "parentHash": "0xdef0",
                    "number": "0x4d2",
                    "transactions": [
                      {
                        "hash": "0x02",
                        "to": "0x2222",
                        "type": "0x3",
                        "blobVersionedHashes": ["0x0aaa"]
                      }
                    ]
                  }
                }"#,
            )
            .create_async()
            .await;
    }

    #[tokio::test]
    async fn seal_timeout_triggers_reupload_preserving_rows() {
        let temp = TempDir::new().unwrap();
        let mut server = mockito::Server::new_async().await;
        // Remote still Finalized long past the threshold.
        mock_bundle_info(&mut server, "blobs_s100_e100", 1, unix_now() - 10_000).await;
        mock_chain_for_recalibrate(&mut server, 100, "0x0102").await;
        let upload = server
            .mock("POST", "/v1/uploadBundle")
            .with_status(200)
            .create_async()
            .await;

        let verifier = verifier_with(&temp, &server.url(), "per_blob");
        seed_bundle(
            &verifier,
            "blobs_s100_e100",
            BundleStatus::Finalized,
            unix_now() - 10_000,
        );
        verifier
            .catalog
            .save_block_and_blobs(
                &block_row(100, 1, "blobs_s100_e100"),
                &[blob_row(100, 0, "blobs_s100_e100")],
            )
            .unwrap();

        assert_eq!(verifier.step().await.unwrap(), Step::Progress);
        upload.assert_async().await;

        // The old bundle is deprecated and a calibrated replacement owns the
        // range; the blob row kept its identity but moved bundles.
        assert_eq!(
            verifier
                .catalog
                .get_bundle("blobs_s100_e100")
                .unwrap()
                .unwrap()
                .status,
            BundleStatus::Deprecated
        );
        let blobs = verifier.catalog.get_blobs_by_block_id(100, &[]).unwrap();
        assert_eq!(blobs.len(), 1);
        let new_name = blobs[0].bundle_name.clone();
        assert!(new_name.starts_with("blobs_s100_e100_calibrated_"));
        assert_eq!(types::parse_bundle_name(&new_name).unwrap(), (100, 100));

        let replacement = verifier.catalog.get_bundle(&new_name).unwrap().unwrap();
        assert!(replacement.calibrated);
        assert_eq!(replacement.status, BundleStatus::Finalized);
        // The block stays Processed so the next pass verifies the new bundle.
        assert_eq!(
            verifier.catalog.get_block_by_id(100).unwrap().unwrap().status,
            BlockStatus::Processed
        );
    }

    #[tokio::test]
    async fn per_blob_mismatch_triggers_reupload() {
        let temp = TempDir::new().unwrap();
        let mut server = mockito::Server::new_async().await;
        mock_bundle_info(&mut server, "blobs_s100_e100", 3, unix_now()).await;
        mock_chain_for_recalibrate(&mut server, 100, "0x0102").await;
        // The stored object differs from the chain's blob.
        server
            .mock("GET", "/v1/view/bucket/blobs_s100_e100/blob_h100_i0")
            .with_status(200)
            .with_body("0xffff")
            .create_async()
            .await;
        server
            .mock("POST", "/v1/uploadBundle")
            .with_status(200)
            .create_async()
            .await;

        let verifier = verifier_with(&temp, &server.url(), "per_blob");
        seed_bundle(&verifier, "blobs_s100_e100", BundleStatus::Finalized, unix_now());
        verifier
            .catalog
            .save_block_and_blobs(
                &block_row(100, 1, "blobs_s100_e100"),
                &[blob_row(100, 0, "blobs_s100_e100")],
            )
            .unwrap();

        assert_eq!(verifier.step().await.unwrap(), Step::Progress);
        assert_eq!(
            verifier
                .catalog
                .get_bundle("blobs_s100_e100")
                .unwrap()
                .unwrap()
                .status,
            BundleStatus::Deprecated
        );
    }

    #[tokio::test]
    async fn per_blob_match_verifies_block() {
        let temp = TempDir::new().unwrap();
        let mut server = mockito::Server::new_async().await;
        mock_bundle_info(&mut server, "blobs_s100_e100", 3, unix_now()).await;
        server
            .mock("GET", "/eth/v1/beacon/blob_sidecars/100")
            .with_status(200)
            .with_body(
                r#"{"data":[{"index":"0","blob":"0x0102","kzg_commitment":"0xaa","kzg_proof":"0xbb"}]}"#,
            )
            .create_async()
            .await;
        server
            .mock("GET", "/v1/view/bucket/blobs_s100_e100/blob_h100_i0")
            .with_status(200)
            .with_body("0x0102")
            .create_async()
            .await;

        let verifier = verifier_with(&temp, &server.url(), "per_blob");
        seed_bundle(&verifier, "blobs_s100_e100", BundleStatus::Finalized, unix_now());
        verifier
            .catalog
            .save_block_and_blobs(
                &block_row(100, 1, "blobs_s100_e100"),
                &[blob_row(100, 0, "blobs_s100_e100")],
            )
            .unwrap();

        assert_eq!(verifier.step().await.unwrap(), Step::Progress);
        assert_eq!(
            verifier.catalog.get_block_by_id(100).unwrap().unwrap().status,
            BlockStatus::Verified
        );
        assert_eq!(
            verifier
                .catalog
                .get_bundle("blobs_s100_e100")
                .unwrap()
                .unwrap()
                .status,
            BundleStatus::Sealed
        );
    }

    #[tokio::test]
    async fn bundle_mode_verifies_whole_range_against_chain_checksums() {
        let temp = TempDir::new().unwrap();
        let mut server = mockito::Server::new_async().await;
        mock_bundle_info(&mut server, "blobs_s100_e100", 3, unix_now()).await;
        server
            .mock("GET", "/eth/v1/beacon/blob_sidecars/100")
            .with_status(200)
            .with_body(
                r#"{"data":[{"index":"0","blob":"0x0102","kzg_commitment":"0xaa","kzg_proof":"0xbb"}]}"#,
            )
            .create_async()
            .await;
        server
            .mock("GET", "/greenfield/storage/params")
            .with_status(200)
            .with_body(
                r#"{"params":{"versioned_params":{"max_segment_size":"16","redundant_data_chunk_num":2,"redundant_parity_chunk_num":1}}}"#,
            )
            .create_async()
            .await;

        // Compute the checksums the chain should report for the rebuilt
        // bundle, then serve exactly those.
        let scratch = temp.path().join("expected");
        std::fs::create_dir_all(&scratch).unwrap();
        std::fs::write(scratch.join("blob_h100_i0"), b"0x0102").unwrap();
        let artifact = bundle_client::build_bundle_from_dir(&scratch)
            .unwrap()
            .finalize()
            .unwrap();
        let params = bundle_client::StorageParams {
            segment_size: 16,
            data_shards: 2,
            parity_shards: 1,
        };
        let checksums =
            crate::integrity::compute_integrity_hash_base64(&artifact, &params).unwrap();
        let meta_body = serde_json::json!({
            "object_info": { "checksums": checksums, "object_status": "OBJECT_STATUS_SEALED" }
        })
        .to_string();
        server
            .mock("GET", "/greenfield/storage/head_object/bucket/blobs_s100_e100")
            .with_status(200)
            .with_body(meta_body)
            .create_async()
            .await;

        let verifier = verifier_with(&temp, &server.url(), "bundle");
        seed_bundle(&verifier, "blobs_s100_e100", BundleStatus::Finalized, unix_now());
        verifier
            .catalog
            .save_block_and_blobs(
                &block_row(100, 1, "blobs_s100_e100"),
                &[blob_row(100, 0, "blobs_s100_e100")],
            )
            .unwrap();

        assert_eq!(verifier.step().await.unwrap(), Step::Progress);
        assert_eq!(
            verifier.catalog.get_block_by_id(100).unwrap().unwrap().status,
            BlockStatus::Verified
        );
        assert_eq!(
            verifier
                .catalog
                .get_bundle("blobs_s100_e100")
                .unwrap()
                .unwrap()
                .status,
            BundleStatus::Sealed
        );
        // Scratch dir is cleaned up either way.
        assert!(!temp
            .path()
            .join("staging/blobs_s100_e100_verify")
            .exists());
    }
}
