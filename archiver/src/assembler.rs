//! Local bundle assembly: the window of blocks being collected, the staging
//! directory their blob payloads are written into, and the seal-and-upload
//! handoff to the bundle service.
//!
//! Staged filenames are deterministic functions of `(block_id, index)`, so
//! retrying any step overwrites rather than duplicates. All callers sit on
//! the single sync task; the verify loop uses its own scratch directories.

use crate::{unix_now, Error};
use bundle_client::BundleClient;
use catalog::{Bundle, BundleStatus, Catalog};
use chain_source::GeneralSidecar;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};
use types::{get_blob_name, get_bundle_name};

/// The window of the bundle currently being assembled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BundleDetail {
    pub name: String,
    pub start_id: u64,
    pub finalize_id: u64,
}

impl BundleDetail {
    pub fn new(start_id: u64, end_id: u64) -> Self {
        Self {
            name: get_bundle_name(start_id, end_id),
            start_id,
            finalize_id: end_id,
        }
    }

    /// The window immediately after this one.
    pub fn next(&self, interval: u64) -> Self {
        Self::new(self.finalize_id + 1, self.finalize_id + interval)
    }
}

pub struct Assembler {
    catalog: Catalog,
    bundle_client: Arc<BundleClient>,
    bucket: String,
    temp_dir: PathBuf,
}

impl Assembler {
    pub fn new(
        catalog: Catalog,
        bundle_client: Arc<BundleClient>,
        bucket: String,
        temp_dir: PathBuf,
    ) -> Self {
        Self {
            catalog,
            bundle_client,
            bucket,
            temp_dir,
        }
    }

    pub fn bundle_dir(&self, bundle_name: &str) -> PathBuf {
        self.temp_dir.join(bundle_name)
    }

    /// The bundle artifact beside the staging dir; doubles as the
    /// crash-recovery sentinel.
    pub fn artifact_path(&self, bundle_name: &str) -> PathBuf {
        self.temp_dir.join(format!("{bundle_name}.bundle"))
    }

    /// Creates the staging directory (reusing one left by a crash) and the
    /// `Finalizing` catalog row.
    pub fn open_window(&self, detail: &BundleDetail) -> Result<(), Error> {
        std::fs::create_dir_all(self.bundle_dir(&detail.name))?;
        self.catalog.create_bundle(&Bundle {
            name: detail.name.clone(),
            status: BundleStatus::Finalizing,
            calibrated: false,
            created_time: unix_now(),
        })?;
        debug!(bundle = %detail.name, "Opened bundle window");
        Ok(())
    }

    /// Stages every sidecar of a block into the current window.
    pub fn stage(
        &self,
        block_id: u64,
        bundle_name: &str,
        sidecars: &[GeneralSidecar],
    ) -> Result<(), Error> {
        stage_sidecars(&self.bundle_dir(bundle_name), block_id, sidecars)
    }

    /// Builds, uploads and finalizes the staged bundle, then clears the
    /// staging state and promotes the catalog row to `Finalized`.
    ///
    /// `ObjectExists` and `EmptyBundle` count as success so a replayed step
    /// (or a window of only forked/empty blocks) completes cleanly. An
    /// `Expired` refusal is returned to the caller, which deletes the remote
    /// bundle, re-stages the range and retries.
    pub async fn seal_and_upload(&self, bundle_name: &str) -> Result<(), Error> {
        let dir = self.bundle_dir(bundle_name);
        let artifact = self.artifact_path(bundle_name);
        match self
            .bundle_client
            .upload_and_finalize_bundle(bundle_name, &self.bucket, &dir, &artifact)
            .await
        {
            Ok(()) => {}
            Err(e) if e.is_tolerable_upload_error() => {
                debug!(bundle = bundle_name, reason = %e, "Treating upload refusal as success");
            }
            Err(e) => return Err(e.into()),
        }

        std::fs::remove_dir_all(&dir)?;
        match std::fs::remove_file(&artifact) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        self.catalog
            .update_bundle_status(bundle_name, BundleStatus::Finalized)?;
        info!(bundle = bundle_name, bucket = %self.bucket, "Finalized bundle");
        Ok(())
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }
}

/// Writes each sidecar's payload to `dir/blob_h{block_id}_i{i}`, overwriting
/// any staged leftovers from an interrupted run. The payload is the sidecar's
/// hex `blob` text verbatim.
pub fn stage_sidecars(
    dir: &Path,
    block_id: u64,
    sidecars: &[GeneralSidecar],
) -> Result<(), Error> {
    if !sidecars.is_empty() {
        std::fs::create_dir_all(dir)?;
    }
    for (i, sidecar) in sidecars.iter().enumerate() {
        let blob_name = get_blob_name(block_id, i as u64);
        std::fs::write(dir.join(blob_name), sidecar.sidecar.blob.as_bytes())?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chain_source::Sidecar;
    use sensitive_url::SensitiveUrl;
    use tempfile::TempDir;

    fn sidecar(index: u64, blob: &str) -> GeneralSidecar {
        GeneralSidecar {
            sidecar: Sidecar {
                index: index.to_string(),
                blob: blob.to_string(),
                kzg_commitment: "0xaa".to_string(),
                kzg_proof: "0xbb".to_string(),
                signed_block_header: None,
                kzg_commitment_inclusion_proof: vec![],
            },
            tx_index: None,
            tx_hash: None,
        }
    }

    fn assembler(server_url: &str, temp: &TempDir) -> Assembler {
        let catalog =
            Catalog::open(&temp.path().join("catalog.sqlite"), 2).unwrap();
        let client = BundleClient::new(
            SensitiveUrl::parse(server_url).unwrap(),
            &[7u8; 32],
        )
        .unwrap();
        Assembler::new(
            catalog,
            Arc::new(client),
            "bucket".to_string(),
            temp.path().join("staging"),
        )
    }

    #[tokio::test]
    async fn open_window_is_idempotent_and_creates_row() {
        let temp = TempDir::new().unwrap();
        let server = mockito::Server::new_async().await;
        let assembler = assembler(&server.url(), &temp);
        let detail = BundleDetail::new(100, 101);

        assembler.open_window(&detail).unwrap();
        assembler.open_window(&detail).unwrap();

        assert!(assembler.bundle_dir(&detail.name).is_dir());
        let bundle = assembler.catalog.get_bundle(&detail.name).unwrap().unwrap();
        assert_eq!(bundle.status, BundleStatus::Finalizing);
        assert!(!bundle.calibrated);
    }

    #[tokio::test]
    async fn staging_is_overwrite_idempotent() {
        let temp = TempDir::new().unwrap();
        let server = mockito::Server::new_async().await;
        let assembler = assembler(&server.url(), &temp);
        let detail = BundleDetail::new(100, 101);
        assembler.open_window(&detail).unwrap();

        assembler
            .stage(100, &detail.name, &[sidecar(0, "0x0101"), sidecar(1, "0x0202")])
            .unwrap();
        // A retry of the same block replaces the files in place.
        assembler
            .stage(100, &detail.name, &[sidecar(0, "0x0303"), sidecar(1, "0x0202")])
            .unwrap();

        let dir = assembler.bundle_dir(&detail.name);
        assert_eq!(std::fs::read(dir.join("blob_h100_i0")).unwrap(), b"0x0303");
        assert_eq!(std::fs::read(dir.join("blob_h100_i1")).unwrap(), b"0x0202");
        assert_eq!(std::fs::read_dir(&dir).unwrap().count(), 2);
    }

    #[tokio::test]
    async fn seal_and_upload_clears_staging_and_marks_finalized() {
        let temp = TempDir::new().unwrap();
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/v1/uploadBundle")
            .with_status(200)
            .create_async()
            .await;
        let assembler = assembler(&server.url(), &temp);
        let detail = BundleDetail::new(100, 101);
        assembler.open_window(&detail).unwrap();
        assembler
            .stage(100, &detail.name, &[sidecar(0, "0x0101")])
            .unwrap();

        assembler.seal_and_upload(&detail.name).await.unwrap();

        assert!(!assembler.bundle_dir(&detail.name).exists());
        assert!(!assembler.artifact_path(&detail.name).exists());
        let bundle = assembler.catalog.get_bundle(&detail.name).unwrap().unwrap();
        assert_eq!(bundle.status, BundleStatus::Finalized);
    }

    #[tokio::test]
    async fn object_exists_counts_as_success() {
        let temp = TempDir::new().unwrap();
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/v1/uploadBundle")
            .with_status(400)
            .with_body("Object exists")
            .create_async()
            .await;
        let assembler = assembler(&server.url(), &temp);
        let detail = BundleDetail::new(5, 5);
        assembler.open_window(&detail).unwrap();
        assembler
            .stage(5, &detail.name, &[sidecar(0, "0xdead")])
            .unwrap();

        assembler.seal_and_upload(&detail.name).await.unwrap();
        let bundle = assembler.catalog.get_bundle(&detail.name).unwrap().unwrap();
        assert_eq!(bundle.status, BundleStatus::Finalized);
    }

    #[tokio::test]
    async fn empty_window_finalizes_without_upload() {
        let temp = TempDir::new().unwrap();
        let server = mockito::Server::new_async().await;
        let assembler = assembler(&server.url(), &temp);
        let detail = BundleDetail::new(7, 8);
        assembler.open_window(&detail).unwrap();

        // No staged files at all: the builder refuses with EmptyBundle and
        // the assembler treats that as a completed window.
        assembler.seal_and_upload(&detail.name).await.unwrap();
        let bundle = assembler.catalog.get_bundle(&detail.name).unwrap().unwrap();
        assert_eq!(bundle.status, BundleStatus::Finalized);
    }

    #[test]
    fn window_arithmetic() {
        let detail = BundleDetail::new(100, 101);
        assert_eq!(detail.name, "blobs_s100_e101");
        let next = detail.next(2);
        assert_eq!(next, BundleDetail::new(102, 103));
        // Interval of one: a window of a single block.
        let single = BundleDetail::new(5, 5);
        assert_eq!(single.start_id, single.finalize_id);
        assert_eq!(single.next(1), BundleDetail::new(6, 6));
    }
}
