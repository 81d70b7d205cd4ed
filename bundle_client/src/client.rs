//! HTTP client for the bundle service.

use crate::bundle::{content_type_by_extension, BundleBuilder};
use crate::sign::{canonical_request, RequestSigner};
use crate::Error;
use sensitive_url::SensitiveUrl;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::path::Path;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::debug;

const PATH_CREATE_BUNDLE: &str = "/v1/createBundle";
const PATH_FINALIZE_BUNDLE: &str = "/v1/finalizeBundle";
const PATH_DELETE_BUNDLE: &str = "/v1/deleteBundle";
const PATH_UPLOAD_BUNDLE: &str = "/v1/uploadBundle";
const PATH_UPLOAD_OBJECT: &str = "/v1/uploadObject";

/// Uploads may carry whole bundles; allow far more than the RPC timeout.
const UPLOAD_TIMEOUT: Duration = Duration::from_secs(600);

/// Window the service is given to seal a finalized bundle.
const BUNDLE_EXPIRY: Duration = Duration::from_secs(24 * 60 * 60);
/// Shorter expiry for a bundle that is still being assembled.
const CREATE_EXPIRY: Duration = Duration::from_secs(60 * 60);

/// Bundle status as reported by the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteBundleStatus {
    Bundling,
    Finalized,
    CreatedOnChain,
    SealedOnChain,
    Expired,
    Unknown(i32),
}

impl From<i32> for RemoteBundleStatus {
    fn from(code: i32) -> Self {
        match code {
            0 => RemoteBundleStatus::Bundling,
            1 => RemoteBundleStatus::Finalized,
            2 => RemoteBundleStatus::CreatedOnChain,
            3 => RemoteBundleStatus::SealedOnChain,
            4 => RemoteBundleStatus::Expired,
            other => RemoteBundleStatus::Unknown(other),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BundleInfo {
    #[serde(default, alias = "bundle_name")]
    pub bundle_name: String,
    #[serde(default, alias = "bucket_name")]
    pub bucket_name: String,
    #[serde(default)]
    pub status: i32,
    #[serde(default, alias = "created_timestamp")]
    pub created_timestamp: i64,
}

impl BundleInfo {
    pub fn status(&self) -> RemoteBundleStatus {
        RemoteBundleStatus::from(self.status)
    }
}

pub struct BundleClient {
    client: reqwest::Client,
    host: SensitiveUrl,
    signer: RequestSigner,
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

impl BundleClient {
    pub fn new(host: SensitiveUrl, private_key: &[u8]) -> Result<Self, Error> {
        let client = reqwest::Client::builder()
            .timeout(UPLOAD_TIMEOUT)
            .build()
            .map_err(Error::Reqwest)?;
        Ok(Self {
            client,
            host,
            signer: RequestSigner::new(private_key)?,
        })
    }

    fn url(&self, path: &str) -> String {
        let base = self.host.full_string();
        format!("{}{}", base.trim_end_matches('/'), path)
    }

    fn bundle_headers(bucket: &str, bundle: &str, expiry: Duration) -> Vec<(String, String)> {
        vec![
            ("X-Bundle-Bucket-Name".to_string(), bucket.to_string()),
            ("X-Bundle-Name".to_string(), bundle.to_string()),
            (
                "X-Bundle-Expiry-Timestamp".to_string(),
                (unix_now() + expiry.as_secs()).to_string(),
            ),
        ]
    }

    async fn post_signed(
        &self,
        path: &str,
        headers: Vec<(String, String)>,
        form: Option<reqwest::multipart::Form>,
    ) -> Result<(), Error> {
        let signature = self
            .signer
            .sign_request(&canonical_request("POST", path, &headers))?;

        let mut request = self.client.post(self.url(path));
        for (name, value) in &headers {
            request = request.header(name, value);
        }
        request = request.header("Authorization", signature);
        if let Some(form) = form {
            request = request.multipart(form);
        }

        let response = request.send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        Err(Error::from_service_body(status.as_u16(), body))
    }

    pub async fn create_bundle(&self, bundle: &str, bucket: &str) -> Result<(), Error> {
        let mut headers = Self::bundle_headers(bucket, bundle, CREATE_EXPIRY);
        headers.push(("Content-Type".to_string(), "application/json".to_string()));
        self.post_signed(PATH_CREATE_BUNDLE, headers, None).await
    }

    pub async fn finalize_bundle(&self, bundle: &str, bucket: &str) -> Result<(), Error> {
        let mut headers = Self::bundle_headers(bucket, bundle, BUNDLE_EXPIRY);
        headers.push(("Content-Type".to_string(), "application/json".to_string()));
        self.post_signed(PATH_FINALIZE_BUNDLE, headers, None).await
    }

    pub async fn delete_bundle(&self, bundle: &str, bucket: &str) -> Result<(), Error> {
        let mut headers = Self::bundle_headers(bucket, bundle, BUNDLE_EXPIRY);
        headers.push(("Content-Type".to_string(), "application/json".to_string()));
        self.post_signed(PATH_DELETE_BUNDLE, headers, None).await
    }

    /// Builds the bundle artifact from every file in `bundle_dir` (lexical
    /// order), persists it at `artifact_path` and uploads it for finalize in
    /// one call. The artifact on disk doubles as the crash-recovery sentinel;
    /// the caller removes it together with the staging dir on success.
    pub async fn upload_and_finalize_bundle(
        &self,
        bundle: &str,
        bucket: &str,
        bundle_dir: &Path,
        artifact_path: &Path,
    ) -> Result<(), Error> {
        let artifact = build_bundle_from_dir(bundle_dir)?.finalize()?;
        std::fs::write(artifact_path, &artifact)
            .map_err(|e| Error::InvalidResponse(format!("writing bundle artifact: {e}")))?;

        let hash = hex::encode(Sha256::digest(&artifact));
        debug!(bundle, bucket, bytes = artifact.len(), sha256 = %hash, "Uploading bundle");

        let mut headers = Self::bundle_headers(bucket, bundle, BUNDLE_EXPIRY);
        headers.push(("X-Bundle-File-Sha256".to_string(), hash));

        let file_name = artifact_path
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or("bundle")
            .to_string();
        let part = reqwest::multipart::Part::bytes(artifact).file_name(file_name);
        let form = reqwest::multipart::Form::new().part("file", part);

        self.post_signed(PATH_UPLOAD_BUNDLE, headers, Some(form)).await
    }

    /// Uploads a single object into an open bundle.
    pub async fn upload_object(
        &self,
        object: &str,
        bucket: &str,
        bundle: &str,
        content_type: &str,
        bytes: Vec<u8>,
    ) -> Result<(), Error> {
        let hash = hex::encode(Sha256::digest(&bytes));
        let mut headers = Self::bundle_headers(bucket, bundle, BUNDLE_EXPIRY);
        headers.push(("X-Bundle-File-Name".to_string(), object.to_string()));
        headers.push(("X-Bundle-Content-Type".to_string(), content_type.to_string()));
        headers.push(("X-Bundle-File-Sha256".to_string(), hash));

        let part = reqwest::multipart::Part::bytes(bytes).file_name(object.to_string());
        let form = reqwest::multipart::Form::new().part("file", part);
        self.post_signed(PATH_UPLOAD_OBJECT, headers, Some(form)).await
    }

    pub async fn get_bundle_info(&self, bucket: &str, bundle: &str) -> Result<BundleInfo, Error> {
        let url = self.url(&format!("/v1/queryBundle/{bucket}/{bundle}"));
        let response = self.client.get(url).send().await?;
        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(Error::BundleNotExist);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::ServerMessage {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response.json().await?)
    }

    /// Fetches a stored object's content. Blob objects are the staged hex
    /// text.
    pub async fn get_object(
        &self,
        bucket: &str,
        bundle: &str,
        object: &str,
    ) -> Result<String, Error> {
        let url = self.url(&format!("/v1/view/{bucket}/{bundle}/{object}"));
        let response = self.client.get(url).send().await?;
        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(Error::ObjectNotExist);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::ServerMessage {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response.text().await?)
    }
}

/// Appends every regular file under `dir` in lexical filename order. Staged
/// blob filenames are deterministic functions of `(block_id, index)`, so a
/// rebuild from identical staging reproduces the same artifact.
pub fn build_bundle_from_dir(dir: &Path) -> Result<BundleBuilder, Error> {
    let mut bundle = BundleBuilder::new();
    let mut entries: Vec<_> = std::fs::read_dir(dir)
        .map_err(|e| Error::InvalidResponse(format!("reading bundle dir: {e}")))?
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.path().is_file())
        .map(|entry| entry.path())
        .collect();
    entries.sort();
    for path in entries {
        let bytes = std::fs::read(&path)
            .map_err(|e| Error::InvalidResponse(format!("reading staged file: {e}")))?;
        let name = path
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or_default()
            .to_string();
        bundle.append_object(&name, &bytes, content_type_by_extension(&path));
    }
    Ok(bundle)
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEST_KEY: [u8; 32] = [7u8; 32];

    fn test_client(url: &str) -> BundleClient {
        BundleClient::new(SensitiveUrl::parse(url).unwrap(), &TEST_KEY).unwrap()
    }

    #[tokio::test]
    async fn create_bundle_is_signed() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/v1/createBundle")
            .match_header("X-Bundle-Name", "blobs_s100_e101")
            .match_header("X-Bundle-Bucket-Name", "bucket")
            .match_header("Authorization", mockito::Matcher::Regex("^[0-9a-f]{130}$".into()))
            .with_status(200)
            .create_async()
            .await;

        test_client(&server.url())
            .create_bundle("blobs_s100_e101", "bucket")
            .await
            .unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn missing_bundle_is_structured() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/v1/queryBundle/bucket/blobs_s1_e2")
            .with_status(404)
            .create_async()
            .await;

        let err = test_client(&server.url())
            .get_bundle_info("bucket", "blobs_s1_e2")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::BundleNotExist));
    }

    #[tokio::test]
    async fn bundle_info_status_decodes() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/v1/queryBundle/bucket/blobs_s1_e2")
            .with_status(200)
            .with_body(
                r#"{"bundleName":"blobs_s1_e2","bucketName":"bucket","status":1,"createdTimestamp":1700000000}"#,
            )
            .create_async()
            .await;

        let info = test_client(&server.url())
            .get_bundle_info("bucket", "blobs_s1_e2")
            .await
            .unwrap();
        assert_eq!(info.status(), RemoteBundleStatus::Finalized);
        assert_eq!(info.created_timestamp, 1700000000);
    }

    #[tokio::test]
    async fn upload_decodes_object_exists() {
        let dir = tempfile::tempdir().unwrap();
        let staging = dir.path().join("blobs_s1_e2");
        std::fs::create_dir_all(&staging).unwrap();
        std::fs::write(staging.join("blob_h1_i0"), b"0xaabb").unwrap();
        let artifact = dir.path().join("blobs_s1_e2.bundle");

        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/v1/uploadBundle")
            .with_status(400)
            .with_body("Object exists")
            .create_async()
            .await;

        let err = test_client(&server.url())
            .upload_and_finalize_bundle("blobs_s1_e2", "bucket", &staging, &artifact)
            .await
            .unwrap_err();
        assert!(err.is_tolerable_upload_error());
        // The artifact sentinel was written before the upload was refused.
        assert!(artifact.exists());
    }

    #[tokio::test]
    async fn empty_staging_dir_reports_empty_bundle() {
        let dir = tempfile::tempdir().unwrap();
        let staging = dir.path().join("blobs_s5_e6");
        std::fs::create_dir_all(&staging).unwrap();
        let artifact = dir.path().join("blobs_s5_e6.bundle");

        let server = mockito::Server::new_async().await;
        let client = test_client(&server.url());
        let err = client
            .upload_and_finalize_bundle("blobs_s5_e6", "bucket", &staging, &artifact)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::EmptyBundle));
    }
}
