//! Deterministic bundle container.
//!
//! A bundle artifact is the object payloads concatenated in append order,
//! followed by a JSON metadata trailer describing each object (name, offset,
//! length, content type, SHA-256), an 8-byte little-endian trailer length and
//! a fixed magic footer. Appending the same files in the same order always
//! reproduces identical bytes, which is what lets the verifier rebuild a
//! bundle from re-fetched sidecars and compare storage-provider checksums.

use crate::Error;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::Path;

pub const BUNDLE_MAGIC: &[u8; 8] = b"blobbdl1";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BundleObjectMeta {
    pub name: String,
    pub offset: u64,
    pub length: u64,
    pub content_type: String,
    /// Hex SHA-256 of the object payload.
    pub hash: String,
}

#[derive(Debug, Default)]
pub struct BundleBuilder {
    payload: Vec<u8>,
    objects: Vec<BundleObjectMeta>,
}

impl BundleBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    pub fn object_count(&self) -> usize {
        self.objects.len()
    }

    /// Appends one object, returning its SHA-256.
    pub fn append_object(&mut self, name: &str, bytes: &[u8], content_type: &str) -> [u8; 32] {
        let hash: [u8; 32] = Sha256::digest(bytes).into();
        self.objects.push(BundleObjectMeta {
            name: name.to_string(),
            offset: self.payload.len() as u64,
            length: bytes.len() as u64,
            content_type: content_type.to_string(),
            hash: hex::encode(hash),
        });
        self.payload.extend_from_slice(bytes);
        hash
    }

    /// Seals the bundle into its byte artifact. A bundle with no objects is
    /// reported as [`Error::EmptyBundle`], which callers treat the same way
    /// as the service's own empty-bundle refusal.
    pub fn finalize(self) -> Result<Vec<u8>, Error> {
        if self.objects.is_empty() {
            return Err(Error::EmptyBundle);
        }
        let meta = serde_json::to_vec(&self.objects)
            .map_err(|e| Error::InvalidResponse(format!("bundle meta encoding: {e}")))?;
        let mut artifact = self.payload;
        artifact.extend_from_slice(&meta);
        artifact.extend_from_slice(&(meta.len() as u64).to_le_bytes());
        artifact.extend_from_slice(BUNDLE_MAGIC);
        Ok(artifact)
    }
}

/// Parses the metadata trailer back out of a bundle artifact.
pub fn read_bundle_meta(artifact: &[u8]) -> Result<Vec<BundleObjectMeta>, Error> {
    let invalid = |msg: &str| Error::InvalidResponse(format!("bundle artifact: {msg}"));
    let footer_len = BUNDLE_MAGIC.len() + 8;
    if artifact.len() < footer_len || !artifact.ends_with(BUNDLE_MAGIC) {
        return Err(invalid("missing magic footer"));
    }
    let len_start = artifact.len() - footer_len;
    let meta_len = u64::from_le_bytes(
        artifact[len_start..len_start + 8]
            .try_into()
            .map_err(|_| invalid("truncated length"))?,
    ) as usize;
    let meta_start = len_start
        .checked_sub(meta_len)
        .ok_or_else(|| invalid("metadata length out of range"))?;
    serde_json::from_slice(&artifact[meta_start..len_start])
        .map_err(|e| invalid(&format!("metadata decoding: {e}")))
}

/// Infers a content type from a staged file's extension. Blob payload files
/// carry no extension and default to an octet stream.
pub fn content_type_by_extension(path: &Path) -> &'static str {
    match path.extension().and_then(|ext| ext.to_str()) {
        Some("json") => "application/json",
        Some("txt") => "text/plain",
        _ => "application/octet-stream",
    }
}
