//! Client for the Greenfield-backed bundle service, plus the storage-provider
//! read surface used by verification.
//!
//! The service reports several conditions as plain strings in error bodies;
//! those are decoded here into structured [`Error`] kinds so control flow in
//! the loops never string-matches: `ObjectExists` and `EmptyBundle` are
//! success for idempotent re-entry, `Expired` triggers delete-and-retry, and
//! the 404 kinds drive first-time creation versus verification failure.

use std::fmt;

pub mod bundle;
mod client;
mod sign;
pub mod sp;

pub use bundle::{content_type_by_extension, BundleBuilder, BundleObjectMeta};
pub use client::{build_bundle_from_dir, BundleClient, BundleInfo, RemoteBundleStatus};
pub use sign::RequestSigner;
pub use sp::{ObjectMeta, QuotaInfo, SpClient, StorageParams};

#[derive(Debug)]
pub enum Error {
    /// Transport-level failure.
    Reqwest(reqwest::Error),
    /// Non-OK status that did not match any known service condition.
    ServerMessage { status: u16, body: String },
    /// The bundle is unknown to the service (HTTP 404 on query).
    BundleNotExist,
    /// The object is unknown to the service (HTTP 404 on view).
    ObjectNotExist,
    /// The service already holds an object of this name.
    ObjectExists,
    /// Finalize was attempted on a bundle with no objects.
    EmptyBundle,
    /// The bundle expired before it was finalized.
    Expired,
    /// The configured private key is not a valid secp256k1 scalar, or
    /// signing failed.
    Signing(String),
    /// A malformed payload from the service or storage provider.
    InvalidResponse(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Reqwest(e) => write!(f, "{e}"),
            Error::ServerMessage { status, body } => {
                write!(f, "received non-OK response status {status}: {body}")
            }
            Error::BundleNotExist => write!(f, "the bundle not exist in bundle service"),
            Error::ObjectNotExist => write!(f, "the bundle object not exist in bundle service"),
            Error::ObjectExists => write!(f, "object exists in bundle service"),
            Error::EmptyBundle => write!(f, "empty bundle"),
            Error::Expired => write!(f, "bundle expired"),
            Error::Signing(msg) => write!(f, "request signing failed: {msg}"),
            Error::InvalidResponse(msg) => write!(f, "invalid response: {msg}"),
        }
    }
}

impl std::error::Error for Error {}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Error::Reqwest(e)
    }
}

impl Error {
    /// Conditions an idempotent upload may treat as success.
    pub fn is_tolerable_upload_error(&self) -> bool {
        matches!(self, Error::ObjectExists | Error::EmptyBundle)
    }

    /// Decodes a non-OK response body into a structured kind.
    pub(crate) fn from_service_body(status: u16, body: String) -> Self {
        if body.contains("Object exists") || body.contains("Object already exists") {
            Error::ObjectExists
        } else if body.contains("empty bundle") {
            Error::EmptyBundle
        } else if body.contains("expired") {
            Error::Expired
        } else {
            Error::ServerMessage { status, body }
        }
    }
}
