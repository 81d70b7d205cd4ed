//! The archiver core: the sync loop that turns finalized blocks into uploaded
//! bundles, the verify loop that proves the archive matches both the chain
//! and the storage backend, and the quota monitor.
//!
//! The two loops never hand anything to each other in memory; the catalog is
//! their only rendezvous, which is what keeps failure recovery composable.

use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

pub mod assembler;
pub mod config;
mod convert;
pub mod integrity;
pub mod metrics;
pub mod quota;
pub mod syncer;
pub mod verifier;

pub use assembler::{Assembler, BundleDetail};
pub use config::{ArchiverConfig, ConfigError, DbConfig, MetricsConfig, VerificationMode};
pub use syncer::Syncer;
pub use verifier::Verifier;

/// Tick between loop iterations.
pub const LOOP_SLEEP: Duration = Duration::from_millis(10);
/// Pause when the beacon chain has no new finalized work.
pub const PAUSE: Duration = Duration::from_secs(90);
/// Pause when the execution chain cursor has caught up with finality.
pub const EXECUTION_PAUSE: Duration = Duration::from_secs(3);
/// Cadence of the storage-provider quota poll.
pub const MONITOR_QUOTA_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// Seconds since the epoch; clamps to zero on a pre-epoch clock.
pub(crate) fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

#[derive(Debug)]
pub enum Error {
    Catalog(catalog::Error),
    Chain(chain_source::Error),
    Bundle(bundle_client::Error),
    Io(std::io::Error),
    Name(types::NameError),
    /// An integrity check against the chain or the storage backend failed.
    /// Handled inside the verify loop by the re-upload procedure; never
    /// propagates out of it.
    VerificationFailed(String),
    Internal(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Catalog(e) => write!(f, "catalog: {e}"),
            Error::Chain(e) => write!(f, "chain source: {e}"),
            Error::Bundle(e) => write!(f, "bundle service: {e}"),
            Error::Io(e) => write!(f, "io: {e}"),
            Error::Name(e) => write!(f, "{e}"),
            Error::VerificationFailed(msg) => write!(f, "verification failed: {msg}"),
            Error::Internal(msg) => write!(f, "{msg}"),
        }
    }
}

impl std::error::Error for Error {}

impl From<catalog::Error> for Error {
    fn from(e: catalog::Error) -> Self {
        Error::Catalog(e)
    }
}

impl From<chain_source::Error> for Error {
    fn from(e: chain_source::Error) -> Self {
        Error::Chain(e)
    }
}

impl From<bundle_client::Error> for Error {
    fn from(e: bundle_client::Error) -> Self {
        Error::Bundle(e)
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e)
    }
}

impl From<types::NameError> for Error {
    fn from(e: types::NameError) -> Self {
        Error::Name(e)
    }
}
