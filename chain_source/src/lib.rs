//! Upstream chain access for the archiver.
//!
//! Two client flavours exist behind [`ChainSource`]: the Ethereum beacon REST
//! API (blob sidecars, blocks, headers) plus its paired execution JSON-RPC
//! endpoint, and the BSC execution JSON-RPC endpoint which serves sidecars
//! directly. Both report missing-or-forked blocks as
//! [`Error::BlockNotFound`]; callers disambiguate by comparing against a
//! fresh head query.

use sensitive_url::SensitiveUrl;
use std::fmt;
use std::time::Duration;
use types::ChainVariant;

pub mod beacon;
pub mod execution;

pub use beacon::{
    BeaconBlock, BeaconBlockHeader, BeaconClient, GetBlockResponse, GetHeaderResponse, Sidecar,
    SignedBeaconBlockHeader,
};
pub use execution::{ExecutionBlock, ExecutionClient, ExecutionHeader, Transaction, BLOB_TX_TYPE};

/// Timeout applied to every upstream RPC call.
pub const RPC_TIMEOUT: Duration = Duration::from_secs(20);

#[derive(Debug)]
pub enum Error {
    /// Transport-level failure (connect, timeout, decode).
    Reqwest(reqwest::Error),
    /// Non-OK HTTP status other than 404.
    ServerMessage { status: u16, body: String },
    /// JSON-RPC level error object.
    JsonRpc { code: i64, message: String },
    /// 404 from the beacon node, or a null JSON-RPC result. Either the id is
    /// ahead of the head or the block was orphaned.
    BlockNotFound,
    /// A field in an upstream payload failed to parse.
    InvalidField { field: &'static str, value: String },
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Reqwest(e) => write!(f, "{e}"),
            Error::ServerMessage { status, body } => {
                write!(f, "received non-OK response status {status}: {body}")
            }
            Error::JsonRpc { code, message } => write!(f, "rpc error {code}: {message}"),
            Error::BlockNotFound => write!(f, "the block is not found in the chain"),
            Error::InvalidField { field, value } => {
                write!(f, "failed to parse upstream field {field}: {value}")
            }
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
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::BlockNotFound)
    }
}

/// Parses a `0x`-prefixed JSON-RPC quantity into a `u64`.
pub(crate) fn parse_quantity(field: &'static str, value: &str) -> Result<u64, Error> {
    let digits = value.strip_prefix("0x").unwrap_or(value);
    u64::from_str_radix(digits, 16).map_err(|_| Error::InvalidField {
        field,
        value: value.to_string(),
    })
}

/// A sidecar normalised across chain variants.
///
/// Beacon sidecars carry the signed block header and inclusion proof; BSC
/// sidecars instead know the transaction that carried them.
#[derive(Debug, Clone)]
pub struct GeneralSidecar {
    pub sidecar: Sidecar,
    pub tx_index: Option<i64>,
    pub tx_hash: Option<String>,
}

/// Unified access to the configured chain pair.
pub struct ChainSource {
    variant: ChainVariant,
    beacon: Option<BeaconClient>,
    execution: ExecutionClient,
}

impl ChainSource {
    /// `beacon_url` is required for [`ChainVariant::Ethereum`] and ignored for
    /// BSC.
    pub fn new(
        variant: ChainVariant,
        execution_url: SensitiveUrl,
        beacon_url: Option<SensitiveUrl>,
    ) -> Result<Self, Error> {
        let beacon = match variant {
            ChainVariant::Ethereum => {
                let url = beacon_url.ok_or(Error::InvalidField {
                    field: "beacon_rpc_addrs",
                    value: "missing".to_string(),
                })?;
                Some(BeaconClient::new(url)?)
            }
            ChainVariant::Bsc => None,
        };
        Ok(Self {
            variant,
            beacon,
            execution: ExecutionClient::new(execution_url)?,
        })
    }

    pub fn variant(&self) -> ChainVariant {
        self.variant
    }

    fn beacon(&self) -> Result<&BeaconClient, Error> {
        self.beacon.as_ref().ok_or(Error::InvalidField {
            field: "chain",
            value: "beacon call on bsc source".to_string(),
        })
    }

    /// Fetches the sidecars attached to `block_id`, normalised across
    /// variants. Sidecars are returned in index order.
    pub async fn get_blob(&self, block_id: u64) -> Result<Vec<GeneralSidecar>, Error> {
        match self.variant {
            ChainVariant::Ethereum => {
                let sidecars = self.beacon()?.get_blob(block_id).await?;
                Ok(sidecars
                    .into_iter()
                    .map(|sidecar| GeneralSidecar {
                        sidecar,
                        tx_index: None,
                        tx_hash: None,
                    })
                    .collect())
            }
            ChainVariant::Bsc => {
                let tx_sidecars = self.execution.blob_sidecars(block_id).await?;
                let mut out = vec![];
                for tx_sidecar in tx_sidecars {
                    let tx_index = parse_quantity("txIndex", &tx_sidecar.tx_index)? as i64;
                    let inner = &tx_sidecar.blob_sidecar;
                    if inner.commitments.len() != inner.blobs.len()
                        || inner.proofs.len() != inner.blobs.len()
                    {
                        return Err(Error::InvalidField {
                            field: "blobSidecar",
                            value: format!(
                                "blob/commitment/proof count mismatch in tx {}",
                                tx_sidecar.tx_hash
                            ),
                        });
                    }
                    for i in 0..inner.blobs.len() {
                        out.push(GeneralSidecar {
                            sidecar: Sidecar {
                                index: out.len().to_string(),
                                blob: inner.blobs[i].clone(),
                                kzg_commitment: inner.commitments[i].clone(),
                                kzg_proof: inner.proofs[i].clone(),
                                signed_block_header: None,
                                kzg_commitment_inclusion_proof: vec![],
                            },
                            tx_index: Some(tx_index),
                            tx_hash: Some(tx_sidecar.tx_hash.clone()),
                        });
                    }
                }
                Ok(out)
            }
        }
    }

    pub async fn get_beacon_block(&self, slot: u64) -> Result<GetBlockResponse, Error> {
        self.beacon()?.get_block(slot).await
    }

    pub async fn get_latest_beacon_block(&self) -> Result<GetBlockResponse, Error> {
        self.beacon()?.get_latest_block().await
    }

    pub async fn get_beacon_header(&self, slot: u64) -> Result<GetHeaderResponse, Error> {
        self.beacon()?.get_header(slot).await
    }

    /// Latest finalized execution block number (BSC liveness gate).
    pub async fn get_finalized_block_num(&self) -> Result<u64, Error> {
        self.execution.finalized_block_number().await
    }

    /// Full execution block including transactions, for blob-tx correlation.
    pub async fn block_by_number(&self, number: u64) -> Result<ExecutionBlock, Error> {
        self.execution.block_by_number(number).await
    }

    /// Execution block header (BSC block row fields).
    pub async fn get_block_header(&self, height: u64) -> Result<ExecutionHeader, Error> {
        self.execution.header_by_number(height).await
    }
}
