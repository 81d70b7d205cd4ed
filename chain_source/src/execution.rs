//! Execution-layer JSON-RPC client.
//!
//! Serves two roles: blob-transaction correlation for both variants
//! (`eth_getBlockByNumber` with full transactions) and the BSC-specific
//! surface (`eth_getBlobSidecars`, `eth_getFinalizedHeader`).

use crate::{parse_quantity, Error, RPC_TIMEOUT};
use sensitive_url::SensitiveUrl;
use serde::{Deserialize, Serialize};
use serde_json::json;

/// EIP-4844 transaction type tag as encoded in JSON-RPC responses.
pub const BLOB_TX_TYPE: &str = "0x3";

/// Confirmation depth passed to `eth_getFinalizedHeader`.
const BSC_BLOCK_CONFIRM_NUM: u64 = 3;

#[derive(Serialize)]
struct JsonRpcRequest<'a> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    params: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct JsonRpcError {
    code: i64,
    message: String,
}

#[derive(Debug, Deserialize)]
struct JsonRpcResponse<T> {
    result: Option<T>,
    error: Option<JsonRpcError>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Transaction {
    pub hash: String,
    #[serde(default)]
    pub to: Option<String>,
    #[serde(rename = "type")]
    pub tx_type: String,
    #[serde(default, rename = "blobVersionedHashes")]
    pub blob_versioned_hashes: Vec<String>,
}

impl Transaction {
    pub fn is_blob_tx(&self) -> bool {
        self.tx_type == BLOB_TX_TYPE
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExecutionBlock {
    pub hash: String,
    #[serde(rename = "parentHash")]
    pub parent_hash: String,
    pub number: String,
    #[serde(default)]
    pub transactions: Vec<Transaction>,
}

impl ExecutionBlock {
    pub fn number_u64(&self) -> Result<u64, Error> {
        parse_quantity("number", &self.number)
    }
}

/// Header-only view; with `eth_getBlockByNumber(.., false)` the transaction
/// list holds bare hashes and is not decoded.
#[derive(Debug, Clone, Deserialize)]
pub struct ExecutionHeader {
    pub hash: String,
    #[serde(rename = "parentHash")]
    pub parent_hash: String,
    pub number: String,
}

#[derive(Debug, Deserialize)]
struct FinalizedHeader {
    number: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BscBlobSidecar {
    #[serde(default)]
    pub blobs: Vec<String>,
    #[serde(default)]
    pub commitments: Vec<String>,
    #[serde(default)]
    pub proofs: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BscBlobTxSidecar {
    #[serde(rename = "blobSidecar")]
    pub blob_sidecar: BscBlobSidecar,
    #[serde(rename = "blockNumber")]
    pub block_number: String,
    #[serde(rename = "blockHash")]
    pub block_hash: String,
    #[serde(rename = "txIndex")]
    pub tx_index: String,
    #[serde(rename = "txHash")]
    pub tx_hash: String,
}

pub struct ExecutionClient {
    client: reqwest::Client,
    host: SensitiveUrl,
}

impl ExecutionClient {
    pub fn new(host: SensitiveUrl) -> Result<Self, Error> {
        let client = reqwest::Client::builder()
            .timeout(RPC_TIMEOUT)
            .build()
            .map_err(Error::Reqwest)?;
        Ok(Self { client, host })
    }

    async fn rpc<T: serde::de::DeserializeOwned>(
        &self,
        method: &str,
        params: serde_json::Value,
    ) -> Result<Option<T>, Error> {
        let request = JsonRpcRequest {
            jsonrpc: "2.0",
            id: 1,
            method,
            params,
        };
        let response = self
            .client
            .post(self.host.full_string())
            .json(&request)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::ServerMessage {
                status: status.as_u16(),
                body,
            });
        }
        let decoded: JsonRpcResponse<T> = response.json().await?;
        if let Some(error) = decoded.error {
            return Err(Error::JsonRpc {
                code: error.code,
                message: error.message,
            });
        }
        Ok(decoded.result)
    }

    /// Full block with transaction objects; `BlockNotFound` when the node
    /// returns null.
    pub async fn block_by_number(&self, number: u64) -> Result<ExecutionBlock, Error> {
        self.rpc(
            "eth_getBlockByNumber",
            json!([format!("{number:#x}"), true]),
        )
        .await?
        .ok_or(Error::BlockNotFound)
    }

    /// Header-only block (transaction hashes omitted from the decoded view).
    pub async fn header_by_number(&self, number: u64) -> Result<ExecutionHeader, Error> {
        self.rpc(
            "eth_getBlockByNumber",
            json!([format!("{number:#x}"), false]),
        )
        .await?
        .ok_or(Error::BlockNotFound)
    }

    /// Latest finalized block number per `eth_getFinalizedHeader`.
    pub async fn finalized_block_number(&self) -> Result<u64, Error> {
        let header: FinalizedHeader = self
            .rpc("eth_getFinalizedHeader", json!([BSC_BLOCK_CONFIRM_NUM]))
            .await?
            .ok_or(Error::BlockNotFound)?;
        parse_quantity("number", &header.number)
    }

    /// BSC blob sidecars grouped per transaction; `BlockNotFound` when the
    /// node returns null.
    pub async fn blob_sidecars(&self, number: u64) -> Result<Vec<BscBlobTxSidecar>, Error> {
        self.rpc("eth_getBlobSidecars", json!([format!("{number:#x}")]))
            .await?
            .ok_or(Error::BlockNotFound)
    }
}
