//! Minimal Ethereum beacon REST client covering the three endpoints the
//! archiver drives: blob sidecars, blocks (Deneb JSON payload) and headers.

use crate::{Error, RPC_TIMEOUT};
use sensitive_url::SensitiveUrl;
use serde::{Deserialize, Serialize};

const PATH_GET_SIDECARS: &str = "/eth/v1/beacon/blob_sidecars";
const PATH_GET_BLOCK: &str = "/eth/v2/beacon/blocks";
const PATH_GET_HEADER: &str = "/eth/v1/beacon/headers";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BeaconBlockHeader {
    #[serde(with = "serde_utils::quoted_u64")]
    pub slot: u64,
    #[serde(with = "serde_utils::quoted_u64")]
    pub proposer_index: u64,
    pub parent_root: String,
    pub state_root: String,
    pub body_root: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignedBeaconBlockHeader {
    pub message: BeaconBlockHeader,
    pub signature: String,
}

/// A blob sidecar as served by `/eth/v1/beacon/blob_sidecars/{slot}`.
///
/// Hex fields keep their upstream `0x`-prefixed string form; staging writes
/// the `blob` string verbatim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sidecar {
    pub index: String,
    pub blob: String,
    pub kzg_commitment: String,
    pub kzg_proof: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signed_block_header: Option<SignedBeaconBlockHeader>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub kzg_commitment_inclusion_proof: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct SidecarsResponse {
    data: Vec<Sidecar>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExecutionPayload {
    #[serde(with = "serde_utils::quoted_u64")]
    pub block_number: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BeaconBlockBody {
    pub execution_payload: ExecutionPayload,
    #[serde(default)]
    pub blob_kzg_commitments: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BeaconBlock {
    #[serde(with = "serde_utils::quoted_u64")]
    pub slot: u64,
    #[serde(with = "serde_utils::quoted_u64")]
    pub proposer_index: u64,
    pub parent_root: String,
    pub state_root: String,
    pub body: BeaconBlockBody,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SignedBeaconBlock {
    pub message: BeaconBlock,
    pub signature: String,
}

/// `/eth/v2/beacon/blocks/{slot}` response. Only the Deneb-and-later fields
/// the archiver reads are modelled; unknown fields are ignored.
#[derive(Debug, Clone, Deserialize)]
pub struct GetBlockResponse {
    pub version: String,
    #[serde(default)]
    pub finalized: bool,
    pub data: SignedBeaconBlock,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HeaderData {
    pub root: String,
    #[serde(default)]
    pub canonical: bool,
    pub header: SignedBeaconBlockHeader,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GetHeaderResponse {
    pub data: HeaderData,
}

pub struct BeaconClient {
    client: reqwest::Client,
    host: SensitiveUrl,
}

impl BeaconClient {
    pub fn new(host: SensitiveUrl) -> Result<Self, Error> {
        let client = reqwest::Client::builder()
            .timeout(RPC_TIMEOUT)
            .build()
            .map_err(Error::Reqwest)?;
        Ok(Self { client, host })
    }

    fn endpoint(&self, path: &str, id: &str) -> String {
        let base = self.host.full_string();
        format!("{}{}/{}", base.trim_end_matches('/'), path, id)
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, url: String) -> Result<T, Error> {
        let response = self.client.get(url).send().await?;
        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(Error::BlockNotFound);
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

    /// Sidecars for `slot`, in index order. A slot with no blob transactions
    /// yields an empty list.
    pub async fn get_blob(&self, slot: u64) -> Result<Vec<Sidecar>, Error> {
        let url = self.endpoint(PATH_GET_SIDECARS, &slot.to_string());
        let response: SidecarsResponse = self.get_json(url).await?;
        Ok(response.data)
    }

    pub async fn get_block(&self, slot: u64) -> Result<GetBlockResponse, Error> {
        let url = self.endpoint(PATH_GET_BLOCK, &slot.to_string());
        self.get_json(url).await
    }

    pub async fn get_latest_block(&self) -> Result<GetBlockResponse, Error> {
        let url = self.endpoint(PATH_GET_BLOCK, "head");
        self.get_json(url).await
    }

    pub async fn get_header(&self, slot: u64) -> Result<GetHeaderResponse, Error> {
        let url = self.endpoint(PATH_GET_HEADER, &slot.to_string());
        self.get_json(url).await
    }
}
