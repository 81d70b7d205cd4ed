//! Storage-provider and chain read surface: storage params (segment size and
//! shard counts for the integrity hash), sealed-object metadata, and the
//! bucket read-quota report the monitor polls.

use crate::Error;
use chrono::Utc;
use sensitive_url::SensitiveUrl;
use serde::Deserialize;
use std::time::Duration;

const GET_PARAMS_PATH: &str = "/greenfield/storage/params";
const HEAD_OBJECT_PATH: &str = "/greenfield/storage/head_object";

const SP_TIMEOUT: Duration = Duration::from_secs(20);

/// Erasure-coding parameters governing how sealed objects are checksummed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StorageParams {
    pub segment_size: u64,
    pub data_shards: usize,
    pub parity_shards: usize,
}

#[derive(Debug, Deserialize)]
struct VersionedParams {
    max_segment_size: String,
    redundant_data_chunk_num: usize,
    redundant_parity_chunk_num: usize,
}

#[derive(Debug, Deserialize)]
struct ParamsInner {
    versioned_params: VersionedParams,
}

#[derive(Debug, Deserialize)]
struct GetParamsResponse {
    params: ParamsInner,
}

/// On-chain metadata of a stored object.
#[derive(Debug, Clone, Deserialize)]
pub struct ObjectMeta {
    #[serde(default)]
    pub checksums: Vec<String>,
    #[serde(default)]
    pub object_status: String,
}

#[derive(Debug, Deserialize)]
struct GetObjectMetaResponse {
    object_info: ObjectMeta,
}

/// Monthly read-quota report for a bucket.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QuotaInfo {
    pub read_quota_size: u64,
    pub sp_free_read_quota_size: u64,
    pub read_consumed_size: u64,
    pub free_consumed_size: u64,
}

impl QuotaInfo {
    pub fn remaining(&self) -> u64 {
        (self.read_quota_size + self.sp_free_read_quota_size)
            .saturating_sub(self.read_consumed_size)
            .saturating_sub(self.free_consumed_size)
    }
}

pub struct SpClient {
    client: reqwest::Client,
    host: SensitiveUrl,
}

impl SpClient {
    pub fn new(host: SensitiveUrl) -> Result<Self, Error> {
        let client = reqwest::Client::builder()
            .timeout(SP_TIMEOUT)
            .build()
            .map_err(Error::Reqwest)?;
        Ok(Self { client, host })
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, url: String) -> Result<T, Error> {
        let response = self.client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::ServerMessage {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response.json().await?)
    }

    pub async fn get_params(&self) -> Result<StorageParams, Error> {
        let base = self.host.full_string();
        let url = format!("{}{}", base.trim_end_matches('/'), GET_PARAMS_PATH);
        let response: GetParamsResponse = self.get_json(url).await?;
        let params = response.params.versioned_params;
        let segment_size = params
            .max_segment_size
            .parse::<u64>()
            .map_err(|_| Error::InvalidResponse(format!(
                "max_segment_size {}",
                params.max_segment_size
            )))?;
        Ok(StorageParams {
            segment_size,
            data_shards: params.redundant_data_chunk_num,
            parity_shards: params.redundant_parity_chunk_num,
        })
    }

    pub async fn get_object_meta(&self, bucket: &str, object: &str) -> Result<ObjectMeta, Error> {
        let base = self.host.full_string();
        let url = format!(
            "{}{}/{}/{}",
            base.trim_end_matches('/'),
            HEAD_OBJECT_PATH,
            bucket,
            object
        );
        let response: GetObjectMetaResponse = self.get_json(url).await?;
        Ok(response.object_info)
    }

    /// Read-quota report for the current month. The bucket rides as a virtual
    /// host prefix in front of the provider's hostname.
    pub async fn get_bucket_read_quota(&self, bucket: &str) -> Result<QuotaInfo, Error> {
        let full = self.host.full_string();
        let (scheme, rest) = full
            .split_once("//")
            .ok_or_else(|| Error::InvalidResponse(format!("sp endpoint {}", self.host)))?;
        let url = format!(
            "{scheme}//{bucket}.{}/?read-quota&year-month={}",
            rest.trim_end_matches('/'),
            Utc::now().format("%Y-%m")
        );

        let response = self.client.get(url).send().await?;
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(Error::ServerMessage {
                status: status.as_u16(),
                body,
            });
        }
        parse_quota_xml(&body)
    }
}

fn xml_tag_u64(body: &str, tag: &str) -> u64 {
    let open = format!("<{tag}>");
    let close = format!("</{tag}>");
    body.split_once(&open)
        .and_then(|(_, rest)| rest.split_once(&close))
        .and_then(|(value, _)| value.trim().parse::<u64>().ok())
        .unwrap_or(0)
}

fn parse_quota_xml(body: &str) -> Result<QuotaInfo, Error> {
    if !body.contains("GetReadQuotaResult") {
        return Err(Error::InvalidResponse("missing GetReadQuotaResult".to_string()));
    }
    Ok(QuotaInfo {
        read_quota_size: xml_tag_u64(body, "ReadQuotaSize"),
        sp_free_read_quota_size: xml_tag_u64(body, "SPFreeReadQuotaSize"),
        read_consumed_size: xml_tag_u64(body, "ReadConsumedSize"),
        free_consumed_size: xml_tag_u64(body, "FreeConsumedSize"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quota_xml_and_remaining() {
        let body = r#"<GetReadQuotaResult version="1">
            <BucketName>archive</BucketName>
            <ReadQuotaSize>1000</ReadQuotaSize>
            <SPFreeReadQuotaSize>500</SPFreeReadQuotaSize>
            <ReadConsumedSize>300</ReadConsumedSize>
            <FreeConsumedSize>100</FreeConsumedSize>
        </GetReadQuotaResult>"#;
        let quota = parse_quota_xml(body).unwrap();
        assert_eq!(quota.remaining(), 1100);
    }

    #[test]
    fn quota_remaining_saturates() {
        let quota = QuotaInfo {
            read_quota_size: 10,
            sp_free_read_quota_size: 0,
            read_consumed_size: 100,
            free_consumed_size: 0,
        };
        assert_eq!(quota.remaining(), 0);
    }

    #[tokio::test]
    async fn params_decode() {
        let body = r#"{
          "params": {
            "versioned_params": {
              "max_segment_size": "16777216",
              "redundant_data_chunk_num": 4,
              "redundant_parity_chunk_num": 2
            }
          }
        }"#;
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/greenfield/storage/params")
            .with_status(200)
            .with_body(body)
            .create_async()
            .await;

        let client = SpClient::new(SensitiveUrl::parse(&server.url()).unwrap()).unwrap();
        let params = client.get_params().await.unwrap();
        assert_eq!(
            params,
            StorageParams {
                segment_size: 16_777_216,
                data_shards: 4,
                parity_shards: 2
            }
        );
    }

    #[tokio::test]
    async fn object_meta_decode() {
        let body = r#"{
          "object_info": {
            "checksums": ["q8zcq2IEyGTvTLyxvmBYE5cLio/NfyYVCEn/9sTZzJo="],
            "object_status": "OBJECT_STATUS_SEALED"
          }
        }"#;
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/greenfield/storage/head_object/bucket/blobs_s1_e2")
            .with_status(200)
            .with_body(body)
            .create_async()
            .await;

        let client = SpClient::new(SensitiveUrl::parse(&server.url()).unwrap()).unwrap();
        let meta = client.get_object_meta("bucket", "blobs_s1_e2").await.unwrap();
        assert_eq!(meta.checksums.len(), 1);
        assert_eq!(meta.object_status, "OBJECT_STATUS_SEALED");
    }
}
