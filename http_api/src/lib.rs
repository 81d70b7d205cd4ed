//! Read-only query surface serving cached sidecars out of the archive, plus
//! the Prometheus text exporter.
//!
//! `GET /eth/v1/beacon/blob_sidecars/{block_id}` accepts a decimal block id
//! or a `0x`-prefixed 32-byte root and an optional `indices` filter, and
//! answers in the beacon-API sidecar shape from catalog rows plus bundle
//! objects. A small LRU keyed by block id caches full (unfiltered) answers.

use axum::extract::{Path, RawQuery, State};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::info;

mod error;
mod service;

pub use error::ApiError;
pub use service::{BlobService, SidecarView};

#[derive(serde::Serialize)]
struct SidecarsResponse {
    data: Vec<SidecarView>,
}

async fn get_blob_sidecars(
    State(service): State<Arc<BlobService>>,
    Path(block_id): Path<String>,
    RawQuery(query): RawQuery,
) -> Result<Json<SidecarsResponse>, ApiError> {
    let block_id = block_id.parse::<types::BlockId>().map_err(ApiError::from)?;
    let indices = parse_indices(query.as_deref())?;
    let data = service.get_blob_sidecars(&block_id, &indices).await?;
    Ok(Json(SidecarsResponse { data }))
}

/// Accepts both `indices=0&indices=2` and `indices=0,2`.
fn parse_indices(query: Option<&str>) -> Result<Vec<i64>, ApiError> {
    let mut indices = vec![];
    let Some(query) = query else {
        return Ok(indices);
    };
    for pair in query.split('&') {
        let Some((key, value)) = pair.split_once('=') else {
            continue;
        };
        if key != "indices" {
            continue;
        }
        for part in value.split(',').filter(|part| !part.is_empty()) {
            let index = part
                .parse::<i64>()
                .map_err(|_| ApiError::invalid_request(format!("invalid index {part}")))?;
            indices.push(index);
        }
    }
    Ok(indices)
}

async fn get_metrics() -> Response {
    metrics::gather_text().into_response()
}

pub fn router(service: Arc<BlobService>) -> Router {
    Router::new()
        .route("/eth/v1/beacon/blob_sidecars/{block_id}", get(get_blob_sidecars))
        .with_state(service)
        .layer(CorsLayer::permissive())
}

pub fn metrics_router() -> Router {
    Router::new().route("/metrics", get(get_metrics))
}

/// Binds and serves a router until the process exits.
pub async fn serve(router: Router, address: SocketAddr) -> Result<(), std::io::Error> {
    let listener = tokio::net::TcpListener::bind(address).await?;
    info!(%address, "HTTP server listening");
    axum::serve(listener, router).await
}
