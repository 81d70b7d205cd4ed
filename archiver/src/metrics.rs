use metrics::{try_create_int_gauge, IntGauge, Result as MetricsResult};
use std::sync::LazyLock;

pub static SYNCED_BLOCK_ID: LazyLock<MetricsResult<IntGauge>> = LazyLock::new(|| {
    try_create_int_gauge(
        "synced_block_id",
        "Latest block id whose blobs have been persisted and staged for upload",
    )
});

pub static VERIFIED_BLOCK_ID: LazyLock<MetricsResult<IntGauge>> = LazyLock::new(|| {
    try_create_int_gauge(
        "verified_block_id",
        "Latest block id verified against the chain and the bundle service",
    )
});

pub static BUCKET_REMAINING_QUOTA: LazyLock<MetricsResult<IntGauge>> = LazyLock::new(|| {
    try_create_int_gauge(
        "bucket_remaining_quota",
        "Remaining read quota of the bucket in bytes",
    )
});
