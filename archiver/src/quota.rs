//! Periodic bucket read-quota poll. Best effort: failures are logged and the
//! next tick tries again.

use crate::metrics::BUCKET_REMAINING_QUOTA;
use crate::MONITOR_QUOTA_INTERVAL;
use bundle_client::SpClient;
use metrics::set_gauge;
use std::sync::Arc;
use tracing::{error, info};

pub async fn monitor_quota(sp_client: Arc<SpClient>, bucket: String) {
    let mut ticker = tokio::time::interval(MONITOR_QUOTA_INTERVAL);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        match sp_client.get_bucket_read_quota(&bucket).await {
            Ok(quota) => {
                let remaining = quota.remaining();
                set_gauge(&BUCKET_REMAINING_QUOTA, remaining as i64);
                info!(bucket = %bucket, remaining, "Bucket read quota");
            }
            Err(e) => error!(bucket = %bucket, error = %e, "Failed to get bucket quota from SP"),
        }
    }
}
