use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::tenant::Tenant;

const CHECK_INTERVAL: Duration = Duration::from_secs(30);

/// Background task that rewrites a tenant's WALs once they have grown
/// past `threshold` appends since the last compaction.
pub async fn run_compactor(tenant: Arc<Tenant>, threshold: u64) {
    let mut interval = tokio::time::interval(CHECK_INTERVAL);
    interval.tick().await;
    loop {
        interval.tick().await;
        compact_if_needed(&tenant, threshold).await;
    }
}

/// One compaction pass. Returns which logs were rewritten as `(assignments, catalog)`.
pub async fn compact_if_needed(tenant: &Tenant, threshold: u64) -> (bool, bool) {
    let mut compacted = (false, false);

    let appends = tenant.engine.wal_appends_since_compact().await;
    if appends > threshold {
        match tenant.engine.compact_wal().await {
            Ok(()) => {
                info!("compacted assignment WAL after {appends} appends");
                compacted.0 = true;
            }
            Err(e) => warn!("assignment WAL compaction failed: {e}"),
        }
    }

    let appends = tenant.catalog.appends_since_compact().await;
    if appends > threshold {
        match tenant.catalog.compact().await {
            Ok(()) => {
                info!("compacted catalog WAL after {appends} appends");
                compacted.1 = true;
            }
            Err(e) => warn!("catalog WAL compaction failed: {e}"),
        }
    }

    compacted
}
