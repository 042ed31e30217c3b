use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::engine::Engine;

/// Background task that periodically persists the passive completion
/// transition: any booking whose end has passed flips to completed. The
/// derived status already reads as completed everywhere, so this pass only
/// keeps the stored state from drifting.
pub async fn run_sweeper(engine: Arc<Engine>, period: Duration) {
    let mut interval = tokio::time::interval(period);
    loop {
        interval.tick().await;
        let now = chrono::Local::now().naive_local();
        match engine.sweep_completed(now).await {
            Ok(ids) if !ids.is_empty() => info!("swept {} bookings to completed", ids.len()),
            Ok(_) => {}
            Err(e) => tracing::warn!("sweep failed: {e}"),
        }
    }
}

/// Background task that compacts the WAL once enough appends accumulate.
pub async fn run_compactor(engine: Arc<Engine>, threshold: u64) {
    let mut interval = tokio::time::interval(Duration::from_secs(60));
    loop {
        interval.tick().await;
        let appends = engine.wal_appends_since_compact().await;
        if appends < threshold {
            continue;
        }
        match engine.compact_wal().await {
            Ok(()) => info!("compacted WAL after {appends} appends"),
            Err(e) => tracing::warn!("WAL compaction failed: {e}"),
        }
    }
}
