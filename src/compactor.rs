use tracing::{debug, error, info};

use crate::store::WalStore;

/// Rewrite the WAL once `threshold` events have piled up since the last
/// compaction, counting events replayed at open. Returns whether it ran.
pub async fn compact_if_needed(store: &WalStore, threshold: u64) -> bool {
    let appends = store.wal_appends_since_compact().await;
    if appends < threshold {
        debug!("compactor skip: {appends}/{threshold} appends");
        return false;
    }
    match store.compact_wal().await {
        Ok(()) => {
            info!(
                "compacted {} after {appends} appends ({} live appointments)",
                store.path().display(),
                store.appointment_count()
            );
            true
        }
        Err(e) => {
            error!("compaction of {} failed: {e}", store.path().display());
            false
        }
    }
}
