use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::engine::Engine;

const CHECK_INTERVAL: Duration = Duration::from_secs(30);

/// Compact the WAL once at least `threshold` events were appended since the
/// last compaction. Returns whether a compaction ran.
pub async fn compact_if_due(engine: &Engine, threshold: u64) -> bool {
    let appended = engine.wal_appends_since_compact().await;
    if appended < threshold {
        return false;
    }
    match engine.compact_wal().await {
        Ok(()) => true,
        Err(e) => {
            warn!(appended, "WAL compaction failed: {e}");
            false
        }
    }
}

/// Background task that keeps the WAL from growing without bound.
pub async fn run_compactor(engine: Arc<Engine>, threshold: u64) {
    let mut interval = tokio::time::interval(CHECK_INTERVAL);
    loop {
        interval.tick().await;
        if compact_if_due(&engine, threshold).await {
            debug!(threshold, "periodic compaction done");
        }
        engine.notify.prune();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calendar::LocalCalendar;
    use crate::model::*;
    use crate::notify::NotifyHub;
    use std::path::PathBuf;

    fn scratch(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("pista_test_maintenance");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = std::fs::remove_file(&path);
        path
    }

    fn court(name: &str) -> NewCourt {
        NewCourt {
            name: name.into(),
            hours: OperatingHours::new(
                "08:00".parse().unwrap(),
                "20:00".parse().unwrap(),
                SlotDuration::from_minutes(60).unwrap(),
            )
            .unwrap(),
            hourly_price_cents: 5_000,
        }
    }

    #[tokio::test]
    async fn compacts_only_past_threshold() {
        let path = scratch("threshold.wal");
        let engine = Engine::new(path, Arc::new(NotifyHub::new()), LocalCalendar::utc()).unwrap();

        engine.create_court(court("A")).await.unwrap();
        assert!(!compact_if_due(&engine, 3).await);
        assert_eq!(engine.wal_appends_since_compact().await, 1);

        engine.create_court(court("B")).await.unwrap();
        engine.create_court(court("C")).await.unwrap();
        assert!(compact_if_due(&engine, 3).await);
        assert_eq!(engine.wal_appends_since_compact().await, 0);
        assert_eq!(engine.list_courts().await.len(), 3);
    }
}
