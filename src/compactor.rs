use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::engine::Engine;

/// Background task that rewrites the WAL once enough events piled up
/// since the last rewrite.
pub async fn run_compactor(engine: Arc<Engine>, threshold: u64, every: Duration) {
    let mut interval = tokio::time::interval(every);
    loop {
        interval.tick().await;
        compact_if_due(&engine, threshold).await;
    }
}

/// One compactor pass. Returns the number of events written, if it ran.
pub async fn compact_if_due(engine: &Engine, threshold: u64) -> Option<usize> {
    let appended = engine.wal_appends_since_compact().await;
    if appended < threshold {
        return None;
    }
    match engine.compact_wal().await {
        Ok(written) => {
            info!("compacted WAL: {appended} appends down to {written} events");
            Some(written)
        }
        Err(e) => {
            tracing::error!("WAL compaction failed: {e}");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::*;
    use std::path::PathBuf;
    use ulid::Ulid;

    fn test_wal_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("parkspace_test_compactor");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = std::fs::remove_file(&path);
        path
    }

    fn draft(label: &str) -> ListingDraft {
        ListingDraft {
            label: label.into(),
            coordinate: Coordinate::new(18.5204, 73.8567),
            rate: "100/hour".into(),
            availability: String::new(),
        }
    }

    #[tokio::test]
    async fn compacts_only_past_threshold() {
        let path = test_wal_path("threshold.wal");
        let engine = Engine::new(path.clone()).unwrap();
        let lister = Actor::lister(Ulid::new());

        let listing = engine.create_listing(&lister, None, draft("Camp")).await.unwrap();
        for rate in ["110/hour", "120/hour", "130/hour"] {
            let patch = ListingPatch {
                rate: Some(rate.into()),
                ..Default::default()
            };
            engine.update_listing(&lister, listing.id, patch).await.unwrap();
        }

        assert_eq!(compact_if_due(&engine, 10).await, None);
        assert_eq!(engine.wal_appends_since_compact().await, 4);

        assert_eq!(compact_if_due(&engine, 4).await, Some(1));
        assert_eq!(engine.wal_appends_since_compact().await, 0);
        drop(engine);

        let reopened = Engine::new(path).unwrap();
        let restored = tokio_test::assert_ok!(reopened.get_listing(&lister, listing.id));
        assert_eq!(restored.rate, "130/hour");
    }
}
