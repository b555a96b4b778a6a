use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::engine::Engine;
use crate::store::StoreError;

const CHECK_INTERVAL: Duration = Duration::from_secs(30);

/// Compact the WAL once more than `threshold` records have been appended
/// since the last compaction. Returns whether it compacted.
pub async fn compact_if_needed(engine: &Engine, threshold: u64) -> Result<bool, StoreError> {
    let appends = engine.wal_appends_since_compact().await;
    if appends < threshold {
        return Ok(false);
    }
    engine.compact_wal().await?;
    info!("compacted WAL after {appends} appends");
    Ok(true)
}

/// Background task: check the append counter on an interval.
pub async fn run_compactor(engine: Arc<Engine>, threshold: u64) {
    let mut interval = tokio::time::interval(CHECK_INTERVAL);
    loop {
        interval.tick().await;
        if let Err(e) = compact_if_needed(&engine, threshold).await {
            tracing::warn!("compaction failed: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{Document, FieldPath, Patch, Value};
    use crate::model::EventId;
    use std::path::PathBuf;

    fn test_wal_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("overlap_test_compactor");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = std::fs::remove_file(&path);
        path
    }

    async fn seed(engine: &Engine, writes: usize) -> EventId {
        let id = EventId::generate();
        let mut doc = Document::new();
        doc.insert("participants".into(), Value::empty_map());
        engine.set_document(&id, doc, false).await.unwrap();
        for i in 1..writes {
            engine
                .update_document(
                    &id,
                    vec![Patch::set(FieldPath::new(["participants", "bob", "r0_c0"]), i % 2 == 0)],
                )
                .await
                .unwrap();
        }
        id
    }

    #[tokio::test]
    async fn below_threshold_is_noop() {
        let engine = Engine::open(&test_wal_path("below.wal")).unwrap();
        seed(&engine, 3).await;

        assert!(!compact_if_needed(&engine, 10).await.unwrap());
        assert_eq!(engine.wal_appends_since_compact().await, 3);
    }

    #[tokio::test]
    async fn at_threshold_compacts() {
        let path = test_wal_path("at.wal");
        let engine = Engine::open(&path).unwrap();
        let id = seed(&engine, 10).await;

        assert!(compact_if_needed(&engine, 10).await.unwrap());
        assert_eq!(engine.wal_appends_since_compact().await, 0);
        assert_eq!(crate::wal::Wal::replay(&path).unwrap().len(), 1);
        assert!(engine.get_document(&id).await.is_some());
    }

    #[tokio::test]
    async fn background_task_compacts_on_first_tick() {
        let path = test_wal_path("background.wal");
        let engine = Arc::new(Engine::open(&path).unwrap());
        seed(&engine, 5).await;

        let task = tokio::spawn(run_compactor(engine.clone(), 5));
        tokio::time::timeout(Duration::from_secs(5), async {
            while engine.wal_appends_since_compact().await > 0 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("compactor did not run");
        task.abort();

        assert_eq!(crate::wal::Wal::replay(&path).unwrap().len(), 1);
    }
}
