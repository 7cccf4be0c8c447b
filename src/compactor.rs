use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error};

use crate::store::{Store, StoreError};

/// How often the compactor checks the log.
pub const COMPACT_CHECK_INTERVAL: Duration = Duration::from_secs(30);

/// Background task that rewrites the WAL once it has grown by `threshold`
/// appends since the last compaction.
pub async fn run_compactor(store: Arc<Store>, threshold: u64, every: Duration) {
    let mut interval = tokio::time::interval(every);
    loop {
        interval.tick().await;
        let store = store.clone();
        match tokio::task::spawn_blocking(move || compact_if_needed(&store, threshold)).await {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => error!("compaction failed: {e}"),
            Err(e) => error!("compaction task panicked: {e}"),
        }
    }
}

/// Compact when the log is past `threshold`. Returns whether it compacted.
pub fn compact_if_needed(store: &Store, threshold: u64) -> Result<bool, StoreError> {
    let appends = store.appends_since_compact()?;
    if appends < threshold {
        debug!("compaction skipped: {appends} appends < {threshold}");
        return Ok(false);
    }
    store.compact()?;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::*;
    use crate::store::BookingStore;
    use std::path::PathBuf;
    use ulid::Ulid;

    fn test_wal_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("clinic_booking_test_compactor");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = std::fs::remove_file(&path);
        path
    }

    fn churn(store: &Store, updates: usize) -> Order {
        store.register_clinic(1, SurgeryType::SystemOne).unwrap();
        store.register_patient(10, 1).unwrap();
        store.register_doctor(20).unwrap();
        let mut order = Order {
            id: Ulid::new(),
            span: Span::new(1_000, 2_000),
            patient_id: 10,
            doctor_id: 20,
            surgery_type: SurgeryType::SystemOne,
            is_deleted: false,
        };
        store.add_order(order.clone()).unwrap();
        for _ in 0..updates {
            order.is_deleted = !order.is_deleted;
            store.update_order(&order).unwrap();
        }
        order
    }

    #[test]
    fn below_threshold_is_left_alone() {
        let store = Store::open(&test_wal_path("below.wal")).unwrap();
        churn(&store, 2);
        assert_eq!(store.appends_since_compact().unwrap(), 6);

        assert!(!compact_if_needed(&store, 100).unwrap());
        assert_eq!(store.appends_since_compact().unwrap(), 6);
    }

    #[test]
    fn at_threshold_compacts() {
        let store = Store::open(&test_wal_path("at.wal")).unwrap();
        churn(&store, 2);

        assert!(compact_if_needed(&store, 6).unwrap());
        assert_eq!(store.appends_since_compact().unwrap(), 0);
    }

    #[tokio::test]
    async fn compactor_task_compacts_in_background() {
        let path = test_wal_path("background.wal");
        let store = Arc::new(Store::open(&path).unwrap());
        let order = churn(&store, 20);

        let handle = tokio::spawn(run_compactor(store.clone(), 10, Duration::from_millis(10)));
        for _ in 0..100 {
            if store.appends_since_compact().unwrap() == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        handle.abort();
        assert_eq!(store.appends_since_compact().unwrap(), 0);

        drop(store);
        let reopened = Store::open(&path).unwrap();
        assert_eq!(reopened.order(order.id), Some(order));
    }
}
