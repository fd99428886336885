use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::error::{LabelError, Result, WardriveError};
use crate::model::{NetworkSighting, Observation, Position, ADDRESS_UNAVAILABLE};
use crate::ports::{GeoLabeler, ObservationStore};

/// A correlated pair waiting to be persisted. The position is frozen when the
/// job is created.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordJob {
    pub position: Position,
    pub sighting: NetworkSighting,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RecordReceipt {
    /// Stored count after this append.
    pub stored: u64,
    pub label: String,
    pub sighting: NetworkSighting,
}

/// Turns correlated pairs into stored rows and keeps the stored-row count.
///
/// The count lock is held across every append and clear, so the count always
/// mirrors the store even when several callers record concurrently.
pub struct ObservationRecorder {
    store: Arc<dyn ObservationStore>,
    labeler: Arc<dyn GeoLabeler>,
    count: Mutex<u64>,
    last_label: Mutex<Option<(f64, f64, String)>>,
}

impl ObservationRecorder {
    /// Seeds the count from the store's real row count.
    pub fn open(store: Arc<dyn ObservationStore>, labeler: Arc<dyn GeoLabeler>) -> Result<Self> {
        let rows = store.count_rows()?;
        debug!(rows, "observation store opened");
        Ok(Self {
            store,
            labeler,
            count: Mutex::new(rows),
            last_label: Mutex::new(None),
        })
    }

    pub fn record(&self, position: &Position, sighting: &NetworkSighting) -> Result<RecordReceipt> {
        let label = self.resolve_label(position);
        let obs = Observation::new(position.clone(), sighting.clone(), label);

        let mut count = self.count.lock();
        self.store.append(&obs)?;
        *count += 1;

        Ok(RecordReceipt {
            stored: *count,
            label: obs.label,
            sighting: obs.sighting,
        })
    }

    pub fn record_job(&self, job: &RecordJob) -> Result<RecordReceipt> {
        self.record(&job.position, &job.sighting)
    }

    pub fn clear(&self) -> Result<()> {
        let mut count = self.count.lock();
        self.store.clear_all()?;
        info!(removed = *count, "observation store cleared");
        *count = 0;
        Ok(())
    }

    pub fn current_count(&self) -> u64 {
        *self.count.lock()
    }

    /// Best-effort address for `position`; never fails.
    ///
    /// A scan batch shares one position, so the last answer is reused while
    /// the coordinates stay the same.
    pub fn resolve_label(&self, position: &Position) -> String {
        let mut last = self.last_label.lock();
        if let Some((lat, lon, label)) = last.as_ref() {
            if *lat == position.lat && *lon == position.lon {
                return label.clone();
            }
        }
        let label = match lookup(self.labeler.as_ref(), position) {
            Ok(label) => label,
            Err(err) => {
                warn!(lat = position.lat, lon = position.lon, "{err}");
                ADDRESS_UNAVAILABLE.to_string()
            }
        };
        *last = Some((position.lat, position.lon, label.clone()));
        label
    }
}

/// A usable address for `position`, or why there is none.
fn lookup(labeler: &dyn GeoLabeler, position: &Position) -> Result<String> {
    let label = labeler
        .resolve(position.lat, position.lon)
        .map_err(WardriveError::LabelResolutionFailed)?;
    if label.trim().is_empty() {
        return Err(WardriveError::LabelResolutionFailed(LabelError::NotFound));
    }
    Ok(label)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreError;
    use crate::labeler::NullLabeler;
    use crate::model::StoredRow;
    use crate::store::SqliteStore;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    struct FixedLabeler(&'static str, AtomicUsize);

    impl GeoLabeler for FixedLabeler {
        fn resolve(&self, _lat: f64, _lon: f64) -> std::result::Result<String, LabelError> {
            self.1.fetch_add(1, Ordering::SeqCst);
            Ok(self.0.to_string())
        }
    }

    /// Store that can be switched into a failing state.
    #[derive(Default)]
    struct FlakyStore {
        rows: Mutex<Vec<StoredRow>>,
        failing: AtomicBool,
    }

    impl ObservationStore for FlakyStore {
        fn append(&self, obs: &Observation) -> std::result::Result<(), StoreError> {
            if self.failing.load(Ordering::SeqCst) {
                return Err(StoreError::Unavailable("disk gone".into()));
            }
            self.rows.lock().push(StoredRow::from_observation(obs)?);
            Ok(())
        }

        fn count_rows(&self) -> std::result::Result<u64, StoreError> {
            Ok(self.rows.lock().len() as u64)
        }

        fn clear_all(&self) -> std::result::Result<(), StoreError> {
            if self.failing.load(Ordering::SeqCst) {
                return Err(StoreError::Unavailable("disk gone".into()));
            }
            self.rows.lock().clear();
            Ok(())
        }

        fn list(&self, limit: usize) -> std::result::Result<Vec<StoredRow>, StoreError> {
            let rows = self.rows.lock();
            let skip = rows.len().saturating_sub(limit);
            Ok(rows[skip..].to_vec())
        }
    }

    fn fix() -> Position {
        Position::new(47.0, 8.0, 5.0)
    }

    fn net_a() -> NetworkSighting {
        NetworkSighting::new("NetA", "AA:BB", 2412, -50)
    }

    #[test]
    fn count_starts_from_existing_rows() {
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        let obs = Observation::new(fix(), net_a(), "x");
        store.append(&obs).unwrap();
        store.append(&obs).unwrap();

        let recorder = ObservationRecorder::open(store, Arc::new(NullLabeler)).unwrap();
        assert_eq!(recorder.current_count(), 2);
    }

    #[test]
    fn record_increments_count_by_one() {
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        let recorder = ObservationRecorder::open(store.clone(), Arc::new(NullLabeler)).unwrap();

        let receipt = recorder.record(&fix(), &net_a()).unwrap();
        assert_eq!(receipt.stored, 1);
        assert_eq!(recorder.current_count(), 1);
        assert_eq!(store.count_rows().unwrap(), 1);
    }

    #[test]
    fn label_failure_stores_placeholder() {
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        let recorder = ObservationRecorder::open(store.clone(), Arc::new(NullLabeler)).unwrap();

        let receipt = recorder.record(&fix(), &net_a()).unwrap();
        assert_eq!(receipt.label, ADDRESS_UNAVAILABLE);
        assert_eq!(recorder.current_count(), 1);

        let rows = store.list(10).unwrap();
        let loc: serde_json::Value = serde_json::from_str(&rows[0].location).unwrap();
        assert_eq!(loc["add"], ADDRESS_UNAVAILABLE);
    }

    #[test]
    fn lookup_failures_surface_as_label_resolution_errors() {
        let p = fix();
        assert!(matches!(
            lookup(&NullLabeler, &p),
            Err(WardriveError::LabelResolutionFailed(LabelError::NotFound))
        ));
        let blank = FixedLabeler("", AtomicUsize::new(0));
        assert!(matches!(
            lookup(&blank, &p),
            Err(WardriveError::LabelResolutionFailed(_))
        ));
        let named = FixedLabeler("Limmatquai", AtomicUsize::new(0));
        assert_eq!(lookup(&named, &p).unwrap(), "Limmatquai");
    }

    #[test]
    fn empty_label_is_replaced() {
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        let recorder =
            ObservationRecorder::open(store, Arc::new(FixedLabeler("  ", AtomicUsize::new(0))))
                .unwrap();
        assert_eq!(recorder.record(&fix(), &net_a()).unwrap().label, ADDRESS_UNAVAILABLE);
    }

    #[test]
    fn same_position_resolves_label_once() {
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        let labeler = Arc::new(FixedLabeler("Bahnhofplatz", AtomicUsize::new(0)));
        let recorder = ObservationRecorder::open(store, labeler.clone()).unwrap();

        let p = fix();
        recorder.record(&p, &net_a()).unwrap();
        recorder
            .record(&p, &NetworkSighting::new("NetB", "CC:DD", 5180, -70))
            .unwrap();
        assert_eq!(labeler.1.load(Ordering::SeqCst), 1);

        recorder.record(&Position::new(46.0, 7.0, 5.0), &net_a()).unwrap();
        assert_eq!(labeler.1.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn failed_append_leaves_count_unchanged() {
        let store = Arc::new(FlakyStore::default());
        let recorder = ObservationRecorder::open(store.clone(), Arc::new(NullLabeler)).unwrap();
        recorder.record(&fix(), &net_a()).unwrap();

        store.failing.store(true, Ordering::SeqCst);
        let err = recorder.record(&fix(), &net_a()).unwrap_err();
        assert!(matches!(err, WardriveError::StoreWriteFailed(_)));
        assert_eq!(recorder.current_count(), 1);
    }

    #[test]
    fn clear_resets_count_regardless_of_prior_value() {
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        let recorder = ObservationRecorder::open(store.clone(), Arc::new(NullLabeler)).unwrap();
        for _ in 0..5 {
            recorder.record(&fix(), &net_a()).unwrap();
        }
        recorder.clear().unwrap();
        assert_eq!(recorder.current_count(), 0);
        assert_eq!(store.count_rows().unwrap(), 0);
    }

    #[test]
    fn failed_clear_keeps_rows_and_count() {
        let store = Arc::new(FlakyStore::default());
        let recorder = ObservationRecorder::open(store.clone(), Arc::new(NullLabeler)).unwrap();
        recorder.record(&fix(), &net_a()).unwrap();

        store.failing.store(true, Ordering::SeqCst);
        assert!(recorder.clear().is_err());
        assert_eq!(recorder.current_count(), 1);
        assert_eq!(store.count_rows().unwrap(), 1);
    }

    #[test]
    fn concurrent_records_do_not_lose_updates() {
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        let recorder = Arc::new(ObservationRecorder::open(store.clone(), Arc::new(NullLabeler)).unwrap());

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let recorder = Arc::clone(&recorder);
                std::thread::spawn(move || {
                    for _ in 0..25 {
                        recorder.record(&fix(), &net_a()).unwrap();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(recorder.current_count(), 100);
        assert_eq!(store.count_rows().unwrap(), 100);
    }
}
