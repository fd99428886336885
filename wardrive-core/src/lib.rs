use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

pub mod config;
pub mod controller;
pub mod error;
pub mod event;
pub mod labeler;
pub mod lock;
pub mod model;
pub mod ports;
pub mod recorder;
pub mod runtime;
pub mod status;
pub mod store;

pub use config::{expand_tilde, Config, PositionSourceConfig, ScanSourceConfig, StoreKind};
pub use controller::{AcquisitionController, ControllerSettings, Flow, RecordSink};
pub use error::{ConfigError, LabelError, Result, StoreError, WardriveError};
pub use event::{Event, EventReceiver, EventSender};
pub use labeler::{haversine_km, GazetteerLabeler, NullLabeler, Place};
pub use lock::StoreLock;
pub use model::{
    NetworkSighting, Observation, Position, StoredRow, TrackingState, ADDRESS_UNAVAILABLE,
};
pub use ports::{
    AlwaysGranted, Capability, CapabilityGate, GeoLabeler, ObservationStore, PositionSource,
    PriorityHint, ScanSource,
};
pub use recorder::{ObservationRecorder, RecordJob, RecordReceipt};
pub use runtime::{Pipeline, PipelineParts};
pub use status::AcquisitionStatus;
pub use store::{JsonlStore, SqliteStore};

pub fn now_unix_ms() -> i64 {
    let dur = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    (dur.as_secs() as i64) * 1000 + (dur.subsec_millis() as i64)
}

/// Open the store selected by the configuration.
pub fn open_store(cfg: &Config) -> std::result::Result<Arc<dyn ObservationStore>, StoreError> {
    let path = cfg.store_path();
    let store: Arc<dyn ObservationStore> = match cfg.store_kind {
        StoreKind::Sqlite => Arc::new(SqliteStore::open(path)?),
        StoreKind::Jsonl => Arc::new(JsonlStore::open(path)?),
    };
    Ok(store)
}

/// The configured labeler, or one that always falls back to the placeholder.
pub fn open_labeler(cfg: &Config) -> std::result::Result<Arc<dyn GeoLabeler>, LabelError> {
    let labeler: Arc<dyn GeoLabeler> = match cfg.gazetteer_path() {
        Some(path) => Arc::new(GazetteerLabeler::load(path, cfg.gazetteer_radius_m)?),
        None => Arc::new(NullLabeler),
    };
    Ok(labeler)
}
