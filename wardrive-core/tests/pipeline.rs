use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use wardrive_core::{
    AlwaysGranted, Capability, CapabilityGate, ControllerSettings, Event, EventSender,
    NetworkSighting, NullLabeler, ObservationRecorder, ObservationStore, Pipeline, PipelineParts,
    Position, PositionSource, PriorityHint, Result, ScanSource, SqliteStore, TrackingState,
    WardriveError, ADDRESS_UNAVAILABLE,
};

const WAIT: Duration = Duration::from_secs(5);

/// Position source whose subscription sender is exposed to the test, which
/// plays the part of the periodic ticker.
#[derive(Clone, Default)]
struct ManualPosition {
    sender: Arc<Mutex<Option<EventSender>>>,
}

impl ManualPosition {
    fn emit(&self, p: Position) {
        let sender = self.sender.lock().clone().expect("not subscribed");
        sender.send(Event::PositionFix(p)).unwrap();
    }

    fn send(&self, ev: Event) {
        let sender = self.sender.lock().clone().expect("not subscribed");
        sender.send(ev).unwrap();
    }

    fn subscribed(&self) -> bool {
        self.sender.lock().is_some()
    }
}

impl PositionSource for ManualPosition {
    fn name(&self) -> &'static str {
        "manual"
    }

    fn subscribe(&mut self, _: Duration, _: PriorityHint, events: EventSender) -> Result<()> {
        *self.sender.lock() = Some(events);
        Ok(())
    }

    fn unsubscribe(&mut self) {
        *self.sender.lock() = None;
    }

    fn request_last_known(&mut self, events: EventSender) {
        let _ = events.send(Event::LastKnown(None));
    }
}

/// Completes every scan immediately on a worker thread.
#[derive(Clone)]
struct InstantScan {
    results: Arc<Mutex<Vec<NetworkSighting>>>,
}

impl ScanSource for InstantScan {
    fn name(&self) -> &'static str {
        "instant"
    }

    fn request_scan(&mut self, events: EventSender) {
        thread::spawn(move || {
            let _ = events.send(Event::ScanComplete);
        });
    }

    fn scan_results(&self) -> Vec<NetworkSighting> {
        self.results.lock().clone()
    }
}

struct DenyingGate;

impl CapabilityGate for DenyingGate {
    fn is_granted(&self, _cap: Capability) -> bool {
        false
    }

    fn request_grant(&mut self, _caps: &[Capability], events: EventSender) {
        let _ = events.send(Event::GrantResult { granted: false });
    }
}

struct Rig {
    pipeline: Pipeline,
    position: ManualPosition,
    store: Arc<SqliteStore>,
}

fn rig_with_gate(gate: Box<dyn CapabilityGate>) -> Rig {
    let store = Arc::new(SqliteStore::in_memory().unwrap());
    let recorder = Arc::new(ObservationRecorder::open(store.clone(), Arc::new(NullLabeler)).unwrap());
    let position = ManualPosition::default();
    let scan = InstantScan {
        results: Arc::new(Mutex::new(vec![
            NetworkSighting::new("NetA", "AA:BB", 2412, -50),
            NetworkSighting::new("NetB", "CC:DD", 5180, -70),
        ])),
    };
    let pipeline = Pipeline::spawn(PipelineParts {
        position_source: Box::new(position.clone()),
        scan_source: Box::new(scan),
        gate,
        recorder,
        settings: ControllerSettings {
            interval: Duration::from_millis(30_000),
            priority: PriorityHint::HighAccuracy,
            required: Capability::required(true),
        },
    });
    Rig {
        pipeline,
        position,
        store,
    }
}

fn rig() -> Rig {
    rig_with_gate(Box::new(AlwaysGranted))
}

fn wait_until(mut cond: impl FnMut() -> bool) {
    let deadline = Instant::now() + WAIT;
    while !cond() {
        assert!(Instant::now() < deadline, "condition not reached in time");
        thread::sleep(Duration::from_millis(5));
    }
}

#[test]
fn fix_then_scan_persists_one_row_per_network() {
    let rig = rig();
    rig.pipeline.activate().unwrap();
    wait_until(|| rig.position.subscribed());

    let before = rig.pipeline.stored_count();
    rig.position.emit(Position::new(47.0, 8.0, 5.0));
    wait_until(|| rig.pipeline.stored_count() == before + 2);

    let rows = rig.store.list(10).unwrap();
    assert_eq!(rows.len(), 2);
    for row in &rows {
        let loc: serde_json::Value = serde_json::from_str(&row.location).unwrap();
        assert_eq!(loc["lat"], 47.0);
        assert_eq!(loc["lon"], 8.0);
        assert_eq!(loc["add"], ADDRESS_UNAVAILABLE);
    }
    assert!(rows[0].wifi.contains("NetA"));
    assert!(rows[1].wifi.contains("NetB"));

    rig.pipeline.shutdown().unwrap();
}

#[test]
fn scan_without_any_fix_stores_nothing() {
    let rig = rig();
    rig.pipeline.activate().unwrap();
    wait_until(|| rig.position.subscribed());

    rig.position.send(Event::ScanComplete);
    rig.pipeline.deactivate().unwrap();
    wait_until(|| rig.pipeline.status().tracking == TrackingState::Off && !rig.position.subscribed());

    assert_eq!(rig.pipeline.stored_count(), 0);
    assert_eq!(rig.store.count_rows().unwrap(), 0);
    rig.pipeline.shutdown().unwrap();
}

#[test]
fn reactivation_resumes_recording() {
    let rig = rig();
    rig.pipeline.activate().unwrap();
    wait_until(|| rig.position.subscribed());
    rig.pipeline.deactivate().unwrap();
    wait_until(|| !rig.position.subscribed());

    rig.pipeline.activate().unwrap();
    wait_until(|| rig.position.subscribed());
    rig.position.emit(Position::new(46.9, 7.4, 3.0));
    wait_until(|| rig.pipeline.stored_count() == 2);

    rig.pipeline.shutdown().unwrap();
}

#[test]
fn clear_resets_count_while_running() {
    let rig = rig();
    rig.pipeline.activate().unwrap();
    wait_until(|| rig.position.subscribed());
    rig.position.emit(Position::new(47.0, 8.0, 5.0));
    wait_until(|| rig.pipeline.stored_count() == 2);

    rig.pipeline.clear().unwrap();
    assert_eq!(rig.pipeline.stored_count(), 0);
    assert_eq!(rig.pipeline.status().stored, 0);
    assert_eq!(rig.store.count_rows().unwrap(), 0);

    rig.pipeline.shutdown().unwrap();
}

#[test]
fn denied_capabilities_end_the_flow() {
    let rig = rig_with_gate(Box::new(DenyingGate));
    rig.pipeline.activate().unwrap();

    match rig.pipeline.join() {
        Err(WardriveError::CapabilityDenied { missing }) => {
            assert_eq!(missing, Capability::required(true));
        }
        other => panic!("expected denial, got {other:?}"),
    }
    assert_eq!(rig.store.count_rows().unwrap(), 0);
}

#[test]
fn commands_after_shutdown_report_closed_pipeline() {
    let rig = rig_with_gate(Box::new(DenyingGate));
    rig.pipeline.refresh().unwrap();
    wait_until(|| !rig.pipeline.is_running());
    assert!(matches!(rig.pipeline.activate(), Err(WardriveError::PipelineClosed)));
}
