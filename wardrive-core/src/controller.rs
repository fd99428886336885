//! Acquisition controller: the reactive state machine that turns position
//! fixes into scan requests and scan completions into record jobs.

use std::sync::mpsc;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use crate::error::{Result, WardriveError};
use crate::event::{Event, EventSender};
use crate::model::{Position, TrackingState};
use crate::ports::{Capability, CapabilityGate, PositionSource, PriorityHint, ScanSource};
use crate::recorder::{RecordJob, RecordReceipt};
use crate::status::AcquisitionStatus;

/// Where correlated pairs go to be persisted off the event thread.
pub trait RecordSink: Send {
    fn submit(&mut self, job: RecordJob);
}

impl RecordSink for mpsc::Sender<RecordJob> {
    fn submit(&mut self, job: RecordJob) {
        if self.send(job).is_err() {
            warn!("recorder has stopped; observation dropped");
        }
    }
}

#[derive(Debug, Clone)]
pub struct ControllerSettings {
    pub interval: Duration,
    pub priority: PriorityHint,
    pub required: Vec<Capability>,
}

/// What the event loop should do after an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Stop,
}

/// The action to resume once an outstanding capability request is granted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PendingGrant {
    Refresh,
    Activate,
}

pub struct AcquisitionController {
    position_source: Box<dyn PositionSource>,
    scan_source: Box<dyn ScanSource>,
    gate: Box<dyn CapabilityGate>,
    sink: Box<dyn RecordSink>,
    events: EventSender,
    settings: ControllerSettings,
    tracking: TrackingState,
    latest_position: Option<Position>,
    pending_grant: Option<PendingGrant>,
    status: Arc<Mutex<AcquisitionStatus>>,
}

impl AcquisitionController {
    pub fn new(
        position_source: Box<dyn PositionSource>,
        scan_source: Box<dyn ScanSource>,
        gate: Box<dyn CapabilityGate>,
        sink: Box<dyn RecordSink>,
        events: EventSender,
        settings: ControllerSettings,
        status: Arc<Mutex<AcquisitionStatus>>,
    ) -> Self {
        Self {
            position_source,
            scan_source,
            gate,
            sink,
            events,
            settings,
            tracking: TrackingState::Off,
            latest_position: None,
            pending_grant: None,
            status,
        }
    }

    pub fn tracking(&self) -> TrackingState {
        self.tracking
    }

    pub fn latest_position(&self) -> Option<&Position> {
        self.latest_position.as_ref()
    }

    pub fn awaiting_grant(&self) -> bool {
        self.pending_grant.is_some()
    }

    pub fn handle(&mut self, event: Event) -> Result<Flow> {
        match event {
            Event::Activate => self.activate()?,
            Event::Deactivate => self.deactivate(),
            Event::Refresh => self.refresh_once(),
            Event::PositionFix(p) => self.on_position_fix(p),
            Event::LastKnown(p) => self.on_last_known(p),
            Event::ScanComplete => {
                self.on_scan_complete();
            }
            Event::GrantResult { granted } => self.on_grant_result(granted)?,
            Event::Recorded(result) => self.on_recorded(result),
            Event::Shutdown => {
                self.deactivate();
                return Ok(Flow::Stop);
            }
        }
        Ok(Flow::Continue)
    }

    /// Turn tracking on, or ask for the missing capabilities and come back
    /// here once they are granted.
    pub fn activate(&mut self) -> Result<()> {
        if self.tracking.is_on() {
            debug!("activate: already tracking");
            return Ok(());
        }
        if !self.gate.check_granted(&self.settings.required) {
            self.request_grant(PendingGrant::Activate);
            return Ok(());
        }

        self.position_source.subscribe(
            self.settings.interval,
            self.settings.priority,
            self.events.clone(),
        )?;
        self.tracking = TrackingState::On;
        self.status.lock().tracking = TrackingState::On;
        info!(
            source = self.position_source.name(),
            interval_ms = self.settings.interval.as_millis() as u64,
            priority = ?self.settings.priority,
            "tracking on"
        );

        self.position_source.request_last_known(self.events.clone());
        Ok(())
    }

    /// Stop periodic fixes. In-flight scans and records still complete, and
    /// the latest position is kept.
    pub fn deactivate(&mut self) {
        if !self.tracking.is_on() {
            return;
        }
        self.position_source.unsubscribe();
        self.tracking = TrackingState::Off;
        {
            let mut status = self.status.lock();
            status.tracking = TrackingState::Off;
            status.position = None;
            status.label = None;
            status.last_batch.clear();
        }
        info!("tracking off");
    }

    /// One-shot last-known-position query, independent of the subscription.
    pub fn refresh_once(&mut self) {
        if !self.gate.check_granted(&self.settings.required) {
            self.request_grant(PendingGrant::Refresh);
            return;
        }
        self.position_source.request_last_known(self.events.clone());
    }

    pub fn on_position_fix(&mut self, p: Position) {
        debug!(lat = p.lat, lon = p.lon, acc = p.accuracy_m, "fix");
        self.status.lock().position = Some(p.clone());
        self.latest_position = Some(p);

        if self.tracking.is_on() {
            debug!(source = self.scan_source.name(), "requesting scan");
            self.scan_source.request_scan(self.events.clone());
        }
    }

    fn on_last_known(&mut self, p: Option<Position>) {
        match p {
            Some(p) => self.on_position_fix(p),
            None => debug!("no last known position yet"),
        }
    }

    /// Correlate the finished batch with the latest position. Returns the
    /// number of record jobs handed off.
    pub fn on_scan_complete(&mut self) -> usize {
        let sightings = self.scan_source.scan_results();
        let Some(position) = self.latest_position.clone() else {
            debug!(sightings = sightings.len(), "scan finished before any fix; batch dropped");
            return 0;
        };

        self.status.lock().last_batch = sightings.iter().map(|s| s.ssid.clone()).collect();
        debug!(sightings = sightings.len(), "scan batch correlated");

        let n = sightings.len();
        for sighting in sightings {
            self.sink.submit(RecordJob {
                position: position.clone(),
                sighting,
            });
        }
        n
    }

    pub fn on_grant_result(&mut self, granted: bool) -> Result<()> {
        let Some(pending) = self.pending_grant.take() else {
            debug!(granted, "grant result with no outstanding request");
            return Ok(());
        };

        let missing = self.gate.missing(&self.settings.required);
        if !granted || !missing.is_empty() {
            let missing = if missing.is_empty() {
                self.settings.required.clone()
            } else {
                missing
            };
            let err = WardriveError::CapabilityDenied { missing };
            error!("{err}; acquisition cannot continue");
            self.status.lock().last_error = Some(err.to_string());
            return Err(err);
        }

        info!(?pending, "capabilities granted");
        match pending {
            PendingGrant::Activate => self.activate(),
            PendingGrant::Refresh => {
                self.refresh_once();
                Ok(())
            }
        }
    }

    fn on_recorded(&mut self, result: Result<RecordReceipt>) {
        match result {
            Ok(receipt) => {
                info!(
                    stored = receipt.stored,
                    ssid = %receipt.sighting.ssid,
                    bssid = %receipt.sighting.bssid,
                    level = receipt.sighting.level_dbm,
                    "observation stored"
                );
                let mut status = self.status.lock();
                status.label = Some(receipt.label);
                status.last_error = None;
            }
            Err(err) => {
                warn!("{err}");
                self.status.lock().last_error = Some(err.to_string());
            }
        }
    }

    fn request_grant(&mut self, pending: PendingGrant) {
        match self.pending_grant {
            Some(current) => {
                // Activation outranks a plain refresh while a request is open.
                if pending == PendingGrant::Activate {
                    self.pending_grant = Some(PendingGrant::Activate);
                }
                debug!(?current, "capability request already outstanding");
            }
            None => {
                let missing = self.gate.missing(&self.settings.required);
                info!(?missing, "requesting capabilities");
                self.pending_grant = Some(pending);
                self.gate
                    .request_grant(&self.settings.required, self.events.clone());
            }
        }
    }
}
