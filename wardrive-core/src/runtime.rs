//! Threaded runtime: one thread owns the controller and consumes events one
//! at a time, a second thread performs the blocking label and store work.

use std::sync::mpsc;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use parking_lot::Mutex;
use tracing::{debug, error, warn};

use crate::controller::{AcquisitionController, ControllerSettings, Flow};
use crate::error::{Result, WardriveError};
use crate::event::{self, Event, EventReceiver, EventSender};
use crate::ports::{CapabilityGate, PositionSource, ScanSource};
use crate::recorder::{ObservationRecorder, RecordJob};
use crate::status::AcquisitionStatus;

pub struct PipelineParts {
    pub position_source: Box<dyn PositionSource>,
    pub scan_source: Box<dyn ScanSource>,
    pub gate: Box<dyn CapabilityGate>,
    pub recorder: Arc<ObservationRecorder>,
    pub settings: ControllerSettings,
}

pub struct Pipeline {
    events: EventSender,
    recorder: Arc<ObservationRecorder>,
    status: Arc<Mutex<AcquisitionStatus>>,
    controller_handle: Option<JoinHandle<Result<()>>>,
    recorder_handle: Option<JoinHandle<()>>,
}

impl Pipeline {
    pub fn spawn(parts: PipelineParts) -> Self {
        let (events_tx, events_rx) = event::channel();
        let (jobs_tx, jobs_rx) = mpsc::channel::<RecordJob>();
        let status = Arc::new(Mutex::new(AcquisitionStatus::with_stored(
            parts.recorder.current_count(),
        )));

        let controller = AcquisitionController::new(
            parts.position_source,
            parts.scan_source,
            parts.gate,
            Box::new(jobs_tx),
            events_tx.clone(),
            parts.settings,
            Arc::clone(&status),
        );

        let recorder = Arc::clone(&parts.recorder);
        let recorder_events = events_tx.clone();
        let recorder_handle = thread::spawn(move || recorder_thread(recorder, jobs_rx, recorder_events));
        let controller_handle = thread::spawn(move || controller_thread(controller, events_rx));

        Self {
            events: events_tx,
            recorder: parts.recorder,
            status,
            controller_handle: Some(controller_handle),
            recorder_handle: Some(recorder_handle),
        }
    }

    pub fn activate(&self) -> Result<()> {
        self.send(Event::Activate)
    }

    pub fn deactivate(&self) -> Result<()> {
        self.send(Event::Deactivate)
    }

    pub fn refresh(&self) -> Result<()> {
        self.send(Event::Refresh)
    }

    /// Remove every stored observation. Runs on the caller's thread.
    pub fn clear(&self) -> Result<()> {
        self.recorder.clear()
    }

    pub fn stored_count(&self) -> u64 {
        self.recorder.current_count()
    }

    pub fn status(&self) -> AcquisitionStatus {
        let mut status = self.status.lock().clone();
        status.stored = self.recorder.current_count();
        status
    }

    pub fn is_running(&self) -> bool {
        self.controller_handle
            .as_ref()
            .map(|h| !h.is_finished())
            .unwrap_or(false)
    }

    /// Ask the controller to stop, then wait for both threads.
    pub fn shutdown(mut self) -> Result<()> {
        let _ = self.events.send(Event::Shutdown);
        self.wait()
    }

    /// Wait for the controller to stop on its own, e.g. after a capability
    /// denial ends the acquisition flow.
    pub fn join(mut self) -> Result<()> {
        self.wait()
    }

    fn wait(&mut self) -> Result<()> {
        let outcome = match self.controller_handle.take() {
            Some(handle) => handle.join().unwrap_or_else(|_| {
                Err(WardriveError::Source {
                    source_name: "controller thread",
                    reason: "panicked".into(),
                })
            }),
            None => Ok(()),
        };
        // The job sender lives in the controller, so the recorder drains and
        // exits once the controller is gone.
        if let Some(handle) = self.recorder_handle.take() {
            if handle.join().is_err() {
                error!("recorder thread panicked");
            }
        }
        outcome
    }

    fn send(&self, event: Event) -> Result<()> {
        self.events
            .send(event)
            .map_err(|_| WardriveError::PipelineClosed)
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        if self.controller_handle.is_some() {
            let _ = self.events.send(Event::Shutdown);
        }
    }
}

fn controller_thread(mut controller: AcquisitionController, events: EventReceiver) -> Result<()> {
    for event in events {
        match controller.handle(event) {
            Ok(Flow::Continue) => {}
            Ok(Flow::Stop) => break,
            Err(err @ WardriveError::CapabilityDenied { .. }) => {
                controller.deactivate();
                return Err(err);
            }
            Err(err) => warn!("{err}"),
        }
    }
    debug!("controller stopped");
    Ok(())
}

fn recorder_thread(
    recorder: Arc<ObservationRecorder>,
    jobs: mpsc::Receiver<RecordJob>,
    events: EventSender,
) {
    for job in jobs {
        let result = recorder.record_job(&job);
        if let Err(mpsc::SendError(Event::Recorded(Err(err)))) = events.send(Event::Recorded(result)) {
            // Nobody is listening any more; still report the failure.
            warn!("{err}");
        }
    }
    debug!("recorder stopped");
}
