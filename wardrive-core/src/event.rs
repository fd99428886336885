use std::sync::mpsc;

use crate::error::WardriveError;
use crate::model::Position;
use crate::recorder::RecordReceipt;

/// Everything the acquisition controller reacts to, delivered one at a time.
#[derive(Debug)]
pub enum Event {
    Activate,
    Deactivate,
    Refresh,
    /// Periodic fix from an active subscription.
    PositionFix(Position),
    /// Answer to a one-shot last-known-position query.
    LastKnown(Option<Position>),
    /// A scan finished; the scan source holds the results.
    ScanComplete,
    GrantResult { granted: bool },
    Recorded(Result<RecordReceipt, WardriveError>),
    Shutdown,
}

pub type EventSender = mpsc::Sender<Event>;
pub type EventReceiver = mpsc::Receiver<Event>;

pub fn channel() -> (EventSender, EventReceiver) {
    mpsc::channel()
}
