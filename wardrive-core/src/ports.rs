//! Boundaries to the collaborators the pipeline drives but does not own:
//! position sensing, wireless scanning, address lookup, persistence and
//! capability checks.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{LabelError, Result, StoreError};
use crate::event::EventSender;
use crate::model::{NetworkSighting, Observation, StoredRow};

/// Accuracy/power tradeoff requested from a position source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PriorityHint {
    #[default]
    HighAccuracy,
    BalancedPower,
}

pub trait PositionSource: Send {
    fn name(&self) -> &'static str;

    /// Start emitting `Event::PositionFix` every `interval` until unsubscribed.
    fn subscribe(
        &mut self,
        interval: Duration,
        priority: PriorityHint,
        events: EventSender,
    ) -> Result<()>;

    fn unsubscribe(&mut self);

    /// Post exactly one `Event::LastKnown`, without blocking the caller.
    fn request_last_known(&mut self, events: EventSender);
}

pub trait ScanSource: Send {
    fn name(&self) -> &'static str;

    /// Fire and forget. Completion is signalled with `Event::ScanComplete`.
    fn request_scan(&mut self, events: EventSender);

    /// Authoritative results of the most recently completed scan.
    fn scan_results(&self) -> Vec<NetworkSighting>;
}

pub trait GeoLabeler: Send + Sync {
    fn resolve(&self, lat: f64, lon: f64) -> std::result::Result<String, LabelError>;
}

/// Append-only observation table. Each append is atomic; `clear_all` either
/// removes every row or leaves the store untouched.
pub trait ObservationStore: Send + Sync {
    fn append(&self, obs: &Observation) -> std::result::Result<(), StoreError>;

    fn count_rows(&self) -> std::result::Result<u64, StoreError>;

    fn clear_all(&self) -> std::result::Result<(), StoreError>;

    /// Up to `limit` most recent rows, oldest first.
    fn list(&self, limit: usize) -> std::result::Result<Vec<StoredRow>, StoreError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    PositionAccess,
    WifiQuery,
    /// Only needed when scans are actively triggered.
    WifiControl,
}

impl Capability {
    pub fn required(active_scan: bool) -> Vec<Capability> {
        let mut caps = vec![Capability::PositionAccess, Capability::WifiQuery];
        if active_scan {
            caps.push(Capability::WifiControl);
        }
        caps
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Capability::PositionAccess => write!(f, "position access"),
            Capability::WifiQuery => write!(f, "wireless query"),
            Capability::WifiControl => write!(f, "wireless control"),
        }
    }
}

pub trait CapabilityGate: Send {
    fn is_granted(&self, cap: Capability) -> bool;

    /// Post exactly one `Event::GrantResult` once the request is settled.
    fn request_grant(&mut self, caps: &[Capability], events: EventSender);

    fn check_granted(&self, caps: &[Capability]) -> bool {
        caps.iter().all(|c| self.is_granted(*c))
    }

    fn missing(&self, caps: &[Capability]) -> Vec<Capability> {
        caps.iter().copied().filter(|c| !self.is_granted(*c)).collect()
    }
}

/// Gate for environments where nothing needs to be granted.
#[derive(Debug, Default, Clone, Copy)]
pub struct AlwaysGranted;

impl CapabilityGate for AlwaysGranted {
    fn is_granted(&self, _cap: Capability) -> bool {
        true
    }

    fn request_grant(&mut self, _caps: &[Capability], events: EventSender) {
        let _ = events.send(crate::event::Event::GrantResult { granted: true });
    }
}

/// Poll interval used by adapters that wait on sockets or child processes.
pub const ADAPTER_POLL: Duration = Duration::from_millis(200);
