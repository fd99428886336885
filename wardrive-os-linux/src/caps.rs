use std::collections::HashMap;
use std::net::SocketAddr;
use std::process::{Command, Stdio};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, info};
use wardrive_core::{Capability, CapabilityGate, Event, EventSender};

use crate::gpsd;

const PROBE_TIMEOUT: Duration = Duration::from_millis(250);
/// CAP_NET_ADMIN, needed to trigger scans.
const CAP_NET_ADMIN: u32 = 12;
const ALL: [Capability; 3] = [
    Capability::PositionAccess,
    Capability::WifiQuery,
    Capability::WifiControl,
];

/// Capability checks for a headless Linux host. Nothing can be granted
/// interactively; a grant request re-evaluates the host state.
///
/// Host checks connect to gpsd and spawn `iw`, so they run once at
/// construction and again on each grant request, off the caller's thread.
/// `is_granted` only reads the last result.
#[derive(Debug, Clone)]
pub struct LinuxCapabilities {
    gpsd_addr: Option<SocketAddr>,
    granted: Arc<Mutex<HashMap<Capability, bool>>>,
}

impl LinuxCapabilities {
    /// `gpsd_addr` is `None` when positions come from somewhere that needs no
    /// probing.
    pub fn new(gpsd_addr: Option<SocketAddr>) -> Self {
        let gate = Self {
            gpsd_addr,
            granted: Arc::new(Mutex::new(HashMap::new())),
        };
        gate.recheck(&ALL);
        gate
    }

    /// Re-evaluates `caps` against the host and returns the ones missing.
    fn recheck(&self, caps: &[Capability]) -> Vec<Capability> {
        let results: Vec<(Capability, bool)> =
            caps.iter().map(|cap| (*cap, self.check(*cap))).collect();
        let mut granted = self.granted.lock();
        granted.extend(results.iter().copied());
        results
            .into_iter()
            .filter(|(_, ok)| !ok)
            .map(|(cap, _)| cap)
            .collect()
    }

    fn check(&self, cap: Capability) -> bool {
        let granted = match cap {
            Capability::PositionAccess => match self.gpsd_addr {
                Some(addr) => gpsd::connect(addr, PROBE_TIMEOUT).is_ok(),
                None => true,
            },
            Capability::WifiQuery => has_wireless_interface() && iw_runnable(),
            Capability::WifiControl => has_net_admin(),
        };
        debug!(capability = %cap, granted, "capability check");
        granted
    }
}

impl CapabilityGate for LinuxCapabilities {
    fn is_granted(&self, cap: Capability) -> bool {
        self.granted.lock().get(&cap).copied().unwrap_or(false)
    }

    fn request_grant(&mut self, caps: &[Capability], events: EventSender) {
        let gate = self.clone();
        let caps = caps.to_vec();
        thread::spawn(move || {
            let missing = gate.recheck(&caps);
            for cap in &missing {
                info!("{cap} unavailable; {}", remedy(*cap));
            }
            let _ = events.send(Event::GrantResult {
                granted: missing.is_empty(),
            });
        });
    }
}

fn remedy(cap: Capability) -> &'static str {
    match cap {
        Capability::PositionAccess => "is gpsd running and reachable?",
        Capability::WifiQuery => "install iw and check for a wireless interface",
        Capability::WifiControl => "run as root, grant CAP_NET_ADMIN, or use cached scans",
    }
}

fn has_wireless_interface() -> bool {
    crate::wireless_interfaces()
        .map(|ifaces| !ifaces.is_empty())
        .unwrap_or(false)
}

fn iw_runnable() -> bool {
    Command::new("iw")
        .arg("--version")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}

fn has_net_admin() -> bool {
    if unsafe { libc::geteuid() } == 0 {
        return true;
    }
    std::fs::read_to_string("/proc/self/status")
        .ok()
        .and_then(|status| effective_caps(&status))
        .map(|caps| caps & (1u64 << CAP_NET_ADMIN) != 0)
        .unwrap_or(false)
}

fn effective_caps(status: &str) -> Option<u64> {
    let hex = status.lines().find_map(|l| l.strip_prefix("CapEff:"))?;
    u64::from_str_radix(hex.trim(), 16).ok()
}
