//! Wireless scanning by shelling out to `iw dev <iface> scan`.

use std::process::Command;
use std::sync::Arc;
use std::thread;

use parking_lot::Mutex;
use tracing::{debug, warn};
use wardrive_core::{Event, EventSender, NetworkSighting, ScanSource};

/// Level reported for a BSS whose stanza carries no signal line.
const MISSING_SIGNAL_DBM: i32 = -100;

pub struct IwScanner {
    interface: String,
    use_dump: bool,
    results: Arc<Mutex<Vec<NetworkSighting>>>,
}

impl IwScanner {
    pub fn new(interface: impl Into<String>, use_dump: bool) -> Self {
        Self {
            interface: interface.into(),
            use_dump,
            results: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn interface(&self) -> &str {
        &self.interface
    }

    fn args(&self) -> Vec<String> {
        let mut args = vec!["dev".to_string(), self.interface.clone(), "scan".to_string()];
        if self.use_dump {
            args.push("dump".to_string());
        }
        args
    }
}

impl ScanSource for IwScanner {
    fn name(&self) -> &'static str {
        "iw"
    }

    fn request_scan(&mut self, events: EventSender) {
        let args = self.args();
        let results = Arc::clone(&self.results);
        thread::spawn(move || match run_iw(&args) {
            Ok(sightings) => {
                debug!(count = sightings.len(), "scan finished");
                *results.lock() = sightings;
                let _ = events.send(Event::ScanComplete);
            }
            // Previous results stay authoritative; no completion is signalled.
            Err(reason) => warn!("iw {} failed: {reason}", args.join(" ")),
        });
    }

    fn scan_results(&self) -> Vec<NetworkSighting> {
        self.results.lock().clone()
    }
}

fn run_iw(args: &[String]) -> Result<Vec<NetworkSighting>, String> {
    let output = Command::new("iw")
        .args(args)
        .output()
        .map_err(|e| format!("failed to spawn: {e}"))?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(format!("exited with {}: {}", output.status, stderr.trim()));
    }
    Ok(parse_iw_scan_output(&String::from_utf8_lossy(&output.stdout)))
}

#[derive(Default)]
struct Stanza {
    bssid: String,
    ssid: Option<String>,
    signal_dbm: Option<f64>,
    freq_mhz: Option<f64>,
    channel: Option<u32>,
}

impl Stanza {
    fn finish(self) -> NetworkSighting {
        let frequency_mhz = self
            .freq_mhz
            .map(|f| f.round() as u32)
            .or_else(|| self.channel.map(channel_to_freq))
            .unwrap_or(0);
        let level_dbm = self
            .signal_dbm
            .map(|s| s.round() as i32)
            .unwrap_or(MISSING_SIGNAL_DBM);
        NetworkSighting::new(self.ssid.unwrap_or_default(), self.bssid, frequency_mhz, level_dbm)
    }
}

/// Parse the text output of `iw dev <iface> scan [dump]`: one sighting per
/// `BSS aa:bb:cc:dd:ee:ff(on wlan0)` stanza.
pub fn parse_iw_scan_output(output: &str) -> Vec<NetworkSighting> {
    let mut out = Vec::new();
    let mut current: Option<Stanza> = None;

    for line in output.lines() {
        if let Some(rest) = line.strip_prefix("BSS ") {
            if let Some(stanza) = current.take() {
                out.push(stanza.finish());
            }
            let end = rest
                .find(|c: char| !c.is_ascii_hexdigit() && c != ':')
                .unwrap_or(rest.len());
            let mac = &rest[..end];
            if mac.len() == 17 {
                current = Some(Stanza {
                    bssid: mac.to_lowercase(),
                    ..Default::default()
                });
            }
            continue;
        }

        let Some(stanza) = current.as_mut() else {
            continue;
        };
        let trimmed = line.trim();
        if let Some(rest) = trimmed.strip_prefix("SSID:") {
            stanza.ssid = Some(rest.trim().to_owned());
        } else if let Some(rest) = trimmed.strip_prefix("signal:") {
            stanza.signal_dbm = first_number(rest);
        } else if let Some(rest) = trimmed.strip_prefix("freq:") {
            stanza.freq_mhz = first_number(rest);
        } else if let Some(rest) = trimmed.strip_prefix("DS Parameter set: channel") {
            stanza.channel = rest.trim().parse().ok();
        }
    }
    if let Some(stanza) = current.take() {
        out.push(stanza.finish());
    }
    out
}

fn first_number(s: &str) -> Option<f64> {
    s.split_whitespace().next()?.parse().ok()
}

fn channel_to_freq(channel: u32) -> u32 {
    match channel {
        1..=13 => 2407 + channel * 5,
        14 => 2484,
        32..=177 => 5000 + channel * 5,
        _ => 0,
    }
}
