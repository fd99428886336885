use std::fmt;

use serde::{Deserialize, Serialize};

use crate::now_unix_ms;

/// Label stored when no address could be resolved for a position.
pub const ADDRESS_UNAVAILABLE: &str = "No address detected";

/// One fix reported by a position source. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Position {
    pub lat: f64,
    pub lon: f64,
    pub accuracy_m: f64,
    #[serde(default)]
    pub altitude_m: Option<f64>,
    #[serde(default)]
    pub speed_mps: Option<f64>,
    pub ts_unix_ms: i64,
}

impl Position {
    pub fn new(lat: f64, lon: f64, accuracy_m: f64) -> Self {
        Self {
            lat,
            lon,
            accuracy_m: accuracy_m.max(0.0),
            altitude_m: None,
            speed_mps: None,
            ts_unix_ms: now_unix_ms(),
        }
    }

    pub fn with_altitude(mut self, altitude_m: f64) -> Self {
        self.altitude_m = Some(altitude_m);
        self
    }

    pub fn with_speed(mut self, speed_mps: f64) -> Self {
        self.speed_mps = Some(speed_mps);
        self
    }

    pub fn at(mut self, ts_unix_ms: i64) -> Self {
        self.ts_unix_ms = ts_unix_ms;
        self
    }
}

/// One network entry of a completed scan batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkSighting {
    pub ssid: String,
    pub bssid: String,
    #[serde(rename = "freq")]
    pub frequency_mhz: u32,
    #[serde(rename = "level")]
    pub level_dbm: i32,
}

impl NetworkSighting {
    pub fn new(
        ssid: impl Into<String>,
        bssid: impl Into<String>,
        frequency_mhz: u32,
        level_dbm: i32,
    ) -> Self {
        Self {
            ssid: ssid.into(),
            bssid: bssid.into(),
            frequency_mhz,
            level_dbm,
        }
    }
}

/// The unit of persistence: one position, one sighting and the address label
/// resolved (or substituted) for the position.
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    pub position: Position,
    pub sighting: NetworkSighting,
    pub label: String,
}

#[derive(Serialize)]
struct LocationDescriptor<'a> {
    lat: f64,
    lon: f64,
    acc: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    alt: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    speed: Option<f64>,
    ts: i64,
    add: &'a str,
}

impl Observation {
    pub fn new(position: Position, sighting: NetworkSighting, label: impl Into<String>) -> Self {
        Self {
            position,
            sighting,
            label: label.into(),
        }
    }

    /// Serialized position plus label, stored in the `location` column.
    pub fn location_descriptor(&self) -> Result<String, serde_json::Error> {
        let p = &self.position;
        serde_json::to_string(&LocationDescriptor {
            lat: p.lat,
            lon: p.lon,
            acc: p.accuracy_m,
            alt: p.altitude_m,
            speed: p.speed_mps,
            ts: p.ts_unix_ms,
            add: &self.label,
        })
    }

    /// Serialized sighting, stored in the `wifi` column.
    pub fn network_descriptor(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(&self.sighting)
    }
}

/// A row as it sits in an observation store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredRow {
    pub location: String,
    pub wifi: String,
}

impl StoredRow {
    pub fn from_observation(obs: &Observation) -> Result<Self, serde_json::Error> {
        Ok(Self {
            location: obs.location_descriptor()?,
            wifi: obs.network_descriptor()?,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TrackingState {
    #[default]
    Off,
    On,
}

impl TrackingState {
    pub fn is_on(self) -> bool {
        self == TrackingState::On
    }
}

impl fmt::Display for TrackingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrackingState::Off => write!(f, "off"),
            TrackingState::On => write!(f, "on"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn location_descriptor_carries_label_and_optional_fields() {
        let p = Position::new(47.0, 8.0, 5.0).with_altitude(420.0).at(1_000);
        let obs = Observation::new(p, NetworkSighting::new("NetA", "AA:BB", 2412, -50), "Bern");
        let v: serde_json::Value = serde_json::from_str(&obs.location_descriptor().unwrap()).unwrap();
        assert_eq!(v["lat"], 47.0);
        assert_eq!(v["alt"], 420.0);
        assert_eq!(v["add"], "Bern");
        assert!(v.get("speed").is_none());
    }

    #[test]
    fn network_descriptor_uses_short_keys() {
        let s = NetworkSighting::new("NetB", "CC:DD", 5180, -70);
        let obs = Observation::new(Position::new(0.0, 0.0, 1.0), s, ADDRESS_UNAVAILABLE);
        let v: serde_json::Value = serde_json::from_str(&obs.network_descriptor().unwrap()).unwrap();
        assert_eq!(v["ssid"], "NetB");
        assert_eq!(v["bssid"], "CC:DD");
        assert_eq!(v["freq"], 5180);
        assert_eq!(v["level"], -70);
    }

    #[test]
    fn negative_accuracy_is_clamped() {
        assert_eq!(Position::new(1.0, 2.0, -3.0).accuracy_m, 0.0);
    }
}
