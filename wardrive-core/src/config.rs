use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::ports::PriorityHint;

pub const DEFAULT_INTERVAL_MS: u64 = 30_000;
pub const DEFAULT_GAZETTEER_RADIUS_M: f64 = 5_000.0;
pub const DEFAULT_GPSD_PORT: u16 = 2947;
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 2_000;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    pub store_path: String,
    #[serde(default)]
    pub store_kind: StoreKind,
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,
    #[serde(default)]
    pub priority: PriorityHint,
    pub position_source: PositionSourceConfig,
    pub scan_source: ScanSourceConfig,
    #[serde(default)]
    pub gazetteer_path: Option<String>,
    #[serde(default = "default_gazetteer_radius_m")]
    pub gazetteer_radius_m: f64,
    #[serde(default)]
    pub auto_start: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum StoreKind {
    #[default]
    Sqlite,
    Jsonl,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum PositionSourceConfig {
    Gpsd {
        #[serde(default = "default_gpsd_host")]
        host: String,
        #[serde(default = "default_gpsd_port")]
        port: u16,
        #[serde(default = "default_connect_timeout_ms")]
        connect_timeout_ms: u64,
    },
    Simulated {
        start_lat: f64,
        start_lon: f64,
        #[serde(default = "default_step_m")]
        step_m: f64,
        #[serde(default)]
        seed: Option<u64>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ScanSourceConfig {
    Iw {
        #[serde(default)]
        interface: Option<String>,
        #[serde(default)]
        use_cached: bool,
    },
    Simulated {
        #[serde(default = "default_sim_networks")]
        networks: usize,
        #[serde(default)]
        seed: Option<u64>,
    },
}

impl ScanSourceConfig {
    /// Whether scans are actively triggered, which needs wireless control.
    pub fn triggers_scans(&self) -> bool {
        match self {
            ScanSourceConfig::Iw { use_cached, .. } => !use_cached,
            ScanSourceConfig::Simulated { .. } => true,
        }
    }
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let data = fs::read(path)?;
        let cfg: Config = serde_json::from_slice(&data)?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.store_path.trim().is_empty() {
            return Err(ConfigError::invalid("storePath", "must not be empty"));
        }
        if self.interval_ms == 0 {
            return Err(ConfigError::invalid("intervalMs", "must be > 0"));
        }
        if self.gazetteer_radius_m.is_nan() || self.gazetteer_radius_m <= 0.0 {
            return Err(ConfigError::invalid("gazetteerRadiusM", "must be > 0"));
        }
        match &self.position_source {
            PositionSourceConfig::Gpsd { host, port, .. } => {
                if host.trim().is_empty() {
                    return Err(ConfigError::invalid("positionSource.host", "must not be empty"));
                }
                if *port == 0 {
                    return Err(ConfigError::invalid("positionSource.port", "must be > 0"));
                }
            }
            PositionSourceConfig::Simulated {
                start_lat,
                start_lon,
                step_m,
                ..
            } => {
                if !(-90.0..=90.0).contains(start_lat) || !(-180.0..=180.0).contains(start_lon) {
                    return Err(ConfigError::invalid(
                        "positionSource.startLat/startLon",
                        format!("out of range: {start_lat}, {start_lon}"),
                    ));
                }
                if !step_m.is_finite() || *step_m < 0.0 {
                    return Err(ConfigError::invalid("positionSource.stepM", "must be >= 0"));
                }
            }
        }
        if let ScanSourceConfig::Simulated { networks, .. } = &self.scan_source {
            if *networks == 0 {
                return Err(ConfigError::invalid("scanSource.networks", "must be > 0"));
            }
        }
        Ok(())
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn store_path(&self) -> PathBuf {
        expand_tilde(&self.store_path)
    }

    pub fn gazetteer_path(&self) -> Option<PathBuf> {
        self.gazetteer_path.as_deref().map(expand_tilde)
    }
}

pub fn expand_tilde(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Ok(home) = env::var("HOME") {
            return PathBuf::from(home).join(stripped);
        }
    }
    PathBuf::from(path)
}

fn default_interval_ms() -> u64 {
    DEFAULT_INTERVAL_MS
}

fn default_gazetteer_radius_m() -> f64 {
    DEFAULT_GAZETTEER_RADIUS_M
}

fn default_gpsd_host() -> String {
    "127.0.0.1".to_string()
}

fn default_gpsd_port() -> u16 {
    DEFAULT_GPSD_PORT
}

fn default_connect_timeout_ms() -> u64 {
    DEFAULT_CONNECT_TIMEOUT_MS
}

fn default_step_m() -> f64 {
    25.0
}

fn default_sim_networks() -> usize {
    8
}
