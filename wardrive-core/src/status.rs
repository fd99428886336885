use std::fmt;

use crate::model::{Position, TrackingState};

const NO_TRACKING: &str = "No Tracking";

/// Read-only snapshot for whatever surface displays the pipeline.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AcquisitionStatus {
    pub tracking: TrackingState,
    /// Last position shown to the user; cleared on deactivation.
    pub position: Option<Position>,
    pub label: Option<String>,
    pub last_batch: Vec<String>,
    pub stored: u64,
    pub last_error: Option<String>,
}

impl AcquisitionStatus {
    pub fn with_stored(stored: u64) -> Self {
        Self {
            stored,
            ..Default::default()
        }
    }
}

impl fmt::Display for AcquisitionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "tracking:  {}", self.tracking)?;
        match &self.position {
            Some(p) => {
                writeln!(f, "lat:       {}", p.lat)?;
                writeln!(f, "lon:       {}", p.lon)?;
                writeln!(f, "accuracy:  {}", p.accuracy_m)?;
                match p.altitude_m {
                    Some(alt) => writeln!(f, "altitude:  {alt}")?,
                    None => writeln!(f, "altitude:  Not available")?,
                }
                writeln!(f, "address:   {}", self.label.as_deref().unwrap_or("-"))?;
                writeln!(f, "wifi:      {}", self.last_batch.join("; "))?;
            }
            None => {
                for field in ["lat", "lon", "accuracy", "altitude", "address", "wifi"] {
                    writeln!(f, "{:<10} {NO_TRACKING}", format!("{field}:"))?;
                }
            }
        }
        if let Some(err) = &self.last_error {
            writeln!(f, "last error: {err}")?;
        }
        write!(f, "stored:    {}", self.stored)
    }
}
