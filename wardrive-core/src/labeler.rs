use std::fs::File;
use std::path::Path;

use serde::Deserialize;

use crate::error::LabelError;
use crate::ports::GeoLabeler;

const EARTH_RADIUS_KM: f64 = 6371.0;

/// Labeler that never knows an address.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullLabeler;

impl GeoLabeler for NullLabeler {
    fn resolve(&self, _lat: f64, _lon: f64) -> Result<String, LabelError> {
        Err(LabelError::NotFound)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Place {
    pub name: String,
    pub lat: f64,
    pub lon: f64,
}

/// Offline reverse lookup: the nearest named place within a radius.
#[derive(Debug, Clone)]
pub struct GazetteerLabeler {
    places: Vec<Place>,
    radius_m: f64,
}

impl GazetteerLabeler {
    pub fn new(places: Vec<Place>, radius_m: f64) -> Self {
        Self { places, radius_m }
    }

    pub fn load<P: AsRef<Path>>(path: P, radius_m: f64) -> Result<Self, LabelError> {
        let file = File::open(path)?;
        let places: Vec<Place> =
            serde_json::from_reader(file).map_err(|e| LabelError::Malformed(e.to_string()))?;
        if let Some(bad) = places
            .iter()
            .find(|p| !(-90.0..=90.0).contains(&p.lat) || !(-180.0..=180.0).contains(&p.lon))
        {
            return Err(LabelError::Malformed(format!(
                "place '{}' has out-of-range coordinates",
                bad.name
            )));
        }
        Ok(Self::new(places, radius_m))
    }

    pub fn len(&self) -> usize {
        self.places.len()
    }

    pub fn is_empty(&self) -> bool {
        self.places.is_empty()
    }
}

impl GeoLabeler for GazetteerLabeler {
    fn resolve(&self, lat: f64, lon: f64) -> Result<String, LabelError> {
        if !lat.is_finite() || !lon.is_finite() {
            return Err(LabelError::Malformed(format!("lat={lat} lon={lon}")));
        }
        self.places
            .iter()
            .map(|p| (haversine_km(lat, lon, p.lat, p.lon) * 1000.0, p))
            .filter(|(dist_m, _)| *dist_m <= self.radius_m)
            .min_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal))
            .map(|(_, p)| p.name.clone())
            .ok_or(LabelError::NotFound)
    }
}

pub fn haversine_km(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let dlat = (lat2 - lat1).to_radians();
    let dlon = (lon2 - lon1).to_radians();
    let lat1 = lat1.to_radians();
    let lat2 = lat2.to_radians();
    let a = (dlat / 2.0).sin().powi(2)
        + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().asin();
    EARTH_RADIUS_KM * c
}
