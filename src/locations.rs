use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use tracing::{debug, info, instrument};
use utoipa::ToSchema;

use crate::climate::{ClimateRecord, ClimateSeries};

/// Temperature drop per kilometre of elevation, in °C.
pub const LAPSE_RATE_C_PER_KM: f64 = 6.5;

#[derive(Debug, thiserror::Error)]
pub enum LocationError {
    #[error("Failed to read location table: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse location table: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("Duplicate location name: {0}")]
    DuplicateName(String),
    #[error("Unknown location: {0}")]
    UnknownLocation(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct LocationProfile {
    pub name: String,
    pub latitude: f64,
    pub longitude: f64,
    pub elevation_meters: f64,
    pub region: String,
}

impl LocationProfile {
    pub fn new(name: &str, latitude: f64, longitude: f64, elevation_meters: f64, region: &str) -> Self {
        Self {
            name: name.to_string(),
            latitude,
            longitude,
            elevation_meters,
            region: region.to_string(),
        }
    }
}

/// Immutable table of the locations the service models.
#[derive(Debug, Clone, PartialEq)]
pub struct LocationRegistry {
    profiles: Vec<LocationProfile>,
}

impl LocationRegistry {
    pub fn new(profiles: Vec<LocationProfile>) -> Result<Self, LocationError> {
        let mut seen = HashSet::new();
        for profile in &profiles {
            if !seen.insert(profile.name.as_str()) {
                return Err(LocationError::DuplicateName(profile.name.clone()));
            }
        }
        Ok(Self { profiles })
    }

    /// The five reference cities of the Nepal deployment.
    pub fn nepal() -> Self {
        Self {
            profiles: vec![
                LocationProfile::new("Kathmandu", 27.7172, 85.3240, 1400.0, "Central"),
                LocationProfile::new("Pokhara", 28.2096, 83.9856, 822.0, "Western"),
                LocationProfile::new("Bharatpur", 27.6833, 84.4333, 208.0, "Central"),
                LocationProfile::new("Biratnagar", 26.4525, 87.2718, 72.0, "Eastern"),
                LocationProfile::new("Dharan", 26.8147, 87.2677, 371.0, "Eastern"),
            ],
        }
    }

    /// Load a substitute table from a JSON array of profiles.
    #[instrument]
    pub fn from_json_file(path: &Path) -> Result<Self, LocationError> {
        let raw = std::fs::read_to_string(path)?;
        let profiles: Vec<LocationProfile> = serde_json::from_str(&raw)?;
        info!("Loaded {} location profiles", profiles.len());
        Self::new(profiles)
    }

    pub fn profiles(&self) -> &[LocationProfile] {
        &self.profiles
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.profiles.iter().map(|p| p.name.as_str())
    }

    pub fn get(&self, name: &str) -> Result<&LocationProfile, LocationError> {
        self.profiles
            .iter()
            .find(|p| p.name == name)
            .ok_or_else(|| LocationError::UnknownLocation(name.to_string()))
    }

    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }

    /// One adjusted series per registered location, in registry order.
    pub fn adjust_all(&self, series: &ClimateSeries) -> Vec<LocationSeries> {
        self.profiles
            .iter()
            .map(|profile| adjust_series(series, profile))
            .collect()
    }
}

impl Default for LocationRegistry {
    fn default() -> Self {
        Self::nepal()
    }
}

/// Temperature at `elevation_meters` given the base (sea-level) temperature.
pub fn adjust_temperature_by_elevation(base_temperature: f64, elevation_meters: f64) -> f64 {
    base_temperature - LAPSE_RATE_C_PER_KM * (elevation_meters / 1000.0)
}

/// Climate series for one location.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct LocationSeries {
    pub profile: LocationProfile,
    pub series: ClimateSeries,
}

/// Latest adjusted values for one location, with its coordinates.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct LocationSnapshot {
    pub name: String,
    pub region: String,
    pub latitude: f64,
    pub longitude: f64,
    pub elevation_meters: f64,
    pub year: i32,
    pub temperature: f64,
    pub precipitation: f64,
}

impl LocationSeries {
    pub fn name(&self) -> &str {
        &self.profile.name
    }

    pub fn snapshot(&self) -> Option<LocationSnapshot> {
        let latest: &ClimateRecord = self.series.records().last()?;
        Some(LocationSnapshot {
            name: self.profile.name.clone(),
            region: self.profile.region.clone(),
            latitude: self.profile.latitude,
            longitude: self.profile.longitude,
            elevation_meters: self.profile.elevation_meters,
            year: latest.year,
            temperature: latest.temperature,
            precipitation: latest.precipitation,
        })
    }
}

/// Apply the elevation lapse rate to every temperature of `series`.
///
/// Precipitation is passed through unchanged. Elevations below sea level
/// are accepted and raise the temperature.
pub fn adjust_series(series: &ClimateSeries, profile: &LocationProfile) -> LocationSeries {
    debug!(
        location = %profile.name,
        elevation_meters = profile.elevation_meters,
        "Adjusting series for elevation"
    );
    let elevation = profile.elevation_meters;
    LocationSeries {
        profile: profile.clone(),
        series: series.map_temperature(|t| adjust_temperature_by_elevation(t, elevation)),
    }
}
