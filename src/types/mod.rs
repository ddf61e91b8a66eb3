pub mod route;

pub use route::*;

use serde::{Deserialize, Serialize};

use crate::error::{NavError, Result};

/// WGS84 coordinate in degrees.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
}

impl GeoPoint {
    pub const fn new(latitude: f64, longitude: f64) -> Self {
        GeoPoint {
            latitude,
            longitude,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && (-90.0..=90.0).contains(&self.latitude)
            && (-180.0..=180.0).contains(&self.longitude)
    }

    /// Reject NaN/infinite or out-of-range coordinates.
    pub fn validate(&self) -> Result<()> {
        if self.is_valid() {
            Ok(())
        } else {
            Err(NavError::InvalidInput(format!(
                "coordinate out of range: ({}, {})",
                self.latitude, self.longitude
            )))
        }
    }
}

/// Raw fix as delivered by the positioning source.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PositionSample {
    pub point: GeoPoint,
    pub accuracy_meters: f64,
    #[serde(default)]
    pub heading_degrees: Option<f64>,
    #[serde(default)]
    pub speed_mps: Option<f64>,
    pub timestamp_millis: i64,
}

impl PositionSample {
    pub fn new(point: GeoPoint, accuracy_meters: f64, timestamp_millis: i64) -> Self {
        PositionSample {
            point,
            accuracy_meters,
            heading_degrees: None,
            speed_mps: None,
            timestamp_millis,
        }
    }

    pub fn with_speed(mut self, speed_mps: f64) -> Self {
        self.speed_mps = Some(speed_mps);
        self
    }

    pub fn with_heading(mut self, heading_degrees: f64) -> Self {
        self.heading_degrees = Some(heading_degrees);
        self
    }
}

/// Smoothed position derived from the accepted sample history.
///
/// Superseded wholesale on every accepted sample.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FilteredPosition {
    pub point: GeoPoint,
    pub accuracy_meters: f64,
    pub heading_degrees: Option<f64>,
    pub speed_mps: Option<f64>,
    /// Timestamp of the sample that produced this estimate.
    pub timestamp_millis: i64,
}
