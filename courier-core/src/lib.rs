pub mod geo;
pub mod wire;

use std::fmt;

use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unique identifier for a tracking session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub Ulid);

impl SessionId {
    pub fn new() -> Self {
        Self(Ulid::new())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Backend identifier of a parcel.
///
/// The tracker only ever borrows this id to tag outgoing samples; parcel state
/// is owned by the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParcelId(pub u64);

impl fmt::Display for ParcelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Percentage value in the range 0–100 (inclusive).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Percentage(pub u8);

impl Percentage {
    /// Clamp an arbitrary reading into 0–100.
    pub fn clamped(value: i64) -> Self {
        Self(value.clamp(0, 100) as u8)
    }
}

/// Reporting cadence the backend expects from a driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub enum UpdateInterval {
    Ten,
    #[default]
    Thirty,
    Sixty,
}

impl UpdateInterval {
    pub const ALL: [UpdateInterval; 3] = [Self::Ten, Self::Thirty, Self::Sixty];

    pub fn as_secs(self) -> u32 {
        match self {
            Self::Ten => 10,
            Self::Thirty => 30,
            Self::Sixty => 60,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("unsupported update interval {0}s, expected one of 10, 30 or 60")]
pub struct UnsupportedInterval(pub u32);

impl TryFrom<u32> for UpdateInterval {
    type Error = UnsupportedInterval;

    fn try_from(secs: u32) -> Result<Self, Self::Error> {
        match secs {
            10 => Ok(Self::Ten),
            30 => Ok(Self::Thirty),
            60 => Ok(Self::Sixty),
            other => Err(UnsupportedInterval(other)),
        }
    }
}

impl From<UpdateInterval> for u32 {
    fn from(interval: UpdateInterval) -> Self {
        interval.as_secs()
    }
}

/// A single location reading as produced by a position source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionSample {
    /// Degrees, −90..90.
    pub latitude: f64,
    /// Degrees, −180..180.
    pub longitude: f64,
    /// Horizontal accuracy radius in meters, when the platform reports one.
    pub accuracy_m: Option<f64>,
    /// Ground speed in meters per second.
    pub speed_mps: Option<f64>,
    /// Course over ground in degrees, 0..360.
    pub bearing_deg: Option<f64>,
    pub altitude_m: Option<f64>,
    /// When the platform resolved this fix.
    pub captured_at: jiff::Timestamp,
    /// Battery level, sampled independently from the fix.
    pub battery: Option<Percentage>,
}

/// Reasons a sample is refused before it reaches the stats or the backend.
#[derive(Debug, Clone, Copy, PartialEq, thiserror::Error)]
pub enum InvalidSample {
    #[error("coordinates are not finite numbers")]
    NonFiniteCoordinates,
    #[error("latitude {0} outside -90..90")]
    LatitudeOutOfRange(f64),
    #[error("longitude {0} outside -180..180")]
    LongitudeOutOfRange(f64),
    #[error("negative accuracy {0}")]
    NegativeAccuracy(f64),
}

impl PositionSample {
    pub fn new(latitude: f64, longitude: f64, captured_at: jiff::Timestamp) -> Self {
        Self {
            latitude,
            longitude,
            accuracy_m: None,
            speed_mps: None,
            bearing_deg: None,
            altitude_m: None,
            captured_at,
            battery: None,
        }
    }

    pub fn with_accuracy(mut self, meters: f64) -> Self {
        self.accuracy_m = Some(meters);
        self
    }

    pub fn with_motion(mut self, speed_mps: Option<f64>, bearing_deg: Option<f64>) -> Self {
        self.speed_mps = speed_mps;
        self.bearing_deg = bearing_deg;
        self
    }

    pub fn with_altitude(mut self, meters: Option<f64>) -> Self {
        self.altitude_m = meters;
        self
    }

    pub fn with_battery(mut self, battery: Option<Percentage>) -> Self {
        self.battery = battery;
        self
    }

    /// Check the coordinate invariants. Optional motion fields that are
    /// present but meaningless are not rejected, only the position is.
    pub fn validate(&self) -> Result<(), InvalidSample> {
        if !self.latitude.is_finite() || !self.longitude.is_finite() {
            return Err(InvalidSample::NonFiniteCoordinates);
        }
        if !(-90.0..=90.0).contains(&self.latitude) {
            return Err(InvalidSample::LatitudeOutOfRange(self.latitude));
        }
        if !(-180.0..=180.0).contains(&self.longitude) {
            return Err(InvalidSample::LongitudeOutOfRange(self.longitude));
        }
        if let Some(accuracy) = self.accuracy_m
            && accuracy < 0.0
        {
            return Err(InvalidSample::NegativeAccuracy(accuracy));
        }
        Ok(())
    }

    /// Great-circle distance to another sample in kilometers.
    pub fn distance_km(&self, other: &PositionSample) -> f64 {
        geo::haversine_km(self.latitude, self.longitude, other.latitude, other.longitude)
    }
}

/// Trimmed projection of a sample kept for route display.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutePoint {
    pub lat: f64,
    pub lng: f64,
    pub timestamp: jiff::Timestamp,
    pub accuracy: Option<f64>,
}

impl From<&PositionSample> for RoutePoint {
    fn from(sample: &PositionSample) -> Self {
        Self {
            lat: sample.latitude,
            lng: sample.longitude,
            timestamp: sample.captured_at,
            accuracy: sample.accuracy_m,
        }
    }
}
