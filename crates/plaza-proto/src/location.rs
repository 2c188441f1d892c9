//! Location record payload shared by `location_update` and `nearby_users`.

use serde::{Deserialize, Serialize};

/// Ordered coordinate pair: `[longitude, latitude]`.
pub type LngLat = [f64; 2];

/// One user's position as carried on the wire.
///
/// Deserialization is the validation step: `user_id` and `timestamp` must be
/// strings and `coordinates` must be an array of exactly two numbers. Optional
/// metrics accept `null` as absent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationUpdate {
    /// Opaque user identifier.
    pub user_id: String,
    /// `[longitude, latitude]`.
    pub coordinates: LngLat,
    /// ISO 8601 timestamp assigned by the sender.
    pub timestamp: String,
    /// Horizontal accuracy in meters.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accuracy: Option<f64>,
    /// Ground speed in meters per second.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speed: Option<f64>,
    /// Heading in degrees clockwise from true north.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub heading: Option<f64>,
}

impl LocationUpdate {
    /// Longitude component.
    pub fn longitude(&self) -> f64 {
        self.coordinates[0]
    }

    /// Latitude component.
    pub fn latitude(&self) -> f64 {
        self.coordinates[1]
    }
}
