//! Messages the client sends to the backend.

use serde::{Deserialize, Serialize};

use crate::{
    LngLat,
    errors::{ProtocolError, Result},
};

/// Outbound message, tagged by `type` on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Outbound {
    /// Our own position.
    LocationUpdate {
        /// `[longitude, latitude]`.
        coordinates: LngLat,
        /// Horizontal accuracy in meters.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        accuracy: Option<f64>,
        /// Ground speed in meters per second.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        speed: Option<f64>,
        /// Heading in degrees.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        heading: Option<f64>,
        /// ISO 8601 capture time.
        timestamp: String,
    },

    /// Subscribe to an event room's fan-out.
    JoinEvent {
        /// Event identifier.
        event_id: String,
    },

    /// Unsubscribe from an event room.
    LeaveEvent {
        /// Event identifier.
        event_id: String,
    },
}

impl Outbound {
    /// Wire tag of this message.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::LocationUpdate { .. } => crate::LOCATION_UPDATE,
            Self::JoinEvent { .. } => crate::JOIN_EVENT,
            Self::LeaveEvent { .. } => crate::LEAVE_EVENT,
        }
    }

    /// Serialize to the JSON text frame sent over the transport.
    pub fn encode(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| ProtocolError::Encode(e.to_string()))
    }
}
