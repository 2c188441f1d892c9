//! Error types for the presence core.
//!
//! Connectivity failures are not errors here: they surface as
//! [`ChannelState`] transitions. These types cover what a caller can act on
//! directly.

use thiserror::Error;

use crate::channel::ChannelState;

/// Errors returned by [`crate::Channel`] operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChannelError {
    /// `connect` was called without a usable identity.
    #[error("no identity available for the realtime channel")]
    MissingIdentity,

    /// Message was not sent because the channel is not connected.
    ///
    /// The message is dropped, not queued.
    #[error("message dropped: channel is {state:?}")]
    SendDropped {
        /// State at the time of the send attempt
        state: ChannelState,
    },

    /// Outbound message could not be encoded.
    #[error("protocol error: {0}")]
    Protocol(String),
}

impl ChannelError {
    /// Returns true if the same call may succeed later.
    ///
    /// A dropped send succeeds once the channel reconnects. A missing identity
    /// or an unencodable message will not fix itself.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::SendDropped { .. })
    }
}

impl From<plaza_proto::ProtocolError> for ChannelError {
    fn from(err: plaza_proto::ProtocolError) -> Self {
        Self::Protocol(err.to_string())
    }
}

/// Per-sample geolocation failures reported by the device.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum PositionError {
    /// The user or platform refused location access.
    #[error("Location permission denied. Please enable location access.")]
    PermissionDenied,

    /// The device could not determine a position.
    #[error("Location information unavailable.")]
    PositionUnavailable,

    /// No position within the configured timeout.
    #[error("Location request timed out.")]
    Timeout,
}

/// Conditions surfaced by the geolocation sampler.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackingError {
    /// The device has no positioning capability at all.
    #[error("Geolocation is not supported on this device.")]
    CapabilityUnavailable,

    /// A single sample failed.
    #[error(transparent)]
    Position(#[from] PositionError),
}

impl TrackingError {
    /// Returns true if tracking continues after this condition.
    ///
    /// Per-sample failures keep the watch alive. A missing capability means
    /// tracking never started.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Position(_))
    }
}
