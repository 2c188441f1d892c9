//! Events flowing into and out of the session.

use plaza_core::{ChannelState, PositionError, PositionSample, TrackingError};
use plaza_proto::BroadcastKind;
use serde_json::Value;

/// Transport lifecycle and data reported by the driver.
///
/// Each event belongs to the [`plaza_core::Generation`] of the transport that
/// produced it. The driver pairs them up in [`crate::Driver::poll_transport`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// Handshake completed.
    Opened,
    /// Text frame received.
    Message(String),
    /// Transport closed.
    Closed {
        /// Close reason or code, for diagnostics
        reason: String,
    },
    /// Transport failed.
    Error {
        /// Error description
        reason: String,
    },
}

/// Result of a one-shot or watched position request.
#[derive(Debug, Clone, PartialEq)]
pub enum PositionEvent {
    /// Device produced a reading.
    Sample(PositionSample),
    /// Device failed to produce a reading.
    Failed(PositionError),
}

/// Events emitted by the session for the runtime and UI.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// Channel connection state changed.
    ConnectionChanged(ChannelState),

    /// Presence cache contents changed.
    PresenceChanged,

    /// Tracking status changed (started, stopped, new fix or condition).
    TrackingChanged,

    /// Geolocation condition to surface to the user.
    TrackingFailed(TrackingError),

    /// Pass-through broadcast delivered to subscribers.
    Broadcast {
        /// Message kind
        kind: BroadcastKind,
        /// Full message object
        payload: Value,
    },
}
