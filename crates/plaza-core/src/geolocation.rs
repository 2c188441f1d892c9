//! Geolocation Sampler.
//!
//! Bridges the device's positioning capability to the presence cache and the
//! realtime channel. Like the channel, this is a pure state machine: starting
//! and stopping return [`SamplerAction`]s for the driver to run against the
//! platform's positioning API, and the driver feeds results back through
//! [`Sampler::handle_sample`] and [`Sampler::handle_error`].
//!
//! Device sensors report latitude first. Everything this module emits uses the
//! wire order, `[longitude, latitude]`.

use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use plaza_proto::{LngLat, Outbound};

use crate::{
    error::{PositionError, TrackingError},
    presence::{PresenceRecord, UserId},
};

/// Default timeout for a single position attempt.
pub const DEFAULT_SAMPLE_TIMEOUT: Duration = Duration::from_secs(10);

/// Options passed to the platform positioning API.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PositionOptions {
    /// Prefer GPS-grade fixes over network location.
    pub high_accuracy: bool,
    /// Oldest cached reading the platform may return. Zero means always fresh.
    pub maximum_age: Duration,
    /// Time before a single attempt counts as failed.
    pub timeout: Duration,
}

impl Default for PositionOptions {
    fn default() -> Self {
        Self { high_accuracy: true, maximum_age: Duration::ZERO, timeout: DEFAULT_SAMPLE_TIMEOUT }
    }
}

/// Raw reading as reported by the device (latitude first).
#[derive(Debug, Clone, PartialEq)]
pub struct PositionSample {
    /// Degrees north.
    pub latitude: f64,
    /// Degrees east.
    pub longitude: f64,
    /// Horizontal accuracy in meters.
    pub accuracy: Option<f64>,
    /// Ground speed in meters per second.
    pub speed: Option<f64>,
    /// Heading in degrees.
    pub heading: Option<f64>,
    /// When the device captured the reading.
    pub captured_at: DateTime<Utc>,
}

/// Accepted sample in wire order.
#[derive(Debug, Clone, PartialEq)]
pub struct LocationSample {
    /// `[longitude, latitude]`.
    pub coordinates: LngLat,
    /// Horizontal accuracy in meters.
    pub accuracy: Option<f64>,
    /// Ground speed in meters per second.
    pub speed: Option<f64>,
    /// Heading in degrees.
    pub heading: Option<f64>,
    /// When the device captured the reading.
    pub captured_at: DateTime<Utc>,
}

impl LocationSample {
    /// ISO 8601 capture time with millisecond precision and a `Z` suffix.
    pub fn timestamp(&self) -> String {
        self.captured_at.to_rfc3339_opts(SecondsFormat::Millis, true)
    }

    /// Presence record for the local user.
    pub fn to_record(&self, user_id: UserId) -> PresenceRecord {
        PresenceRecord {
            user_id,
            coordinates: self.coordinates,
            timestamp: self.timestamp(),
            accuracy: self.accuracy,
            speed: self.speed,
            heading: self.heading,
        }
    }

    /// Outbound `location_update` message.
    pub fn to_outbound(&self) -> Outbound {
        Outbound::LocationUpdate {
            coordinates: self.coordinates,
            accuracy: self.accuracy,
            speed: self.speed,
            heading: self.heading,
            timestamp: self.timestamp(),
        }
    }
}

/// Requests for the driver's positioning API.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SamplerAction {
    /// Take one sample now.
    RequestPosition(PositionOptions),
    /// Begin continuous sampling.
    WatchPosition(PositionOptions),
    /// Cancel continuous sampling.
    ClearWatch,
}

/// Observable tracking status, independent of channel connectivity.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrackingStatus {
    /// Continuous sampling is active.
    pub tracking: bool,
    /// Most recent good sample. Kept across transient errors.
    pub last_fix: Option<LocationSample>,
    /// Most recent condition. Cleared by the next good sample.
    pub error: Option<TrackingError>,
}

/// Geolocation sampler state machine.
#[derive(Debug, Clone, Default)]
pub struct Sampler {
    options: PositionOptions,
    tracking: bool,
    last_fix: Option<LocationSample>,
    error: Option<TrackingError>,
}

impl Sampler {
    /// Create an idle sampler.
    pub fn new(options: PositionOptions) -> Self {
        Self { options, tracking: false, last_fix: None, error: None }
    }

    /// Options the sampler requests positions with.
    pub fn options(&self) -> PositionOptions {
        self.options
    }

    /// Whether continuous sampling is active.
    pub fn is_tracking(&self) -> bool {
        self.tracking
    }

    /// Most recent good sample.
    pub fn last_fix(&self) -> Option<&LocationSample> {
        self.last_fix.as_ref()
    }

    /// Most recent condition, if any.
    pub fn error(&self) -> Option<TrackingError> {
        self.error
    }

    /// Snapshot of the observable status.
    pub fn status(&self) -> TrackingStatus {
        TrackingStatus {
            tracking: self.tracking,
            last_fix: self.last_fix.clone(),
            error: self.error,
        }
    }

    /// Begin tracking: one immediate sample plus a continuous watch.
    ///
    /// Calling this while already tracking returns no actions.
    ///
    /// # Errors
    ///
    /// - `TrackingError::CapabilityUnavailable` if the device has no
    ///   positioning capability. Tracking does not start and is not retried.
    pub fn start_tracking(
        &mut self,
        capability_available: bool,
    ) -> Result<Vec<SamplerAction>, TrackingError> {
        if !capability_available {
            tracing::warn!("geolocation capability unavailable, tracking not started");
            self.error = Some(TrackingError::CapabilityUnavailable);
            return Err(TrackingError::CapabilityUnavailable);
        }

        if self.tracking {
            return Ok(vec![]);
        }

        self.tracking = true;
        tracing::info!(high_accuracy = self.options.high_accuracy, "location tracking started");

        Ok(vec![
            SamplerAction::RequestPosition(self.options),
            SamplerAction::WatchPosition(self.options),
        ])
    }

    /// Cancel the continuous watch. Idempotent.
    pub fn stop_tracking(&mut self) -> Vec<SamplerAction> {
        if !self.tracking {
            return vec![];
        }

        self.tracking = false;
        tracing::info!("location tracking stopped");
        vec![SamplerAction::ClearWatch]
    }

    /// Accept a device reading.
    ///
    /// Returns the sample in wire order, or `None` if tracking is stopped (a
    /// late callback) or the reading is not a finite position. A non-finite
    /// reading is treated as `PositionUnavailable`.
    pub fn handle_sample(&mut self, sample: PositionSample) -> Option<LocationSample> {
        if !self.tracking {
            tracing::debug!("ignoring position sample while not tracking");
            return None;
        }

        if !sample.latitude.is_finite() || !sample.longitude.is_finite() {
            self.handle_error(PositionError::PositionUnavailable);
            return None;
        }

        let fix = LocationSample {
            coordinates: [sample.longitude, sample.latitude],
            accuracy: sample.accuracy,
            speed: sample.speed,
            heading: sample.heading,
            captured_at: sample.captured_at,
        };

        self.last_fix = Some(fix.clone());
        self.error = None;
        Some(fix)
    }

    /// Record a per-sample failure.
    ///
    /// The last good fix is kept and the watch stays active.
    pub fn handle_error(&mut self, error: PositionError) -> TrackingError {
        tracing::warn!(%error, "geolocation sample failed");
        let condition = TrackingError::Position(error);
        self.error = Some(condition);
        condition
    }
}
