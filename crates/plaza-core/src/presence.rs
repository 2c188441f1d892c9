//! Location Presence Cache.
//!
//! Single source of truth for "who is where, as of when". Holds at most one
//! [`PresenceRecord`] per user. Writes always replace the whole record, so the
//! inbound dispatch path and the local sampling path can interleave in either
//! order without leaving a half-merged record behind: the last write wins.
//!
//! The cache is in memory only. It is not a trajectory store.
//!
//! # Staleness
//!
//! Records are removed when a disconnect notification arrives. If
//! [`PresenceConfig::stale_after`] is set, [`PresenceCache::evict_stale`] also
//! drops records that have not been refreshed within that window. This is off
//! by default.

use std::{
    collections::BTreeMap,
    ops::Sub,
    time::{Duration, Instant},
};

use plaza_proto::{LngLat, LocationUpdate};
use serde::{Deserialize, Serialize};

/// Opaque user identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    /// Wrap a raw identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for UserId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<&str> for UserId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Last known position of one user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PresenceRecord {
    /// Cache key.
    pub user_id: UserId,
    /// `[longitude, latitude]`, matching the wire order.
    pub coordinates: LngLat,
    /// ISO 8601 UTC timestamp from the sender.
    pub timestamp: String,
    /// Horizontal accuracy in meters.
    pub accuracy: Option<f64>,
    /// Ground speed in meters per second.
    pub speed: Option<f64>,
    /// Heading in degrees.
    pub heading: Option<f64>,
}

impl From<LocationUpdate> for PresenceRecord {
    fn from(update: LocationUpdate) -> Self {
        Self {
            user_id: UserId(update.user_id),
            coordinates: update.coordinates,
            timestamp: update.timestamp,
            accuracy: update.accuracy,
            speed: update.speed,
            heading: update.heading,
        }
    }
}

/// Cache configuration.
#[derive(Debug, Clone, Default)]
pub struct PresenceConfig {
    /// Evict records not refreshed within this window. `None` disables
    /// time-based eviction.
    pub stale_after: Option<Duration>,
}

#[derive(Debug, Clone)]
struct Entry<I> {
    record: PresenceRecord,
    refreshed_at: I,
}

/// Keyed store of the latest known position per user.
///
/// Generic over `Instant` so staleness can run on virtual time.
#[derive(Debug, Clone)]
pub struct PresenceCache<I = Instant>
where
    I: Copy + Ord + Send + Sync + Sub<Output = Duration>,
{
    config: PresenceConfig,
    entries: BTreeMap<UserId, Entry<I>>,
}

impl<I> Default for PresenceCache<I>
where
    I: Copy + Ord + Send + Sync + Sub<Output = Duration>,
{
    fn default() -> Self {
        Self::new(PresenceConfig::default())
    }
}

impl<I> PresenceCache<I>
where
    I: Copy + Ord + Send + Sync + Sub<Output = Duration>,
{
    /// Create an empty cache.
    pub fn new(config: PresenceConfig) -> Self {
        Self { config, entries: BTreeMap::new() }
    }

    /// Insert or fully replace the record for `record.user_id`.
    ///
    /// Returns `true` if this user was not present before.
    pub fn upsert(&mut self, record: PresenceRecord, now: I) -> bool {
        let key = record.user_id.clone();
        self.entries.insert(key, Entry { record, refreshed_at: now }).is_none()
    }

    /// Remove a user's record. No-op if absent.
    pub fn remove(&mut self, user_id: &UserId) -> Option<PresenceRecord> {
        self.entries.remove(user_id).map(|entry| entry.record)
    }

    /// Record for one user.
    pub fn get(&self, user_id: &UserId) -> Option<&PresenceRecord> {
        self.entries.get(user_id).map(|entry| &entry.record)
    }

    /// Whether a record exists for this user.
    pub fn contains(&self, user_id: &UserId) -> bool {
        self.entries.contains_key(user_id)
    }

    /// Number of users with a known position.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the cache holds no records.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop every record.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Point-in-time copy of all records, ordered by user ID.
    pub fn snapshot(&self) -> Vec<PresenceRecord> {
        self.entries.values().map(|entry| entry.record.clone()).collect()
    }

    /// Snapshot without the local user's record.
    ///
    /// Used by views that already draw the local user from the device sensor
    /// and must not draw the server echo as well.
    pub fn excluding_self(&self, self_id: &UserId) -> Vec<PresenceRecord> {
        self.entries
            .iter()
            .filter(|(user_id, _)| *user_id != self_id)
            .map(|(_, entry)| entry.record.clone())
            .collect()
    }

    /// Records belonging to the given participants, in snapshot order.
    pub fn participants(&self, participant_ids: &[UserId]) -> Vec<PresenceRecord> {
        self.entries
            .iter()
            .filter(|(user_id, _)| participant_ids.contains(*user_id))
            .map(|(_, entry)| entry.record.clone())
            .collect()
    }

    /// Map centre for a participant view.
    ///
    /// Coordinates of the first participant with a known position, or
    /// `fallback` (typically the event's own location) if none is known.
    pub fn center(&self, participant_ids: &[UserId], fallback: LngLat) -> LngLat {
        self.entries
            .iter()
            .find(|(user_id, _)| participant_ids.contains(*user_id))
            .map_or(fallback, |(_, entry)| entry.record.coordinates)
    }

    /// Remove records older than `stale_after`, never touching `keep`.
    ///
    /// Returns the evicted user IDs. Does nothing when staleness is disabled.
    pub fn evict_stale(&mut self, now: I, keep: Option<&UserId>) -> Vec<UserId> {
        let Some(window) = self.config.stale_after else {
            return Vec::new();
        };

        let stale: Vec<UserId> = self
            .entries
            .iter()
            .filter(|(user_id, entry)| {
                Some(*user_id) != keep && now - entry.refreshed_at > window
            })
            .map(|(user_id, _)| user_id.clone())
            .collect();

        for user_id in &stale {
            self.entries.remove(user_id);
        }

        if !stale.is_empty() {
            tracing::debug!(count = stale.len(), "evicted stale presence records");
        }

        stale
    }
}
