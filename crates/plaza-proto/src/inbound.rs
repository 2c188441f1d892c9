//! Messages the backend sends to the client.
//!
//! Decoding reads the `type` tag, then validates the payload for that tag.
//! Tags this client does not interpret but must pass through to subscribers
//! are listed in [`BroadcastKind`]. Anything else is [`Inbound::Unknown`].

use serde::Deserialize;
use serde_json::Value;

use crate::{
    LOCATION_UPDATE, LocationUpdate, NEARBY_USERS, USER_DISCONNECTED,
    errors::{ProtocolError, Result},
};

/// Pass-through message kinds forwarded verbatim to subscribers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum BroadcastKind {
    /// Events near the user's position.
    NearbyEvents,
    /// Server-side error report.
    Error,
    /// A collectible was dropped into an event.
    CollectibleDropped,
    /// A collectible was claimed.
    CollectibleClaimed,
    /// A collectible expired unclaimed.
    CollectibleExpired,
}

impl BroadcastKind {
    /// All pass-through kinds.
    pub const ALL: [Self; 5] = [
        Self::NearbyEvents,
        Self::Error,
        Self::CollectibleDropped,
        Self::CollectibleClaimed,
        Self::CollectibleExpired,
    ];

    /// Wire tag for this kind.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NearbyEvents => "nearby_events",
            Self::Error => "error",
            Self::CollectibleDropped => "collectible_dropped",
            Self::CollectibleClaimed => "collectible_claimed",
            Self::CollectibleExpired => "collectible_expired",
        }
    }

    /// Parse a wire tag. `None` if the tag is not a pass-through kind.
    pub fn from_wire(tag: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.as_str() == tag)
    }
}

impl std::fmt::Display for BroadcastKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Decoded inbound message.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    /// One user's position.
    LocationUpdate(LocationUpdate),

    /// Batch of positions. Elements that failed validation are counted in
    /// `rejected` and left out of `users`.
    NearbyUsers {
        /// Records that passed validation, in wire order.
        users: Vec<LocationUpdate>,
        /// Number of elements dropped for bad shape.
        rejected: usize,
    },

    /// A user left the channel.
    UserDisconnected {
        /// The departed user.
        user_id: String,
    },

    /// Message not interpreted by the presence layer.
    Broadcast {
        /// Which pass-through kind.
        kind: BroadcastKind,
        /// The full message object, unmodified.
        payload: Value,
    },

    /// Tag this client does not know.
    Unknown {
        /// The unrecognized `type` value.
        kind: String,
    },
}

impl Inbound {
    /// Decode a JSON text frame.
    ///
    /// # Errors
    ///
    /// - `ProtocolError::InvalidJson` if the text is not JSON
    /// - `ProtocolError::MissingType` if there is no string `type` field
    /// - `ProtocolError::Malformed` if a known tag carries the wrong shape
    pub fn decode(text: &str) -> Result<Self> {
        let value: Value =
            serde_json::from_str(text).map_err(|e| ProtocolError::InvalidJson(e.to_string()))?;

        let kind = value
            .get("type")
            .and_then(Value::as_str)
            .ok_or(ProtocolError::MissingType)?
            .to_string();

        match kind.as_str() {
            LOCATION_UPDATE => LocationUpdate::deserialize(&value)
                .map(Self::LocationUpdate)
                .map_err(|e| ProtocolError::Malformed { kind: LOCATION_UPDATE, reason: e.to_string() }),

            NEARBY_USERS => {
                let Some(elements) = value.get("users").and_then(Value::as_array) else {
                    return Err(ProtocolError::Malformed {
                        kind: NEARBY_USERS,
                        reason: "`users` is not an array".to_string(),
                    });
                };

                let mut users = Vec::with_capacity(elements.len());
                let mut rejected = 0;
                for element in elements {
                    match LocationUpdate::deserialize(element) {
                        Ok(user) => users.push(user),
                        Err(_) => rejected += 1,
                    }
                }

                Ok(Self::NearbyUsers { users, rejected })
            },

            USER_DISCONNECTED => match value.get("user_id").and_then(Value::as_str) {
                Some(user_id) => Ok(Self::UserDisconnected { user_id: user_id.to_string() }),
                None => Err(ProtocolError::Malformed {
                    kind: USER_DISCONNECTED,
                    reason: "`user_id` is not a string".to_string(),
                }),
            },

            other => match BroadcastKind::from_wire(other) {
                Some(kind) => Ok(Self::Broadcast { kind, payload: value }),
                None => Ok(Self::Unknown { kind: other.to_string() }),
            },
        }
    }

    /// Wire tag of this message.
    pub fn kind(&self) -> &str {
        match self {
            Self::LocationUpdate(_) => LOCATION_UPDATE,
            Self::NearbyUsers { .. } => NEARBY_USERS,
            Self::UserDisconnected { .. } => USER_DISCONNECTED,
            Self::Broadcast { kind, .. } => kind.as_str(),
            Self::Unknown { kind } => kind,
        }
    }
}
