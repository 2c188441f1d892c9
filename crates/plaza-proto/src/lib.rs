//! Plaza wire protocol.
//!
//! JSON messages exchanged over the realtime presence channel. Every message is
//! an object tagged by a `type` field. Outbound messages are a closed set and
//! encode directly from [`Outbound`]. Inbound messages are decoded in two
//! steps: the `type` tag is read first, then the payload is validated against
//! the shape that tag requires. Unknown tags decode to [`Inbound::Unknown`]
//! rather than failing, so callers can log and discard them.
//!
//! # Invariants
//!
//! - Coordinates are always `[longitude, latitude]` on the wire.
//! - A payload that fails shape validation never produces a partial record.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod errors;
pub mod inbound;
pub mod location;
pub mod outbound;

pub use errors::{ProtocolError, Result};
pub use inbound::{BroadcastKind, Inbound};
pub use location::{LngLat, LocationUpdate};
pub use outbound::Outbound;

/// Wire tag for a single location record.
pub const LOCATION_UPDATE: &str = "location_update";

/// Wire tag for a batch of location records.
pub const NEARBY_USERS: &str = "nearby_users";

/// Wire tag announcing that a user left the channel.
pub const USER_DISCONNECTED: &str = "user_disconnected";

/// Wire tag for joining an event room.
pub const JOIN_EVENT: &str = "join_event";

/// Wire tag for leaving an event room.
pub const LEAVE_EVENT: &str = "leave_event";
