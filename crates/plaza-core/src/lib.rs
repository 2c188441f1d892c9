//! Plaza core
//!
//! Pure state machines for realtime presence. Nothing in this crate performs
//! I/O: methods take the current time as input and return actions for a driver
//! to execute, so the same logic runs against a real WebSocket and against a
//! virtual clock in tests.
//!
//! # Components
//!
//! - [`channel`]: Realtime Channel Manager (connection lifecycle, dispatch,
//!   bounded fixed-delay reconnection)
//! - [`presence`]: Location Presence Cache (latest position per user)
//! - [`geolocation`]: Geolocation Sampler (device samples to records and
//!   outbound updates)
//! - [`env`]: Environment abstraction (time, sleeping, wall clock)
//! - [`error`]: Error types

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod channel;
pub mod env;
pub mod error;
pub mod geolocation;
pub mod presence;

pub use channel::{Channel, ChannelAction, ChannelConfig, ChannelState, Generation};
pub use env::Environment;
pub use error::{ChannelError, PositionError, TrackingError};
pub use geolocation::{
    LocationSample, PositionOptions, PositionSample, Sampler, SamplerAction, TrackingStatus,
};
pub use presence::{PresenceCache, PresenceConfig, PresenceRecord, UserId};
