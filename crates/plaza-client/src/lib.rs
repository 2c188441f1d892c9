//! Plaza client
//!
//! Orchestration around the pure presence state machines, and a generic
//! runtime so the same orchestration runs against a real WebSocket and in
//! deterministic simulation.
//!
//! # Components
//!
//! - [`Session`]: Channel, presence cache and sampler for one user, with
//!   broadcast subscribers and event room membership
//! - [`Driver`]: Trait for platform-specific I/O
//! - [`Runtime`]: Generic event loop with reactive `watch` views
//! - [`SystemEnv`]: Production environment (real clocks, tokio sleep)
//! - `transport` (feature): WebSocket driver built on `tokio-tungstenite`

#![forbid(unsafe_code)]
#![deny(missing_docs)]

mod command;
mod driver;
mod event;
mod runtime;
mod session;
mod system_env;

#[cfg(feature = "transport")]
pub mod transport;

pub use command::Command;
pub use driver::Driver;
pub use event::{PositionEvent, SessionEvent, TransportEvent};
pub use runtime::{DEFAULT_POLL_INTERVAL, Runtime, RuntimeError};
pub use session::{Session, SessionConfig, Subscriber};
pub use system_env::SystemEnv;
