//! Deterministic simulation harness for the Plaza presence runtime.
//!
//! Provides a virtual-time [`SimEnv`] and a scripted [`SimDriver`] so the
//! production [`plaza_client::Runtime`] can be driven step by step: inject
//! transport and sensor events, advance the clock, run a cycle, inspect what
//! the runtime opened, closed and sent.
//!
//! # Invariant Testing
//!
//! The `invariants` module checks behavioral properties against a
//! [`SystemSnapshot`] after each step. Use [`InvariantRegistry::standard()`]
//! for the presence invariants.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod invariants;
pub mod sim_driver;
pub mod sim_env;

pub use invariants::{
    ChannelStateSnapshot, Invariant, InvariantRegistry, InvariantResult, RetryBudget,
    SelfExcluded, SingleLiveTransport, SystemSnapshot, ViewsMatchSession, Violation,
    WatchMatchesTracking,
};
pub use sim_driver::{ConnectMode, SimDriver, SimDriverError};
pub use sim_env::{SimEnv, SimInstant};
