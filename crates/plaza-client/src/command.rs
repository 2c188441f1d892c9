//! Commands for the driver to execute.

use plaza_core::{Generation, PositionOptions};

/// I/O the session needs performed.
///
/// Accumulated by [`crate::Session`] and drained by the runtime with
/// [`crate::Session::take_commands`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Open a transport and tag its events with `generation`.
    Open {
        /// Attempt this transport belongs to
        generation: Generation,
        /// Connection URI
        url: String,
    },
    /// Close the transport for `generation`.
    Close {
        /// Attempt to close
        generation: Generation,
    },
    /// Write a text frame to the live transport.
    SendText(String),
    /// Take one position sample.
    RequestPosition(PositionOptions),
    /// Start continuous position sampling.
    WatchPosition(PositionOptions),
    /// Stop continuous position sampling.
    ClearWatch,
}
