//! Driver trait for abstracting I/O operations.
//!
//! The [`Driver`] trait decouples the runtime from a specific transport and
//! positioning API. Production uses a WebSocket and a device position source;
//! the simulation harness scripts both.

use std::future::Future;

use plaza_core::{Generation, PositionOptions};

use crate::event::{PositionEvent, TransportEvent};

/// Abstracts platform I/O for the presence runtime.
///
/// Polling methods never block: they return `None` when nothing is ready so
/// the runtime can keep ticking timers.
pub trait Driver: Send {
    /// Platform-specific error type.
    type Error: std::error::Error + Send + 'static;

    /// Open a transport to `url`. Its events are reported under `generation`.
    ///
    /// # Errors
    ///
    /// Returns an error if the attempt cannot even be started. The runtime
    /// reports that to the session as a transport error for `generation`.
    fn open(
        &mut self,
        generation: Generation,
        url: &str,
    ) -> impl Future<Output = Result<(), Self::Error>> + Send;

    /// Close the transport for `generation` and release its handle.
    ///
    /// No-op if that transport is already gone.
    fn close(&mut self, generation: Generation) -> impl Future<Output = ()> + Send;

    /// Write a text frame to the live transport.
    ///
    /// # Errors
    ///
    /// Returns an error if the live transport rejected the frame.
    fn send_text(&mut self, text: String) -> impl Future<Output = Result<(), Self::Error>> + Send;

    /// Next transport event, if one is ready.
    fn poll_transport(
        &mut self,
    ) -> impl Future<Output = Result<Option<(Generation, TransportEvent)>, Self::Error>> + Send;

    /// Whether the device has any positioning capability.
    fn positioning_available(&self) -> bool;

    /// Take one position sample. The result arrives via `poll_position`.
    fn request_position(&mut self, options: PositionOptions);

    /// Start continuous sampling. Results arrive via `poll_position`.
    fn watch_position(&mut self, options: PositionOptions);

    /// Stop continuous sampling.
    fn clear_watch(&mut self);

    /// Next position result, if one is ready.
    fn poll_position(&mut self) -> impl Future<Output = Option<PositionEvent>> + Send;
}
