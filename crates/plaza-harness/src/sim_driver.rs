//! Simulation driver implementing the Driver trait.
//!
//! `SimDriver` stands in for the WebSocket and the device sensor so the same
//! [`plaza_client::Runtime`] orchestration runs in tests. It records every
//! transport open, close and sent frame, and lets the test script transport
//! events and position results.
//!
//! Clones share state: keep one handle in the test and move the other into the
//! runtime.

use std::{
    collections::{BTreeSet, VecDeque},
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use plaza_client::{Driver, PositionEvent, TransportEvent};
use plaza_core::{Generation, PositionOptions, PositionSample};

/// Error type for simulation driver.
#[derive(Debug, Clone)]
pub struct SimDriverError(pub String);

impl std::fmt::Display for SimDriverError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SimDriverError: {}", self.0)
    }
}

impl std::error::Error for SimDriverError {}

/// How the simulated server answers an open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectMode {
    /// Nothing happens until the test injects events.
    #[default]
    Manual,
    /// Every open succeeds on the next poll.
    Accept,
    /// Every open is closed by the server on the next poll.
    Refuse,
}

#[derive(Default)]
struct SharedState {
    mode: ConnectMode,
    opens: Vec<(Generation, String)>,
    closes: Vec<Generation>,
    /// Transports opened and not yet closed by either side.
    open_transports: BTreeSet<Generation>,
    live: Option<Generation>,
    sent: Vec<String>,
    transport_events: VecDeque<(Generation, TransportEvent)>,
    positioning_unavailable: bool,
    watching: bool,
    position_requests: usize,
    position_events: VecDeque<PositionEvent>,
}

/// Simulation driver for deterministic testing.
#[derive(Clone, Default)]
pub struct SimDriver {
    state: Arc<Mutex<SharedState>>,
}

impl SimDriver {
    /// Create a driver with manual transport control and a working sensor.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a driver that answers opens according to `mode`.
    pub fn with_mode(mode: ConnectMode) -> Self {
        let driver = Self::new();
        driver.set_mode(mode);
        driver
    }

    /// Change how future opens are answered.
    pub fn set_mode(&self, mode: ConnectMode) {
        self.lock().mode = mode;
    }

    /// Simulate a device with no positioning capability.
    pub fn disable_positioning(&self) {
        self.lock().positioning_unavailable = true;
    }

    /// Number of transports opened so far.
    pub fn open_count(&self) -> usize {
        self.lock().opens.len()
    }

    /// Every open so far, in order.
    pub fn opens(&self) -> Vec<(Generation, String)> {
        self.lock().opens.clone()
    }

    /// Every close the runtime requested, in order.
    pub fn closes(&self) -> Vec<Generation> {
        self.lock().closes.clone()
    }

    /// Transports currently open.
    pub fn open_transports(&self) -> usize {
        self.lock().open_transports.len()
    }

    /// Generation of the most recently opened transport, if still open.
    pub fn live_generation(&self) -> Option<Generation> {
        self.lock().live
    }

    /// Take all frames written so far.
    pub fn take_sent(&self) -> Vec<String> {
        std::mem::take(&mut self.lock().sent)
    }

    /// Whether a continuous position watch is active.
    pub fn is_watching(&self) -> bool {
        self.lock().watching
    }

    /// Number of one-shot position requests so far.
    pub fn position_requests(&self) -> usize {
        self.lock().position_requests
    }

    /// Report the live transport as open.
    pub fn inject_open(&self) {
        self.inject_live(TransportEvent::Opened);
    }

    /// Deliver a text frame on the live transport.
    pub fn inject_message(&self, text: impl Into<String>) {
        self.inject_live(TransportEvent::Message(text.into()));
    }

    /// Close the live transport from the server side.
    pub fn inject_close(&self, reason: impl Into<String>) {
        let mut state = self.lock();
        if let Some(generation) = state.live.take() {
            state.open_transports.remove(&generation);
            state
                .transport_events
                .push_back((generation, TransportEvent::Closed { reason: reason.into() }));
        }
    }

    /// Queue an arbitrary transport event, e.g. from a stale generation.
    pub fn inject_transport(&self, generation: Generation, event: TransportEvent) {
        self.lock().transport_events.push_back((generation, event));
    }

    /// Queue a device reading.
    pub fn inject_sample(&self, sample: PositionSample) {
        self.lock().position_events.push_back(PositionEvent::Sample(sample));
    }

    /// Queue a position result.
    pub fn inject_position(&self, event: PositionEvent) {
        self.lock().position_events.push_back(event);
    }

    fn inject_live(&self, event: TransportEvent) {
        let mut state = self.lock();
        if let Some(generation) = state.live {
            state.transport_events.push_back((generation, event));
        } else {
            tracing::warn!(?event, "no live transport to inject into");
        }
    }

    fn lock(&self) -> MutexGuard<'_, SharedState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Driver for SimDriver {
    type Error = SimDriverError;

    async fn open(&mut self, generation: Generation, url: &str) -> Result<(), Self::Error> {
        let mut state = self.lock();
        state.opens.push((generation, url.to_string()));
        state.open_transports.insert(generation);
        state.live = Some(generation);

        match state.mode {
            ConnectMode::Manual => {},
            ConnectMode::Accept => {
                state.transport_events.push_back((generation, TransportEvent::Opened));
            },
            ConnectMode::Refuse => {
                state.open_transports.remove(&generation);
                state.live = None;
                state.transport_events.push_back((generation, TransportEvent::Closed {
                    reason: "connection refused".to_string(),
                }));
            },
        }
        Ok(())
    }

    async fn close(&mut self, generation: Generation) {
        let mut state = self.lock();
        state.closes.push(generation);
        state.open_transports.remove(&generation);
        if state.live == Some(generation) {
            state.live = None;
        }
    }

    async fn send_text(&mut self, text: String) -> Result<(), Self::Error> {
        let mut state = self.lock();
        if state.live.is_none() {
            return Err(SimDriverError("send with no live transport".to_string()));
        }
        state.sent.push(text);
        Ok(())
    }

    async fn poll_transport(&mut self) -> Result<Option<(Generation, TransportEvent)>, Self::Error> {
        Ok(self.lock().transport_events.pop_front())
    }

    fn positioning_available(&self) -> bool {
        !self.lock().positioning_unavailable
    }

    fn request_position(&mut self, _options: PositionOptions) {
        self.lock().position_requests += 1;
    }

    fn watch_position(&mut self, _options: PositionOptions) {
        self.lock().watching = true;
    }

    fn clear_watch(&mut self) {
        self.lock().watching = false;
    }

    async fn poll_position(&mut self) -> Option<PositionEvent> {
        self.lock().position_events.pop_front()
    }
}
