//! Generic runtime for presence orchestration.
//!
//! The Runtime drives the event loop, coordinating between:
//! - [`Session`]: channel, presence cache and sampler
//! - [`Driver`]: platform I/O
//!
//! Reactive views of connection state, presence (full and self-excluding)
//! and tracking status are published on `tokio::sync::watch` channels so any
//! number of readers can follow them without touching the session. Watch
//! channels only carry the latest value, so per-sample tracking failures are
//! also sent on a `tokio::sync::broadcast` channel, one message per
//! occurrence.

use std::time::Duration;

use plaza_core::{
    ChannelError, ChannelState, Environment, PresenceRecord, TrackingError, TrackingStatus, UserId,
};
use thiserror::Error;
use tokio::sync::{broadcast, watch};

use crate::{
    Driver,
    command::Command,
    event::{SessionEvent, TransportEvent},
    session::{Session, SessionConfig},
};

/// Default pause between event loop cycles.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Upper bound on transport events handled per cycle, so a burst of inbound
/// messages cannot starve the reconnect timer.
const MAX_EVENTS_PER_CYCLE: usize = 256;

/// Tracking failures buffered for slow readers before they start lagging.
const TRACKING_ERROR_CAPACITY: usize = 16;

/// Errors surfaced by the runtime.
#[derive(Debug, Error)]
pub enum RuntimeError<E: std::error::Error + 'static> {
    /// The driver failed in a way the session cannot absorb.
    #[error("driver error: {0}")]
    Driver(#[source] E),

    /// Channel operation rejected.
    #[error(transparent)]
    Channel(#[from] ChannelError),

    /// Tracking could not start.
    #[error(transparent)]
    Tracking(#[from] TrackingError),
}

struct Views {
    state: watch::Sender<ChannelState>,
    presence: watch::Sender<Vec<PresenceRecord>>,
    others: watch::Sender<Vec<PresenceRecord>>,
    tracking: watch::Sender<TrackingStatus>,
    tracking_errors: broadcast::Sender<TrackingError>,
}

impl Views {
    fn new() -> Self {
        Self {
            state: watch::channel(ChannelState::Disconnected).0,
            presence: watch::channel(Vec::new()).0,
            others: watch::channel(Vec::new()).0,
            tracking: watch::channel(TrackingStatus::default()).0,
            tracking_errors: broadcast::channel(TRACKING_ERROR_CAPACITY).0,
        }
    }
}

/// Generic runtime that orchestrates a Session and a Driver.
///
/// # Type Parameters
///
/// - `D`: Platform-specific I/O driver
/// - `E`: Environment providing time
pub struct Runtime<D, E>
where
    D: Driver,
    E: Environment,
{
    driver: D,
    env: E,
    session: Session<E>,
    poll_interval: Duration,
    views: Views,
}

impl<D, E> Runtime<D, E>
where
    D: Driver,
    E: Environment,
{
    /// Create a runtime with a fresh, disconnected session.
    pub fn new(driver: D, env: E, config: SessionConfig) -> Self {
        let session = Session::new(env.clone(), config);
        Self { driver, env, session, poll_interval: DEFAULT_POLL_INTERVAL, views: Views::new() }
    }

    /// Override the pause between cycles.
    #[must_use]
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Follow the channel connection state.
    pub fn connection_state(&self) -> watch::Receiver<ChannelState> {
        self.views.state.subscribe()
    }

    /// Follow the presence snapshot.
    pub fn presence(&self) -> watch::Receiver<Vec<PresenceRecord>> {
        self.views.presence.subscribe()
    }

    /// Follow the presence snapshot without the local user's own record.
    pub fn others(&self) -> watch::Receiver<Vec<PresenceRecord>> {
        self.views.others.subscribe()
    }

    /// Follow the tracking status.
    pub fn tracking(&self) -> watch::Receiver<TrackingStatus> {
        self.views.tracking.subscribe()
    }

    /// Receive every tracking failure as it happens, including repeats of
    /// the same condition.
    pub fn tracking_errors(&self) -> broadcast::Receiver<TrackingError> {
        self.views.tracking_errors.subscribe()
    }

    /// The session.
    pub fn session(&self) -> &Session<E> {
        &self.session
    }

    /// The session, for subscribing to broadcasts.
    pub fn session_mut(&mut self) -> &mut Session<E> {
        &mut self.session
    }

    /// The driver.
    pub fn driver(&self) -> &D {
        &self.driver
    }

    /// The driver, mutably.
    pub fn driver_mut(&mut self) -> &mut D {
        &mut self.driver
    }

    /// Connect the channel for `identity`.
    ///
    /// # Errors
    ///
    /// - `RuntimeError::Channel` if the identity is unusable
    pub async fn connect(&mut self, identity: UserId) -> Result<(), RuntimeError<D::Error>> {
        self.session.connect(identity)?;
        self.execute_commands().await;
        self.publish();
        Ok(())
    }

    /// Start location tracking.
    ///
    /// # Errors
    ///
    /// - `RuntimeError::Tracking` if the device has no positioning capability.
    ///   The condition is also sent to [`Self::tracking_errors`] readers.
    pub async fn start_tracking(&mut self) -> Result<(), RuntimeError<D::Error>> {
        let available = self.driver.positioning_available();
        let result = self.session.start_tracking(available);
        if let Err(error) = &result {
            self.notify_tracking_failed(*error);
        }
        self.publish();
        result?;

        self.execute_commands().await;
        Ok(())
    }

    /// Stop location tracking.
    pub async fn stop_tracking(&mut self) {
        self.session.stop_tracking();
        self.execute_commands().await;
        self.publish();
    }

    /// Join an event room.
    ///
    /// If the channel is not connected yet, the join is announced on the next
    /// open instead.
    ///
    /// # Errors
    ///
    /// - `RuntimeError::Channel` if the message cannot be encoded
    pub async fn join_event(&mut self, event_id: &str) -> Result<(), RuntimeError<D::Error>> {
        match self.session.join_event(event_id) {
            Err(error) if error.is_transient() => {
                tracing::debug!(%event_id, "join deferred until connected");
            },
            result => result?,
        }
        self.execute_commands().await;
        Ok(())
    }

    /// Leave an event room.
    ///
    /// # Errors
    ///
    /// - `RuntimeError::Channel` if the message cannot be encoded
    pub async fn leave_event(&mut self, event_id: &str) -> Result<(), RuntimeError<D::Error>> {
        match self.session.leave_event(event_id) {
            Err(error) if error.is_transient() => {},
            result => result?,
        }
        self.execute_commands().await;
        Ok(())
    }

    /// Run the event loop until `stop` turns true, then shut down.
    ///
    /// # Errors
    ///
    /// Returns an error if the driver fails while polling.
    pub async fn run(mut self, stop: watch::Receiver<bool>) -> Result<(), RuntimeError<D::Error>> {
        while !stop_requested(&stop) {
            self.process_cycle().await?;
            self.env.sleep(self.poll_interval).await;
        }

        self.shutdown().await;
        Ok(())
    }

    /// Process one cycle of the event loop.
    ///
    /// 1. Drains ready transport events and position results
    /// 2. Ticks the session (due reconnects, stale presence)
    /// 3. Executes resulting commands through the driver
    /// 4. Republishes the reactive views
    ///
    /// # Errors
    ///
    /// Returns an error if the driver fails while polling the transport.
    pub async fn process_cycle(&mut self) -> Result<(), RuntimeError<D::Error>> {
        for _ in 0..MAX_EVENTS_PER_CYCLE {
            match self.driver.poll_transport().await.map_err(RuntimeError::Driver)? {
                Some((generation, event)) => {
                    self.session.handle_transport(generation, event);
                },
                None => break,
            }
        }

        while let Some(event) = self.driver.poll_position().await {
            for outcome in self.session.handle_position(event) {
                if let SessionEvent::TrackingFailed(error) = outcome {
                    self.notify_tracking_failed(error);
                }
            }
        }

        self.session.handle_tick();
        self.execute_commands().await;
        self.publish();
        Ok(())
    }

    /// Tear the session down: stop tracking, cancel any reconnect, close the
    /// transport.
    pub async fn shutdown(&mut self) {
        self.session.stop_tracking();
        self.session.teardown();
        self.execute_commands().await;
        self.publish();
        tracing::info!("presence runtime stopped");
    }

    /// Execute pending session commands until none remain.
    ///
    /// A failed open is fed back to the session as a transport error, which
    /// may itself produce further commands.
    async fn execute_commands(&mut self) {
        let mut pending = self.session.take_commands();

        while !pending.is_empty() {
            for command in pending {
                match command {
                    Command::Open { generation, url } => {
                        if let Err(error) = self.driver.open(generation, &url).await {
                            tracing::warn!(%generation, %error, "transport open failed");
                            self.session.handle_transport(generation, TransportEvent::Error {
                                reason: error.to_string(),
                            });
                        }
                    },
                    Command::Close { generation } => self.driver.close(generation).await,
                    Command::SendText(text) => {
                        // A broken transport reports its own close; nothing to do here
                        if let Err(error) = self.driver.send_text(text).await {
                            tracing::warn!(%error, "transport send failed");
                        }
                    },
                    Command::RequestPosition(options) => self.driver.request_position(options),
                    Command::WatchPosition(options) => self.driver.watch_position(options),
                    Command::ClearWatch => self.driver.clear_watch(),
                }
            }

            pending = self.session.take_commands();
        }
    }

    fn publish(&self) {
        let state = self.session.state();
        self.views.state.send_if_modified(|current| replace_if_changed(current, state));

        let snapshot = self.session.snapshot();
        self.views.presence.send_if_modified(|current| replace_if_changed(current, snapshot));

        let others = self.session.others();
        self.views.others.send_if_modified(|current| replace_if_changed(current, others));

        let status = self.session.tracking_status();
        self.views.tracking.send_if_modified(|current| replace_if_changed(current, status));
    }

    fn notify_tracking_failed(&self, error: TrackingError) {
        // No receivers is fine
        let _ = self.views.tracking_errors.send(error);
    }
}

fn stop_requested(stop: &watch::Receiver<bool>) -> bool {
    *stop.borrow()
}

fn replace_if_changed<T: PartialEq>(current: &mut T, next: T) -> bool {
    if *current == next {
        return false;
    }
    *current = next;
    true
}
