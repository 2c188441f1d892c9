//! Observable state captured for invariant checks.

use plaza_client::Runtime;
use plaza_core::{ChannelState, Environment, PresenceRecord, TrackingStatus, UserId};
use serde::Serialize;

use crate::SimDriver;

/// Point-in-time view of one runtime: its session, its driver, and the
/// views it last published.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SystemSnapshot {
    /// Local user, if connected for one.
    pub self_id: Option<UserId>,
    /// Channel state.
    pub state: ChannelStateSnapshot,
    /// Consecutive failed attempts.
    pub retry_count: u32,
    /// Configured retry budget.
    pub max_retries: u32,
    /// Full presence snapshot.
    pub records: Vec<PresenceRecord>,
    /// The self-excluding view.
    pub others: Vec<PresenceRecord>,
    /// Transports the driver holds open.
    pub open_transports: usize,
    /// Continuous sampling active in the sampler.
    pub tracking: bool,
    /// Continuous sampling active in the driver.
    pub watching: bool,
    /// Connection state readers last saw.
    #[serde(skip)]
    pub published_state: ChannelStateSnapshot,
    /// Presence snapshot readers last saw.
    #[serde(skip)]
    pub published_records: Vec<PresenceRecord>,
    /// Self-excluding view readers last saw.
    #[serde(skip)]
    pub published_others: Vec<PresenceRecord>,
}

/// Serializable mirror of [`ChannelState`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelStateSnapshot {
    /// See [`ChannelState::Disconnected`]
    Disconnected,
    /// See [`ChannelState::Connecting`]
    Connecting,
    /// See [`ChannelState::Connected`]
    Connected,
    /// See [`ChannelState::Reconnecting`]
    Reconnecting,
    /// See [`ChannelState::Failed`]
    Failed,
}

impl From<ChannelState> for ChannelStateSnapshot {
    fn from(state: ChannelState) -> Self {
        match state {
            ChannelState::Disconnected => Self::Disconnected,
            ChannelState::Connecting => Self::Connecting,
            ChannelState::Connected => Self::Connected,
            ChannelState::Reconnecting => Self::Reconnecting,
            ChannelState::Failed => Self::Failed,
        }
    }
}

impl SystemSnapshot {
    /// Capture the observable state of `runtime`.
    pub fn capture<E: Environment>(runtime: &Runtime<SimDriver, E>) -> Self {
        let session = runtime.session();
        let driver = runtime.driver();
        let channel = session.channel();
        let tracking: TrackingStatus = session.tracking_status();

        Self {
            self_id: session.identity().cloned(),
            state: channel.state().into(),
            retry_count: channel.retry_count(),
            max_retries: channel.config().max_retries,
            records: session.snapshot(),
            others: session.others(),
            open_transports: driver.open_transports(),
            tracking: tracking.tracking,
            watching: driver.is_watching(),
            published_state: (*runtime.connection_state().borrow()).into(),
            published_records: runtime.presence().borrow().clone(),
            published_others: runtime.others().borrow().clone(),
        }
    }

    /// Snapshot of an idle, disconnected system.
    pub fn empty() -> Self {
        Self {
            self_id: None,
            state: ChannelStateSnapshot::Disconnected,
            retry_count: 0,
            max_retries: 0,
            records: Vec::new(),
            others: Vec::new(),
            open_transports: 0,
            tracking: false,
            watching: false,
            published_state: ChannelStateSnapshot::Disconnected,
            published_records: Vec::new(),
            published_others: Vec::new(),
        }
    }
}
