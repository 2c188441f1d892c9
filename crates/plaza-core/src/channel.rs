//! Realtime Channel Manager.
//!
//! Owns the lifecycle of the single realtime connection for one identity:
//! connecting, dispatching inbound messages by type, detecting drops, and
//! reconnecting after a fixed delay up to a bounded number of retries.
//!
//! Uses the action pattern: methods take time as input and return
//! [`ChannelAction`]s for the driver to execute. The driver opens and closes
//! transports, writes text frames, and reports transport events back.
//!
//! # State Machine
//!
//! ```text
//!                 connect
//! ┌──────────────┐────────>┌────────────┐   open    ┌───────────┐
//! │ Disconnected │         │ Connecting │──────────>│ Connected │
//! └──────────────┘         └────────────┘           └───────────┘
//!        ^                   │       ^                     │
//!        │ teardown          │ close │ delay elapsed       │ close
//!        │ (any state)       ↓       │                     │
//!        │                 ┌──────────────┐<───────────────┘
//!        │                 │ Reconnecting │
//!        │                 └──────────────┘
//!        │                         │ retries exhausted
//!        │                         ↓
//!        │                    ┌────────┐
//!        └────────────────────│ Failed │
//!                             └────────┘
//! ```
//!
//! # Generations
//!
//! Every transport attempt is tagged with a [`Generation`]. Transport events
//! carry the generation they belong to, and anything not from the live
//! generation is dropped. Teardown bumps the generation, so a late event from
//! a closed transport cannot move the machine.

use std::{
    ops::Sub,
    time::{Duration, Instant},
};

use plaza_proto::{BroadcastKind, Inbound, Outbound};
use serde_json::Value;

use crate::{
    error::ChannelError,
    presence::{PresenceRecord, UserId},
};

/// Endpoint used when none is configured.
pub const DEFAULT_ENDPOINT: &str = "ws://localhost:8000";

/// Fixed wait between a drop and the next attempt.
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(3);

/// Reconnect attempts allowed after the initial attempt.
pub const DEFAULT_MAX_RETRIES: u32 = 5;

/// Identifier for one transport attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Generation(u64);

impl Generation {
    /// Raw counter value.
    pub fn get(self) -> u64 {
        self.0
    }

    /// The generation after this one.
    #[must_use]
    pub fn next(self) -> Self {
        Self(self.0.wrapping_add(1))
    }
}

impl std::fmt::Display for Generation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Channel connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChannelState {
    /// No transport and no pending attempt.
    #[default]
    Disconnected,
    /// Transport opened, waiting for it to report open.
    Connecting,
    /// Transport is open.
    Connected,
    /// Transport dropped, waiting out the reconnect delay.
    Reconnecting,
    /// Retries exhausted. No further automatic attempts.
    Failed,
}

impl std::fmt::Display for ChannelState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Reconnecting => "reconnecting",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Channel configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelConfig {
    /// Base WebSocket URL, without the `/ws/{identity}` suffix.
    pub endpoint: String,
    /// Fixed wait between a drop and the next attempt.
    pub reconnect_delay: Duration,
    /// Reconnect attempts allowed after the initial attempt.
    pub max_retries: u32,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }
}

impl ChannelConfig {
    /// Connection URI for an identity: `{endpoint}/ws/{identity}`.
    ///
    /// The identity is percent-encoded.
    pub fn url_for(&self, identity: &UserId) -> String {
        let base = self.endpoint.trim_end_matches('/');
        format!("{base}/ws/{}", urlencoding::encode(identity.as_str()))
    }
}

/// Actions returned by the channel state machine.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelAction {
    /// Open a transport to `url`, tagging its events with `generation`.
    Open {
        /// Attempt this transport belongs to
        generation: Generation,
        /// Connection URI
        url: String,
    },

    /// Close the transport for `generation` and release its handle.
    Close {
        /// Attempt to close
        generation: Generation,
    },

    /// Write this text frame to the live transport.
    Send(String),

    /// Connection state changed.
    StateChanged(ChannelState),

    /// Replace the presence record for a user.
    Upsert(PresenceRecord),

    /// Remove the presence record for a user.
    Remove(UserId),

    /// Pass-through message for subscribers.
    Broadcast {
        /// Message kind
        kind: BroadcastKind,
        /// Full message object, unmodified
        payload: Value,
    },
}

/// Realtime channel state machine.
///
/// Generic over `Instant` so the reconnect delay can run on virtual time.
#[derive(Debug, Clone)]
pub struct Channel<I = Instant>
where
    I: Copy + Ord + Send + Sync + Sub<Output = Duration>,
{
    config: ChannelConfig,
    identity: Option<UserId>,
    state: ChannelState,
    retry_count: u32,
    last_error: Option<String>,
    /// Last generation handed out.
    generation: Generation,
    /// Generation of the transport the driver currently holds, if any.
    live: Option<Generation>,
    /// When the current reconnect wait started.
    reconnect_from: Option<I>,
}

impl<I> Channel<I>
where
    I: Copy + Ord + Send + Sync + Sub<Output = Duration>,
{
    /// Create a disconnected channel.
    pub fn new(config: ChannelConfig) -> Self {
        Self {
            config,
            identity: None,
            state: ChannelState::Disconnected,
            retry_count: 0,
            last_error: None,
            generation: Generation::default(),
            live: None,
            reconnect_from: None,
        }
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> ChannelState {
        self.state
    }

    /// Whether messages can be sent right now.
    pub fn is_connected(&self) -> bool {
        self.state == ChannelState::Connected
    }

    /// Consecutive failed attempts since the last successful open.
    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    /// Most recent transport diagnostic.
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Identity the channel is connected for.
    pub fn identity(&self) -> Option<&UserId> {
        self.identity.as_ref()
    }

    /// Generation of the live transport, if one exists.
    pub fn live_generation(&self) -> Option<Generation> {
        self.live
    }

    /// Configuration.
    pub fn config(&self) -> &ChannelConfig {
        &self.config
    }

    /// Open a connection for `identity`.
    ///
    /// No-op if already `Connecting` or `Connected` for the same identity. A
    /// different identity tears the current connection down first. Calling
    /// this from `Failed` starts over with a fresh retry budget.
    ///
    /// # Errors
    ///
    /// - `ChannelError::MissingIdentity` if `identity` is empty
    pub fn connect(&mut self, identity: UserId) -> Result<Vec<ChannelAction>, ChannelError> {
        if identity.as_str().trim().is_empty() {
            return Err(ChannelError::MissingIdentity);
        }

        let mut actions = Vec::new();

        if self.identity.as_ref() == Some(&identity) {
            if matches!(self.state, ChannelState::Connecting | ChannelState::Connected) {
                tracing::debug!(%identity, state = %self.state, "connect ignored, already active");
                return Ok(actions);
            }
        } else if self.identity.is_some() {
            actions.extend(self.teardown());
        }

        self.identity = Some(identity);
        self.retry_count = 0;
        self.reconnect_from = None;
        actions.extend(self.start_attempt());

        Ok(actions)
    }

    /// Close the transport, cancel any reconnect wait, and forget the
    /// identity.
    ///
    /// Valid from any state. Events from the closed transport are ignored.
    pub fn teardown(&mut self) -> Vec<ChannelAction> {
        let mut actions = Vec::new();

        if let Some(generation) = self.live.take() {
            actions.push(ChannelAction::Close { generation });
        }

        // Invalidate anything still in flight for the old generation
        self.generation = self.generation.next();
        self.reconnect_from = None;
        self.retry_count = 0;
        self.last_error = None;

        if let Some(identity) = self.identity.take() {
            tracing::info!(%identity, "realtime channel torn down");
        }

        self.set_state(ChannelState::Disconnected, &mut actions);
        actions
    }

    /// Transport for `generation` reported open.
    pub fn handle_open(&mut self, generation: Generation) -> Vec<ChannelAction> {
        let mut actions = Vec::new();

        if self.live != Some(generation) || self.state != ChannelState::Connecting {
            tracing::debug!(%generation, state = %self.state, "ignoring stale open");
            return actions;
        }

        self.retry_count = 0;
        self.last_error = None;
        tracing::info!(%generation, "realtime channel connected");
        self.set_state(ChannelState::Connected, &mut actions);
        actions
    }

    /// Transport for `generation` closed.
    pub fn handle_close(
        &mut self,
        generation: Generation,
        reason: &str,
        now: I,
    ) -> Vec<ChannelAction> {
        if self.live != Some(generation) {
            tracing::debug!(%generation, "ignoring close from stale transport");
            return vec![];
        }

        tracing::warn!(%generation, %reason, "realtime transport closed");
        self.live = None;
        self.transport_lost(reason, now)
    }

    /// Transport for `generation` reported an error.
    ///
    /// The transport is closed and treated as lost.
    pub fn handle_error(
        &mut self,
        generation: Generation,
        reason: &str,
        now: I,
    ) -> Vec<ChannelAction> {
        if self.live != Some(generation) {
            tracing::debug!(%generation, "ignoring error from stale transport");
            return vec![];
        }

        tracing::warn!(%generation, %reason, "realtime transport error");
        self.live = None;

        let mut actions = vec![ChannelAction::Close { generation }];
        actions.extend(self.transport_lost(reason, now));
        actions
    }

    /// Text frame from the transport for `generation`.
    pub fn handle_message(&mut self, generation: Generation, text: &str) -> Vec<ChannelAction> {
        if self.live != Some(generation) {
            tracing::debug!(%generation, "ignoring message from stale transport");
            return vec![];
        }

        self.dispatch(text)
    }

    /// Decode a raw inbound payload and turn it into actions.
    ///
    /// Malformed payloads and unknown types are logged and discarded. They
    /// never change the connection state.
    pub fn dispatch(&self, text: &str) -> Vec<ChannelAction> {
        let inbound = match Inbound::decode(text) {
            Ok(inbound) => inbound,
            Err(error) => {
                tracing::warn!(%error, "discarding inbound message");
                return vec![];
            },
        };

        match inbound {
            Inbound::LocationUpdate(update) => {
                vec![ChannelAction::Upsert(PresenceRecord::from(update))]
            },

            Inbound::NearbyUsers { users, rejected } => {
                if rejected > 0 {
                    tracing::warn!(rejected, "dropped malformed nearby_users entries");
                }
                users
                    .into_iter()
                    .map(|update| ChannelAction::Upsert(PresenceRecord::from(update)))
                    .collect()
            },

            Inbound::UserDisconnected { user_id } => {
                vec![ChannelAction::Remove(UserId::from(user_id))]
            },

            Inbound::Broadcast { kind, payload } => {
                if kind == BroadcastKind::Error {
                    tracing::error!(%payload, "server reported error");
                }
                vec![ChannelAction::Broadcast { kind, payload }]
            },

            Inbound::Unknown { kind } => {
                tracing::warn!(%kind, "ignoring unknown message type");
                vec![]
            },
        }
    }

    /// Encode and send a message.
    ///
    /// # Errors
    ///
    /// - `ChannelError::SendDropped` if not `Connected`. The message is
    ///   discarded, not queued.
    /// - `ChannelError::Protocol` if the message cannot be encoded
    pub fn send(&self, message: &Outbound) -> Result<ChannelAction, ChannelError> {
        if self.state != ChannelState::Connected {
            tracing::warn!(kind = message.kind(), state = %self.state, "dropping send, not connected");
            return Err(ChannelError::SendDropped { state: self.state });
        }

        Ok(ChannelAction::Send(message.encode()?))
    }

    /// Time left before the pending reconnect attempt, if one is pending.
    pub fn time_until_reconnect(&self, now: I) -> Option<Duration> {
        let from = self.reconnect_from?;
        Some(self.config.reconnect_delay.saturating_sub(now - from))
    }

    /// Fire the reconnect attempt once the delay has elapsed.
    pub fn tick(&mut self, now: I) -> Vec<ChannelAction> {
        if self.state != ChannelState::Reconnecting {
            return vec![];
        }

        let Some(from) = self.reconnect_from else {
            return vec![];
        };

        if now - from < self.config.reconnect_delay {
            return vec![];
        }

        self.reconnect_from = None;
        self.start_attempt()
    }

    fn start_attempt(&mut self) -> Vec<ChannelAction> {
        let mut actions = Vec::new();

        let Some(identity) = self.identity.as_ref() else {
            return actions;
        };

        let url = self.config.url_for(identity);
        self.generation = self.generation.next();
        let generation = self.generation;
        self.live = Some(generation);

        tracing::debug!(%generation, %url, attempt = self.retry_count, "opening realtime transport");
        actions.push(ChannelAction::Open { generation, url });
        self.set_state(ChannelState::Connecting, &mut actions);
        actions
    }

    fn transport_lost(&mut self, reason: &str, now: I) -> Vec<ChannelAction> {
        let mut actions = Vec::new();
        self.last_error = Some(reason.to_string());

        if self.retry_count < self.config.max_retries {
            self.retry_count += 1;
            self.reconnect_from = Some(now);
            tracing::info!(
                retry = self.retry_count,
                max_retries = self.config.max_retries,
                delay_ms = self.config.reconnect_delay.as_millis() as u64,
                "scheduling reconnect"
            );
            self.set_state(ChannelState::Reconnecting, &mut actions);
        } else {
            self.reconnect_from = None;
            tracing::error!(
                max_retries = self.config.max_retries,
                %reason,
                "realtime channel failed, retries exhausted"
            );
            self.set_state(ChannelState::Failed, &mut actions);
        }

        actions
    }

    fn set_state(&mut self, state: ChannelState, actions: &mut Vec<ChannelAction>) {
        if self.state != state {
            self.state = state;
            actions.push(ChannelAction::StateChanged(state));
        }
    }
}
