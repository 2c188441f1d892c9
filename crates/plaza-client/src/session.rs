//! Presence session.
//!
//! The [`Session`] composes the three core state machines for one signed-in
//! user: the realtime [`Channel`], the [`PresenceCache`] and the geolocation
//! [`Sampler`]. It applies channel actions to the cache, publishes local
//! samples, delivers pass-through broadcasts to subscribers, and accumulates
//! [`Command`]s for the driver to execute in the next I/O cycle.
//!
//! Connection status and tracking status are tracked separately: a session
//! can be tracking locally while disconnected, and connected while not
//! tracking.

use std::collections::{BTreeSet, HashMap};

use plaza_core::{
    Channel, ChannelAction, ChannelConfig, ChannelError, ChannelState, Environment, Generation,
    PositionOptions, PresenceCache, PresenceConfig, PresenceRecord, Sampler, SamplerAction,
    TrackingError, TrackingStatus, UserId,
};
use plaza_proto::{BroadcastKind, Outbound};
use serde_json::Value;

use crate::{
    command::Command,
    event::{PositionEvent, SessionEvent, TransportEvent},
};

/// Callback invoked with the payload of a pass-through broadcast.
pub type Subscriber = Box<dyn FnMut(&Value) + Send>;

/// Session configuration.
#[derive(Debug, Clone, Default)]
pub struct SessionConfig {
    /// Realtime channel settings
    pub channel: ChannelConfig,
    /// Geolocation request options
    pub position: PositionOptions,
    /// Presence cache settings
    pub presence: PresenceConfig,
}

/// One user's realtime presence session.
///
/// Generic over Environment so reconnection and staleness run on whatever
/// clock the environment provides.
pub struct Session<E: Environment> {
    env: E,
    channel: Channel<E::Instant>,
    presence: PresenceCache<E::Instant>,
    sampler: Sampler,
    subscribers: HashMap<BroadcastKind, Vec<Subscriber>>,
    joined_events: BTreeSet<String>,
    commands: Vec<Command>,
}

impl<E: Environment> Session<E> {
    /// Create a disconnected, idle session.
    pub fn new(env: E, config: SessionConfig) -> Self {
        Self {
            env,
            channel: Channel::new(config.channel),
            presence: PresenceCache::new(config.presence),
            sampler: Sampler::new(config.position),
            subscribers: HashMap::new(),
            joined_events: BTreeSet::new(),
            commands: Vec::new(),
        }
    }

    /// Connect the realtime channel for `identity`.
    ///
    /// Switching to a different identity tears the old session down first,
    /// dropping its cached presence and joined events.
    pub fn connect(&mut self, identity: UserId) -> Result<Vec<SessionEvent>, ChannelError> {
        let mut events = Vec::new();
        if self.channel.identity().is_some_and(|current| *current != identity) {
            events.extend(self.teardown());
        }

        let actions = self.channel.connect(identity)?;
        events.extend(self.apply_channel_actions(actions));
        Ok(events)
    }

    /// Close the channel, cancel pending reconnects, and forget the identity.
    ///
    /// Cached presence and joined events belong to the old identity and are
    /// dropped. Location tracking is left as is.
    pub fn teardown(&mut self) -> Vec<SessionEvent> {
        let actions = self.channel.teardown();
        let mut events = self.apply_channel_actions(actions);

        self.joined_events.clear();
        if !self.presence.is_empty() {
            self.presence.clear();
            events.push(SessionEvent::PresenceChanged);
        }
        events
    }

    /// Feed a transport event for `generation`.
    pub fn handle_transport(
        &mut self,
        generation: Generation,
        event: TransportEvent,
    ) -> Vec<SessionEvent> {
        let now = self.env.now();
        let actions = match event {
            TransportEvent::Opened => self.channel.handle_open(generation),
            TransportEvent::Message(text) => self.channel.handle_message(generation, &text),
            TransportEvent::Closed { reason } => {
                self.channel.handle_close(generation, &reason, now)
            },
            TransportEvent::Error { reason } => {
                self.channel.handle_error(generation, &reason, now)
            },
        };
        self.apply_channel_actions(actions)
    }

    /// Process a time tick: fire due reconnects and evict stale presence.
    pub fn handle_tick(&mut self) -> Vec<SessionEvent> {
        let now = self.env.now();
        let actions = self.channel.tick(now);
        let mut events = self.apply_channel_actions(actions);

        let keep = self.channel.identity().cloned();
        if !self.presence.evict_stale(now, keep.as_ref()).is_empty() {
            events.push(SessionEvent::PresenceChanged);
        }
        events
    }

    /// Start location tracking.
    ///
    /// `capability_available` is whether the device has positioning at all.
    pub fn start_tracking(
        &mut self,
        capability_available: bool,
    ) -> Result<Vec<SessionEvent>, TrackingError> {
        let actions = self.sampler.start_tracking(capability_available)?;
        Ok(self.apply_sampler_actions(actions))
    }

    /// Stop location tracking. Idempotent.
    pub fn stop_tracking(&mut self) -> Vec<SessionEvent> {
        let actions = self.sampler.stop_tracking();
        self.apply_sampler_actions(actions)
    }

    /// Feed a position result from the device.
    ///
    /// A good sample updates our own presence record right away, so local
    /// views stay live while offline. It is transmitted only when the channel
    /// is connected.
    pub fn handle_position(&mut self, event: PositionEvent) -> Vec<SessionEvent> {
        let mut events = Vec::new();

        match event {
            PositionEvent::Sample(sample) => {
                let Some(fix) = self.sampler.handle_sample(sample) else {
                    if self.sampler.is_tracking()
                        && let Some(condition) = self.sampler.error()
                    {
                        events.push(SessionEvent::TrackingFailed(condition));
                        events.push(SessionEvent::TrackingChanged);
                    }
                    return events;
                };

                if let Some(self_id) = self.channel.identity().cloned() {
                    self.presence.upsert(fix.to_record(self_id), self.env.now());
                    events.push(SessionEvent::PresenceChanged);
                } else {
                    tracing::debug!("no identity yet, local sample not cached");
                }

                if self.channel.is_connected() {
                    self.send_or_log(&fix.to_outbound());
                }
                events.push(SessionEvent::TrackingChanged);
            },
            PositionEvent::Failed(error) => {
                let condition = self.sampler.handle_error(error);
                events.push(SessionEvent::TrackingFailed(condition));
                events.push(SessionEvent::TrackingChanged);
            },
        }

        events
    }

    /// Join an event room.
    ///
    /// The event is remembered and announced again after every reconnect. If
    /// the channel is down right now the immediate send is dropped and the
    /// announcement happens on the next open.
    pub fn join_event(&mut self, event_id: impl Into<String>) -> Result<(), ChannelError> {
        let event_id = event_id.into();
        self.joined_events.insert(event_id.clone());
        self.send(&Outbound::JoinEvent { event_id })
    }

    /// Leave an event room and stop re-announcing it.
    pub fn leave_event(&mut self, event_id: &str) -> Result<(), ChannelError> {
        self.joined_events.remove(event_id);
        self.send(&Outbound::LeaveEvent { event_id: event_id.to_string() })
    }

    /// Send a message over the channel.
    ///
    /// Dropped (not queued) unless connected.
    pub fn send(&mut self, message: &Outbound) -> Result<(), ChannelError> {
        if let ChannelAction::Send(text) = self.channel.send(message)? {
            self.commands.push(Command::SendText(text));
        }
        Ok(())
    }

    /// Register a callback for a pass-through broadcast kind.
    ///
    /// Callbacks run in registration order with the unmodified payload.
    pub fn subscribe(&mut self, kind: BroadcastKind, callback: impl FnMut(&Value) + Send + 'static) {
        self.subscribers.entry(kind).or_default().push(Box::new(callback));
    }

    /// Take pending driver commands.
    pub fn take_commands(&mut self) -> Vec<Command> {
        std::mem::take(&mut self.commands)
    }

    /// Channel connection state.
    pub fn state(&self) -> ChannelState {
        self.channel.state()
    }

    /// Realtime channel.
    pub fn channel(&self) -> &Channel<E::Instant> {
        &self.channel
    }

    /// Presence cache.
    pub fn presence(&self) -> &PresenceCache<E::Instant> {
        &self.presence
    }

    /// Geolocation sampler.
    pub fn sampler(&self) -> &Sampler {
        &self.sampler
    }

    /// Identity the session is connected for.
    pub fn identity(&self) -> Option<&UserId> {
        self.channel.identity()
    }

    /// Every known position, ordered by user ID.
    pub fn snapshot(&self) -> Vec<PresenceRecord> {
        self.presence.snapshot()
    }

    /// Known positions of everyone except the local user.
    pub fn others(&self) -> Vec<PresenceRecord> {
        match self.channel.identity() {
            Some(self_id) => self.presence.excluding_self(self_id),
            None => self.presence.snapshot(),
        }
    }

    /// Tracking status, independent of the channel state.
    pub fn tracking_status(&self) -> TrackingStatus {
        self.sampler.status()
    }

    /// Event rooms re-announced on every open.
    pub fn joined_events(&self) -> impl Iterator<Item = &str> {
        self.joined_events.iter().map(String::as_str)
    }

    fn apply_channel_actions(&mut self, actions: Vec<ChannelAction>) -> Vec<SessionEvent> {
        let now = self.env.now();
        let mut events = Vec::new();
        let mut presence_changed = false;

        for action in actions {
            match action {
                ChannelAction::Open { generation, url } => {
                    self.commands.push(Command::Open { generation, url });
                },
                ChannelAction::Close { generation } => {
                    self.commands.push(Command::Close { generation });
                },
                ChannelAction::Send(text) => {
                    self.commands.push(Command::SendText(text));
                },
                ChannelAction::StateChanged(state) => {
                    if state == ChannelState::Connected {
                        self.announce_joined_events();
                    }
                    events.push(SessionEvent::ConnectionChanged(state));
                },
                ChannelAction::Upsert(record) => {
                    self.presence.upsert(record, now);
                    presence_changed = true;
                },
                ChannelAction::Remove(user_id) => {
                    presence_changed |= self.presence.remove(&user_id).is_some();
                },
                ChannelAction::Broadcast { kind, payload } => {
                    if let Some(callbacks) = self.subscribers.get_mut(&kind) {
                        for callback in callbacks.iter_mut() {
                            callback(&payload);
                        }
                    }
                    events.push(SessionEvent::Broadcast { kind, payload });
                },
            }
        }

        if presence_changed {
            events.push(SessionEvent::PresenceChanged);
        }
        events
    }

    fn apply_sampler_actions(&mut self, actions: Vec<SamplerAction>) -> Vec<SessionEvent> {
        if actions.is_empty() {
            return vec![];
        }

        for action in actions {
            self.commands.push(match action {
                SamplerAction::RequestPosition(options) => Command::RequestPosition(options),
                SamplerAction::WatchPosition(options) => Command::WatchPosition(options),
                SamplerAction::ClearWatch => Command::ClearWatch,
            });
        }
        vec![SessionEvent::TrackingChanged]
    }

    fn announce_joined_events(&mut self) {
        let joined: Vec<String> = self.joined_events.iter().cloned().collect();
        for event_id in joined {
            tracing::debug!(%event_id, "re-announcing joined event");
            self.send_or_log(&Outbound::JoinEvent { event_id });
        }
    }

    fn send_or_log(&mut self, message: &Outbound) {
        if let Err(error) = self.send(message) {
            tracing::debug!(%error, kind = message.kind(), "send skipped");
        }
    }
}
