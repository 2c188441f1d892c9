//! WebSocket driver.
//!
//! [`WsDriver`] implements [`Driver`] over `tokio-tungstenite`. Each open
//! spawns a task that owns one socket and reports its events on a shared
//! channel, tagged with the generation it was opened for. Protocol logic stays
//! in the Sans-IO session; this layer only moves text frames.
//!
//! Positioning is delegated to a [`PositionSource`], since the platform
//! sensor is unrelated to the socket.

use futures::{SinkExt, StreamExt};
use plaza_core::{Generation, PositionOptions};
use thiserror::Error;
use tokio::{sync::mpsc, task::AbortHandle};
use tokio_tungstenite::tungstenite::Message;

use crate::{
    Driver,
    event::{PositionEvent, TransportEvent},
};

/// Transport errors.
#[derive(Debug, Error)]
pub enum TransportError {
    /// No live socket to write to.
    #[error("no live transport")]
    NotConnected,

    /// The socket task is gone.
    #[error("transport closed")]
    Closed,
}

/// Device positioning for [`WsDriver`].
pub trait PositionSource: Send {
    /// Whether the device can produce positions at all.
    fn available(&self) -> bool;

    /// Produce one reading as soon as possible.
    fn request(&mut self, options: PositionOptions);

    /// Produce readings continuously.
    fn watch(&mut self, options: PositionOptions);

    /// Stop continuous readings.
    fn clear(&mut self);

    /// Next reading or failure, if one is ready.
    fn poll(&mut self) -> Option<PositionEvent>;
}

struct Socket {
    generation: Generation,
    outbound: mpsc::UnboundedSender<Message>,
    task: AbortHandle,
}

/// Production driver: WebSocket transport plus a position source.
pub struct WsDriver<P: PositionSource> {
    events_tx: mpsc::UnboundedSender<(Generation, TransportEvent)>,
    events_rx: mpsc::UnboundedReceiver<(Generation, TransportEvent)>,
    socket: Option<Socket>,
    positions: P,
}

impl<P: PositionSource> WsDriver<P> {
    /// Create a driver with no open socket.
    pub fn new(positions: P) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self { events_tx, events_rx, socket: None, positions }
    }

    /// The position source.
    pub fn positions(&self) -> &P {
        &self.positions
    }

    fn drop_socket(&mut self) {
        if let Some(socket) = self.socket.take() {
            socket.task.abort();
        }
    }
}

impl<P: PositionSource> Drop for WsDriver<P> {
    fn drop(&mut self) {
        self.drop_socket();
    }
}

impl<P: PositionSource> Driver for WsDriver<P> {
    type Error = TransportError;

    async fn open(&mut self, generation: Generation, url: &str) -> Result<(), Self::Error> {
        // One live socket at a time
        self.drop_socket();

        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let events = self.events_tx.clone();
        let handle = tokio::spawn(run_socket(generation, url.to_string(), outbound_rx, events));

        self.socket =
            Some(Socket { generation, outbound: outbound_tx, task: handle.abort_handle() });
        Ok(())
    }

    async fn close(&mut self, generation: Generation) {
        match self.socket.take() {
            Some(socket) if socket.generation == generation => {
                // Writer task drains this before exiting
                let _ = socket.outbound.send(Message::Close(None));
                socket.task.abort();
            },
            other => self.socket = other,
        }
    }

    async fn send_text(&mut self, text: String) -> Result<(), Self::Error> {
        let socket = self.socket.as_ref().ok_or(TransportError::NotConnected)?;
        socket.outbound.send(Message::Text(text.into())).map_err(|_| TransportError::Closed)
    }

    async fn poll_transport(&mut self) -> Result<Option<(Generation, TransportEvent)>, Self::Error> {
        Ok(self.events_rx.try_recv().ok())
    }

    fn positioning_available(&self) -> bool {
        self.positions.available()
    }

    fn request_position(&mut self, options: PositionOptions) {
        self.positions.request(options);
    }

    fn watch_position(&mut self, options: PositionOptions) {
        self.positions.watch(options);
    }

    fn clear_watch(&mut self) {
        self.positions.clear();
    }

    async fn poll_position(&mut self) -> Option<PositionEvent> {
        self.positions.poll()
    }
}

/// Own one socket for its whole life, reporting every event under
/// `generation`.
async fn run_socket(
    generation: Generation,
    url: String,
    mut outbound: mpsc::UnboundedReceiver<Message>,
    events: mpsc::UnboundedSender<(Generation, TransportEvent)>,
) {
    let report = |event: TransportEvent| {
        let _ = events.send((generation, event));
    };

    let stream = match tokio_tungstenite::connect_async(url.as_str()).await {
        Ok((stream, _response)) => stream,
        Err(error) => {
            report(TransportEvent::Error { reason: error.to_string() });
            return;
        },
    };

    tracing::debug!(%generation, %url, "websocket open");
    report(TransportEvent::Opened);

    let (mut write, mut read) = stream.split();

    let writer = tokio::spawn(async move {
        while let Some(message) = outbound.recv().await {
            if write.send(message).await.is_err() {
                break;
            }
        }
    });

    let mut close_reason = "stream ended".to_string();
    while let Some(message) = read.next().await {
        match message {
            Ok(Message::Text(text)) => report(TransportEvent::Message(text.as_str().to_string())),
            Ok(Message::Close(frame)) => {
                if let Some(frame) = frame {
                    close_reason = format!("{} {}", u16::from(frame.code), frame.reason.as_str());
                }
                break;
            },
            Ok(Message::Binary(_)) => tracing::debug!(%generation, "ignoring binary frame"),
            Ok(_) => {},
            Err(error) => {
                writer.abort();
                report(TransportEvent::Error { reason: error.to_string() });
                return;
            },
        }
    }

    writer.abort();
    report(TransportEvent::Closed { reason: close_reason });
}
