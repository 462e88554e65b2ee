//! WebSocket connection and event loop.
//!
//! This module owns the duplex connection to one robot's bridge endpoint.
//! It knows nothing about topics or services: it moves opaque frames.
//!
//! # Event Loop
//!
//! The connection spawns a tokio task that handles:
//!
//! - Incoming Text/Binary frames, cloned to every registered listener
//! - Outgoing frames from any number of handles, written one at a time
//! - Transport state changes, published on a `watch` channel
//!
//! Listeners are plain unbounded channels. The session router is one
//! listener, each transparent relay client is another.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, watch};
use tokio::time::timeout;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, trace, warn};
use url::Url;

use crate::error::{Error, Result};
use crate::identifiers::ListenerId;
use crate::protocol::Request;

// ============================================================================
// Types
// ============================================================================

/// Map of listener IDs to frame channels.
///
/// `None` once the event loop has terminated.
type ListenerMap = Option<FxHashMap<ListenerId, mpsc::UnboundedSender<Message>>>;

// ============================================================================
// TransportState
// ============================================================================

/// Observable state of a transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportState {
    /// Handshake complete, frames flowing.
    Open,
    /// Closed cleanly, by either side.
    Closed,
    /// Closed because of an I/O or protocol error.
    Failed {
        /// Description of the failure.
        message: String,
    },
}

impl TransportState {
    /// Returns `true` once the transport can no longer carry frames.
    #[inline]
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Open)
    }
}

impl fmt::Display for TransportState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Open => f.write_str("open"),
            Self::Closed => f.write_str("closed"),
            Self::Failed { message } => write!(f, "failed: {message}"),
        }
    }
}

// ============================================================================
// ConnectionCommand
// ============================================================================

/// Internal commands for the event loop.
enum ConnectionCommand {
    /// Write one frame.
    Send(Message),
    /// Close the connection.
    Shutdown,
}

// ============================================================================
// Connection
// ============================================================================

/// WebSocket connection to a robot's bridge endpoint.
///
/// # Thread Safety
///
/// `Connection` is `Send + Sync` and cheap to clone; every clone talks to
/// the same event loop. Sends never block.
pub struct Connection {
    /// Channel for sending commands to the event loop.
    command_tx: mpsc::UnboundedSender<ConnectionCommand>,
    /// Raw frame listeners (shared with event loop).
    listeners: Arc<Mutex<ListenerMap>>,
    /// Transport state published by the event loop.
    state_rx: watch::Receiver<TransportState>,
}

impl Clone for Connection {
    fn clone(&self) -> Self {
        Self {
            command_tx: self.command_tx.clone(),
            listeners: Arc::clone(&self.listeners),
            state_rx: self.state_rx.clone(),
        }
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("state", &*self.state_rx.borrow())
            .field("listeners", &self.listener_count())
            .finish_non_exhaustive()
    }
}

impl Connection {
    /// Opens a client connection to a bridge endpoint.
    ///
    /// # Errors
    ///
    /// - [`Error::ConnectionTimeout`] if the handshake does not finish in time
    /// - [`Error::WebSocket`] if the TCP connect or upgrade fails
    pub async fn open(url: &Url, connect_timeout: Duration) -> Result<Self> {
        debug!(%url, "Opening bridge connection");

        let (ws_stream, _response) =
            timeout(connect_timeout, tokio_tungstenite::connect_async(url.as_str()))
                .await
                .map_err(|_| Error::connection_timeout(connect_timeout.as_millis() as u64))??;

        debug!(%url, "Bridge connection open");
        Ok(Self::new(ws_stream))
    }

    /// Wraps an established WebSocket stream.
    ///
    /// Spawns the event loop task internally.
    pub(crate) fn new<S>(ws_stream: WebSocketStream<S>) -> Self
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let listeners: Arc<Mutex<ListenerMap>> = Arc::new(Mutex::new(Some(FxHashMap::default())));
        let (state_tx, state_rx) = watch::channel(TransportState::Open);

        tokio::spawn(Self::run_event_loop(
            ws_stream,
            command_rx,
            Arc::clone(&listeners),
            state_tx,
        ));

        Self {
            command_tx,
            listeners,
            state_rx,
        }
    }

    /// Queues one frame for writing.
    ///
    /// Frames from all handles are written in the order they were queued.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConnectionClosed`] if the transport has terminated.
    pub fn send(&self, frame: Message) -> Result<()> {
        if self.state_rx.borrow().is_terminal() {
            return Err(Error::ConnectionClosed);
        }

        self.command_tx
            .send(ConnectionCommand::Send(frame))
            .map_err(|_| Error::ConnectionClosed)
    }

    /// Serializes and queues a bridge operation.
    ///
    /// # Errors
    ///
    /// - [`Error::Json`] if the request cannot be serialized
    /// - [`Error::ConnectionClosed`] if the transport has terminated
    pub fn send_request(&self, request: &Request) -> Result<()> {
        trace!(op = request.op(), "Queueing bridge request");
        self.send(request.to_frame()?)
    }

    /// Registers a raw frame listener.
    ///
    /// The receiver yields every inbound Text and Binary frame, unmodified,
    /// and ends when the transport terminates. Registering on a terminated
    /// transport returns a receiver that is already finished.
    pub fn add_listener(&self) -> (ListenerId, mpsc::UnboundedReceiver<Message>) {
        let id = ListenerId::next();
        let (tx, rx) = mpsc::unbounded_channel();

        if let Some(map) = self.listeners.lock().as_mut() {
            map.insert(id, tx);
            trace!(listener = %id, "Listener registered");
        }

        (id, rx)
    }

    /// Removes a raw frame listener.
    ///
    /// Safe to call repeatedly and after the transport has closed.
    /// Returns `true` if the listener was still registered.
    pub fn remove_listener(&self, id: ListenerId) -> bool {
        let removed = self
            .listeners
            .lock()
            .as_mut()
            .and_then(|map| map.remove(&id))
            .is_some();

        if removed {
            trace!(listener = %id, "Listener removed");
        }
        removed
    }

    /// Returns the number of registered listeners.
    #[inline]
    #[must_use]
    pub fn listener_count(&self) -> usize {
        self.listeners.lock().as_ref().map_or(0, |map| map.len())
    }

    /// Returns the current transport state.
    #[inline]
    #[must_use]
    pub fn state(&self) -> TransportState {
        self.state_rx.borrow().clone()
    }

    /// Returns `true` while frames can be sent.
    #[inline]
    #[must_use]
    pub fn is_open(&self) -> bool {
        !self.state_rx.borrow().is_terminal()
    }

    /// Returns a receiver for transport state changes.
    #[inline]
    #[must_use]
    pub fn watch_state(&self) -> watch::Receiver<TransportState> {
        self.state_rx.clone()
    }

    /// Waits until the transport terminates and returns the final state.
    pub async fn closed(&self) -> TransportState {
        let mut state_rx = self.watch_state();
        match state_rx.wait_for(TransportState::is_terminal).await {
            Ok(state) => state.clone(),
            Err(_) => TransportState::Closed,
        }
    }

    /// Closes the connection gracefully.
    ///
    /// Idempotent; listeners see their streams end once the close completes.
    pub fn shutdown(&self) {
        let _ = self.command_tx.send(ConnectionCommand::Shutdown);
    }

    /// Event loop that handles WebSocket I/O.
    async fn run_event_loop<S>(
        ws_stream: WebSocketStream<S>,
        mut command_rx: mpsc::UnboundedReceiver<ConnectionCommand>,
        listeners: Arc<Mutex<ListenerMap>>,
        state_tx: watch::Sender<TransportState>,
    ) where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (mut ws_write, mut ws_read) = ws_stream.split();

        let final_state = loop {
            tokio::select! {
                // Incoming frames from the bridge endpoint
                message = ws_read.next() => {
                    match message {
                        Some(Ok(frame @ (Message::Text(_) | Message::Binary(_)))) => {
                            Self::fan_out(frame, &listeners);
                        }

                        Some(Ok(Message::Close(frame))) => {
                            debug!(?frame, "WebSocket closed by remote");
                            break TransportState::Closed;
                        }

                        Some(Err(e)) => {
                            error!(error = %e, "WebSocket error");
                            break TransportState::Failed { message: e.to_string() };
                        }

                        None => {
                            debug!("WebSocket stream ended");
                            break TransportState::Closed;
                        }

                        // Ping/Pong are answered by tungstenite
                        Some(Ok(_)) => {}
                    }
                }

                // Commands from handles
                command = command_rx.recv() => {
                    match command {
                        Some(ConnectionCommand::Send(frame)) => {
                            if let Err(e) = ws_write.send(frame).await {
                                warn!(error = %e, "Failed to write frame");
                                break TransportState::Failed { message: e.to_string() };
                            }
                        }

                        Some(ConnectionCommand::Shutdown) => {
                            debug!("Shutdown command received");
                            let _ = ws_write.close().await;
                            break TransportState::Closed;
                        }

                        None => {
                            debug!("All connection handles dropped");
                            let _ = ws_write.close().await;
                            break TransportState::Closed;
                        }
                    }
                }
            }
        };

        // Dropping the senders ends every listener stream
        let dropped = listeners.lock().take().map_or(0, |map| map.len());
        let _ = state_tx.send(final_state.clone());

        debug!(state = %final_state, listeners = dropped, "Event loop terminated");
    }

    /// Clones an inbound frame to every listener, pruning dead ones.
    fn fan_out(frame: Message, listeners: &Arc<Mutex<ListenerMap>>) {
        let mut guard = listeners.lock();
        let Some(map) = guard.as_mut() else {
            return;
        };

        map.retain(|id, tx| {
            let alive = tx.send(frame.clone()).is_ok();
            if !alive {
                trace!(listener = %id, "Pruned closed listener");
            }
            alive
        });
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use crate::transport::mock::MockBridge;

    const TEST_TIMEOUT: Duration = Duration::from_secs(5);

    async fn open_to(mock: &MockBridge) -> Connection {
        Connection::open(&mock.url(), TEST_TIMEOUT)
            .await
            .expect("connection should open")
    }

    #[test]
    fn test_transport_state_terminal() {
        assert!(!TransportState::Open.is_terminal());
        assert!(TransportState::Closed.is_terminal());
        assert!(
            TransportState::Failed {
                message: "reset".into()
            }
            .is_terminal()
        );
    }

    #[tokio::test]
    async fn test_open_refused() {
        let url = Url::parse("ws://127.0.0.1:1").expect("url");
        let result = Connection::open(&url, TEST_TIMEOUT).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_send_reaches_remote() {
        let mut mock = MockBridge::start().await;
        let connection = open_to(&mock).await;

        connection
            .send(Message::Binary(vec![1u8, 2, 3].into()))
            .expect("send");

        let frame = mock.next_frame().await.expect("frame");
        assert_eq!(frame, Message::Binary(vec![1u8, 2, 3].into()));
    }

    #[tokio::test]
    async fn test_listeners_receive_inbound_frames() {
        let mock = MockBridge::start().await;
        let connection = open_to(&mock).await;

        let (_a, mut rx_a) = connection.add_listener();
        let (_b, mut rx_b) = connection.add_listener();
        assert_eq!(connection.listener_count(), 2);

        mock.push(Message::Text("hello".into()));

        assert_eq!(rx_a.recv().await, Some(Message::Text("hello".into())));
        assert_eq!(rx_b.recv().await, Some(Message::Text("hello".into())));
    }

    #[tokio::test]
    async fn test_remove_listener_idempotent() {
        let mock = MockBridge::start().await;
        let connection = open_to(&mock).await;

        let (id, _rx) = connection.add_listener();
        assert!(connection.remove_listener(id));
        assert!(!connection.remove_listener(id));
        assert_eq!(connection.listener_count(), 0);
    }

    #[tokio::test]
    async fn test_shutdown_ends_listeners() {
        let mock = MockBridge::start().await;
        let connection = open_to(&mock).await;
        let (id, mut rx) = connection.add_listener();

        connection.shutdown();

        assert_eq!(connection.closed().await, TransportState::Closed);
        assert_eq!(rx.recv().await, None);
        assert!(!connection.is_open());
        assert!(matches!(
            connection.send(Message::Text("late".into())),
            Err(Error::ConnectionClosed)
        ));

        // Removal after close is tolerated
        assert!(!connection.remove_listener(id));
        let (_late, mut late_rx) = connection.add_listener();
        assert_eq!(late_rx.recv().await, None);
    }

    #[tokio::test]
    async fn test_remote_close_is_clean() {
        let mock = MockBridge::start().await;
        let connection = open_to(&mock).await;

        mock.close();

        assert_eq!(connection.closed().await, TransportState::Closed);
    }

    #[tokio::test]
    async fn test_remote_reset_is_failure() {
        let mock = MockBridge::start().await;
        let connection = open_to(&mock).await;
        let mut state = connection.watch_state();
        assert_eq!(*state.borrow_and_update(), TransportState::Open);

        mock.reset();

        assert!(matches!(
            connection.closed().await,
            TransportState::Failed { .. }
        ));
        assert!(state.has_changed().unwrap_or(true));
        assert!(state.borrow().is_terminal());
    }
}
