//! One live connection to a robot's bridge endpoint.
//!
//! A [`Session`] owns the transport, the topic multiplexer and the service
//! correlator for a single robot. A router task consumes the transport's
//! frames off the read loop, so topic callbacks never stall socket I/O.
//!
//! # Lifecycle
//!
//! ```text
//! Idle → Connecting → Connected → Disconnected
//!             │            └────→ Error
//!             └─────────────────→ Error
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, trace, warn};
use url::Url;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::identifiers::RobotId;
use crate::protocol::event::{malformed_service_response, service_failure};
use crate::protocol::{Event, ServiceRequest, ServiceResponse};
use crate::transport::{Connection, TransportState};

use super::correlator::{Correlator, PendingCall};
use super::multiplexer::{Multiplexer, SubscriptionHandle, TopicCallback};

// ============================================================================
// SessionState
// ============================================================================

/// Lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    /// Created, no connection attempted yet.
    Idle,
    /// Transport handshake in progress.
    Connecting,
    /// Transport open.
    Connected,
    /// Ended cleanly.
    Disconnected,
    /// Failed to open, or ended with a transport error.
    Error,
}

impl SessionState {
    /// Returns `true` for states a session never leaves.
    #[inline]
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Disconnected | Self::Error)
    }

    /// Returns `true` if `next` is a legal successor of this state.
    #[must_use]
    pub fn can_transition_to(&self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Idle, Self::Connecting)
                | (Self::Connecting, Self::Connected)
                | (Self::Connecting, Self::Error)
                | (Self::Connected, Self::Disconnected)
                | (Self::Connected, Self::Error)
        )
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Disconnected => "disconnected",
            Self::Error => "error",
        };
        f.write_str(name)
    }
}

// ============================================================================
// Types
// ============================================================================

/// Internal shared state for a session.
struct SessionInner {
    /// Unique id of this session instance.
    id: Uuid,
    /// Robot this session belongs to.
    robot_id: RobotId,
    /// Bridge endpoint URL.
    url: Url,
    /// Bridge transport.
    connection: Connection,
    /// Lifecycle state.
    state: watch::Sender<SessionState>,
    /// Topic table.
    multiplexer: Multiplexer,
    /// Pending service calls.
    correlator: Correlator,
    /// When the transport opened.
    connected_at: DateTime<Utc>,
    /// Last inbound frame.
    last_activity: Mutex<DateTime<Utc>>,
    /// Latest scalar readings keyed by topic.
    telemetry: Mutex<FxHashMap<String, f64>>,
    /// Set once the terminal status has been reported.
    terminal_reported: AtomicBool,
}

// ============================================================================
// Session
// ============================================================================

/// A live connection to one robot's bridge endpoint.
///
/// Cheap to clone; all clones share the same transport and tables.
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.inner.id)
            .field("robot_id", &self.inner.robot_id)
            .field("url", &self.inner.url.as_str())
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Session - Constructor
// ============================================================================

impl Session {
    /// Opens a session, driving `state` through `Connecting` to `Connected`
    /// or `Error`.
    ///
    /// # Errors
    ///
    /// Returns the transport error if the endpoint cannot be opened; `state`
    /// is left at [`SessionState::Error`].
    pub(crate) async fn connect(
        robot_id: RobotId,
        url: Url,
        connect_timeout: Duration,
        state: watch::Sender<SessionState>,
    ) -> Result<Self> {
        state.send_replace(SessionState::Connecting);
        debug!(robot_id = %robot_id, %url, "Session connecting");

        match Connection::open(&url, connect_timeout).await {
            Ok(connection) => Ok(Self::attach(robot_id, url, connection, state)),
            Err(e) => {
                state.send_replace(SessionState::Error);
                warn!(robot_id = %robot_id, %url, error = %e, "Session failed to connect");
                Err(e)
            }
        }
    }

    /// Builds a connected session around an open transport.
    fn attach(
        robot_id: RobotId,
        url: Url,
        connection: Connection,
        state: watch::Sender<SessionState>,
    ) -> Self {
        // Registered before Connected so no frame is missed
        let (_, frames) = connection.add_listener();
        let now = Utc::now();

        let inner = Arc::new(SessionInner {
            id: Uuid::new_v4(),
            multiplexer: Multiplexer::new(connection.clone()),
            correlator: Correlator::new(connection.clone()),
            robot_id,
            url,
            connection,
            state,
            connected_at: now,
            last_activity: Mutex::new(now),
            telemetry: Mutex::new(FxHashMap::default()),
            terminal_reported: AtomicBool::new(false),
        });

        inner.state.send_replace(SessionState::Connected);
        info!(robot_id = %inner.robot_id, session = %inner.id, url = %inner.url, "Session connected");

        tokio::spawn(Self::run_router(Arc::clone(&inner), frames));

        Self { inner }
    }
}

// ============================================================================
// Session - Accessors
// ============================================================================

impl Session {
    /// Returns the unique id of this session instance.
    ///
    /// A reconnect produces a new id.
    #[inline]
    #[must_use]
    pub fn id(&self) -> &Uuid {
        &self.inner.id
    }

    /// Returns the robot id.
    #[inline]
    #[must_use]
    pub fn robot_id(&self) -> &RobotId {
        &self.inner.robot_id
    }

    /// Returns the bridge endpoint URL.
    #[inline]
    #[must_use]
    pub fn url(&self) -> &Url {
        &self.inner.url
    }

    /// Returns the current lifecycle state.
    #[inline]
    #[must_use]
    pub fn state(&self) -> SessionState {
        *self.inner.state.borrow()
    }

    /// Returns `true` while the session is Connected.
    #[inline]
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state() == SessionState::Connected
    }

    /// Returns a receiver for lifecycle changes.
    #[inline]
    #[must_use]
    pub fn watch_state(&self) -> watch::Receiver<SessionState> {
        self.inner.state.subscribe()
    }

    /// Returns the underlying transport.
    ///
    /// Used by the transparent relay to tap raw frames.
    #[inline]
    #[must_use]
    pub fn connection(&self) -> &Connection {
        &self.inner.connection
    }

    /// Returns the topic multiplexer.
    #[inline]
    #[must_use]
    pub fn multiplexer(&self) -> &Multiplexer {
        &self.inner.multiplexer
    }

    /// Returns the service call correlator.
    #[inline]
    #[must_use]
    pub fn correlator(&self) -> &Correlator {
        &self.inner.correlator
    }

    /// Returns when the transport opened.
    #[inline]
    #[must_use]
    pub fn connected_at(&self) -> DateTime<Utc> {
        self.inner.connected_at
    }

    /// Returns when the last inbound frame arrived.
    #[inline]
    #[must_use]
    pub fn last_activity(&self) -> DateTime<Utc> {
        *self.inner.last_activity.lock()
    }

    /// Returns a copy of the latest scalar readings.
    #[must_use]
    pub fn telemetry(&self) -> FxHashMap<String, f64> {
        self.inner.telemetry.lock().clone()
    }

    /// Records the latest scalar reading for a topic.
    pub fn record_telemetry(&self, topic: &str, value: f64) {
        self.inner.telemetry.lock().insert(topic.to_string(), value);
    }

    /// Claims the right to report this session's terminal status.
    ///
    /// Returns `true` for the first caller only.
    pub(crate) fn claim_terminal_report(&self) -> bool {
        !self.inner.terminal_reported.swap(true, Ordering::SeqCst)
    }

    /// Returns `true` if both handles point at the same session.
    #[inline]
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

// ============================================================================
// Session - Operations
// ============================================================================

impl Session {
    /// Subscribes to a topic; see [`Multiplexer::subscribe`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotConnected`] unless the session is Connected.
    pub fn subscribe(
        &self,
        topic: &str,
        message_type: &str,
        callback: TopicCallback,
    ) -> Result<Arc<SubscriptionHandle>> {
        self.ensure_connected()?;
        self.inner
            .multiplexer
            .subscribe(topic, message_type, callback)
            .map_err(|e| self.local_failure(e))
    }

    /// Removes a topic subscription; no-op for unknown topics.
    pub fn unsubscribe(&self, topic: &str) -> bool {
        self.inner.multiplexer.unsubscribe(topic)
    }

    /// Publishes a message; see [`Multiplexer::publish`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotConnected`] unless the session is Connected.
    pub fn publish(&self, topic: &str, message_type: &str, payload: Value) -> Result<()> {
        self.ensure_connected()?;
        self.inner
            .multiplexer
            .publish(topic, message_type, payload)
            .map_err(|e| self.local_failure(e))
    }

    /// Issues a service call; see [`Correlator::call`].
    ///
    /// On a session that is not Connected the returned future rejects with
    /// [`Error::NotConnected`] without touching the transport.
    pub fn call(&self, service: &str, request: &ServiceRequest) -> PendingCall {
        if let Err(e) = self.ensure_connected() {
            return PendingCall::failed(service, e);
        }
        self.inner.correlator.call(service, request)
    }

    /// Closes the session.
    ///
    /// Deactivates every handle and rejects every pending call before the
    /// transport finishes closing. Idempotent.
    pub fn close(&self) {
        self.inner.finish(SessionState::Disconnected);
    }

    /// Waits until the session reaches a terminal state and returns it.
    pub async fn terminated(&self) -> SessionState {
        let mut state_rx = self.inner.state.subscribe();
        match state_rx.wait_for(SessionState::is_terminal).await {
            Ok(state) => *state,
            Err(_) => SessionState::Disconnected,
        }
    }

    fn ensure_connected(&self) -> Result<()> {
        if self.is_connected() && self.inner.connection.is_open() {
            Ok(())
        } else {
            Err(Error::not_connected(&self.inner.robot_id))
        }
    }

    fn local_failure(&self, error: Error) -> Error {
        match error {
            Error::ConnectionClosed => Error::not_connected(&self.inner.robot_id),
            other => other,
        }
    }
}

// ============================================================================
// Session - Router
// ============================================================================

impl Session {
    /// Router task: demultiplexes inbound frames until the transport ends.
    async fn run_router(inner: Arc<SessionInner>, mut frames: mpsc::UnboundedReceiver<Message>) {
        while let Some(frame) = frames.recv().await {
            *inner.last_activity.lock() = Utc::now();

            match frame {
                Message::Text(text) => inner.route_text(text.as_str()),
                other => trace!(robot_id = %inner.robot_id, len = other.len(), "Ignoring non-text frame"),
            }
        }

        let final_state = match inner.connection.closed().await {
            TransportState::Failed { message } => {
                warn!(robot_id = %inner.robot_id, error = %message, "Session transport failed");
                SessionState::Error
            }
            _ => SessionState::Disconnected,
        };

        inner.finish(final_state);
        debug!(robot_id = %inner.robot_id, "Session router terminated");
    }
}

impl SessionInner {
    /// Routes one inbound text frame.
    fn route_text(&self, text: &str) {
        match Event::from_text(text) {
            Ok(Event::Publish { topic, msg }) => {
                self.multiplexer.dispatch(&topic, &msg);
            }

            Ok(Event::ServiceResponse {
                service,
                values,
                result,
                ..
            }) => {
                let outcome = if result {
                    Ok(ServiceResponse::new(&service, values))
                } else {
                    Err(service_failure(&service, &values))
                };
                self.correlator.resolve(&service, outcome);
            }

            Ok(Event::Status { level, msg }) => {
                debug!(robot_id = %self.robot_id, ?level, ?msg, "Bridge status");
            }

            Ok(Event::Other) => {
                trace!(robot_id = %self.robot_id, "Ignoring unhandled op");
            }

            Err(e) => match malformed_service_response(text) {
                Some(service) => {
                    warn!(robot_id = %self.robot_id, service, error = %e, "Malformed service response");
                    self.correlator
                        .resolve(&service, Err(Error::protocol(format!("malformed response: {e}"))));
                }
                None => {
                    warn!(robot_id = %self.robot_id, error = %e, "Dropping malformed frame");
                }
            },
        }
    }

    /// Moves to a terminal state exactly once.
    ///
    /// Returns `true` for the call that performed the transition.
    fn finish(&self, next: SessionState) -> bool {
        let first = self.state.send_if_modified(|current| {
            if current.is_terminal() {
                false
            } else {
                *current = next;
                true
            }
        });

        if first {
            self.multiplexer.deactivate_all();
            self.correlator.reject_all();
            self.connection.shutdown();
            info!(robot_id = %self.robot_id, session = %self.id, state = %next, "Session ended");
        }

        first
    }
}

// ============================================================================
// Tests
// ============================================================================
