//! Connection registry keyed by robot id.
//!
//! Holds at most one session per robot. Every session gets a supervisor task
//! that removes it from the table when it terminates and reports the
//! terminal status exactly once.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │          ConnectionRegistry             │
//! │  ┌─────────────────────────────────┐    │
//! │  │ r1 → Session (ws://10.0.0.5)    │    │
//! │  │ r2 → Session (ws://10.0.0.6)    │    │
//! │  └─────────────────────────────────┘    │
//! │  connecting: r3 → watch<SessionState>   │
//! └─────────────────────────────────────────┘
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use rustc_hash::FxHashMap;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};
use url::Url;

use crate::error::{Error, Result};
use crate::identifiers::RobotId;

use super::core::{Session, SessionState};
use super::status::{StatusCallback, StatusEvent, StatusNotifier};

// ============================================================================
// Types
// ============================================================================

/// Successful result of [`ConnectionRegistry::connect`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectOutcome {
    /// A new session was opened.
    Connected,
    /// A session already existed (or another caller just opened one).
    AlreadyConnected,
}

/// Sink receiving every status event alongside the robot's listener.
pub type StatusFeed = mpsc::UnboundedSender<(RobotId, StatusEvent)>;

/// Role of a caller in a connection attempt.
enum Attempt {
    /// This caller opens the transport.
    Lead(watch::Sender<SessionState>),
    /// Another caller is already opening it.
    Follow(watch::Receiver<SessionState>),
}

// ============================================================================
// ConnectionRegistry
// ============================================================================

/// Process-wide table of robot id → active session.
pub struct ConnectionRegistry {
    /// Live sessions.
    sessions: RwLock<FxHashMap<RobotId, Session>>,

    /// Attempts still in the Connecting state.
    connecting: Mutex<FxHashMap<RobotId, watch::Receiver<SessionState>>>,

    /// Per-robot status listeners.
    notifier: StatusNotifier,

    /// Optional secondary status sink.
    status_feed: Option<StatusFeed>,

    /// Transport open timeout.
    connect_timeout: Duration,

    /// Shutdown flag.
    shutdown: AtomicBool,
}

// ============================================================================
// ConnectionRegistry - Constructor
// ============================================================================

impl ConnectionRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new(connect_timeout: Duration) -> Arc<Self> {
        Self::build(connect_timeout, None)
    }

    /// Creates an empty registry that also forwards status events to `feed`.
    #[must_use]
    pub fn with_status_feed(connect_timeout: Duration, feed: StatusFeed) -> Arc<Self> {
        Self::build(connect_timeout, Some(feed))
    }

    fn build(connect_timeout: Duration, status_feed: Option<StatusFeed>) -> Arc<Self> {
        Arc::new(Self {
            sessions: RwLock::new(FxHashMap::default()),
            connecting: Mutex::new(FxHashMap::default()),
            notifier: StatusNotifier::new(),
            status_feed,
            connect_timeout,
            shutdown: AtomicBool::new(false),
        })
    }
}

// ============================================================================
// ConnectionRegistry - Connect / Disconnect
// ============================================================================

impl ConnectionRegistry {
    /// Opens a session to `ws://{host}:{port}` for a robot.
    ///
    /// Idempotent: returns [`ConnectOutcome::AlreadyConnected`] without
    /// opening a second transport when a session exists or another connect
    /// for the same robot is in progress and succeeds.
    ///
    /// # Errors
    ///
    /// - [`Error::Config`] if host and port do not form a valid URL
    /// - [`Error::ConnectionTimeout`] if the handshake does not finish in time
    /// - [`Error::Transport`] if the endpoint refuses or drops the handshake
    pub async fn connect(
        self: &Arc<Self>,
        robot_id: &RobotId,
        host: &str,
        port: u16,
    ) -> Result<ConnectOutcome> {
        let url = Url::parse(&format!("ws://{host}:{port}"))
            .map_err(|e| Error::config(format!("invalid endpoint {host}:{port}: {e}")))?;

        loop {
            if self.shutdown.load(Ordering::SeqCst) {
                return Err(Error::ConnectionClosed);
            }

            if self.is_connected(robot_id) {
                debug!(robot_id = %robot_id, "Robot already connected");
                return Ok(ConnectOutcome::AlreadyConnected);
            }

            if let Some(stale) = self.get(robot_id).filter(|s| s.state().is_terminal()) {
                self.retire(&stale, stale.state());
            }

            match self.begin_attempt(robot_id) {
                None => return Ok(ConnectOutcome::AlreadyConnected),
                Some(Attempt::Lead(state_tx)) => return self.lead(robot_id, url, state_tx).await,
                Some(Attempt::Follow(state_rx)) => {
                    if let Some(result) = Self::follow(robot_id, state_rx).await {
                        return result;
                    }
                    debug!(robot_id = %robot_id, "Connection attempt abandoned, retrying");
                }
            }
        }
    }

    /// Opens the transport on behalf of every caller joined to this attempt.
    async fn lead(
        self: &Arc<Self>,
        robot_id: &RobotId,
        url: Url,
        state_tx: watch::Sender<SessionState>,
    ) -> Result<ConnectOutcome> {
        // Dropping the caller's future mid-handshake must not leave the
        // attempt registered
        let attempt = AttemptGuard {
            connecting: &self.connecting,
            robot_id,
            state_rx: state_tx.subscribe(),
        };

        let result =
            Session::connect(robot_id.clone(), url, self.connect_timeout, state_tx).await;

        match result {
            Ok(session) => {
                let replaced = self
                    .sessions
                    .write()
                    .insert(robot_id.clone(), session.clone());
                drop(attempt);

                if let Some(old) = replaced {
                    old.close();
                    self.retire(&old, old.state());
                }

                self.emit(robot_id, StatusEvent::Connected);
                tokio::spawn(Arc::clone(self).supervise(session.clone()));

                if self.shutdown.load(Ordering::SeqCst) {
                    self.disconnect(robot_id);
                    return Err(Error::ConnectionClosed);
                }

                info!(robot_id = %robot_id, "Robot connected");
                Ok(ConnectOutcome::Connected)
            }
            Err(e) => {
                drop(attempt);
                self.emit(robot_id, StatusEvent::Error);

                Err(match e {
                    Error::ConnectionTimeout { .. } => e,
                    other => Error::transport(robot_id, other.to_string()),
                })
            }
        }
    }

    /// Closes and removes a robot's session.
    ///
    /// Returns `false` if the robot had no session. The terminal
    /// `disconnected` status is reported by the session's supervisor.
    pub fn disconnect(&self, robot_id: &RobotId) -> bool {
        let removed = self.sessions.write().remove(robot_id);

        match removed {
            Some(session) => {
                session.close();
                info!(robot_id = %robot_id, "Robot disconnected");
                true
            }
            None => {
                debug!(robot_id = %robot_id, "Disconnect for unknown robot");
                false
            }
        }
    }

    /// Closes every session and refuses further connects.
    ///
    /// Returns the number of sessions closed.
    pub fn shutdown(&self) -> usize {
        info!("ConnectionRegistry shutting down");
        self.shutdown.store(true, Ordering::SeqCst);

        let sessions: Vec<_> = {
            let mut map = self.sessions.write();
            map.drain().collect()
        };
        let count = sessions.len();

        for (robot_id, session) in sessions {
            session.close();
            debug!(robot_id = %robot_id, "Session closed during shutdown");
        }

        info!(count, "ConnectionRegistry shutdown complete");
        count
    }

    /// Claims the attempt for a robot, or joins the one in progress.
    ///
    /// Returns `None` if a session appeared while waiting for the lock.
    fn begin_attempt(&self, robot_id: &RobotId) -> Option<Attempt> {
        let mut connecting = self.connecting.lock();

        // A leader whose future was dropped leaves a receiver with no sender
        if let Some(state_rx) = connecting.get(robot_id) {
            if state_rx.has_changed().is_ok() {
                return Some(Attempt::Follow(state_rx.clone()));
            }
            connecting.remove(robot_id);
        }

        if self.is_connected(robot_id) {
            return None;
        }

        let (state_tx, state_rx) = watch::channel(SessionState::Idle);
        connecting.insert(robot_id.clone(), state_rx);
        Some(Attempt::Lead(state_tx))
    }

    /// Waits for another caller's attempt and reports its outcome.
    ///
    /// Returns `None` if the leading caller went away before the attempt
    /// settled.
    async fn follow(
        robot_id: &RobotId,
        mut state_rx: watch::Receiver<SessionState>,
    ) -> Option<Result<ConnectOutcome>> {
        debug!(robot_id = %robot_id, "Joining connection attempt in progress");

        let settled = state_rx
            .wait_for(|state| !matches!(state, SessionState::Idle | SessionState::Connecting))
            .await
            .map(|state| *state)
            .ok()?;

        Some(match settled {
            SessionState::Connected => Ok(ConnectOutcome::AlreadyConnected),
            _ => Err(Error::transport(robot_id, "concurrent connection attempt failed")),
        })
    }
}

// ============================================================================
// AttemptGuard
// ============================================================================

/// Deregisters a leader's attempt when the leader finishes or is dropped.
struct AttemptGuard<'a> {
    connecting: &'a Mutex<FxHashMap<RobotId, watch::Receiver<SessionState>>>,
    robot_id: &'a RobotId,
    state_rx: watch::Receiver<SessionState>,
}

impl Drop for AttemptGuard<'_> {
    fn drop(&mut self) {
        let mut connecting = self.connecting.lock();
        if connecting
            .get(self.robot_id)
            .is_some_and(|current| current.same_channel(&self.state_rx))
        {
            connecting.remove(self.robot_id);
        }
    }
}

// ============================================================================
// ConnectionRegistry - Queries
// ============================================================================

impl ConnectionRegistry {
    /// Returns `true` if the robot has a Connected session.
    #[must_use]
    pub fn is_connected(&self, robot_id: &RobotId) -> bool {
        self.sessions
            .read()
            .get(robot_id)
            .is_some_and(Session::is_connected)
    }

    /// Returns the robot's session, if any.
    #[must_use]
    pub fn get(&self, robot_id: &RobotId) -> Option<Session> {
        self.sessions.read().get(robot_id).cloned()
    }

    /// Returns the robot's lifecycle state.
    ///
    /// Robots without a session or attempt in progress report `Idle`.
    #[must_use]
    pub fn state(&self, robot_id: &RobotId) -> SessionState {
        if let Some(state_rx) = self.connecting.lock().get(robot_id) {
            return *state_rx.borrow();
        }

        self.sessions
            .read()
            .get(robot_id)
            .map_or(SessionState::Idle, Session::state)
    }

    /// Returns the number of registered sessions.
    #[inline]
    #[must_use]
    pub fn session_count(&self) -> usize {
        self.sessions.read().len()
    }

    /// Returns the ids of all registered robots.
    #[must_use]
    pub fn robot_ids(&self) -> Vec<RobotId> {
        self.sessions.read().keys().cloned().collect()
    }
}

// ============================================================================
// ConnectionRegistry - Status
// ============================================================================

impl ConnectionRegistry {
    /// Registers the status listener for a robot; last registration wins.
    pub fn on_status_change(&self, robot_id: impl Into<RobotId>, callback: StatusCallback) -> bool {
        self.notifier.on_status_change(robot_id.into(), callback)
    }

    /// Returns the status notifier.
    #[inline]
    #[must_use]
    pub fn notifier(&self) -> &StatusNotifier {
        &self.notifier
    }

    fn emit(&self, robot_id: &RobotId, event: StatusEvent) {
        self.notifier.notify(robot_id, event);

        if let Some(feed) = &self.status_feed
            && feed.send((robot_id.clone(), event)).is_err()
        {
            warn!(robot_id = %robot_id, %event, "Status feed closed");
        }
    }

    /// Supervisor task: deregisters a session once it terminates.
    async fn supervise(self: Arc<Self>, session: Session) {
        let final_state = session.terminated().await;
        self.retire(&session, final_state);
    }

    /// Removes a terminated session and reports its terminal status.
    ///
    /// Both the supervisor and a connect replacing the session may call
    /// this; the status goes out once.
    fn retire(&self, session: &Session, final_state: SessionState) {
        let robot_id = session.robot_id();

        let removed = {
            let mut sessions = self.sessions.write();
            let same = sessions
                .get(robot_id)
                .is_some_and(|current| current.ptr_eq(session));
            if same {
                sessions.remove(robot_id);
            }
            same
        };

        if !session.claim_terminal_report() {
            return;
        }

        let event = StatusEvent::from_state(final_state).unwrap_or(StatusEvent::Disconnected);
        debug!(robot_id = %robot_id, %event, removed, "Session terminated");
        self.emit(robot_id, event);
    }
}

impl fmt::Debug for ConnectionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionRegistry")
            .field("sessions", &self.session_count())
            .field("connecting", &self.connecting.lock().len())
            .field("connect_timeout", &self.connect_timeout)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Tests
// ============================================================================
