//! Per-robot status listeners.
//!
//! Each robot id owns a single listener slot. Registering again replaces the
//! previous listener; there is no fan-out list.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::identifiers::RobotId;

use super::SessionState;

// ============================================================================
// StatusEvent
// ============================================================================

/// Session state transition reported to listeners.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusEvent {
    /// Transport opened.
    Connected,
    /// Session ended cleanly.
    Disconnected,
    /// Session failed to open or ended with a transport error.
    Error,
}

impl StatusEvent {
    /// Maps a session state onto the event announcing it, if any.
    #[must_use]
    pub fn from_state(state: SessionState) -> Option<Self> {
        match state {
            SessionState::Connected => Some(Self::Connected),
            SessionState::Disconnected => Some(Self::Disconnected),
            SessionState::Error => Some(Self::Error),
            SessionState::Idle | SessionState::Connecting => None,
        }
    }

    /// Returns `true` for events that end a session.
    #[inline]
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Connected)
    }

    /// Returns the lowercase wire name.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Connected => "connected",
            Self::Disconnected => "disconnected",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for StatusEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// StatusNotifier
// ============================================================================

/// Callback invoked on status transitions.
pub type StatusCallback = Arc<dyn Fn(&RobotId, StatusEvent) + Send + Sync>;

/// Table of robot id → single status listener.
#[derive(Default)]
pub struct StatusNotifier {
    listeners: RwLock<FxHashMap<RobotId, StatusCallback>>,
}

impl StatusNotifier {
    /// Creates an empty notifier.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the listener for a robot, replacing any previous one.
    ///
    /// Returns `true` if a previous listener was replaced.
    pub fn on_status_change(&self, robot_id: RobotId, callback: StatusCallback) -> bool {
        let replaced = self.listeners.write().insert(robot_id.clone(), callback).is_some();
        debug!(robot_id = %robot_id, replaced, "Status listener registered");
        replaced
    }

    /// Returns `true` if a robot has a listener.
    #[inline]
    #[must_use]
    pub fn has_listener(&self, robot_id: &RobotId) -> bool {
        self.listeners.read().contains_key(robot_id)
    }

    /// Invokes the robot's listener, if any.
    ///
    /// The callback runs outside the table lock so it may re-register.
    pub fn notify(&self, robot_id: &RobotId, event: StatusEvent) {
        let callback = self.listeners.read().get(robot_id).cloned();

        match callback {
            Some(callback) => {
                trace!(robot_id = %robot_id, %event, "Notifying status listener");
                callback(robot_id, event);
            }
            None => trace!(robot_id = %robot_id, %event, "No status listener"),
        }
    }
}

impl fmt::Debug for StatusNotifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StatusNotifier")
            .field("listeners", &self.listeners.read().len())
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================
