//! Error types for robot-bridge.
//!
//! This module defines all error types used throughout the crate.
//!
//! # Usage
//!
//! All fallible operations return [`Result<T>`] which uses [`Error`]:
//!
//! ```ignore
//! use robot_bridge::{Bridge, Result};
//!
//! async fn example(bridge: &Bridge) -> Result<()> {
//!     bridge.connect("r1", "10.0.0.5", 9090).await?;
//!     bridge.publish("r1", "/cmd_vel", "geometry_msgs/Twist", json!({}))?;
//!     Ok(())
//! }
//! ```
//!
//! # Error Categories
//!
//! | Category | Variants |
//! |----------|----------|
//! | Configuration | [`Error::Config`] |
//! | Session | [`Error::NotConnected`], [`Error::RobotNotFound`] |
//! | Connection | [`Error::Transport`], [`Error::ConnectionTimeout`], [`Error::ConnectionClosed`] |
//! | Service | [`Error::ServiceCall`], [`Error::CallInFlight`] |
//! | Relay | [`Error::RelayRejected`] |
//! | Protocol | [`Error::Protocol`] |
//! | Collaborator | [`Error::Store`] |
//! | External | [`Error::Io`], [`Error::Json`], [`Error::WebSocket`] |

// ============================================================================
// Imports
// ============================================================================

use std::io::Error as IoError;
use std::result::Result as StdResult;

use thiserror::Error;
use tokio::sync::oneshot::error::RecvError;
use tokio_tungstenite::tungstenite::Error as WsError;

use crate::identifiers::RobotId;

// ============================================================================
// Result Alias
// ============================================================================

/// Result type alias using crate [`enum@Error`].
///
/// All fallible operations in this crate return this type.
pub type Result<T> = StdResult<T, Error>;

// ============================================================================
// Error Enum
// ============================================================================

/// Main error type for the crate.
///
/// Each variant includes relevant context for debugging.
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Configuration Errors
    // ========================================================================
    /// Configuration error.
    ///
    /// Returned when bridge configuration is invalid.
    #[error("Configuration error: {message}")]
    Config {
        /// Description of the configuration error.
        message: String,
    },

    // ========================================================================
    // Session Errors
    // ========================================================================
    /// No connected session for the robot.
    ///
    /// Returned (never panicked) so callers can degrade gracefully.
    #[error("Robot not connected: {robot_id}")]
    NotConnected {
        /// The robot without a live session.
        robot_id: RobotId,
    },

    /// Robot record could not be resolved by the record store.
    #[error("Robot not found: {robot_id}")]
    RobotNotFound {
        /// The unknown robot.
        robot_id: RobotId,
    },

    // ========================================================================
    // Connection Errors
    // ========================================================================
    /// Transport-level failure talking to a bridge endpoint.
    #[error("Transport error for {robot_id}: {message}")]
    Transport {
        /// Robot whose transport failed.
        robot_id: RobotId,
        /// Description of the failure.
        message: String,
    },

    /// Connection timeout while opening a bridge endpoint.
    #[error("Connection timeout after {timeout_ms}ms")]
    ConnectionTimeout {
        /// Milliseconds waited before timeout.
        timeout_ms: u64,
    },

    /// Session closed while the operation was outstanding.
    #[error("Connection closed")]
    ConnectionClosed,

    // ========================================================================
    // Service Errors
    // ========================================================================
    /// Remote reported a failure for a service call.
    ///
    /// Rejects only the specific call.
    #[error("Service call {service} failed: {message}")]
    ServiceCall {
        /// Service name.
        service: String,
        /// Failure reported by the remote.
        message: String,
    },

    /// A call to the same service is still outstanding on this session.
    #[error("Service call already in flight: {service}")]
    CallInFlight {
        /// Service name.
        service: String,
    },

    // ========================================================================
    // Relay Errors
    // ========================================================================
    /// Relay client was refused.
    ///
    /// Surfaced to the client as a WebSocket close code.
    #[error("Relay rejected ({code}): {reason}")]
    RelayRejected {
        /// WebSocket close code sent to the client.
        code: u16,
        /// Close reason sent to the client.
        reason: String,
    },

    // ========================================================================
    // Protocol Errors
    // ========================================================================
    /// Protocol violation or unexpected frame.
    #[error("Protocol error: {message}")]
    Protocol {
        /// Description of the protocol violation.
        message: String,
    },

    // ========================================================================
    // Collaborator Errors
    // ========================================================================
    /// Record store failure.
    #[error("Store error: {message}")]
    Store {
        /// Description of the store failure.
        message: String,
    },

    // ========================================================================
    // External Errors
    // ========================================================================
    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] IoError),

    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] WsError),

    /// Channel receive error.
    #[error("Channel closed")]
    ChannelClosed(#[from] RecvError),
}

// ============================================================================
// Error Constructors
// ============================================================================

impl Error {
    /// Creates a configuration error.
    #[inline]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Creates a not connected error.
    #[inline]
    pub fn not_connected(robot_id: impl Into<RobotId>) -> Self {
        Self::NotConnected {
            robot_id: robot_id.into(),
        }
    }

    /// Creates a robot not found error.
    #[inline]
    pub fn robot_not_found(robot_id: impl Into<RobotId>) -> Self {
        Self::RobotNotFound {
            robot_id: robot_id.into(),
        }
    }

    /// Creates a transport error.
    #[inline]
    pub fn transport(robot_id: impl Into<RobotId>, message: impl Into<String>) -> Self {
        Self::Transport {
            robot_id: robot_id.into(),
            message: message.into(),
        }
    }

    /// Creates a connection timeout error.
    #[inline]
    pub fn connection_timeout(timeout_ms: u64) -> Self {
        Self::ConnectionTimeout { timeout_ms }
    }

    /// Creates a service call error.
    #[inline]
    pub fn service_call(service: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ServiceCall {
            service: service.into(),
            message: message.into(),
        }
    }

    /// Creates a call in flight error.
    #[inline]
    pub fn call_in_flight(service: impl Into<String>) -> Self {
        Self::CallInFlight {
            service: service.into(),
        }
    }

    /// Creates a relay rejection error.
    #[inline]
    pub fn relay_rejected(code: u16, reason: impl Into<String>) -> Self {
        Self::RelayRejected {
            code,
            reason: reason.into(),
        }
    }

    /// Creates a protocol error.
    #[inline]
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    /// Creates a store error.
    #[inline]
    pub fn store(message: impl Into<String>) -> Self {
        Self::Store {
            message: message.into(),
        }
    }
}

// ============================================================================
// Error Predicates
// ============================================================================

impl Error {
    /// Returns `true` if the robot had no live session.
    #[inline]
    #[must_use]
    pub fn is_not_connected(&self) -> bool {
        matches!(self, Self::NotConnected { .. })
    }

    /// Returns `true` if this is a connection error.
    #[inline]
    #[must_use]
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            Self::Transport { .. }
                | Self::ConnectionTimeout { .. }
                | Self::ConnectionClosed
                | Self::WebSocket(_)
        )
    }

    /// Returns `true` if this is a relay rejection.
    #[inline]
    #[must_use]
    pub fn is_relay_rejection(&self) -> bool {
        matches!(self, Self::RelayRejected { .. })
    }

    /// Returns `true` if this error is recoverable.
    ///
    /// Recoverable errors may succeed on retry.
    #[inline]
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::ConnectionTimeout { .. }
                | Self::NotConnected { .. }
                | Self::CallInFlight { .. }
        )
    }
}

// ============================================================================
// Tests
// ============================================================================
