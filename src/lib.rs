//! Robot Bridge - rosbridge session multiplexer and transparent relay.
//!
//! This library lets browser-facing services observe and command robots
//! that expose a rosbridge v2 endpoint over WebSocket.
//!
//! # Architecture
//!
//! The bridge keeps one transport per robot and shares it:
//!
//! - **Sessions**: one per robot id, multiplexing topic subscriptions,
//!   publications and service calls over a single WebSocket
//! - **Relay**: external clients tap a robot's transport and exchange raw
//!   frames, binary included, without decoding
//!
//! Key design principles:
//!
//! - At most one [`Session`] per robot, at most one subscription per topic
//! - Service replies are correlated by service name
//! - Exactly one terminal status (`disconnected` or `error`) per session
//! - Every disconnect path deactivates handles, rejects pending calls and
//!   removes relay listeners
//!
//! # Quick Start
//!
//! ```no_run
//! use robot_bridge::{Bridge, ControlEvent, MemoryStore, RobotEndpoint, Result};
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let store = MemoryStore::new();
//!     store.insert("r1", RobotEndpoint::new("10.0.0.5", 9090));
//!
//!     let bridge = Bridge::builder().store(store).build()?;
//!     bridge.on_status_change("r1", |robot, event| {
//!         println!("{robot}: {event}");
//!     });
//!
//!     bridge.connect_robot("r1").await?;
//!     let relay = bridge.start_relay().await?;
//!     println!("Relay: {}", relay.relay_url(&"r1".into())?);
//!
//!     let outcome = bridge
//!         .handle_control("r1", ControlEvent::Joystick { x: 0.5, y: -0.2 })
//!         .await;
//!     println!("{outcome:?}");
//!
//!     bridge.shutdown().await;
//!     Ok(())
//! }
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`bridge`] | [`Bridge`] facade, options, record store |
//! | [`control`] | Motion normalization and control dispatch |
//! | [`error`] | Error types and [`Result`] alias |
//! | [`identifiers`] | Type-safe ID wrappers |
//! | [`protocol`] | rosbridge message types |
//! | [`session`] | Sessions, multiplexer, correlator, registry |
//! | [`transport`] | WebSocket connection and relay endpoint |

// ============================================================================
// Modules
// ============================================================================

/// Bridge facade and configuration.
///
/// Use [`Bridge::builder()`] to create a configured bridge instance.
pub mod bridge;

/// Robot control.
///
/// Normalizes motion inputs into twists and dispatches control events.
pub mod control;

/// Error types and result aliases.
///
/// All fallible operations return [`Result<T>`] which uses [`Error`].
pub mod error;

/// Type-safe identifiers.
///
/// Newtype wrappers prevent mixing incompatible IDs at compile time.
pub mod identifiers;

/// rosbridge protocol message types.
///
/// Outbound operations, inbound events and service call shapes.
pub mod protocol;

/// Per-robot sessions.
///
/// This module contains the core types for robot connections:
///
/// - [`Session`] - One live robot connection
/// - [`ConnectionRegistry`] - Robot id → session table
/// - [`StatusNotifier`] - Single-slot status listeners
pub mod session;

/// WebSocket transport layer.
///
/// Bridge connections and the transparent relay endpoint.
pub mod transport;

// ============================================================================
// Re-exports
// ============================================================================

pub use bridge::{
    Bridge, BridgeBuilder, BridgeOptions, ConnectionStatus, MemoryStore, RobotEndpoint,
    RobotStore,
};
pub use control::{ControlEvent, ControlOutcome, Twist};
pub use error::{Error, Result};
pub use identifiers::RobotId;
pub use protocol::{ModeReply, ServiceRequest, ServiceResponse};
pub use session::{
    ConnectOutcome, ConnectionRegistry, PendingCall, Session, SessionState, StatusEvent,
    StatusNotifier, SubscriptionHandle,
};
pub use transport::{Connection, RelayServer, TransportState};
