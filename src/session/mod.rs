//! Per-robot sessions and the process-wide registry.
//!
//! A session owns one bridge transport and multiplexes topics and service
//! calls over it. The registry keeps at most one session per robot id and
//! reports every lifecycle transition to the robot's status listener.
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `core` | [`Session`] and its lifecycle state |
//! | `multiplexer` | Topic subscription and publication table |
//! | `correlator` | Service call correlation by service name |
//! | `registry` | Robot id → session table |
//! | `status` | Single-slot status listeners |

// ============================================================================
// Submodules
// ============================================================================

/// Session and lifecycle state.
pub mod core;

/// Service call correlator.
pub mod correlator;

/// Topic multiplexer.
pub mod multiplexer;

/// Connection registry.
pub mod registry;

/// Status notifier.
pub mod status;

// ============================================================================
// Re-exports
// ============================================================================

pub use self::core::{Session, SessionState};
pub use correlator::{Correlator, PendingCall};
pub use multiplexer::{Multiplexer, SubscriptionHandle, TopicCallback};
pub use registry::{ConnectOutcome, ConnectionRegistry};
pub use status::{StatusCallback, StatusEvent, StatusNotifier};
