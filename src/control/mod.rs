//! Robot control: motion normalization and control event dispatch.
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `motion` | Canonical twist from joystick, move and rotate inputs |
//! | `dispatcher` | [`ControlEvent`] → bridge traffic → [`ControlOutcome`] |

// ============================================================================
// Submodules
// ============================================================================

/// Control event dispatch.
pub mod dispatcher;

/// Motion command normalization.
pub mod motion;

// ============================================================================
// Re-exports
// ============================================================================

pub use dispatcher::{ControlDispatcher, ControlEvent, ControlOutcome, LogLevel};
pub use motion::{Direction, MotionCommand, RotateDirection, Twist, Vector3, normalize};
