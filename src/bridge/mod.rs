//! Bridge facade and configuration.
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `core` | [`Bridge`] coordinator, the external interface |
//! | `builder` | [`BridgeBuilder`] fluent configuration |
//! | `options` | [`BridgeOptions`] value type |
//! | `store` | [`RobotStore`] collaborator and [`MemoryStore`] |

// ============================================================================
// Submodules
// ============================================================================

/// Builder pattern for bridge configuration.
pub mod builder;

/// Bridge coordinator.
pub mod core;

/// Bridge configuration options.
pub mod options;

/// Robot record store collaborator.
pub mod store;

// ============================================================================
// Re-exports
// ============================================================================

pub use self::core::{Bridge, ConnectionStatus};
pub use builder::BridgeBuilder;
pub use options::BridgeOptions;
pub use store::{MemoryStore, RobotEndpoint, RobotRecord, RobotStore};
