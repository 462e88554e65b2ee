//! WebSocket transport layer.
//!
//! This module moves raw frames between this process and robot bridge
//! endpoints, and between external relay clients and those endpoints.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐   relay    ┌──────────────────┐  rosbridge  ┌──────────────┐
//! │ Relay client │◄──────────►│  RelayServer     │             │ Robot bridge │
//! └──────────────┘  ?robotId  │        │         │             │  endpoint    │
//!                             │        ▼         │  WebSocket  │              │
//!                             │  Connection ◄────┼────────────►│              │
//!                             │   ▲ listeners    │             │              │
//!                             │   └─ Session     │             │              │
//!                             └──────────────────┘             └──────────────┘
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `connection` | Bridge connection and event loop |
//! | `relay` | Transparent relay endpoint |

// ============================================================================
// Submodules
// ============================================================================

/// Bridge connection and event loop.
pub mod connection;

/// Transparent relay endpoint.
pub mod relay;

#[cfg(test)]
pub(crate) mod mock;

// ============================================================================
// Re-exports
// ============================================================================

pub use connection::{Connection, TransportState};
pub use relay::RelayServer;
