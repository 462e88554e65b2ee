//! Bridge protocol message types.
//!
//! This module defines the rosbridge v2 JSON messages exchanged between this
//! core and a robot's bridge endpoint. The transparent relay never decodes
//! frames; only the multiplexer and correlator use these types.
//!
//! # Protocol Overview
//!
//! | Message Type | Direction | Purpose |
//! |--------------|-----------|---------|
//! | `Request` | Core → Robot | subscribe / advertise / publish / call_service |
//! | `Event` | Robot → Core | publish / service_response / status |
//! | `ServiceRequest` | Core → Robot | Typed `call_service` arguments |
//! | `ServiceResponse` | Robot → Core | Typed `service_response` values |
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `command` | Service request/response shapes |
//! | `event` | Inbound messages |
//! | `request` | Outbound operations |

// ============================================================================
// Submodules
// ============================================================================

/// Service call request and response shapes.
pub mod command;

/// Inbound message types.
pub mod event;

/// Outbound operation types.
pub mod request;

// ============================================================================
// Re-exports
// ============================================================================

pub use command::{ModeReply, ServiceRequest, ServiceResponse};
pub use event::Event;
pub use request::Request;
