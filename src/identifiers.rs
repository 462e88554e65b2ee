//! Type-safe identifiers for bridge entities.
//!
//! Newtype wrappers prevent mixing incompatible IDs at compile time.
//!
//! | Type | Source | Example |
//! |------|--------|---------|
//! | [`RobotId`] | Record store | `"r1"` |
//! | [`ListenerId`] | Generated per transport listener | `7` |
//! | [`CallId`] | Generated per service call | `"call_service:/mode:3"` |

// ============================================================================
// Imports
// ============================================================================

use std::borrow::Borrow;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

// ============================================================================
// Counters
// ============================================================================

static NEXT_LISTENER_ID: AtomicU64 = AtomicU64::new(1);
static NEXT_CALL_SEQ: AtomicU64 = AtomicU64::new(1);

// ============================================================================
// RobotId
// ============================================================================

/// Opaque robot identifier, primary key for every lookup.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RobotId(String);

impl RobotId {
    /// Creates a robot id from any string.
    #[inline]
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the id as a string slice.
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RobotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RobotId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for RobotId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<&RobotId> for RobotId {
    fn from(id: &RobotId) -> Self {
        id.clone()
    }
}

impl AsRef<str> for RobotId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for RobotId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

// ============================================================================
// ListenerId
// ============================================================================

/// Identifies one raw-frame listener registered on a transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

impl ListenerId {
    /// Generates a fresh, process-unique listener id.
    #[inline]
    #[must_use]
    pub fn next() -> Self {
        Self(NEXT_LISTENER_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Returns the raw value.
    #[inline]
    #[must_use]
    pub const fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ListenerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// CallId
// ============================================================================

/// Wire id attached to an outgoing `call_service` op.
///
/// Only informational: responses are correlated by service name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CallId(String);

impl CallId {
    /// Generates the next call id for a service.
    #[must_use]
    pub fn generate(service: &str) -> Self {
        let seq = NEXT_CALL_SEQ.fetch_add(1, Ordering::Relaxed);
        Self(format!("call_service:{service}:{seq}"))
    }

    /// Returns the id as a string slice.
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CallId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use rustc_hash::FxHashMap;

    #[test]
    fn test_robot_id_display() {
        let id = RobotId::new("r1");
        assert_eq!(id.to_string(), "r1");
        assert_eq!(id.as_str(), "r1");
    }

    #[test]
    fn test_robot_id_lookup_by_str() {
        let mut map = FxHashMap::default();
        map.insert(RobotId::from("r1"), 1);
        assert_eq!(map.get("r1"), Some(&1));
    }

    #[test]
    fn test_robot_id_serde_transparent() {
        let json = serde_json::to_string(&RobotId::from("r1")).expect("serialize");
        assert_eq!(json, "\"r1\"");
    }

    #[test]
    fn test_listener_ids_unique() {
        let a = ListenerId::next();
        let b = ListenerId::next();
        assert_ne!(a, b);
    }

    #[test]
    fn test_call_id_format() {
        let id = CallId::generate("/mode");
        assert!(id.as_str().starts_with("call_service:/mode:"));
    }
}
