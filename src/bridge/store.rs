//! Robot record store collaborator.
//!
//! The bridge persists nothing itself. It asks a [`RobotStore`] where a robot
//! lives and hands it every status transition and telemetry reading.
//! [`MemoryStore`] is an in-process implementation for tests and demos.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::identifiers::RobotId;
use crate::session::StatusEvent;

// ============================================================================
// RobotEndpoint
// ============================================================================

/// Network location of a robot's bridge endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RobotEndpoint {
    /// Host name or IP address.
    pub host: String,
    /// Bridge port.
    pub port: u16,
}

impl RobotEndpoint {
    /// Creates an endpoint.
    #[inline]
    #[must_use]
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for RobotEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

// ============================================================================
// RobotStore
// ============================================================================

/// Persistence collaborator for robot records.
#[async_trait]
pub trait RobotStore: Send + Sync {
    /// Resolves a robot id to its bridge endpoint.
    async fn resolve(&self, robot_id: &RobotId) -> Result<RobotEndpoint>;

    /// Records a status transition.
    async fn report_status(
        &self,
        robot_id: &RobotId,
        event: StatusEvent,
        at: DateTime<Utc>,
    ) -> Result<()>;

    /// Records the latest scalar reading of a telemetry topic.
    async fn report_telemetry(&self, robot_id: &RobotId, topic: &str, value: f64) -> Result<()>;
}

// ============================================================================
// MemoryStore
// ============================================================================

/// One robot's record in a [`MemoryStore`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RobotRecord {
    /// Where the robot lives, if known.
    pub endpoint: Option<RobotEndpoint>,
    /// Last reported status.
    pub status: Option<StatusEvent>,
    /// When the last status was reported.
    pub status_at: Option<DateTime<Utc>>,
    /// Latest telemetry reading per topic.
    pub telemetry: FxHashMap<String, f64>,
}

/// In-memory [`RobotStore`].
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: RwLock<FxHashMap<RobotId, RobotRecord>>,
}

impl MemoryStore {
    /// Creates an empty store.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers or moves a robot.
    pub fn insert(&self, robot_id: impl Into<RobotId>, endpoint: RobotEndpoint) {
        self.records
            .write()
            .entry(robot_id.into())
            .or_default()
            .endpoint = Some(endpoint);
    }

    /// Returns a copy of a robot's record.
    #[must_use]
    pub fn record(&self, robot_id: &RobotId) -> Option<RobotRecord> {
        self.records.read().get(robot_id).cloned()
    }

    /// Returns a robot's last reported status.
    #[must_use]
    pub fn status(&self, robot_id: &RobotId) -> Option<StatusEvent> {
        self.records.read().get(robot_id).and_then(|r| r.status)
    }

    /// Returns a robot's latest reading for a topic.
    #[must_use]
    pub fn telemetry(&self, robot_id: &RobotId, topic: &str) -> Option<f64> {
        self.records
            .read()
            .get(robot_id)
            .and_then(|r| r.telemetry.get(topic).copied())
    }
}

#[async_trait]
impl RobotStore for MemoryStore {
    async fn resolve(&self, robot_id: &RobotId) -> Result<RobotEndpoint> {
        self.records
            .read()
            .get(robot_id)
            .and_then(|r| r.endpoint.clone())
            .ok_or_else(|| Error::robot_not_found(robot_id))
    }

    async fn report_status(
        &self,
        robot_id: &RobotId,
        event: StatusEvent,
        at: DateTime<Utc>,
    ) -> Result<()> {
        let mut records = self.records.write();
        let record = records.entry(robot_id.clone()).or_default();
        record.status = Some(event);
        record.status_at = Some(at);
        Ok(())
    }

    async fn report_telemetry(&self, robot_id: &RobotId, topic: &str, value: f64) -> Result<()> {
        self.records
            .write()
            .entry(robot_id.clone())
            .or_default()
            .telemetry
            .insert(topic.to_string(), value);
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_resolve_known_and_unknown() {
        let store = MemoryStore::new();
        store.insert("r1", RobotEndpoint::new("10.0.0.5", 9090));

        let endpoint = store.resolve(&RobotId::from("r1")).await.expect("known");
        assert_eq!(endpoint.to_string(), "10.0.0.5:9090");

        let missing = store.resolve(&RobotId::from("r2")).await;
        assert!(matches!(missing, Err(Error::RobotNotFound { .. })));
    }

    #[tokio::test]
    async fn test_reports_are_recorded() {
        let store = MemoryStore::new();
        let robot = RobotId::from("r1");
        let at = Utc::now();

        store
            .report_status(&robot, StatusEvent::Connected, at)
            .await
            .expect("status");
        store
            .report_telemetry(&robot, "/battery", 71.5)
            .await
            .expect("telemetry");

        let record = store.record(&robot).expect("record");
        assert_eq!(record.status, Some(StatusEvent::Connected));
        assert_eq!(record.status_at, Some(at));
        assert_eq!(store.telemetry(&robot, "/battery"), Some(71.5));
        assert!(record.endpoint.is_none());
    }
}
