//! Bridge coordinator and external interface.
//!
//! The [`Bridge`] binds the connection registry, the relay endpoint, the
//! control dispatcher and the robot record store behind one cheap-to-clone
//! handle.
//!
//! # Example
//!
//! ```no_run
//! use robot_bridge::{Bridge, MemoryStore, RobotEndpoint, ServiceRequest};
//!
//! # async fn example() -> robot_bridge::Result<()> {
//! let store = MemoryStore::new();
//! store.insert("r1", RobotEndpoint::new("10.0.0.5", 9090));
//! let bridge = Bridge::builder().store(store).build()?;
//!
//! bridge.connect_robot("r1").await?;
//! bridge.subscribe("r1", "/odom", "nav_msgs/Odometry", |msg| {
//!     println!("odom: {msg}");
//! })?;
//!
//! let reply = bridge.call("r1", "/mode", &ServiceRequest::GetMode).await?;
//! println!("mode: {}", reply.get_string("mode_name"));
//! # Ok(())
//! # }
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use chrono::{DateTime, Utc};
use rustc_hash::FxHashMap;
use serde::Serialize;
use serde_json::Value;
use tokio::runtime::Handle;
use tokio::sync::{Mutex as AsyncMutex, mpsc};
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use crate::control::{ControlDispatcher, ControlEvent, ControlOutcome};
use crate::error::{Error, Result};
use crate::identifiers::RobotId;
use crate::protocol::{ServiceRequest, ServiceResponse};
use crate::session::{
    ConnectOutcome, ConnectionRegistry, PendingCall, Session, SessionState, StatusEvent,
    SubscriptionHandle,
};
use crate::transport::RelayServer;

use super::builder::BridgeBuilder;
use super::options::BridgeOptions;
use super::store::RobotStore;

// ============================================================================
// ConnectionStatus
// ============================================================================

/// Point-in-time view of one robot's connection.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionStatus {
    /// Robot the snapshot describes.
    pub robot_id: RobotId,
    /// `true` while a Connected session exists.
    pub connected: bool,
    /// Lifecycle state.
    pub state: SessionState,
    /// Current session instance, if any.
    pub session_id: Option<Uuid>,
    /// When the current session opened.
    pub connected_at: Option<DateTime<Utc>>,
    /// When the last inbound frame arrived.
    pub last_seen: Option<DateTime<Utc>>,
    /// Latest scalar reading per telemetry topic.
    pub telemetry: FxHashMap<String, f64>,
}

// ============================================================================
// Types
// ============================================================================

/// Internal shared state for the bridge.
struct BridgeInner {
    /// Bridge options.
    options: BridgeOptions,

    /// Robot id → session table.
    registry: Arc<ConnectionRegistry>,

    /// Robot record store.
    store: Arc<dyn RobotStore>,

    /// Control event executor.
    dispatcher: ControlDispatcher,

    /// Relay endpoint, once started.
    relay: AsyncMutex<Option<Arc<RelayServer>>>,

    /// Set once shutdown begins.
    closed: AtomicBool,
}

// ============================================================================
// Bridge
// ============================================================================

/// Robot bridge coordinator.
///
/// Cheap to clone; all clones share the same registry and relay.
#[derive(Clone)]
pub struct Bridge {
    inner: Arc<BridgeInner>,
}

impl fmt::Debug for Bridge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bridge")
            .field("options", &self.inner.options)
            .field("sessions", &self.inner.registry.session_count())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Bridge - Constructor
// ============================================================================

impl Bridge {
    /// Creates a configuration builder for the bridge.
    #[inline]
    #[must_use]
    pub fn builder() -> BridgeBuilder {
        BridgeBuilder::new()
    }

    /// Creates a bridge and starts its status forwarder.
    pub(crate) fn new(options: BridgeOptions, store: Arc<dyn RobotStore>) -> Result<Self> {
        let runtime = Handle::try_current()
            .map_err(|e| Error::config(format!("Bridge must be built inside a tokio runtime: {e}")))?;

        let (feed_tx, feed_rx) = mpsc::unbounded_channel();
        let registry = ConnectionRegistry::with_status_feed(options.connect_timeout, feed_tx);

        runtime.spawn(Self::forward_status(Arc::clone(&store), feed_rx));

        info!(
            connect_timeout_ms = options.connect_timeout.as_millis() as u64,
            motion_topic = %options.motion_topic,
            "Bridge created"
        );

        Ok(Self {
            inner: Arc::new(BridgeInner {
                dispatcher: ControlDispatcher::new(options.clone()),
                options,
                registry,
                store,
                relay: AsyncMutex::new(None),
                closed: AtomicBool::new(false),
            }),
        })
    }

    /// Status forwarder task: hands each transition to the store, in order.
    async fn forward_status(
        store: Arc<dyn RobotStore>,
        mut feed: mpsc::UnboundedReceiver<(RobotId, StatusEvent)>,
    ) {
        while let Some((robot_id, event)) = feed.recv().await {
            if let Err(e) = store.report_status(&robot_id, event, Utc::now()).await {
                warn!(robot_id = %robot_id, %event, error = %e, "Failed to persist status");
            }
        }
        debug!("Status forwarder terminated");
    }
}

// ============================================================================
// Bridge - Accessors
// ============================================================================

impl Bridge {
    /// Returns the bridge options.
    #[inline]
    #[must_use]
    pub fn options(&self) -> &BridgeOptions {
        &self.inner.options
    }

    /// Returns the connection registry.
    #[inline]
    #[must_use]
    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.inner.registry
    }

    /// Returns the robot record store.
    #[inline]
    #[must_use]
    pub fn store(&self) -> &Arc<dyn RobotStore> {
        &self.inner.store
    }

    fn session(&self, robot_id: &RobotId) -> Result<Session> {
        self.inner
            .registry
            .get(robot_id)
            .filter(Session::is_connected)
            .ok_or_else(|| Error::not_connected(robot_id))
    }
}

// ============================================================================
// Bridge - Connections
// ============================================================================

impl Bridge {
    /// Connects a robot at `ws://{host}:{port}`.
    ///
    /// # Errors
    ///
    /// See [`ConnectionRegistry::connect`].
    pub async fn connect(
        &self,
        robot_id: impl Into<RobotId>,
        host: &str,
        port: u16,
    ) -> Result<ConnectOutcome> {
        if self.inner.closed.load(Ordering::SeqCst) {
            return Err(Error::ConnectionClosed);
        }
        self.inner
            .registry
            .connect(&robot_id.into(), host, port)
            .await
    }

    /// Connects a robot at the endpoint the store resolves for it.
    ///
    /// # Errors
    ///
    /// - [`Error::RobotNotFound`] if the store does not know the robot
    /// - any error of [`Bridge::connect`]
    pub async fn connect_robot(&self, robot_id: impl Into<RobotId>) -> Result<ConnectOutcome> {
        let robot_id = robot_id.into();
        let endpoint = self.inner.store.resolve(&robot_id).await?;
        debug!(robot_id = %robot_id, %endpoint, "Resolved robot endpoint");
        self.connect(robot_id, &endpoint.host, endpoint.port).await
    }

    /// Disconnects a robot. Returns `false` if it had no session.
    pub fn disconnect(&self, robot_id: impl Into<RobotId>) -> bool {
        self.inner.registry.disconnect(&robot_id.into())
    }

    /// Returns `true` if the robot has a Connected session.
    #[must_use]
    pub fn is_connected(&self, robot_id: impl Into<RobotId>) -> bool {
        self.inner.registry.is_connected(&robot_id.into())
    }

    /// Returns a snapshot of the robot's connection.
    #[must_use]
    pub fn get_connection_status(&self, robot_id: impl Into<RobotId>) -> ConnectionStatus {
        let robot_id = robot_id.into();
        let state = self.inner.registry.state(&robot_id);

        match self.inner.registry.get(&robot_id) {
            Some(session) => ConnectionStatus {
                connected: session.is_connected(),
                state: session.state(),
                session_id: Some(*session.id()),
                connected_at: Some(session.connected_at()),
                last_seen: Some(session.last_activity()),
                telemetry: session.telemetry(),
                robot_id,
            },
            None => ConnectionStatus {
                robot_id,
                connected: false,
                state,
                session_id: None,
                connected_at: None,
                last_seen: None,
                telemetry: FxHashMap::default(),
            },
        }
    }

    /// Registers the robot's status listener; last registration wins.
    pub fn on_status_change<F>(&self, robot_id: impl Into<RobotId>, callback: F)
    where
        F: Fn(&RobotId, StatusEvent) + Send + Sync + 'static,
    {
        self.inner
            .registry
            .on_status_change(robot_id, Arc::new(callback));
    }
}

// ============================================================================
// Bridge - Topics & Services
// ============================================================================

impl Bridge {
    /// Subscribes to a robot topic; see [`Session::subscribe`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotConnected`] if the robot has no Connected session.
    pub fn subscribe<F>(
        &self,
        robot_id: impl Into<RobotId>,
        topic: &str,
        message_type: &str,
        callback: F,
    ) -> Result<Arc<SubscriptionHandle>>
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        self.session(&robot_id.into())?
            .subscribe(topic, message_type, Arc::new(callback))
    }

    /// Removes a robot topic subscription; no-op for unknown topics.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotConnected`] if the robot has no Connected session.
    pub fn unsubscribe(&self, robot_id: impl Into<RobotId>, topic: &str) -> Result<bool> {
        Ok(self.session(&robot_id.into())?.unsubscribe(topic))
    }

    /// Publishes on a robot topic; see [`Session::publish`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotConnected`] if the robot has no Connected session.
    pub fn publish(
        &self,
        robot_id: impl Into<RobotId>,
        topic: &str,
        message_type: &str,
        payload: Value,
    ) -> Result<()> {
        self.session(&robot_id.into())?
            .publish(topic, message_type, payload)
    }

    /// Issues a typed service call.
    ///
    /// Rejects immediately with [`Error::NotConnected`] if the robot has no
    /// Connected session.
    pub fn call(
        &self,
        robot_id: impl Into<RobotId>,
        service: &str,
        request: &ServiceRequest,
    ) -> PendingCall {
        match self.session(&robot_id.into()) {
            Ok(session) => session.call(service, request),
            Err(e) => PendingCall::failed(service, e),
        }
    }

    /// Issues a service call from a command kind and parameter object.
    ///
    /// # Errors
    ///
    /// - [`Error::NotConnected`] if the robot has no Connected session
    /// - [`Error::Protocol`] if `params` is not a JSON object
    /// - [`Error::ServiceCall`] if the robot reports failure
    /// - [`Error::ConnectionClosed`] if the session ends first
    pub async fn call_service(
        &self,
        robot_id: impl Into<RobotId>,
        service: &str,
        command: &str,
        params: Value,
    ) -> Result<ServiceResponse> {
        let robot_id = robot_id.into();
        let session = self.session(&robot_id)?;
        let request = ServiceRequest::from_parts(command, params)?;
        session.call(service, &request).await
    }
}

// ============================================================================
// Bridge - Telemetry
// ============================================================================

impl Bridge {
    /// Tracks a scalar telemetry topic.
    ///
    /// Each reading's `data` (or `percentage`) field is stored in the
    /// session's telemetry snapshot and forwarded to the store.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotConnected`] if the robot has no Connected session.
    pub fn watch_telemetry(
        &self,
        robot_id: impl Into<RobotId>,
        topic: &str,
        message_type: &str,
    ) -> Result<Arc<SubscriptionHandle>> {
        let robot_id = robot_id.into();
        let session = self.session(&robot_id)?;

        let registry: Weak<ConnectionRegistry> = Arc::downgrade(&self.inner.registry);
        let store = Arc::clone(&self.inner.store);
        let topic_name = topic.to_string();

        let callback = move |msg: &Value| {
            let Some(value) = scalar_reading(msg) else {
                trace!(topic = %topic_name, "Telemetry message without scalar reading");
                return;
            };
            let Some(session) = registry.upgrade().and_then(|r| r.get(&robot_id)) else {
                return;
            };
            session.record_telemetry(&topic_name, value);

            let store = Arc::clone(&store);
            let robot_id = robot_id.clone();
            let topic_name = topic_name.clone();
            tokio::spawn(async move {
                if let Err(e) = store.report_telemetry(&robot_id, &topic_name, value).await {
                    warn!(robot_id = %robot_id, topic = %topic_name, error = %e, "Failed to persist telemetry");
                }
            });
        };

        session.subscribe(topic, message_type, Arc::new(callback))
    }
}

/// Extracts the scalar reading of a telemetry message.
fn scalar_reading(msg: &Value) -> Option<f64> {
    ["data", "percentage"]
        .iter()
        .find_map(|key| msg.get(*key).and_then(Value::as_f64))
        .filter(|value| value.is_finite())
}

// ============================================================================
// Bridge - Control & Relay
// ============================================================================

impl Bridge {
    /// Executes a control event for a robot.
    ///
    /// Never fails: errors, including a missing session, become
    /// [`ControlOutcome::Error`].
    pub async fn handle_control(
        &self,
        robot_id: impl Into<RobotId>,
        event: ControlEvent,
    ) -> ControlOutcome {
        let robot_id = robot_id.into();

        match self.session(&robot_id) {
            Ok(session) => self.inner.dispatcher.dispatch(&session, event).await,
            Err(e) => {
                debug!(robot_id = %robot_id, event = event.name(), "Control event for unconnected robot");
                ControlOutcome::error(robot_id, &e)
            }
        }
    }

    /// Starts the relay endpoint, or returns the running one.
    ///
    /// # Errors
    ///
    /// - [`Error::ConnectionClosed`] after shutdown
    /// - [`Error::Io`] if binding fails
    pub async fn start_relay(&self) -> Result<Arc<RelayServer>> {
        let mut relay = self.inner.relay.lock().await;

        if self.inner.closed.load(Ordering::SeqCst) {
            return Err(Error::ConnectionClosed);
        }

        if let Some(running) = relay.as_ref() {
            return Ok(Arc::clone(running));
        }

        let server = RelayServer::bind_with_handshake_timeout(
            self.inner.options.relay_ip,
            self.inner.options.relay_port,
            Arc::clone(&self.inner.registry),
            self.inner.options.connect_timeout,
        )
        .await?;
        *relay = Some(Arc::clone(&server));
        Ok(server)
    }

    /// Returns the running relay endpoint, if started.
    pub async fn relay(&self) -> Option<Arc<RelayServer>> {
        self.inner.relay.lock().await.clone()
    }

    /// Stops the relay and disconnects every robot.
    pub async fn shutdown(&self) {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        info!("Bridge shutting down");

        if let Some(relay) = self.inner.relay.lock().await.take() {
            relay.shutdown();
        }

        let closed = self.inner.registry.shutdown();
        info!(sessions = closed, "Bridge shutdown complete");
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::time::Duration;

    use serde_json::json;
    use tokio::time::{sleep, timeout};
    use tokio_test::{assert_err, assert_ok};

    use crate::bridge::store::{MemoryStore, RobotEndpoint};
    use crate::transport::mock::MockBridge;

    const TEST_TIMEOUT: Duration = Duration::from_secs(5);

    fn bridge_with(store: Arc<MemoryStore>) -> Bridge {
        Bridge::builder()
            .shared_store(store)
            .connect_timeout(TEST_TIMEOUT)
            .build()
            .expect("bridge")
    }

    async fn eventually(mut check: impl FnMut() -> bool) {
        timeout(TEST_TIMEOUT, async {
            while !check() {
                sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("condition reached in time");
    }

    #[tokio::test]
    async fn test_connect_robot_resolves_through_store() -> anyhow::Result<()> {
        let mock = MockBridge::start().await;
        let store = Arc::new(MemoryStore::new());
        store.insert("r1", RobotEndpoint::new("127.0.0.1", mock.port()));
        let bridge = bridge_with(Arc::clone(&store));

        let outcome = bridge.connect_robot("r1").await?;

        assert_eq!(outcome, ConnectOutcome::Connected);
        assert!(bridge.is_connected("r1"));

        let robot = RobotId::from("r1");
        eventually(|| store.status(&robot) == Some(StatusEvent::Connected)).await;
        Ok(())
    }

    #[tokio::test]
    async fn test_connect_unknown_robot() {
        let bridge = bridge_with(Arc::new(MemoryStore::new()));
        let result = bridge.connect_robot("ghost").await;
        assert!(matches!(result, Err(Error::RobotNotFound { .. })));
    }

    #[tokio::test]
    async fn test_call_service_on_unconnected_robot() {
        let bridge = bridge_with(Arc::new(MemoryStore::new()));

        let result = bridge.call_service("r1", "mode", "set", json!({ "mode": 2 })).await;
        assert!(matches!(result, Err(Error::NotConnected { .. })));

        let pending = bridge.call("r1", "mode", &ServiceRequest::GetMode).await;
        assert!(matches!(pending, Err(Error::NotConnected { .. })));
    }

    #[tokio::test]
    async fn test_call_service_set_mode() -> anyhow::Result<()> {
        let mock = MockBridge::start().await;
        let bridge = bridge_with(Arc::new(MemoryStore::new()));
        bridge.connect("r1", "127.0.0.1", mock.port()).await?;

        let response = timeout(
            TEST_TIMEOUT,
            bridge.call_service("r1", "mode", "set", json!({ "mode": 2 })),
        )
        .await??;

        assert_eq!(response.get_string("mode_name"), "walk");
        Ok(())
    }

    #[tokio::test]
    async fn test_call_service_forwards_generic_set_params() -> anyhow::Result<()> {
        let mut mock = MockBridge::start().await;
        let bridge = bridge_with(Arc::new(MemoryStore::new()));
        bridge.connect("r1", "127.0.0.1", mock.port()).await?;

        // No reply comes back for /light; only the outbound args matter here
        let call = tokio::spawn({
            let bridge = bridge.clone();
            async move {
                bridge
                    .call_service("r1", "/light", "set", json!({ "level": 3 }))
                    .await
            }
        });

        let request = mock.next_request().await;
        assert_eq!(request["op"], "call_service");
        assert_eq!(request["service"], "/light");
        assert_eq!(request["args"], json!({ "command": "set", "level": 3 }));

        call.abort();
        Ok(())
    }

    #[tokio::test]
    async fn test_operations_without_session_fail_locally() {
        let bridge = bridge_with(Arc::new(MemoryStore::new()));

        assert_err!(bridge.publish("r1", "/cmd_vel", "geometry_msgs/Twist", json!({})));
        assert_err!(bridge.unsubscribe("r1", "/odom"));
        assert_err!(bridge.subscribe("r1", "/odom", "nav_msgs/Odometry", |_msg| {}));
        assert_eq!(bridge.registry().session_count(), 0);
    }

    #[tokio::test]
    async fn test_publish_before_subscribe() -> anyhow::Result<()> {
        let mut mock = MockBridge::start().await;
        let bridge = bridge_with(Arc::new(MemoryStore::new()));
        bridge.connect("r1", "127.0.0.1", mock.port()).await?;

        assert_ok!(bridge.publish("r1", "/chatter", "std_msgs/String", json!({ "data": "hi" })));

        assert_eq!(mock.next_request().await["op"], "advertise");
        assert_eq!(mock.next_request().await["op"], "publish");
        Ok(())
    }

    #[tokio::test]
    async fn test_status_snapshot_and_telemetry() -> anyhow::Result<()> {
        let mock = MockBridge::start().await;
        let store = Arc::new(MemoryStore::new());
        let bridge = bridge_with(Arc::clone(&store));
        bridge.connect("r1", "127.0.0.1", mock.port()).await?;

        bridge.watch_telemetry("r1", "/battery", "sensor_msgs/BatteryState")?;
        mock.publish("/battery", json!({ "percentage": 64.0 }));

        let robot = RobotId::from("r1");
        eventually(|| store.telemetry(&robot, "/battery") == Some(64.0)).await;

        let status = bridge.get_connection_status("r1");
        assert!(status.connected);
        assert_eq!(status.state, SessionState::Connected);
        assert_eq!(status.telemetry.get("/battery"), Some(&64.0));
        assert!(status.last_seen.is_some());

        let wire = serde_json::to_value(&status)?;
        assert_eq!(wire["robotId"], "r1");
        assert!(wire.get("lastSeen").is_some());
        Ok(())
    }

    #[tokio::test]
    async fn test_status_for_unknown_robot() {
        let bridge = bridge_with(Arc::new(MemoryStore::new()));
        let status = bridge.get_connection_status("nobody");

        assert!(!status.connected);
        assert_eq!(status.state, SessionState::Idle);
        assert!(status.last_seen.is_none());
        assert!(status.telemetry.is_empty());
    }

    #[tokio::test]
    async fn test_status_listener_and_store_see_disconnect() -> anyhow::Result<()> {
        let mock = MockBridge::start().await;
        let store = Arc::new(MemoryStore::new());
        let bridge = bridge_with(Arc::clone(&store));
        let (tx, mut rx) = mpsc::unbounded_channel();

        bridge.on_status_change("r1", move |_robot, event| {
            let _ = tx.send(event);
        });
        bridge.connect("r1", "127.0.0.1", mock.port()).await?;
        assert!(bridge.disconnect("r1"));

        assert_eq!(rx.recv().await, Some(StatusEvent::Connected));
        assert_eq!(rx.recv().await, Some(StatusEvent::Disconnected));

        let robot = RobotId::from("r1");
        eventually(|| store.status(&robot) == Some(StatusEvent::Disconnected)).await;
        Ok(())
    }

    #[tokio::test]
    async fn test_handle_control_without_session() {
        let bridge = bridge_with(Arc::new(MemoryStore::new()));
        let outcome = bridge.handle_control("r1", ControlEvent::Stop).await;
        assert!(outcome.is_error());
    }

    #[tokio::test]
    async fn test_relay_start_is_idempotent_and_shutdown() -> anyhow::Result<()> {
        let mock = MockBridge::start().await;
        let bridge = bridge_with(Arc::new(MemoryStore::new()));
        bridge.connect("r1", "127.0.0.1", mock.port()).await?;

        let first = bridge.start_relay().await?;
        let second = bridge.start_relay().await?;
        assert!(Arc::ptr_eq(&first, &second));

        bridge.shutdown().await;

        assert!(!bridge.is_connected("r1"));
        assert!(bridge.relay().await.is_none());
        assert!(matches!(
            bridge.connect("r1", "127.0.0.1", mock.port()).await,
            Err(Error::ConnectionClosed)
        ));
        assert!(matches!(
            bridge.start_relay().await,
            Err(Error::ConnectionClosed)
        ));
        Ok(())
    }

    #[test]
    fn test_scalar_reading() {
        assert_eq!(scalar_reading(&json!({ "data": 12.5 })), Some(12.5));
        assert_eq!(scalar_reading(&json!({ "percentage": 0.8 })), Some(0.8));
        assert_eq!(scalar_reading(&json!({ "data": "high" })), None);
        assert_eq!(scalar_reading(&json!({})), None);
    }
}
