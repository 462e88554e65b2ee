//! Control event dispatch.
//!
//! Turns validated ingress events into bridge traffic on one session and
//! reports a single [`ControlOutcome`] per event for the ingress layer to
//! broadcast.
//!
//! | Event | Traffic | Outcome |
//! |-------|---------|---------|
//! | `joystick`, `move`, `rotate`, `stop` | twist on motion topic | `log` (info) |
//! | `emergency_stop` | zero twist on motion topic | `log` (warn) |
//! | `set_mode`, `get_mode` | call on mode service | `mode` |
//! | `arm` | publish on arm topic | `log` (info) |
//! | any failure | | `error` |

// ============================================================================
// Imports
// ============================================================================

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{debug, info, warn};

use crate::bridge::BridgeOptions;
use crate::error::{Error, Result};
use crate::identifiers::RobotId;
use crate::protocol::{ModeReply, ServiceRequest};
use crate::session::Session;

use super::motion::{Direction, MotionCommand, RotateDirection, normalize};

// ============================================================================
// ControlEvent
// ============================================================================

/// A validated control request from the ingress layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlEvent {
    /// Joystick deflection, each axis in `[-1, 1]`.
    Joystick {
        /// Lateral deflection, positive to the right.
        x: f64,
        /// Longitudinal deflection, positive forward.
        y: f64,
    },

    /// Constant translation; speed defaults to the configured maximum.
    Move {
        /// Direction of travel.
        direction: Direction,
        /// Speed magnitude in m/s.
        #[serde(default)]
        speed: Option<f64>,
    },

    /// Constant rotation; speed defaults to the configured maximum.
    Rotate {
        /// Direction of rotation.
        direction: RotateDirection,
        /// Angular speed magnitude in rad/s.
        #[serde(default)]
        speed: Option<f64>,
    },

    /// Halt.
    Stop,

    /// Halt, flagged as an emergency.
    EmergencyStop,

    /// Switch the robot into a numbered mode.
    SetMode {
        /// Target mode number.
        mode: u8,
    },

    /// Query the robot's current mode.
    GetMode,

    /// Arm command, published verbatim on the arm topic.
    Arm {
        /// Arm payload; strings are wrapped as `{"data": ...}`.
        command: Value,
    },
}

impl ControlEvent {
    /// Returns the event name used in logs.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Joystick { .. } => "joystick",
            Self::Move { .. } => "move",
            Self::Rotate { .. } => "rotate",
            Self::Stop => "stop",
            Self::EmergencyStop => "emergency_stop",
            Self::SetMode { .. } => "set_mode",
            Self::GetMode => "get_mode",
            Self::Arm { .. } => "arm",
        }
    }

    /// Returns the motion command for motion events.
    #[must_use]
    pub fn motion(&self, default_speed: f64) -> Option<MotionCommand> {
        match *self {
            Self::Joystick { x, y } => Some(MotionCommand::Joystick { x, y }),
            Self::Move { direction, speed } => Some(MotionCommand::Move {
                direction,
                speed: speed.unwrap_or(default_speed),
            }),
            Self::Rotate { direction, speed } => Some(MotionCommand::Rotate {
                direction,
                speed: speed.unwrap_or(default_speed),
            }),
            Self::Stop => Some(MotionCommand::Stop),
            Self::EmergencyStop => Some(MotionCommand::EmergencyStop),
            Self::SetMode { .. } | Self::GetMode | Self::Arm { .. } => None,
        }
    }
}

// ============================================================================
// ControlOutcome
// ============================================================================

/// Severity of a [`ControlOutcome::Log`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Warn,
}

/// Result of one control event, for the ingress layer to broadcast.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlOutcome {
    /// The event was carried out.
    Log {
        /// Robot the event targeted.
        robot_id: RobotId,
        /// Severity for the ingress broadcast.
        level: LogLevel,
        /// What was done.
        message: String,
    },

    /// The robot reported its mode.
    Mode {
        /// Robot that replied.
        robot_id: RobotId,
        /// Mode name reported by the robot.
        mode_name: String,
        /// Numeric mode, when reported.
        #[serde(skip_serializing_if = "Option::is_none")]
        mode: Option<i64>,
    },

    /// The event failed.
    Error {
        /// Robot the event targeted.
        robot_id: RobotId,
        /// Error description.
        message: String,
    },
}

impl ControlOutcome {
    /// Creates an error outcome.
    #[must_use]
    pub fn error(robot_id: impl Into<RobotId>, error: &Error) -> Self {
        Self::Error {
            robot_id: robot_id.into(),
            message: error.to_string(),
        }
    }

    /// Returns `true` for error outcomes.
    #[inline]
    #[must_use]
    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error { .. })
    }
}

// ============================================================================
// ControlDispatcher
// ============================================================================

/// Executes control events against a session.
#[derive(Debug, Clone)]
pub struct ControlDispatcher {
    options: BridgeOptions,
}

impl ControlDispatcher {
    /// Creates a dispatcher using the topics and services in `options`.
    #[must_use]
    pub fn new(options: BridgeOptions) -> Self {
        Self { options }
    }

    /// Executes one event and reports its outcome.
    ///
    /// Never fails: errors become [`ControlOutcome::Error`].
    pub async fn dispatch(&self, session: &Session, event: ControlEvent) -> ControlOutcome {
        let robot_id = session.robot_id().clone();
        let name = event.name();

        match self.execute(session, event).await {
            Ok(outcome) => {
                debug!(robot_id = %robot_id, event = name, "Control event handled");
                outcome
            }
            Err(e) => {
                warn!(robot_id = %robot_id, event = name, error = %e, "Control event failed");
                ControlOutcome::error(robot_id, &e)
            }
        }
    }

    async fn execute(&self, session: &Session, event: ControlEvent) -> Result<ControlOutcome> {
        let robot_id = session.robot_id().clone();

        match event {
            ControlEvent::SetMode { mode } => {
                self.request_mode(session, ServiceRequest::SetMode { mode })
                    .await
            }

            ControlEvent::GetMode => self.request_mode(session, ServiceRequest::GetMode).await,

            ControlEvent::Arm { command } => {
                session.publish(
                    &self.options.arm_topic,
                    &self.options.arm_type,
                    arm_payload(command),
                )?;
                Ok(ControlOutcome::Log {
                    robot_id,
                    level: LogLevel::Info,
                    message: "arm command sent".to_string(),
                })
            }

            motion_event => {
                let Some(command) = motion_event.motion(self.options.max_speed) else {
                    return Err(Error::protocol(format!(
                        "{} is not a motion event",
                        motion_event.name()
                    )));
                };
                self.drive(session, command)
            }
        }
    }

    /// Publishes the normalized twist for a motion command.
    fn drive(&self, session: &Session, command: MotionCommand) -> Result<ControlOutcome> {
        let twist = normalize(&command, self.options.max_speed);
        session.publish(
            &self.options.motion_topic,
            &self.options.motion_type,
            serde_json::to_value(twist)?,
        )?;

        let robot_id = session.robot_id().clone();
        let outcome = match command {
            MotionCommand::EmergencyStop => {
                warn!(robot_id = %robot_id, "Emergency stop");
                ControlOutcome::Log {
                    robot_id,
                    level: LogLevel::Warn,
                    message: "emergency stop".to_string(),
                }
            }
            other => ControlOutcome::Log {
                robot_id,
                level: LogLevel::Info,
                message: format!(
                    "{}: linear ({:.2}, {:.2}) angular {:.2}",
                    other.name(),
                    twist.linear.x,
                    twist.linear.y,
                    twist.angular.z
                ),
            },
        };

        Ok(outcome)
    }

    /// Calls the mode service and reports the mode the robot answered with.
    async fn request_mode(
        &self,
        session: &Session,
        request: ServiceRequest,
    ) -> Result<ControlOutcome> {
        let service = &self.options.mode_service;
        let response = session.call(service, &request).await?;
        let reply: ModeReply = response.parse()?;

        if !reply.success {
            return Err(Error::service_call(
                service.to_string(),
                format!("mode request refused, robot is in {}", reply.mode_name),
            ));
        }

        info!(robot_id = %session.robot_id(), mode = %reply.mode_name, "Robot mode");
        Ok(ControlOutcome::Mode {
            robot_id: session.robot_id().clone(),
            mode_name: reply.mode_name,
            mode: reply.mode,
        })
    }
}

/// Wraps an arm command for the arm topic.
///
/// Strings become `std_msgs/String` payloads; objects pass through.
fn arm_payload(command: Value) -> Value {
    match command {
        Value::String(data) => json!({ "data": data }),
        object @ Value::Object(_) => object,
        other => json!({ "data": other.to_string() }),
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::time::Duration;

    use tokio::sync::watch;

    use crate::session::SessionState;
    use crate::transport::mock::MockBridge;

    const TEST_TIMEOUT: Duration = Duration::from_secs(5);

    async fn session_for(mock: &MockBridge) -> Session {
        let (state, _) = watch::channel(SessionState::Idle);
        Session::connect(RobotId::from("r1"), mock.url(), TEST_TIMEOUT, state)
            .await
            .expect("session should connect")
    }

    fn dispatcher() -> ControlDispatcher {
        ControlDispatcher::new(BridgeOptions::new())
    }

    #[test]
    fn test_event_wire_format() {
        let event: ControlEvent =
            serde_json::from_value(json!({ "type": "joystick", "x": 0.5, "y": -0.2 }))
                .expect("joystick");
        assert_eq!(event, ControlEvent::Joystick { x: 0.5, y: -0.2 });

        let event: ControlEvent =
            serde_json::from_value(json!({ "type": "move", "direction": "left" })).expect("move");
        assert_eq!(
            event,
            ControlEvent::Move {
                direction: Direction::Left,
                speed: None
            }
        );

        let event: ControlEvent =
            serde_json::from_value(json!({ "type": "emergency_stop" })).expect("estop");
        assert_eq!(event, ControlEvent::EmergencyStop);
    }

    #[test]
    fn test_outcome_wire_format() {
        let outcome = ControlOutcome::Mode {
            robot_id: RobotId::from("r1"),
            mode_name: "walk".to_string(),
            mode: Some(2),
        };
        assert_eq!(
            serde_json::to_value(&outcome).expect("serialize"),
            json!({ "type": "mode", "robot_id": "r1", "mode_name": "walk", "mode": 2 })
        );
    }

    #[test]
    fn test_arm_payload() {
        assert_eq!(arm_payload(json!("grip")), json!({ "data": "grip" }));
        assert_eq!(arm_payload(json!({ "joint": 1 })), json!({ "joint": 1 }));
        assert_eq!(arm_payload(json!(3)), json!({ "data": "3" }));
    }

    #[tokio::test]
    async fn test_joystick_publishes_twist() {
        let mut mock = MockBridge::start().await;
        let session = session_for(&mock).await;

        let outcome = dispatcher()
            .dispatch(&session, ControlEvent::Joystick { x: 0.5, y: -0.2 })
            .await;
        assert!(!outcome.is_error(), "{outcome:?}");

        let advertise = mock.next_request().await;
        assert_eq!(advertise["op"], "advertise");
        assert_eq!(advertise["topic"], "/cmd_vel");
        assert_eq!(advertise["type"], "geometry_msgs/Twist");

        let publish = mock.next_request().await;
        assert_eq!(publish["op"], "publish");
        assert_eq!(
            publish["msg"],
            json!({
                "linear": { "x": -0.2, "y": -0.5, "z": 0.0 },
                "angular": { "x": 0.0, "y": 0.0, "z": 0.0 }
            })
        );
    }

    #[tokio::test]
    async fn test_emergency_stop_is_zero_and_warns() {
        let mut mock = MockBridge::start().await;
        let session = session_for(&mock).await;

        let outcome = dispatcher()
            .dispatch(&session, ControlEvent::EmergencyStop)
            .await;

        match outcome {
            ControlOutcome::Log { level, message, .. } => {
                assert_eq!(level, LogLevel::Warn);
                assert_eq!(message, "emergency stop");
            }
            other => panic!("expected log outcome, got {other:?}"),
        }

        let _advertise = mock.next_request().await;
        let publish = mock.next_request().await;
        assert_eq!(publish["msg"]["linear"], json!({ "x": 0.0, "y": 0.0, "z": 0.0 }));
        assert_eq!(publish["msg"]["angular"], json!({ "x": 0.0, "y": 0.0, "z": 0.0 }));
    }

    #[tokio::test]
    async fn test_set_mode_reports_mode_name() {
        let mock = MockBridge::start().await;
        let session = session_for(&mock).await;

        let outcome = dispatcher()
            .dispatch(&session, ControlEvent::SetMode { mode: 2 })
            .await;

        assert_eq!(
            outcome,
            ControlOutcome::Mode {
                robot_id: RobotId::from("r1"),
                mode_name: "walk".to_string(),
                mode: Some(2),
            }
        );
    }

    #[tokio::test]
    async fn test_mode_failure_becomes_error_outcome() {
        let mock = MockBridge::start().await;
        let session = session_for(&mock).await;
        let dispatcher = ControlDispatcher::new(BridgeOptions::new().with_mode_service("/fail"));

        let outcome = dispatcher.dispatch(&session, ControlEvent::GetMode).await;

        assert!(outcome.is_error());
    }

    #[tokio::test]
    async fn test_arm_command_published() {
        let mut mock = MockBridge::start().await;
        let session = session_for(&mock).await;

        let outcome = dispatcher()
            .dispatch(
                &session,
                ControlEvent::Arm {
                    command: json!("open_gripper"),
                },
            )
            .await;
        assert!(!outcome.is_error());

        let advertise = mock.next_request().await;
        assert_eq!(advertise["topic"], "/arm_control");
        let publish = mock.next_request().await;
        assert_eq!(publish["msg"], json!({ "data": "open_gripper" }));
    }

    #[tokio::test]
    async fn test_closed_session_yields_error_outcome() {
        let mock = MockBridge::start().await;
        let session = session_for(&mock).await;
        session.close();

        let outcome = dispatcher().dispatch(&session, ControlEvent::Stop).await;

        match outcome {
            ControlOutcome::Error { message, .. } => assert!(message.contains("not connected")),
            other => panic!("expected error outcome, got {other:?}"),
        }
    }
}
