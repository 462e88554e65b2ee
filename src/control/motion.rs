//! Motion command normalization.
//!
//! Every motion input is reduced to one canonical `geometry_msgs/Twist`
//! published on the robot's motion topic.
//!
//! | Input | Twist |
//! |-------|-------|
//! | joystick `(x, y)` | `linear.x = y·max`, `linear.y = -x·max` |
//! | move forward / backward | `linear.x = ±speed` |
//! | move left / right | `linear.y = ±speed` |
//! | rotate left / right | `angular.z = ±speed` |
//! | stop, emergency stop | zero |

// ============================================================================
// Imports
// ============================================================================

use serde::{Deserialize, Serialize};

// ============================================================================
// Vector3 / Twist
// ============================================================================

/// `geometry_msgs/Vector3`.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Vector3 {
    /// X component (forward for linear, roll for angular).
    pub x: f64,
    /// Y component (left for linear, pitch for angular).
    pub y: f64,
    /// Z component (up for linear, yaw for angular).
    pub z: f64,
}

impl Vector3 {
    /// The zero vector.
    pub const ZERO: Self = Self::new(0.0, 0.0, 0.0);

    /// Creates a vector.
    #[inline]
    #[must_use]
    pub const fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    /// Returns `true` if every component is zero.
    #[inline]
    #[must_use]
    pub fn is_zero(&self) -> bool {
        self.x == 0.0 && self.y == 0.0 && self.z == 0.0
    }
}

/// `geometry_msgs/Twist`.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Twist {
    /// Linear velocity in m/s.
    pub linear: Vector3,
    /// Angular velocity in rad/s.
    pub angular: Vector3,
}

impl Twist {
    /// Zero velocity.
    pub const ZERO: Self = Self {
        linear: Vector3::ZERO,
        angular: Vector3::ZERO,
    };

    /// Returns `true` for the zero twist.
    #[inline]
    #[must_use]
    pub fn is_zero(&self) -> bool {
        self.linear.is_zero() && self.angular.is_zero()
    }
}

// ============================================================================
// Motion Input
// ============================================================================

/// Translation direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Forward,
    Backward,
    Left,
    Right,
}

/// Rotation direction, counter-clockwise for `Left`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RotateDirection {
    Left,
    Right,
}

/// A motion request before normalization.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MotionCommand {
    /// Joystick deflection, each axis in `[-1, 1]`.
    Joystick { x: f64, y: f64 },
    /// Constant translation.
    Move { direction: Direction, speed: f64 },
    /// Constant rotation.
    Rotate {
        direction: RotateDirection,
        speed: f64,
    },
    /// Halt.
    Stop,
    /// Halt, flagged as an emergency.
    EmergencyStop,
}

impl MotionCommand {
    /// Returns the command name used in logs and outcomes.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Joystick { .. } => "joystick",
            Self::Move { .. } => "move",
            Self::Rotate { .. } => "rotate",
            Self::Stop => "stop",
            Self::EmergencyStop => "emergency_stop",
        }
    }
}

// ============================================================================
// Normalization
// ============================================================================

/// Converts a motion command into the canonical twist.
///
/// Joystick axes are clamped to `[-1, 1]` and scaled by `max_speed`. Move
/// and rotate speeds take their sign from the direction. Non-finite inputs
/// count as zero.
#[must_use]
pub fn normalize(command: &MotionCommand, max_speed: f64) -> Twist {
    let max_speed = finite(max_speed).abs();

    match *command {
        MotionCommand::Joystick { x, y } => {
            let x = finite(x).clamp(-1.0, 1.0);
            let y = finite(y).clamp(-1.0, 1.0);
            Twist {
                linear: Vector3::new(y * max_speed, -x * max_speed, 0.0),
                angular: Vector3::ZERO,
            }
        }

        MotionCommand::Move { direction, speed } => {
            let speed = finite(speed).abs();
            let linear = match direction {
                Direction::Forward => Vector3::new(speed, 0.0, 0.0),
                Direction::Backward => Vector3::new(-speed, 0.0, 0.0),
                Direction::Left => Vector3::new(0.0, speed, 0.0),
                Direction::Right => Vector3::new(0.0, -speed, 0.0),
            };
            Twist {
                linear,
                angular: Vector3::ZERO,
            }
        }

        MotionCommand::Rotate { direction, speed } => {
            let speed = finite(speed).abs();
            let z = match direction {
                RotateDirection::Left => speed,
                RotateDirection::Right => -speed,
            };
            Twist {
                linear: Vector3::ZERO,
                angular: Vector3::new(0.0, 0.0, z),
            }
        }

        MotionCommand::Stop | MotionCommand::EmergencyStop => Twist::ZERO,
    }
}

#[inline]
fn finite(value: f64) -> f64 {
    if value.is_finite() { value } else { 0.0 }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use proptest::prelude::*;
    use serde_json::json;

    #[test]
    fn test_joystick_mapping() {
        let twist = normalize(&MotionCommand::Joystick { x: 0.5, y: -0.2 }, 1.0);

        assert_eq!(twist.linear, Vector3::new(-0.2, -0.5, 0.0));
        assert_eq!(twist.angular, Vector3::ZERO);
    }

    #[test]
    fn test_move_directions() {
        let speed = 0.3;
        let linear = |direction| normalize(&MotionCommand::Move { direction, speed }, 1.0).linear;

        assert_eq!(linear(Direction::Forward), Vector3::new(0.3, 0.0, 0.0));
        assert_eq!(linear(Direction::Backward), Vector3::new(-0.3, 0.0, 0.0));
        assert_eq!(linear(Direction::Left), Vector3::new(0.0, 0.3, 0.0));
        assert_eq!(linear(Direction::Right), Vector3::new(0.0, -0.3, 0.0));
    }

    #[test]
    fn test_rotate_directions() {
        let left = normalize(
            &MotionCommand::Rotate {
                direction: RotateDirection::Left,
                speed: 0.8,
            },
            1.0,
        );
        let right = normalize(
            &MotionCommand::Rotate {
                direction: RotateDirection::Right,
                speed: 0.8,
            },
            1.0,
        );

        assert_eq!(left.angular.z, 0.8);
        assert_eq!(right.angular.z, -0.8);
        assert!(left.linear.is_zero());
    }

    #[test]
    fn test_stops_are_zero() {
        assert!(normalize(&MotionCommand::Stop, 2.0).is_zero());
        assert!(normalize(&MotionCommand::EmergencyStop, 2.0).is_zero());
        assert_eq!(MotionCommand::EmergencyStop.name(), "emergency_stop");
    }

    #[test]
    fn test_non_finite_input_is_zero() {
        let twist = normalize(
            &MotionCommand::Joystick {
                x: f64::NAN,
                y: f64::INFINITY,
            },
            1.0,
        );
        assert!(twist.is_zero());
    }

    #[test]
    fn test_twist_wire_shape() {
        let twist = normalize(&MotionCommand::Joystick { x: 0.0, y: 1.0 }, 0.5);
        let value = serde_json::to_value(twist).expect("serialize");

        assert_eq!(
            value,
            json!({
                "linear": { "x": 0.5, "y": -0.0, "z": 0.0 },
                "angular": { "x": 0.0, "y": 0.0, "z": 0.0 }
            })
        );
    }

    proptest! {
        #[test]
        fn prop_joystick_bounded_by_max(x in -5.0f64..5.0, y in -5.0f64..5.0, max in 0.0f64..10.0) {
            let twist = normalize(&MotionCommand::Joystick { x, y }, max);

            prop_assert!(twist.linear.x.abs() <= max);
            prop_assert!(twist.linear.y.abs() <= max);
            prop_assert_eq!(twist.linear.z, 0.0);
            prop_assert!(twist.angular.is_zero());
        }

        #[test]
        fn prop_joystick_linear_in_range(x in -1.0f64..=1.0, y in -1.0f64..=1.0, max in 0.0f64..10.0) {
            let twist = normalize(&MotionCommand::Joystick { x, y }, max);

            prop_assert_eq!(twist.linear.x, y * max);
            prop_assert_eq!(twist.linear.y, -x * max);
        }

        #[test]
        fn prop_move_touches_one_axis(speed in -10.0f64..10.0) {
            for direction in [Direction::Forward, Direction::Backward, Direction::Left, Direction::Right] {
                let twist = normalize(&MotionCommand::Move { direction, speed }, 1.0);
                let magnitude = twist.linear.x.abs() + twist.linear.y.abs();

                prop_assert_eq!(magnitude, speed.abs());
                prop_assert!(twist.angular.is_zero());
            }
        }
    }
}
