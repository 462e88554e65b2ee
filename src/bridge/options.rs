//! Bridge configuration.
//!
//! # Example
//!
//! ```ignore
//! use std::time::Duration;
//! use robot_bridge::BridgeOptions;
//!
//! let options = BridgeOptions::new()
//!     .with_connect_timeout(Duration::from_secs(5))
//!     .with_relay_port(9091)
//!     .with_max_speed(0.8);
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::borrow::Cow;
use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;

use crate::error::{Error, Result};

// ============================================================================
// Defaults
// ============================================================================

/// Default transport open timeout.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default relay bind address.
pub const DEFAULT_RELAY_IP: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);

/// Default motion topic.
pub const DEFAULT_MOTION_TOPIC: &str = "/cmd_vel";

/// Default motion message type.
pub const DEFAULT_MOTION_TYPE: &str = "geometry_msgs/Twist";

/// Default arm control topic.
pub const DEFAULT_ARM_TOPIC: &str = "/arm_control";

/// Default arm control message type.
pub const DEFAULT_ARM_TYPE: &str = "std_msgs/String";

/// Default mode service.
pub const DEFAULT_MODE_SERVICE: &str = "/mode";

// ============================================================================
// BridgeOptions
// ============================================================================

/// Bridge configuration options.
#[derive(Debug, Clone, PartialEq)]
pub struct BridgeOptions {
    /// Transport open timeout, also the relay client handshake limit.
    pub connect_timeout: Duration,

    /// Relay bind address.
    pub relay_ip: IpAddr,

    /// Relay port (0 for random).
    pub relay_port: u16,

    /// Topic receiving normalized twists.
    pub motion_topic: Cow<'static, str>,

    /// Message type of the motion topic.
    pub motion_type: Cow<'static, str>,

    /// Joystick full-deflection speed; also the default move/rotate speed.
    pub max_speed: f64,

    /// Topic receiving arm control commands.
    pub arm_topic: Cow<'static, str>,

    /// Message type of the arm topic.
    pub arm_type: Cow<'static, str>,

    /// Service answering mode `set` / `get`.
    pub mode_service: Cow<'static, str>,
}

impl Default for BridgeOptions {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Constructors
// ============================================================================

impl BridgeOptions {
    /// Creates options with default settings.
    #[inline]
    #[must_use]
    pub const fn new() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            relay_ip: DEFAULT_RELAY_IP,
            relay_port: 0,
            motion_topic: Cow::Borrowed(DEFAULT_MOTION_TOPIC),
            motion_type: Cow::Borrowed(DEFAULT_MOTION_TYPE),
            max_speed: 1.0,
            arm_topic: Cow::Borrowed(DEFAULT_ARM_TOPIC),
            arm_type: Cow::Borrowed(DEFAULT_ARM_TYPE),
            mode_service: Cow::Borrowed(DEFAULT_MODE_SERVICE),
        }
    }
}

// ============================================================================
// Builder Methods
// ============================================================================

impl BridgeOptions {
    /// Sets the transport open timeout.
    #[inline]
    #[must_use]
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Sets the relay bind address.
    #[inline]
    #[must_use]
    pub fn with_relay_ip(mut self, ip: IpAddr) -> Self {
        self.relay_ip = ip;
        self
    }

    /// Sets the relay port.
    #[inline]
    #[must_use]
    pub fn with_relay_port(mut self, port: u16) -> Self {
        self.relay_port = port;
        self
    }

    /// Sets the motion topic and its message type.
    #[inline]
    #[must_use]
    pub fn with_motion_topic(
        mut self,
        topic: impl Into<Cow<'static, str>>,
        message_type: impl Into<Cow<'static, str>>,
    ) -> Self {
        self.motion_topic = topic.into();
        self.motion_type = message_type.into();
        self
    }

    /// Sets the joystick full-deflection speed.
    #[inline]
    #[must_use]
    pub fn with_max_speed(mut self, max_speed: f64) -> Self {
        self.max_speed = max_speed;
        self
    }

    /// Sets the arm control topic and its message type.
    #[inline]
    #[must_use]
    pub fn with_arm_topic(
        mut self,
        topic: impl Into<Cow<'static, str>>,
        message_type: impl Into<Cow<'static, str>>,
    ) -> Self {
        self.arm_topic = topic.into();
        self.arm_type = message_type.into();
        self
    }

    /// Sets the mode service name.
    #[inline]
    #[must_use]
    pub fn with_mode_service(mut self, service: impl Into<Cow<'static, str>>) -> Self {
        self.mode_service = service.into();
        self
    }
}

// ============================================================================
// Validation
// ============================================================================

impl BridgeOptions {
    /// Checks the options for values that can never work.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] naming the first invalid field.
    pub fn validate(&self) -> Result<()> {
        if self.connect_timeout.is_zero() {
            return Err(Error::config("connect_timeout must be greater than zero"));
        }
        if !self.max_speed.is_finite() || self.max_speed < 0.0 {
            return Err(Error::config(format!(
                "max_speed must be a non-negative number, got {}",
                self.max_speed
            )));
        }

        let names = [
            ("motion_topic", &self.motion_topic),
            ("motion_type", &self.motion_type),
            ("arm_topic", &self.arm_topic),
            ("arm_type", &self.arm_type),
            ("mode_service", &self.mode_service),
        ];
        if let Some((field, _)) = names.iter().find(|(_, value)| value.trim().is_empty()) {
            return Err(Error::config(format!("{field} must not be empty")));
        }

        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================
