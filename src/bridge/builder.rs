//! Builder pattern for bridge configuration.
//!
//! Provides a fluent API for configuring and creating [`Bridge`] instances.
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//! use robot_bridge::{Bridge, MemoryStore, RobotEndpoint};
//!
//! # async fn example() -> robot_bridge::Result<()> {
//! let store = MemoryStore::new();
//! store.insert("r1", RobotEndpoint::new("10.0.0.5", 9090));
//!
//! let bridge = Bridge::builder()
//!     .store(store)
//!     .connect_timeout(Duration::from_secs(5))
//!     .build()?;
//! # Ok(())
//! # }
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::borrow::Cow;
use std::fmt;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use crate::error::{Error, Result};

use super::core::Bridge;
use super::options::BridgeOptions;
use super::store::RobotStore;

// ============================================================================
// BridgeBuilder
// ============================================================================

/// Builder for configuring a [`Bridge`] instance.
///
/// Use [`Bridge::builder()`] to create a new builder.
#[derive(Default, Clone)]
pub struct BridgeBuilder {
    /// Bridge options.
    options: BridgeOptions,
    /// Robot record store.
    store: Option<Arc<dyn RobotStore>>,
}

impl fmt::Debug for BridgeBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BridgeBuilder")
            .field("options", &self.options)
            .field("store", &self.store.is_some())
            .finish()
    }
}

// ============================================================================
// BridgeBuilder Implementation
// ============================================================================

impl BridgeBuilder {
    /// Creates a new builder with default options and no store.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces all options at once.
    #[inline]
    #[must_use]
    pub fn options(mut self, options: BridgeOptions) -> Self {
        self.options = options;
        self
    }

    /// Sets the robot record store.
    #[inline]
    #[must_use]
    pub fn store(mut self, store: impl RobotStore + 'static) -> Self {
        self.store = Some(Arc::new(store));
        self
    }

    /// Sets a shared robot record store.
    #[inline]
    #[must_use]
    pub fn shared_store(mut self, store: Arc<dyn RobotStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Sets the transport open timeout.
    #[inline]
    #[must_use]
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.options = self.options.with_connect_timeout(timeout);
        self
    }

    /// Sets the relay bind address and port (0 for random).
    #[inline]
    #[must_use]
    pub fn relay_addr(mut self, ip: IpAddr, port: u16) -> Self {
        self.options = self.options.with_relay_ip(ip).with_relay_port(port);
        self
    }

    /// Sets the motion topic and its message type.
    #[inline]
    #[must_use]
    pub fn motion_topic(
        mut self,
        topic: impl Into<Cow<'static, str>>,
        message_type: impl Into<Cow<'static, str>>,
    ) -> Self {
        self.options = self.options.with_motion_topic(topic, message_type);
        self
    }

    /// Sets the joystick full-deflection speed.
    #[inline]
    #[must_use]
    pub fn max_speed(mut self, max_speed: f64) -> Self {
        self.options = self.options.with_max_speed(max_speed);
        self
    }

    /// Sets the mode service name.
    #[inline]
    #[must_use]
    pub fn mode_service(mut self, service: impl Into<Cow<'static, str>>) -> Self {
        self.options = self.options.with_mode_service(service);
        self
    }

    /// Builds the bridge with validation.
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// - [`Error::Config`] if no store is set
    /// - [`Error::Config`] if an option is invalid
    /// - [`Error::Config`] if called outside a tokio runtime
    pub fn build(self) -> Result<Bridge> {
        let store = self.validate_store()?;
        self.options.validate()?;

        Bridge::new(self.options, store)
    }
}

// ============================================================================
// Validation
// ============================================================================

impl BridgeBuilder {
    /// Validates the store configuration.
    fn validate_store(&self) -> Result<Arc<dyn RobotStore>> {
        self.store.clone().ok_or_else(|| {
            Error::config(
                "Robot store is required. Use .store() to set it.\n\
                 Example: Bridge::builder().store(MemoryStore::new())",
            )
        })
    }
}

// ============================================================================
// Tests
// ============================================================================
