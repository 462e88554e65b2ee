//! Service call request and response shapes.
//!
//! A service call carries a command kind plus parameters, flattened into one
//! `args` object on the wire:
//!
//! ```json
//! { "command": "set", "mode": 2 }
//! ```
//!
//! | Command kind | Variant | Response |
//! |--------------|---------|----------|
//! | `set` with only a `mode` (0-255) | [`ServiceRequest::SetMode`] | [`ModeReply`] |
//! | `get` with no params | [`ServiceRequest::GetMode`] | [`ModeReply`] |
//! | anything else | [`ServiceRequest::Custom`] | raw values |
//!
//! Params that do not fit a typed variant are carried through unchanged in
//! [`ServiceRequest::Custom`], so any service can use `set` and `get`.

// ============================================================================
// Imports
// ============================================================================

use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value, from_value};

use crate::error::{Error, Result};

// ============================================================================
// ServiceRequest
// ============================================================================

/// A typed service request, one variant per command kind.
#[derive(Debug, Clone, PartialEq)]
pub enum ServiceRequest {
    /// Switch the robot into a numbered mode.
    SetMode {
        /// Target mode number.
        mode: u8,
    },

    /// Query the robot's current mode.
    GetMode,

    /// Any other command kind with free-form parameters.
    Custom {
        /// Command kind.
        command: String,
        /// Parameters merged next to `command`.
        params: Map<String, Value>,
    },
}

impl ServiceRequest {
    /// Builds a request from a command kind and a JSON parameter object.
    ///
    /// Only params that match a typed variant exactly are mapped onto it;
    /// everything else becomes [`ServiceRequest::Custom`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::Protocol`] if `params` is neither an object nor null.
    pub fn from_parts(command: &str, params: Value) -> Result<Self> {
        let mut params = match params {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            other => {
                return Err(Error::protocol(format!(
                    "service params must be an object, got {other}"
                )));
            }
        };
        params.remove("command");

        let typed = match command {
            "set" if params.len() == 1 => params
                .get("mode")
                .and_then(Value::as_u64)
                .and_then(|m| u8::try_from(m).ok())
                .map(|mode| Self::SetMode { mode }),
            "get" if params.is_empty() => Some(Self::GetMode),
            _ => None,
        };

        Ok(typed.unwrap_or_else(|| Self::Custom {
            command: command.to_string(),
            params,
        }))
    }

    /// Returns the command kind sent on the wire.
    #[must_use]
    pub fn command_kind(&self) -> &str {
        match self {
            Self::SetMode { .. } => "set",
            Self::GetMode => "get",
            Self::Custom { command, .. } => command,
        }
    }

    /// Encodes the request as the `args` object of a `call_service` op.
    #[must_use]
    pub fn to_args(&self) -> Value {
        let mut args = Map::new();
        args.insert(
            "command".to_string(),
            Value::String(self.command_kind().to_string()),
        );

        match self {
            Self::SetMode { mode } => {
                args.insert("mode".to_string(), Value::from(*mode));
            }
            Self::GetMode => {}
            Self::Custom { params, .. } => {
                for (key, value) in params {
                    if key != "command" {
                        args.insert(key.clone(), value.clone());
                    }
                }
            }
        }

        Value::Object(args)
    }
}

// ============================================================================
// ServiceResponse
// ============================================================================

/// A successful service reply.
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceResponse {
    /// Service that replied.
    pub service: String,
    /// Reply values as sent by the remote.
    pub values: Value,
}

impl ServiceResponse {
    /// Creates a response.
    #[inline]
    #[must_use]
    pub fn new(service: impl Into<String>, values: Value) -> Self {
        Self {
            service: service.into(),
            values,
        }
    }

    /// Deserializes the values into a typed reply.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Protocol`] if the values do not match `T`.
    pub fn parse<T: DeserializeOwned>(&self) -> Result<T> {
        from_value(self.values.clone()).map_err(|e| {
            Error::protocol(format!("malformed {} response: {e}", self.service))
        })
    }

    /// Gets a string value from the reply.
    ///
    /// Returns empty string if key not found or not a string.
    #[inline]
    #[must_use]
    pub fn get_string(&self, key: &str) -> String {
        self.values
            .get(key)
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string()
    }
}

// ============================================================================
// ModeReply
// ============================================================================

/// Reply of the mode service for both `set` and `get`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ModeReply {
    /// Human readable mode name reported by the robot.
    #[serde(alias = "modeName", alias = "mode_str")]
    pub mode_name: String,

    /// Numeric mode, when reported.
    #[serde(default)]
    pub mode: Option<i64>,

    /// Whether the robot accepted the request.
    #[serde(default = "default_success")]
    pub success: bool,
}

fn default_success() -> bool {
    true
}

// ============================================================================
// Tests
// ============================================================================
