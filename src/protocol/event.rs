//! Inbound bridge messages.
//!
//! Frames the bridge endpoint pushes to this core. Only the ops the
//! multiplexer and correlator consume are modelled; everything else parses
//! to [`Event::Other`] and is ignored.
//!
//! | Op | Consumer |
//! |----|----------|
//! | `publish` | Subscription multiplexer |
//! | `service_response` | Service call correlator |
//! | `status` | Logged only |

// ============================================================================
// Imports
// ============================================================================

use serde::Deserialize;
use serde_json::{Value, from_str};

use crate::error::{Error, Result};

// ============================================================================
// Event
// ============================================================================

/// A message from a robot's bridge endpoint.
///
/// # Format
///
/// ```json
/// { "op": "publish", "topic": "/battery", "msg": { "data": 87.5 } }
/// { "op": "service_response", "service": "/mode", "values": { ... }, "result": true }
/// ```
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Event {
    /// A message on a subscribed topic.
    Publish {
        /// Topic name.
        topic: String,
        /// Message payload.
        msg: Value,
    },

    /// The reply to a `call_service` op.
    ServiceResponse {
        /// Echoed call id, if the endpoint sent one.
        #[serde(default)]
        id: Option<String>,
        /// Service name.
        service: String,
        /// Response values.
        #[serde(default)]
        values: Value,
        /// `false` when the remote reports failure.
        #[serde(default = "default_result")]
        result: bool,
    },

    /// Endpoint status or diagnostic message.
    Status {
        /// Severity level.
        #[serde(default)]
        level: Option<String>,
        /// Message text.
        #[serde(default)]
        msg: Option<String>,
    },

    /// Any op this core does not consume.
    #[serde(other)]
    Other,
}

fn default_result() -> bool {
    true
}

impl Event {
    /// Parses a text frame into an event.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Json`] if the frame is not a recognizable message.
    pub fn from_text(text: &str) -> Result<Self> {
        Ok(from_str(text)?)
    }
}

// ============================================================================
// Malformed Frames
// ============================================================================

/// Extracts the service name from a `service_response` frame that failed to
/// parse as an [`Event`].
///
/// Lets the correlator reject exactly the affected call.
#[must_use]
pub fn malformed_service_response(text: &str) -> Option<String> {
    let value: Value = from_str(text).ok()?;
    if value.get("op").and_then(Value::as_str) != Some("service_response") {
        return None;
    }
    value
        .get("service")
        .and_then(Value::as_str)
        .map(str::to_string)
}

/// Converts a failed `service_response` into the error that rejects its call.
#[must_use]
pub fn service_failure(service: &str, values: &Value) -> Error {
    let message = match values {
        Value::String(s) => s.clone(),
        Value::Object(map) => map
            .get("message")
            .or_else(|| map.get("error"))
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| values.to_string()),
        Value::Null => "remote reported failure".to_string(),
        other => other.to_string(),
    };
    Error::service_call(service, message)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use serde_json::json;

    #[test]
    fn test_publish_parsing() {
        let event =
            Event::from_text(r#"{"op":"publish","topic":"/battery","msg":{"data":87.5}}"#)
                .expect("parse");
        match event {
            Event::Publish { topic, msg } => {
                assert_eq!(topic, "/battery");
                assert_eq!(msg["data"], 87.5);
            }
            _ => panic!("expected Publish"),
        }
    }

    #[test]
    fn test_service_response_defaults() {
        let event = Event::from_text(r#"{"op":"service_response","service":"/mode"}"#)
            .expect("parse");
        match event {
            Event::ServiceResponse {
                service,
                values,
                result,
                id,
            } => {
                assert_eq!(service, "/mode");
                assert!(values.is_null());
                assert!(result);
                assert!(id.is_none());
            }
            _ => panic!("expected ServiceResponse"),
        }
    }

    #[test]
    fn test_unknown_op_is_other() {
        let event = Event::from_text(r#"{"op":"png","data":"abc"}"#).expect("parse");
        assert_eq!(event, Event::Other);
    }

    #[test]
    fn test_invalid_json_fails() {
        assert!(Event::from_text("not json").is_err());
    }

    #[test]
    fn test_malformed_service_response() {
        let text = r#"{"op":"service_response","service":"/mode","result":"yes"}"#;
        assert!(Event::from_text(text).is_err());
        assert_eq!(malformed_service_response(text), Some("/mode".to_string()));
        assert_eq!(
            malformed_service_response(r#"{"op":"publish","topic":1}"#),
            None
        );
    }

    #[test]
    fn test_service_failure_message() {
        let err = service_failure("/mode", &json!({ "message": "invalid mode" }));
        assert_eq!(err.to_string(), "Service call /mode failed: invalid mode");

        let err = service_failure("/mode", &json!("busy"));
        assert_eq!(err.to_string(), "Service call /mode failed: busy");
    }
}
