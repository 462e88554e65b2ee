//! Outbound bridge operations.
//!
//! Every frame this crate writes to a bridge endpoint is one [`Request`],
//! serialized as a rosbridge v2 JSON object tagged by `op`.

// ============================================================================
// Imports
// ============================================================================

use serde::Serialize;
use serde_json::{Value, to_string};
use tokio_tungstenite::tungstenite::Message;

use crate::error::Result;
use crate::identifiers::CallId;

// ============================================================================
// Request
// ============================================================================

/// An operation sent from this core to a robot's bridge endpoint.
///
/// # Format
///
/// ```json
/// { "op": "subscribe", "topic": "/battery", "type": "std_msgs/Float32" }
/// { "op": "publish", "topic": "/cmd_vel", "msg": { ... } }
/// { "op": "call_service", "id": "call_service:/mode:1", "service": "/mode", "args": { ... } }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Request {
    /// Start receiving messages on a topic.
    Subscribe {
        /// Topic name.
        topic: String,
        /// Message type tag.
        #[serde(rename = "type")]
        message_type: String,
    },

    /// Stop receiving messages on a topic.
    Unsubscribe {
        /// Topic name.
        topic: String,
    },

    /// Declare this side as a publisher on a topic.
    Advertise {
        /// Topic name.
        topic: String,
        /// Message type tag.
        #[serde(rename = "type")]
        message_type: String,
    },

    /// Withdraw a publisher declaration.
    Unadvertise {
        /// Topic name.
        topic: String,
    },

    /// Publish one message on an advertised topic.
    Publish {
        /// Topic name.
        topic: String,
        /// Message payload.
        msg: Value,
    },

    /// Invoke a remote service.
    CallService {
        /// Informational call id.
        id: CallId,
        /// Service name.
        service: String,
        /// Request arguments.
        args: Value,
    },
}

impl Request {
    /// Returns the `op` name of this request.
    #[must_use]
    pub fn op(&self) -> &'static str {
        match self {
            Self::Subscribe { .. } => "subscribe",
            Self::Unsubscribe { .. } => "unsubscribe",
            Self::Advertise { .. } => "advertise",
            Self::Unadvertise { .. } => "unadvertise",
            Self::Publish { .. } => "publish",
            Self::CallService { .. } => "call_service",
        }
    }

    /// Serializes this request into a text frame.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Json`](crate::Error::Json) if the payload cannot be serialized.
    pub fn to_frame(&self) -> Result<Message> {
        let json = to_string(self)?;
        Ok(Message::Text(json.into()))
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use serde_json::json;

    #[test]
    fn test_subscribe_serialization() {
        let request = Request::Subscribe {
            topic: "/battery".into(),
            message_type: "std_msgs/Float32".into(),
        };
        let value = serde_json::to_value(&request).expect("serialize");
        assert_eq!(
            value,
            json!({ "op": "subscribe", "topic": "/battery", "type": "std_msgs/Float32" })
        );
    }

    #[test]
    fn test_publish_serialization() {
        let request = Request::Publish {
            topic: "/cmd_vel".into(),
            msg: json!({ "linear": { "x": 1.0 } }),
        };
        let value = serde_json::to_value(&request).expect("serialize");
        assert_eq!(value["op"], "publish");
        assert_eq!(value["msg"]["linear"]["x"], 1.0);
    }

    #[test]
    fn test_call_service_serialization() {
        let request = Request::CallService {
            id: CallId::generate("/mode"),
            service: "/mode".into(),
            args: json!({ "command": "get" }),
        };
        let value = serde_json::to_value(&request).expect("serialize");
        assert_eq!(value["op"], "call_service");
        assert_eq!(value["service"], "/mode");
        assert_eq!(value["args"]["command"], "get");
        assert_eq!(request.op(), "call_service");
    }

    #[test]
    fn test_to_frame_is_text() {
        let request = Request::Unsubscribe {
            topic: "/scan".into(),
        };
        let frame = request.to_frame().expect("frame");
        assert!(frame.is_text());
        assert!(frame.to_text().expect("text").contains("\"op\":\"unsubscribe\""));
    }
}
