//! Topic subscription multiplexer.
//!
//! Shares one transport among every topic a session subscribes to or
//! publishes on. Each topic has at most one live handle and each handle at
//! most one callback; fan-out to many listeners belongs to the caller.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde_json::Value;
use tracing::{debug, trace};

use crate::error::Result;
use crate::protocol::Request;
use crate::transport::Connection;

// ============================================================================
// Types
// ============================================================================

/// Callback invoked with each message received on a topic.
pub type TopicCallback = Arc<dyn Fn(&Value) + Send + Sync>;

/// Map of topic names to handles.
type HandleMap = FxHashMap<String, Arc<SubscriptionHandle>>;

// ============================================================================
// SubscriptionHandle
// ============================================================================

/// One topic registration on a session.
///
/// Subscriber handles carry the topic's single callback; publisher handles
/// are send-only and carry none.
pub struct SubscriptionHandle {
    topic: String,
    message_type: String,
    callback: Option<TopicCallback>,
    active: AtomicBool,
}

impl SubscriptionHandle {
    fn subscriber(topic: &str, message_type: &str, callback: TopicCallback) -> Self {
        Self {
            topic: topic.to_string(),
            message_type: message_type.to_string(),
            callback: Some(callback),
            active: AtomicBool::new(true),
        }
    }

    fn publisher(topic: &str, message_type: &str) -> Self {
        Self {
            topic: topic.to_string(),
            message_type: message_type.to_string(),
            callback: None,
            active: AtomicBool::new(true),
        }
    }

    /// Returns the topic name.
    #[inline]
    #[must_use]
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Returns the message type tag.
    #[inline]
    #[must_use]
    pub fn message_type(&self) -> &str {
        &self.message_type
    }

    /// Returns `true` for send-only handles.
    #[inline]
    #[must_use]
    pub fn is_publisher(&self) -> bool {
        self.callback.is_none()
    }

    /// Returns `false` once unsubscribed or the session has ended.
    #[inline]
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    fn deactivate(&self) {
        self.active.store(false, Ordering::Release);
    }
}

impl fmt::Debug for SubscriptionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionHandle")
            .field("topic", &self.topic)
            .field("message_type", &self.message_type)
            .field("publisher", &self.is_publisher())
            .field("active", &self.is_active())
            .finish()
    }
}

// ============================================================================
// Multiplexer
// ============================================================================

/// Per-session topic table.
pub struct Multiplexer {
    connection: Connection,
    subscriptions: Mutex<HandleMap>,
    publishers: Mutex<HandleMap>,
}

impl Multiplexer {
    pub(crate) fn new(connection: Connection) -> Self {
        Self {
            connection,
            subscriptions: Mutex::new(HandleMap::default()),
            publishers: Mutex::new(HandleMap::default()),
        }
    }

    /// Subscribes to a topic.
    ///
    /// If the topic already has a handle it is returned unchanged and
    /// `callback` is discarded.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConnectionClosed`](crate::Error::ConnectionClosed) if
    /// the subscribe op cannot be sent.
    pub fn subscribe(
        &self,
        topic: &str,
        message_type: &str,
        callback: TopicCallback,
    ) -> Result<Arc<SubscriptionHandle>> {
        let mut subscriptions = self.subscriptions.lock();

        if let Some(existing) = subscriptions.get(topic) {
            debug!(topic, "Already subscribed, keeping existing handle");
            return Ok(Arc::clone(existing));
        }

        self.connection.send_request(&Request::Subscribe {
            topic: topic.to_string(),
            message_type: message_type.to_string(),
        })?;

        let handle = Arc::new(SubscriptionHandle::subscriber(
            topic,
            message_type,
            callback,
        ));
        subscriptions.insert(topic.to_string(), Arc::clone(&handle));

        debug!(topic, message_type, "Subscribed");
        Ok(handle)
    }

    /// Removes a topic subscription.
    ///
    /// Returns `true` if a handle was removed; unknown topics are a no-op.
    pub fn unsubscribe(&self, topic: &str) -> bool {
        let Some(handle) = self.subscriptions.lock().remove(topic) else {
            return false;
        };

        handle.deactivate();

        // The transport may already be gone; nothing left to undo remotely then
        if let Err(e) = self.connection.send_request(&Request::Unsubscribe {
            topic: topic.to_string(),
        }) {
            trace!(topic, error = %e, "Unsubscribe op not sent");
        }

        debug!(topic, "Unsubscribed");
        true
    }

    /// Publishes a message on a topic.
    ///
    /// The first publish on a topic advertises it; later publishes reuse
    /// that send-only handle.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConnectionClosed`](crate::Error::ConnectionClosed) if
    /// the transport has terminated.
    pub fn publish(&self, topic: &str, message_type: &str, payload: Value) -> Result<()> {
        {
            let mut publishers = self.publishers.lock();
            if !publishers.contains_key(topic) {
                self.connection.send_request(&Request::Advertise {
                    topic: topic.to_string(),
                    message_type: message_type.to_string(),
                })?;
                publishers.insert(
                    topic.to_string(),
                    Arc::new(SubscriptionHandle::publisher(topic, message_type)),
                );
                debug!(topic, message_type, "Advertised");
            }
        }

        self.connection.send_request(&Request::Publish {
            topic: topic.to_string(),
            msg: payload,
        })?;

        trace!(topic, "Published");
        Ok(())
    }

    /// Routes an inbound topic message to its callback.
    ///
    /// Returns `false` when the topic has no live subscriber and the
    /// message was dropped.
    pub fn dispatch(&self, topic: &str, msg: &Value) -> bool {
        let callback = self
            .subscriptions
            .lock()
            .get(topic)
            .filter(|handle| handle.is_active())
            .and_then(|handle| handle.callback.clone());

        match callback {
            Some(callback) => {
                callback(msg);
                true
            }
            None => {
                trace!(topic, "Dropped message for unsubscribed topic");
                false
            }
        }
    }

    /// Returns the handle for a subscribed topic.
    #[must_use]
    pub fn subscription(&self, topic: &str) -> Option<Arc<SubscriptionHandle>> {
        self.subscriptions.lock().get(topic).cloned()
    }

    /// Returns the subscribed topic names.
    #[must_use]
    pub fn topics(&self) -> Vec<String> {
        self.subscriptions.lock().keys().cloned().collect()
    }

    /// Returns the number of subscribed topics.
    #[inline]
    #[must_use]
    pub fn subscription_count(&self) -> usize {
        self.subscriptions.lock().len()
    }

    /// Returns the number of advertised topics.
    #[inline]
    #[must_use]
    pub fn publisher_count(&self) -> usize {
        self.publishers.lock().len()
    }

    /// Deactivates and forgets every handle.
    pub(crate) fn deactivate_all(&self) {
        let subscriptions: Vec<_> = self.subscriptions.lock().drain().collect();
        let publishers: Vec<_> = self.publishers.lock().drain().collect();
        let count = subscriptions.len() + publishers.len();

        for (_, handle) in subscriptions.into_iter().chain(publishers) {
            handle.deactivate();
        }

        if count > 0 {
            debug!(count, "Deactivated topic handles");
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
