//! Service call correlator.
//!
//! Matches `service_response` frames to outstanding calls. Correlation is by
//! service name: a session holds at most one pending call per service, and a
//! second call to a busy service is refused with
//! [`Error::CallInFlight`] instead of racing the first.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use tokio::sync::oneshot;
use tracing::{debug, trace, warn};

use crate::error::{Error, Result};
use crate::identifiers::CallId;
use crate::protocol::{Request, ServiceRequest, ServiceResponse};
use crate::transport::Connection;

// ============================================================================
// Types
// ============================================================================

/// Map of service names to result channels.
type PendingMap = FxHashMap<String, oneshot::Sender<Result<ServiceResponse>>>;

/// Pending calls plus the closed marker, guarded together.
#[derive(Default)]
struct PendingTable {
    calls: PendingMap,
    closed: bool,
}

// ============================================================================
// PendingCall
// ============================================================================

/// Future resolving to the reply of one service call.
///
/// Returned immediately by [`Correlator::call`]; resolves when the matching
/// response arrives, when the remote reports failure, or when the session
/// ends. There is no call-level timeout: wrap it in
/// [`tokio::time::timeout`] if one is needed.
#[must_use = "a PendingCall does nothing unless awaited"]
pub struct PendingCall {
    service: String,
    inner: PendingInner,
}

enum PendingInner {
    Waiting(oneshot::Receiver<Result<ServiceResponse>>),
    Failed(Option<Error>),
}

impl PendingCall {
    fn waiting(service: &str, rx: oneshot::Receiver<Result<ServiceResponse>>) -> Self {
        Self {
            service: service.to_string(),
            inner: PendingInner::Waiting(rx),
        }
    }

    /// Creates a call that is already rejected.
    pub(crate) fn failed(service: &str, error: Error) -> Self {
        Self {
            service: service.to_string(),
            inner: PendingInner::Failed(Some(error)),
        }
    }

    /// Returns the service this call targets.
    #[inline]
    #[must_use]
    pub fn service(&self) -> &str {
        &self.service
    }
}

impl Future for PendingCall {
    type Output = Result<ServiceResponse>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        match &mut this.inner {
            PendingInner::Waiting(rx) => Pin::new(rx)
                .poll(cx)
                .map(|received| received.unwrap_or(Err(Error::ConnectionClosed))),
            PendingInner::Failed(error) => {
                Poll::Ready(Err(error.take().unwrap_or(Error::ConnectionClosed)))
            }
        }
    }
}

impl fmt::Debug for PendingCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingCall")
            .field("service", &self.service)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Correlator
// ============================================================================

/// Per-session table of outstanding service calls.
pub struct Correlator {
    connection: Connection,
    pending: Mutex<PendingTable>,
}

impl Correlator {
    pub(crate) fn new(connection: Connection) -> Self {
        Self {
            connection,
            pending: Mutex::new(PendingTable::default()),
        }
    }

    /// Issues a service call.
    ///
    /// Never blocks; failures to issue the call are reported through the
    /// returned future.
    pub fn call(&self, service: &str, request: &ServiceRequest) -> PendingCall {
        let mut pending = self.pending.lock();

        if pending.closed {
            return PendingCall::failed(service, Error::ConnectionClosed);
        }

        if let Some(existing) = pending.calls.get(service) {
            if existing.is_closed() {
                // Caller dropped its future; the slot is free again
                pending.calls.remove(service);
            } else {
                warn!(service, "Service call already in flight");
                return PendingCall::failed(service, Error::call_in_flight(service));
            }
        }

        let (tx, rx) = oneshot::channel();
        pending.calls.insert(service.to_string(), tx);

        let id = CallId::generate(service);
        let sent = self.connection.send_request(&Request::CallService {
            id: id.clone(),
            service: service.to_string(),
            args: request.to_args(),
        });

        if let Err(e) = sent {
            pending.calls.remove(service);
            return PendingCall::failed(service, e);
        }

        debug!(service, call_id = %id, command = request.command_kind(), "Service call sent");
        PendingCall::waiting(service, rx)
    }

    /// Completes the pending call for `service`.
    ///
    /// Returns `false` if no call was waiting.
    pub fn resolve(&self, service: &str, result: Result<ServiceResponse>) -> bool {
        let Some(tx) = self.pending.lock().calls.remove(service) else {
            warn!(service, "Response for unknown service call");
            return false;
        };

        if tx.send(result).is_err() {
            trace!(service, "Caller dropped pending call before response");
        }
        true
    }

    /// Returns `true` if a call to `service` is outstanding.
    #[inline]
    #[must_use]
    pub fn is_pending(&self, service: &str) -> bool {
        self.pending.lock().calls.contains_key(service)
    }

    /// Returns the number of outstanding calls.
    #[inline]
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.pending.lock().calls.len()
    }

    /// Fails all pending calls with ConnectionClosed error.
    ///
    /// Calls issued afterwards are rejected immediately.
    pub(crate) fn reject_all(&self) {
        let pending: Vec<_> = {
            let mut table = self.pending.lock();
            table.closed = true;
            table.calls.drain().collect()
        };
        let count = pending.len();

        for (_, tx) in pending {
            let _ = tx.send(Err(Error::ConnectionClosed));
        }

        if count > 0 {
            debug!(count, "Rejected pending calls on session end");
        }
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

    use crate::transport::mock::MockBridge;

    async fn correlator_for(mock: &MockBridge) -> Correlator {
        let connection = Connection::open(&mock.url(), Duration::from_secs(5))
            .await
            .expect("open");
        Correlator::new(connection)
    }

    #[tokio::test]
    async fn test_resolve_completes_call() {
        let mut mock = MockBridge::start().await;
        let correlator = correlator_for(&mock).await;

        let call = correlator.call("/mode", &ServiceRequest::SetMode { mode: 2 });
        assert!(correlator.is_pending("/mode"));

        let request = mock.next_request().await;
        assert_eq!(request["op"], "call_service");
        assert_eq!(request["args"], json!({ "command": "set", "mode": 2 }));

        assert!(correlator.resolve(
            "/mode",
            Ok(ServiceResponse::new("/mode", json!({ "mode_name": "walk" })))
        ));

        let response = call.await.expect("response");
        assert_eq!(response.get_string("mode_name"), "walk");
        assert_eq!(correlator.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_second_call_same_service_refused() {
        let mock = MockBridge::start().await;
        let correlator = correlator_for(&mock).await;

        let _first = correlator.call("/slow", &ServiceRequest::GetMode);
        let second = correlator.call("/slow", &ServiceRequest::GetMode);

        assert!(matches!(second.await, Err(Error::CallInFlight { .. })));
        assert_eq!(correlator.pending_count(), 1);
    }

    #[tokio::test]
    async fn test_dropped_call_frees_slot() {
        let mock = MockBridge::start().await;
        let correlator = correlator_for(&mock).await;

        drop(correlator.call("/slow", &ServiceRequest::GetMode));
        let again = correlator.call("/slow", &ServiceRequest::GetMode);

        assert!(correlator.is_pending("/slow"));
        drop(again);
    }

    #[tokio::test]
    async fn test_reject_only_affects_one_call() {
        let mock = MockBridge::start().await;
        let correlator = correlator_for(&mock).await;

        let a = correlator.call("/a", &ServiceRequest::GetMode);
        let b = correlator.call("/b", &ServiceRequest::GetMode);

        correlator.resolve("/a", Err(Error::protocol("garbled")));
        assert!(matches!(a.await, Err(Error::Protocol { .. })));
        assert!(correlator.is_pending("/b"));

        correlator.resolve("/b", Ok(ServiceResponse::new("/b", json!({}))));
        assert!(b.await.is_ok());
    }

    #[tokio::test]
    async fn test_reject_all_on_close() {
        let mock = MockBridge::start().await;
        let correlator = correlator_for(&mock).await;

        let call = correlator.call("/slow", &ServiceRequest::GetMode);
        correlator.reject_all();

        assert!(matches!(call.await, Err(Error::ConnectionClosed)));
        assert_eq!(correlator.pending_count(), 0);

        let late = correlator.call("/slow", &ServiceRequest::GetMode);
        assert!(matches!(late.await, Err(Error::ConnectionClosed)));
    }

    #[tokio::test]
    async fn test_resolve_unknown_service() {
        let mock = MockBridge::start().await;
        let correlator = correlator_for(&mock).await;
        assert!(!correlator.resolve("/ghost", Ok(ServiceResponse::new("/ghost", json!({})))));
    }

    #[tokio::test]
    async fn test_call_on_closed_transport_fails_fast() {
        let mock = MockBridge::start().await;
        let connection = Connection::open(&mock.url(), Duration::from_secs(5))
            .await
            .expect("open");
        let correlator = Correlator::new(connection.clone());

        connection.shutdown();
        connection.closed().await;

        let call = correlator.call("/mode", &ServiceRequest::GetMode);
        assert!(matches!(call.await, Err(Error::ConnectionClosed)));
        assert!(!correlator.is_pending("/mode"));
    }
}
