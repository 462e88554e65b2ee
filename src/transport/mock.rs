//! Loopback bridge endpoint for tests.
//!
//! Accepts one client at a time, records every frame it receives, and
//! answers `call_service` ops for a handful of well-known services:
//!
//! | Service | Reply |
//! |---------|-------|
//! | `/mode`, `mode` | `{ "mode_name", "mode" }` |
//! | `/fail` | `result: false` |
//! | `/garbled` | unparseable `service_response` |
//! | anything else | no reply |

// ============================================================================
// Imports
// ============================================================================

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tracing_subscriber::EnvFilter;
use url::Url;

// ============================================================================
// Constants
// ============================================================================

const FRAME_TIMEOUT: Duration = Duration::from_secs(5);

// ============================================================================
// Logging
// ============================================================================

/// Installs a test-writer subscriber once; `RUST_LOG` overrides the filter.
pub(crate) fn init_logging() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("robot_bridge=debug"));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_test_writer()
        .try_init();
}

// ============================================================================
// MockControl
// ============================================================================

enum MockControl {
    Push(Message),
    Close,
    Reset,
}

// ============================================================================
// MockBridge
// ============================================================================

pub(crate) struct MockBridge {
    addr: SocketAddr,
    received_rx: mpsc::UnboundedReceiver<Message>,
    control_tx: mpsc::UnboundedSender<MockControl>,
    accepted: Arc<AtomicUsize>,
}

impl MockBridge {
    pub(crate) async fn start() -> Self {
        init_logging();

        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0))
            .await
            .expect("mock bind");
        let addr = listener.local_addr().expect("mock addr");
        let (received_tx, received_rx) = mpsc::unbounded_channel();
        let (control_tx, control_rx) = mpsc::unbounded_channel();
        let accepted = Arc::new(AtomicUsize::new(0));

        tokio::spawn(serve(
            listener,
            received_tx,
            control_rx,
            Arc::clone(&accepted),
        ));

        Self {
            addr,
            received_rx,
            control_tx,
            accepted,
        }
    }

    pub(crate) fn port(&self) -> u16 {
        self.addr.port()
    }

    pub(crate) fn url(&self) -> Url {
        Url::parse(&format!("ws://127.0.0.1:{}", self.port())).expect("mock url")
    }

    /// Number of WebSocket handshakes completed so far.
    pub(crate) fn accepted(&self) -> usize {
        self.accepted.load(Ordering::SeqCst)
    }

    pub(crate) async fn next_frame(&mut self) -> Option<Message> {
        timeout(FRAME_TIMEOUT, self.received_rx.recv())
            .await
            .ok()
            .flatten()
    }

    /// Next received text frame, parsed as JSON.
    pub(crate) async fn next_request(&mut self) -> Value {
        loop {
            let frame = self.next_frame().await.expect("expected a frame");
            if let Message::Text(text) = frame {
                return serde_json::from_str(text.as_str()).expect("request json");
            }
        }
    }

    /// Asserts nothing arrives within a short grace period.
    pub(crate) async fn expect_silence(&mut self) {
        let frame = timeout(Duration::from_millis(150), self.received_rx.recv()).await;
        assert!(frame.is_err(), "unexpected frame: {frame:?}");
    }

    pub(crate) fn push(&self, frame: Message) {
        let _ = self.control_tx.send(MockControl::Push(frame));
    }

    pub(crate) fn publish(&self, topic: &str, msg: Value) {
        let text = json!({ "op": "publish", "topic": topic, "msg": msg }).to_string();
        self.push(Message::Text(text.into()));
    }

    /// Closes the current client with a close frame.
    pub(crate) fn close(&self) {
        let _ = self.control_tx.send(MockControl::Close);
    }

    /// Drops the current client without a closing handshake.
    pub(crate) fn reset(&self) {
        let _ = self.control_tx.send(MockControl::Reset);
    }
}

// ============================================================================
// Server Loop
// ============================================================================

async fn serve(
    listener: TcpListener,
    received_tx: mpsc::UnboundedSender<Message>,
    mut control_rx: mpsc::UnboundedReceiver<MockControl>,
    accepted: Arc<AtomicUsize>,
) {
    loop {
        let Ok((stream, _)) = listener.accept().await else {
            return;
        };
        let Ok(ws_stream) = tokio_tungstenite::accept_async(stream).await else {
            continue;
        };
        accepted.fetch_add(1, Ordering::SeqCst);

        let (mut write, mut read) = ws_stream.split();

        loop {
            tokio::select! {
                message = read.next() => match message {
                    Some(Ok(frame @ (Message::Text(_) | Message::Binary(_)))) => {
                        if let Some(reply) = auto_reply(&frame) {
                            let _ = write.send(reply).await;
                        }
                        let _ = received_tx.send(frame);
                    }
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    Some(Ok(_)) => {}
                },

                control = control_rx.recv() => match control {
                    Some(MockControl::Push(frame)) => {
                        let _ = write.send(frame).await;
                    }
                    Some(MockControl::Close) => {
                        let _ = write.close().await;
                        break;
                    }
                    Some(MockControl::Reset) => break,
                    None => return,
                },
            }
        }
    }
}

fn auto_reply(frame: &Message) -> Option<Message> {
    let Message::Text(text) = frame else {
        return None;
    };
    let request: Value = serde_json::from_str(text.as_str()).ok()?;
    if request.get("op")?.as_str()? != "call_service" {
        return None;
    }

    let service = request.get("service")?.as_str()?.to_string();
    let id = request.get("id").cloned().unwrap_or(Value::Null);
    let args = request.get("args").cloned().unwrap_or(Value::Null);

    let reply = match service.as_str() {
        "/mode" | "mode" => {
            let mode = match args.get("command").and_then(Value::as_str) {
                Some("set") => args.get("mode").and_then(Value::as_u64).unwrap_or(0),
                _ => 0,
            };
            json!({
                "op": "service_response",
                "id": id,
                "service": service,
                "values": { "mode_name": mode_name(mode), "mode": mode },
                "result": true,
            })
        }
        "/fail" => json!({
            "op": "service_response",
            "id": id,
            "service": service,
            "values": { "message": "rejected" },
            "result": false,
        }),
        "/garbled" => json!({
            "op": "service_response",
            "service": service,
            "result": "maybe",
        }),
        _ => return None,
    };

    Some(Message::Text(reply.to_string().into()))
}

fn mode_name(mode: u64) -> String {
    match mode {
        0 => "idle".to_string(),
        1 => "stand".to_string(),
        2 => "walk".to_string(),
        n => format!("mode_{n}"),
    }
}
