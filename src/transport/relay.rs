//! Transparent relay between external clients and robot transports.
//!
//! An external client opens a WebSocket to the relay endpoint with the robot
//! id in the query string. The relay taps the robot session's transport as
//! one more raw frame listener and forwards Text and Binary frames in both
//! directions without decoding them.
//!
//! # Connection Flow
//!
//! 1. Client connects to `ws://{relay}/?robotId={id}`
//! 2. Missing id → close `1008 bad request`
//! 3. No Connected session → close `1013 resource unavailable`
//! 4. Otherwise frames flow until either side ends
//! 5. Session end → close `1001`; client end → listener removed, session kept

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tracing::{debug, error, info, trace, warn};
use url::Url;

use crate::error::{Error, Result};
use crate::identifiers::{ListenerId, RobotId};
use crate::session::ConnectionRegistry;

use super::Connection;

// ============================================================================
// Constants
// ============================================================================

/// Query parameter carrying the robot id.
const ROBOT_ID_PARAM: &str = "robotId";

/// Accepted alias for [`ROBOT_ID_PARAM`].
const ROBOT_ID_ALIAS: &str = "robot_id";

/// Accept poll interval, bounds how long shutdown takes to be noticed.
const ACCEPT_POLL: Duration = Duration::from_millis(100);

/// Default limit for a client to finish the WebSocket upgrade.
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// How long to wait for the client's close acknowledgement.
const CLOSE_GRACE: Duration = Duration::from_millis(500);

// ============================================================================
// ListenerGuard
// ============================================================================

/// Removes a relay's frame listener when the relay ends, on every path.
struct ListenerGuard {
    connection: Connection,
    id: ListenerId,
}

impl Drop for ListenerGuard {
    fn drop(&mut self) {
        self.connection.remove_listener(self.id);
    }
}

/// Why a forwarding loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RelayEnd {
    /// The client closed, errored or went away.
    Client,
    /// The robot transport terminated.
    Session,
}

// ============================================================================
// RelayServer
// ============================================================================

/// WebSocket endpoint pairing external clients with robot sessions.
///
/// # Example
///
/// ```ignore
/// let registry = ConnectionRegistry::new(Duration::from_secs(10));
/// let relay = RelayServer::bind(IpAddr::V4(Ipv4Addr::LOCALHOST), 0, registry).await?;
/// println!("Relay URL: {}", relay.relay_url(&RobotId::from("r1"))?);
/// ```
pub struct RelayServer {
    /// Bound address.
    local_addr: SocketAddr,

    /// Session lookup.
    registry: Arc<ConnectionRegistry>,

    /// Limit for a client to finish the WebSocket upgrade.
    handshake_timeout: Duration,

    /// Number of forwarding loops running.
    active: AtomicUsize,

    /// Shutdown flag.
    shutdown: AtomicBool,
}

// ============================================================================
// RelayServer - Constructor
// ============================================================================

impl RelayServer {
    /// Binds the relay endpoint and starts the accept loop.
    ///
    /// Use port 0 to let the OS assign a random available port.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if binding fails.
    pub async fn bind(ip: IpAddr, port: u16, registry: Arc<ConnectionRegistry>) -> Result<Arc<Self>> {
        Self::bind_with_handshake_timeout(ip, port, registry, HANDSHAKE_TIMEOUT).await
    }

    /// Binds the relay endpoint with a custom upgrade limit.
    ///
    /// Clients that do not complete the WebSocket upgrade within
    /// `handshake_timeout` are dropped.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if binding fails.
    pub async fn bind_with_handshake_timeout(
        ip: IpAddr,
        port: u16,
        registry: Arc<ConnectionRegistry>,
        handshake_timeout: Duration,
    ) -> Result<Arc<Self>> {
        let listener = TcpListener::bind(SocketAddr::new(ip, port)).await?;
        let local_addr = listener.local_addr()?;

        let server = Arc::new(Self {
            local_addr,
            registry,
            handshake_timeout,
            active: AtomicUsize::new(0),
            shutdown: AtomicBool::new(false),
        });

        tokio::spawn(Arc::clone(&server).accept_loop(listener));

        info!(addr = %local_addr, "Relay server started");
        Ok(server)
    }
}

// ============================================================================
// RelayServer - Public API
// ============================================================================

impl RelayServer {
    /// Returns the port the relay is bound to.
    #[inline]
    #[must_use]
    pub fn port(&self) -> u16 {
        self.local_addr.port()
    }

    /// Returns the bound socket address.
    #[inline]
    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Returns the relay base URL.
    ///
    /// Format: `ws://{ip}:{port}`
    #[must_use]
    pub fn ws_url(&self) -> String {
        format!("ws://{}", self.local_addr)
    }

    /// Returns the URL a client uses to reach one robot.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the bound address does not form a URL.
    pub fn relay_url(&self, robot_id: &RobotId) -> Result<Url> {
        let mut url = Url::parse(&self.ws_url())
            .map_err(|e| Error::config(format!("invalid relay address: {e}")))?;
        url.query_pairs_mut()
            .append_pair(ROBOT_ID_PARAM, robot_id.as_str());
        Ok(url)
    }

    /// Returns the number of clients currently being relayed.
    #[inline]
    #[must_use]
    pub fn active_relays(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// Stops accepting new clients.
    ///
    /// Running relays end with their sessions.
    pub fn shutdown(&self) {
        if !self.shutdown.swap(true, Ordering::SeqCst) {
            info!(addr = %self.local_addr, "Relay server shutting down");
        }
    }
}

// ============================================================================
// RelayServer - Accept Loop
// ============================================================================

impl RelayServer {
    /// Background task that accepts new clients.
    async fn accept_loop(self: Arc<Self>, listener: TcpListener) {
        debug!("Relay accept loop started");

        loop {
            if self.shutdown.load(Ordering::SeqCst) {
                debug!("Relay accept loop shutting down");
                break;
            }

            // Accept with timeout to allow checking shutdown flag
            match timeout(ACCEPT_POLL, listener.accept()).await {
                Ok(Ok((stream, addr))) => {
                    let server = Arc::clone(&self);
                    tokio::spawn(async move {
                        if let Err(e) = server.handle_client(stream, addr).await {
                            warn!(error = %e, ?addr, "Relay client ended with error");
                        }
                    });
                }
                Ok(Err(e)) => {
                    error!(error = %e, "Relay accept failed");
                }
                Err(_) => continue,
            }
        }

        debug!("Relay accept loop terminated");
    }

    /// Handles one client from handshake to close.
    async fn handle_client(&self, stream: TcpStream, addr: SocketAddr) -> Result<()> {
        let mut query: Option<String> = None;
        let capture_query =
            |request: &Request, response: Response| -> std::result::Result<Response, ErrorResponse> {
                query = request.uri().query().map(str::to_string);
                Ok(response)
            };

        let mut client = timeout(
            self.handshake_timeout,
            tokio_tungstenite::accept_hdr_async(stream, capture_query),
        )
        .await
        .map_err(|_| Error::connection_timeout(self.handshake_timeout.as_millis() as u64))??;
        debug!(?addr, "Relay client handshake complete");

        let Some(robot_id) = robot_id_from_query(query.as_deref()) else {
            return Self::reject(client, CloseCode::Policy, "bad request").await;
        };

        let session = match self.registry.get(&robot_id) {
            Some(session) if session.is_connected() => session,
            _ => {
                debug!(robot_id = %robot_id, ?addr, "No connected session for relay");
                return Self::reject(client, CloseCode::Again, "resource unavailable").await;
            }
        };

        let connection = session.connection().clone();
        let (id, frames) = connection.add_listener();
        let _guard = ListenerGuard {
            connection: connection.clone(),
            id,
        };

        self.active.fetch_add(1, Ordering::SeqCst);
        info!(robot_id = %robot_id, ?addr, listener = %id, "Relay attached");

        let end = Self::forward(&mut client, &connection, frames).await;

        self.active.fetch_sub(1, Ordering::SeqCst);
        info!(robot_id = %robot_id, ?addr, ?end, "Relay detached");

        if end == RelayEnd::Session {
            let frame = CloseFrame {
                code: CloseCode::Away,
                reason: "robot disconnected".into(),
            };
            Self::close_gracefully(&mut client, frame).await;
        }

        Ok(())
    }

    /// Moves frames both ways until either side ends.
    async fn forward(
        client: &mut WebSocketStream<TcpStream>,
        connection: &Connection,
        mut frames: mpsc::UnboundedReceiver<Message>,
    ) -> RelayEnd {
        loop {
            tokio::select! {
                // Robot → client
                frame = frames.recv() => match frame {
                    Some(frame) => {
                        if let Err(e) = client.send(frame).await {
                            debug!(error = %e, "Relay client write failed");
                            return RelayEnd::Client;
                        }
                    }
                    None => return RelayEnd::Session,
                },

                // Client → robot
                message = client.next() => match message {
                    Some(Ok(frame @ (Message::Text(_) | Message::Binary(_)))) => {
                        trace!(len = frame.len(), "Relaying client frame");
                        if connection.send(frame).is_err() {
                            return RelayEnd::Session;
                        }
                    }
                    Some(Ok(Message::Close(frame))) => {
                        debug!(?frame, "Relay client closed");
                        return RelayEnd::Client;
                    }
                    Some(Err(e)) => {
                        debug!(error = %e, "Relay client error");
                        return RelayEnd::Client;
                    }
                    None => return RelayEnd::Client,
                    Some(Ok(_)) => {}
                },
            }
        }
    }

    /// Closes a client with the given code and reports the rejection.
    async fn reject(
        mut client: WebSocketStream<TcpStream>,
        code: CloseCode,
        reason: &'static str,
    ) -> Result<()> {
        let numeric = u16::from(code);
        Self::close_gracefully(
            &mut client,
            CloseFrame {
                code,
                reason: reason.into(),
            },
        )
        .await;
        Err(Error::relay_rejected(numeric, reason))
    }

    /// Sends a close frame and waits briefly for the client to acknowledge.
    async fn close_gracefully(client: &mut WebSocketStream<TcpStream>, frame: CloseFrame) {
        if let Err(e) = client.close(Some(frame)).await {
            trace!(error = %e, "Relay close frame not delivered");
            return;
        }

        let _ = timeout(CLOSE_GRACE, async {
            while let Some(Ok(_)) = client.next().await {}
        })
        .await;
    }
}

impl fmt::Debug for RelayServer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RelayServer")
            .field("local_addr", &self.local_addr)
            .field("active", &self.active_relays())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Query Parsing
// ============================================================================

/// Extracts the robot id from a relay request query string.
fn robot_id_from_query(query: Option<&str>) -> Option<RobotId> {
    url::form_urlencoded::parse(query?.as_bytes())
        .find(|(key, value)| (key == ROBOT_ID_PARAM || key == ROBOT_ID_ALIAS) && !value.is_empty())
        .map(|(_, value)| RobotId::new(value.into_owned()))
}

// ============================================================================
// Tests
// ============================================================================
