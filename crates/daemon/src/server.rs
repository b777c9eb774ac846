//! The hosting server.
//!
//! One listener carries everything: the WebSocket command channel at
//! `/ws` and every transport's delivery endpoints, merged into a single
//! router at listen time. Each accepted command socket gets its own
//! [`ClientConnection`]; when the socket closes, for any reason, the
//! connection's disposables are released exactly once and the bundles it
//! was issued become unreachable.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::extract::connect_info::ConnectInfo;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use protocol::codec;
use protocol::messages::{ErrorCode, ErrorMessage, Response as CommandResponse};

use crate::bundle::BundleTable;
use crate::config::Config;
use crate::connection::ClientConnection;
use crate::router::CommandRouter;
use crate::transport::{HttpTransport, TransportRegistry};
use crate::vfs::{DeviceRegistry, FileSystem, NativeFileSystem};

/// Observable server lifecycle events.
#[derive(Debug, Clone)]
pub enum ServerEvent {
    /// A peer passed the address policy and its command channel is active.
    Connected {
        /// Connection identity.
        connection: Uuid,
        /// Peer address.
        addr: SocketAddr,
    },
    /// A command arrived on an active connection.
    Command {
        /// Connection identity.
        connection: Uuid,
        /// Command tag as sent by the peer.
        name: String,
    },
    /// A connection's teardown began.
    Disconnected {
        /// Connection identity.
        connection: Uuid,
    },
}

struct ServerInner {
    registry: Arc<DeviceRegistry>,
    transports: Arc<TransportRegistry>,
    bundles: Arc<BundleTable>,
    router: CommandRouter,
    connections: Mutex<Vec<Arc<ClientConnection>>>,
    allowed_peers: Vec<String>,
    bind: String,
    port: u16,
    event_tx: broadcast::Sender<ServerEvent>,
}

/// The FileBeam server: mount registry, bundle table, transports, and the
/// command channel, listening on one port.
#[derive(Clone)]
pub struct Server {
    inner: Arc<ServerInner>,
}

impl Server {
    /// Build a server from configuration. Config-declared mounts are
    /// attached and the default transport is selected before listening.
    pub fn new(config: &Config) -> Result<Self> {
        let registry = Arc::new(DeviceRegistry::new());
        for mount in &config.mounts {
            registry.mount(&mount.endpoint, Arc::new(NativeFileSystem::new(&mount.dir)));
        }

        let bundles = Arc::new(BundleTable::new());
        let mut transports = TransportRegistry::new();
        transports.add(Arc::new(HttpTransport::new(bundles.clone())));
        transports
            .set_default(&config.transport.default)
            .with_context(|| {
                format!("unknown default transport: {}", config.transport.default)
            })?;
        let transports = Arc::new(transports);

        let router = CommandRouter::new(registry.clone(), transports.clone(), bundles.clone());
        let (event_tx, _) = broadcast::channel(64);

        Ok(Self {
            inner: Arc::new(ServerInner {
                registry,
                transports,
                bundles,
                router,
                connections: Mutex::new(Vec::new()),
                allowed_peers: config.network.allowed_peers.clone(),
                bind: config.network.bind.clone(),
                port: config.network.port,
                event_tx,
            }),
        })
    }

    /// Mount a backend under a virtual endpoint. Effective for commands
    /// routed after the call; existing bundles are unaffected.
    pub fn mount(&self, endpoint: &str, fs: Arc<dyn FileSystem>) {
        self.inner.registry.mount(endpoint, fs);
    }

    /// Subscribe to server lifecycle events.
    pub fn subscribe(&self) -> broadcast::Receiver<ServerEvent> {
        self.inner.event_tx.subscribe()
    }

    /// Number of connections not yet fully closed.
    pub async fn connection_count(&self) -> usize {
        self.inner.connections.lock().await.len()
    }

    /// The server-wide bundle table.
    pub fn bundles(&self) -> Arc<BundleTable> {
        self.inner.bundles.clone()
    }

    /// Whether a peer address passes the allow-list. An empty list allows
    /// every peer.
    fn allowed(&self, addr: SocketAddr) -> bool {
        if self.inner.allowed_peers.is_empty() {
            return true;
        }
        let ip = addr.ip().to_string();
        self.inner.allowed_peers.iter().any(|peer| *peer == ip)
    }

    fn emit(&self, event: ServerEvent) {
        // Nobody subscribed is fine.
        let _ = self.inner.event_tx.send(event);
    }

    /// Bind the listener and start serving the command channel and every
    /// transport's delivery endpoints.
    pub async fn listen(&self) -> Result<ServerHandle> {
        let listener = TcpListener::bind((self.inner.bind.as_str(), self.inner.port))
            .await
            .with_context(|| {
                format!("failed to bind {}:{}", self.inner.bind, self.inner.port)
            })?;
        let addr = listener.local_addr().context("listener has no address")?;

        let mut app = Router::new()
            .route("/ws", get(ws_handler))
            .with_state(self.clone());
        for transport in self.inner.transports.all() {
            app = app.merge(transport.setup());
        }

        let token = CancellationToken::new();
        let shutdown = token.clone();
        let task = tokio::spawn(async move {
            let serve = axum::serve(
                listener,
                app.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .with_graceful_shutdown(async move { shutdown.cancelled().await });
            if let Err(err) = serve.await {
                warn!(%err, "server loop ended with error");
            }
        });

        info!(%addr, "listening");
        Ok(ServerHandle {
            server: self.clone(),
            addr,
            token,
            task,
        })
    }

    async fn handle_socket(self, socket: WebSocket, addr: SocketAddr) {
        let connection = Arc::new(ClientConnection::new(addr));
        {
            let mut connections = self.inner.connections.lock().await;
            connections.push(connection.clone());
        }
        connection.activate();
        info!(connection = %connection.id(), %addr, "connection active");
        self.emit(ServerEvent::Connected {
            connection: connection.id(),
            addr,
        });

        let (mut sink, mut stream) = socket.split();

        while let Some(message) = stream.next().await {
            let message = match message {
                Ok(message) => message,
                Err(err) => {
                    debug!(connection = %connection.id(), %err, "socket error");
                    break;
                }
            };

            let payload = match message {
                Message::Text(text) => text.into_bytes(),
                Message::Binary(bytes) => bytes,
                Message::Close(_) => break,
                // Pings are answered by the websocket layer.
                Message::Ping(_) | Message::Pong(_) => continue,
            };

            let request = match codec::decode_request(&payload) {
                Ok(request) => request,
                Err(err) => {
                    warn!(connection = %connection.id(), %err, "undecodable command");
                    continue;
                }
            };

            self.emit(ServerEvent::Command {
                connection: connection.id(),
                name: request.name.clone(),
            });

            let response = self.inner.router.route(&request, &connection).await;
            let Some(encoded) = encode_reply(&response) else {
                continue;
            };
            if sink.send(Message::Binary(encoded)).await.is_err() {
                break;
            }
        }

        self.dispose_connection(&connection).await;
    }

    /// Tear down a connection: release its disposables in registration
    /// order and drop it from the live list. Runs at most once per
    /// connection; later calls observe the state machine and return.
    async fn dispose_connection(&self, connection: &Arc<ClientConnection>) {
        if !connection.begin_dispose() {
            return;
        }

        info!(connection = %connection.id(), "disposing connection");
        self.emit(ServerEvent::Disconnected {
            connection: connection.id(),
        });

        if let Err(failures) = connection.disposables().dispose_all().await {
            warn!(connection = %connection.id(), %failures, "connection disposal had failures");
        }

        {
            let mut connections = self.inner.connections.lock().await;
            connections.retain(|c| c.id() != connection.id());
        }
        connection.mark_closed();
    }
}

/// Encode a response for the command channel.
///
/// A result that exceeds the channel's message-size ceiling is replaced
/// with an internal-error reply carrying the same id, so the peer's
/// command always completes instead of waiting forever.
fn encode_reply(response: &CommandResponse) -> Option<Vec<u8>> {
    match codec::encode_response(response) {
        Ok(encoded) => Some(encoded),
        Err(err) => {
            warn!(id = response.id, %err, "response too large, replying with internal error");
            let fallback = CommandResponse::err(
                response.id,
                ErrorMessage::new(
                    ErrorCode::Internal,
                    "result too large for the command channel",
                ),
            );
            codec::encode_response(&fallback).ok()
        }
    }
}

async fn ws_handler(
    State(server): State<Server>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    ws: WebSocketUpgrade,
) -> Response {
    if !server.allowed(addr) {
        warn!(%addr, "rejected peer not on allow-list");
        return StatusCode::FORBIDDEN.into_response();
    }
    ws.on_upgrade(move |socket| server.handle_socket(socket, addr))
}

/// Handle to a listening server.
pub struct ServerHandle {
    server: Server,
    addr: SocketAddr,
    token: CancellationToken,
    task: JoinHandle<()>,
}

impl ServerHandle {
    /// Address the server is actually bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// Stop accepting, wait for the serve loop to drain, and dispose every
    /// connection that is still live.
    pub async fn shutdown(self) {
        self.token.cancel();
        if let Err(err) = self.task.await {
            warn!(%err, "server task ended abnormally");
        }

        let remaining: Vec<_> = {
            let mut connections = self.server.inner.connections.lock().await;
            std::mem::take(&mut *connections)
        };
        for connection in remaining {
            self.server.dispose_connection(&connection).await;
        }
    }
}
