//! # FileBeam Client Library
//!
//! Connects to a FileBeam daemon's command channel, issues `list` and
//! `fetch` commands, and downloads bundle bytes over the HTTP transport.
//!
//! Responses are paired to requests by id, so commands may be issued
//! concurrently from multiple tasks over the one connection.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, warn};

use protocol::codec;
use protocol::messages::{
    BundleInfo, CommandResult, ErrorMessage, Listing, Request, Response, COMMAND_FETCH,
    COMMAND_LIST,
};

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;
type Pending = Arc<Mutex<HashMap<u64, oneshot::Sender<Response>>>>;

/// Errors from the client.
#[derive(Debug, Error)]
pub enum ClientError {
    /// WebSocket connect or send failure.
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// Message encode or decode failure.
    #[error(transparent)]
    Protocol(#[from] protocol::ProtocolError),

    /// The connection closed before the response arrived.
    #[error("connection closed")]
    ConnectionClosed,

    /// The server answered the command with an error result.
    #[error("server error ({:?}): {}", .0.code, .0.message)]
    Server(ErrorMessage),

    /// The server answered with a result of the wrong shape.
    #[error("unexpected result for command")]
    UnexpectedResult,

    /// Bundle download failure.
    #[error("download error: {0}")]
    Http(#[from] reqwest::Error),

    /// The bundle id is unknown or has been invalidated.
    #[error("bundle not available: {0}")]
    BundleGone(String),
}

/// A connected FileBeam client.
pub struct Client {
    sink: Mutex<WsSink>,
    pending: Pending,
    next_id: AtomicU64,
    http_base: String,
    reader: JoinHandle<()>,
}

impl Client {
    /// Connect to a daemon at `host:port`.
    pub async fn connect(addr: &str) -> Result<Self, ClientError> {
        let url = format!("ws://{addr}/ws");
        let (socket, _) = tokio_tungstenite::connect_async(url.as_str()).await?;
        let (sink, mut stream) = socket.split();

        let pending: Pending = Arc::new(Mutex::new(HashMap::new()));
        let reader_pending = pending.clone();
        let reader = tokio::spawn(async move {
            while let Some(message) = stream.next().await {
                let payload = match message {
                    Ok(Message::Text(text)) => text.into_bytes(),
                    Ok(Message::Binary(bytes)) => bytes,
                    Ok(Message::Close(_)) | Err(_) => break,
                    Ok(_) => continue,
                };
                let response = match codec::decode_response(&payload) {
                    Ok(response) => response,
                    Err(err) => {
                        warn!(%err, "undecodable response");
                        continue;
                    }
                };
                let waiter = reader_pending.lock().await.remove(&response.id);
                match waiter {
                    Some(tx) => {
                        let _ = tx.send(response);
                    }
                    None => debug!(id = response.id, "response with no waiter"),
                }
            }
            // Dropping the map wakes every outstanding command with
            // connection-closed.
            reader_pending.lock().await.clear();
        });

        Ok(Self {
            sink: Mutex::new(sink),
            pending,
            next_id: AtomicU64::new(1),
            http_base: format!("http://{addr}"),
            reader,
        })
    }

    /// Issue a raw command and wait for its paired response.
    pub async fn command(
        &self,
        name: &str,
        path: Option<String>,
        transport: Option<String>,
    ) -> Result<CommandResult, ClientError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let request = Request {
            id,
            name: name.to_string(),
            path,
            transport,
        };
        let encoded = codec::encode_request(&request)?;

        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id, tx);

        {
            let mut sink = self.sink.lock().await;
            if let Err(err) = sink.send(Message::Binary(encoded)).await {
                self.pending.lock().await.remove(&id);
                return Err(err.into());
            }
        }

        let response = rx.await.map_err(|_| ClientError::ConnectionClosed)?;
        if let Some(error) = response.error {
            return Err(ClientError::Server(error));
        }
        response.result.ok_or(ClientError::UnexpectedResult)
    }

    /// List a virtual path.
    pub async fn list(&self, path: Option<String>) -> Result<Listing, ClientError> {
        match self.command(COMMAND_LIST, path, None).await? {
            CommandResult::Listing(listing) => Ok(listing),
            _ => Err(ClientError::UnexpectedResult),
        }
    }

    /// Fetch a virtual path, producing a bundle.
    pub async fn fetch(
        &self,
        path: Option<String>,
        transport: Option<String>,
    ) -> Result<BundleInfo, ClientError> {
        match self.command(COMMAND_FETCH, path, transport).await? {
            CommandResult::Bundle(info) => Ok(info),
            _ => Err(ClientError::UnexpectedResult),
        }
    }

    /// Download one file of a bundle over the HTTP transport.
    pub async fn download(&self, bundle_id: &str, index: usize) -> Result<Vec<u8>, ClientError> {
        let url = format!("{}/bundles/{bundle_id}/{index}", self.http_base);
        let response = reqwest::get(&url).await?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(ClientError::BundleGone(bundle_id.to_string()));
        }
        let bytes = response.error_for_status()?.bytes().await?;
        Ok(bytes.to_vec())
    }

    /// Close the command channel. Bundles issued to this connection become
    /// unreachable once the server observes the disconnect.
    pub async fn close(self) {
        {
            let mut sink = self.sink.lock().await;
            let _ = sink.send(Message::Close(None)).await;
        }
        self.reader.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use protocol::messages::ErrorCode;

    #[test]
    fn test_server_error_display() {
        let err = ClientError::Server(ErrorMessage::new(
            ErrorCode::NoSuchMount,
            "no mount owns the path",
        ));
        assert!(err.to_string().contains("no mount owns the path"));
    }

    #[tokio::test]
    async fn test_connect_refused() {
        // Nothing listens on this port.
        let err = Client::connect("127.0.0.1:1").await.err().unwrap();
        assert!(matches!(err, ClientError::WebSocket(_)));
    }
}
