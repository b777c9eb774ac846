//! HTTP bundle transport (the default).
//!
//! Exposes each live bundle's bytes at a deterministic, id-addressed
//! location on the hosting server:
//!
//! - `GET /bundles/{id}` — first file of the bundle
//! - `GET /bundles/{id}/{index}` — file at the given index
//!
//! Unknown or invalidated ids answer 404; a bundle destroyed mid-delivery
//! fails subsequent reads rather than returning stale data. When every
//! file of a bundle has been fully streamed at least once the transport
//! reports delivery completion by removing the bundle from the table.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use async_trait::async_trait;
use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use bytes::Bytes;
use futures_util::Stream;
use tokio_util::io::ReaderStream;
use tracing::debug;

use crate::bundle::{Bundle, BundleTable};
use crate::transport::{Transport, TransportError};

/// Name of the HTTP transport.
pub const HTTP_TRANSPORT_NAME: &str = "http";

/// The default bundle transport, delivering bytes over the hosting
/// server's own HTTP listener.
pub struct HttpTransport {
    bundles: Arc<BundleTable>,
}

impl HttpTransport {
    /// Create the transport over the server's bundle table.
    pub fn new(bundles: Arc<BundleTable>) -> Self {
        Self { bundles }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    fn name(&self) -> &'static str {
        HTTP_TRANSPORT_NAME
    }

    async fn serve(&self, bundle: Arc<Bundle>) -> Result<(), TransportError> {
        // The bundle is already reachable through the table; serving only
        // acknowledges availability and never waits on the transfer.
        debug!(
            bundle_id = bundle.id(),
            files = bundle.files().len(),
            "bundle available over http"
        );
        Ok(())
    }

    fn setup(&self) -> Router {
        Router::new()
            .route("/bundles/:id", get(serve_first_file))
            .route("/bundles/:id/:index", get(serve_indexed_file))
            .with_state(self.bundles.clone())
    }
}

async fn serve_first_file(
    State(bundles): State<Arc<BundleTable>>,
    Path(id): Path<String>,
) -> Response {
    stream_bundle_file(bundles, id, 0).await
}

async fn serve_indexed_file(
    State(bundles): State<Arc<BundleTable>>,
    Path((id, index)): Path<(String, usize)>,
) -> Response {
    stream_bundle_file(bundles, id, index).await
}

async fn stream_bundle_file(bundles: Arc<BundleTable>, id: String, index: usize) -> Response {
    let Some(bundle) = bundles.get(&id) else {
        debug!(bundle_id = %id, "bundle read against unknown or invalidated id");
        return StatusCode::NOT_FOUND.into_response();
    };
    let Some(file) = bundle.files().get(index) else {
        return StatusCode::NOT_FOUND.into_response();
    };

    let handle = match tokio::fs::File::open(&file.source).await {
        Ok(handle) => handle,
        Err(err) => {
            debug!(bundle_id = %id, index, %err, "bundle source unreadable");
            return StatusCode::NOT_FOUND.into_response();
        }
    };

    let size = file.record.size;
    let stream = DeliveryStream {
        inner: ReaderStream::new(handle),
        bundles,
        bundle,
        index,
        failed: false,
        completed: false,
    };

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "application/octet-stream")
        .header(header::CONTENT_LENGTH, size)
        .body(Body::from_stream(stream))
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}

/// Byte stream that reports delivery completion when the underlying file
/// has been streamed to the end without error. Completion marks the file
/// delivered and removes the bundle once every file has been delivered.
struct DeliveryStream {
    inner: ReaderStream<tokio::fs::File>,
    bundles: Arc<BundleTable>,
    bundle: Arc<Bundle>,
    index: usize,
    failed: bool,
    completed: bool,
}

impl Stream for DeliveryStream {
    type Item = std::io::Result<Bytes>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        match Pin::new(&mut this.inner).poll_next(cx) {
            Poll::Ready(None) => {
                if !this.completed && !this.failed {
                    this.completed = true;
                    if this.bundle.mark_delivered(this.index) {
                        debug!(bundle_id = this.bundle.id(), "bundle fully delivered");
                        this.bundles.remove(this.bundle.id());
                    }
                }
                Poll::Ready(None)
            }
            Poll::Ready(Some(Err(err))) => {
                this.failed = true;
                Poll::Ready(Some(Err(err)))
            }
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bundle::{new_bundle_id, BundleFile};
    use futures_util::StreamExt;
    use protocol::messages::FileRecord;
    use tempfile::TempDir;

    fn table_with_bundle(dir: &TempDir, contents: &[u8]) -> (Arc<BundleTable>, String) {
        let source = dir.path().join("file.bin");
        std::fs::write(&source, contents).unwrap();

        let id = new_bundle_id();
        let bundle = Arc::new(Bundle::create(
            id.clone(),
            vec![BundleFile {
                record: FileRecord::file("file.bin", contents.len() as u64, 0),
                source,
            }],
        ));

        let table = Arc::new(BundleTable::new());
        table.insert(bundle).unwrap();
        (table, id)
    }

    #[tokio::test]
    async fn test_delivery_completion_removes_bundle() {
        let dir = TempDir::new().unwrap();
        let (table, id) = table_with_bundle(&dir, b"payload");

        let bundle = table.get(&id).unwrap();
        let handle = tokio::fs::File::open(&bundle.files()[0].source).await.unwrap();
        let mut stream = DeliveryStream {
            inner: ReaderStream::new(handle),
            bundles: table.clone(),
            bundle,
            index: 0,
            failed: false,
            completed: false,
        };

        let mut collected = Vec::new();
        while let Some(chunk) = stream.next().await {
            collected.extend_from_slice(&chunk.unwrap());
        }

        assert_eq!(collected, b"payload");
        assert!(table.get(&id).is_none());
    }

    #[tokio::test]
    async fn test_serve_does_not_block() {
        let dir = TempDir::new().unwrap();
        let (table, id) = table_with_bundle(&dir, b"payload");

        let transport = HttpTransport::new(table.clone());
        transport.serve(table.get(&id).unwrap()).await.unwrap();

        // Serving alone must not consume the bundle.
        assert!(table.get(&id).is_some());
    }
}
