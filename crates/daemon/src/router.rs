//! Command routing.
//!
//! Inbound commands from an active connection are dispatched by their tag:
//! `fetch` and `list` go to the mount registry; anything else fails with
//! an invalid-command result. Command errors are returned to the peer as
//! the command's error result and never crash the server.

use std::sync::Arc;

use protocol::messages::{
    BundleInfo, CommandResult, ErrorCode, ErrorMessage, Listing, Request, Response, COMMAND_FETCH,
    COMMAND_LIST,
};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::bundle::{new_bundle_id, Bundle, BundleClaim, BundleError, BundleTable};
use crate::connection::ClientConnection;
use crate::transport::{TransportError, TransportRegistry};
use crate::vfs::{DeviceRegistry, VfsError};

/// Errors that can occur while routing a command.
#[derive(Debug, Error)]
pub enum RouterError {
    /// Virtual filesystem error.
    #[error(transparent)]
    Vfs(#[from] VfsError),

    /// Transport selection or serving error.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Bundle table error.
    #[error(transparent)]
    Bundle(#[from] BundleError),

    /// Unrecognized command tag.
    #[error("Invalid command: {0}")]
    InvalidCommand(String),
}

impl RouterError {
    /// Convert the error to a wire-level error message.
    pub fn to_error_message(&self) -> ErrorMessage {
        let code = match self {
            RouterError::Vfs(VfsError::NoSuchMount(_)) => ErrorCode::NoSuchMount,
            RouterError::Vfs(VfsError::NotFound(_)) => ErrorCode::NotFound,
            RouterError::Vfs(VfsError::AccessDenied(_)) => ErrorCode::AccessDenied,
            RouterError::Transport(TransportError::Unknown(_)) => ErrorCode::UnknownTransport,
            RouterError::Transport(TransportError::ServeFailed { .. }) => ErrorCode::Internal,
            RouterError::Bundle(BundleError::DuplicateId(_)) => ErrorCode::Internal,
            RouterError::InvalidCommand(_) => ErrorCode::InvalidCommand,
        };
        ErrorMessage::new(code, self.to_string())
    }
}

/// Router dispatching inbound commands to the registry, bundle table, and
/// transports.
///
/// The router holds no mutable per-call state beyond its registries, so
/// commands from interleaved connections can be routed reentrantly.
pub struct CommandRouter {
    registry: Arc<DeviceRegistry>,
    transports: Arc<TransportRegistry>,
    bundles: Arc<BundleTable>,
}

impl CommandRouter {
    /// Create a router over the server's shared state.
    pub fn new(
        registry: Arc<DeviceRegistry>,
        transports: Arc<TransportRegistry>,
        bundles: Arc<BundleTable>,
    ) -> Self {
        Self {
            registry,
            transports,
            bundles,
        }
    }

    /// Route one command and produce its paired response.
    pub async fn route(&self, request: &Request, connection: &ClientConnection) -> Response {
        debug!(
            connection = %connection.id(),
            command = %request.name,
            path = request.path.as_deref().unwrap_or(""),
            "routing command"
        );

        let result = match request.name.as_str() {
            COMMAND_FETCH => self.handle_fetch(request, connection).await,
            COMMAND_LIST => self.handle_list(request).await,
            other => Err(RouterError::InvalidCommand(other.to_string())),
        };

        match result {
            Ok(result) => Response::ok(request.id, result),
            Err(err) => {
                warn!(connection = %connection.id(), command = %request.name, %err, "command failed");
                Response::err(request.id, err.to_error_message())
            }
        }
    }

    async fn handle_fetch(
        &self,
        request: &Request,
        connection: &ClientConnection,
    ) -> Result<CommandResult, RouterError> {
        let path = request.path.as_deref().unwrap_or("");

        // Select the transport first so an unknown name fails before any
        // backend work.
        let transport = self.transports.get_or_default(request.transport.as_deref())?;

        let files = self.registry.fetch(path).await?;
        let bundle = Arc::new(Bundle::create(new_bundle_id(), files));

        // Registered in the server-wide table and, non-exclusively, in the
        // issuing connection's disposable set.
        if let Err(err) = self.bundles.insert(bundle.clone()) {
            error!(bundle_id = bundle.id(), %err, "bundle registration collided");
            return Err(err.into());
        }
        let claim = Arc::new(BundleClaim::new(self.bundles.clone(), bundle.id().to_string()));
        let claim_handle = connection.disposables().add(claim).await;

        if let Err(err) = transport.serve(bundle.clone()).await {
            // Roll back so a bundle nobody can deliver does not linger.
            self.bundles.remove(bundle.id());
            connection.disposables().remove(claim_handle).await;
            return Err(err.into());
        }

        info!(
            connection = %connection.id(),
            bundle_id = bundle.id(),
            files = bundle.files().len(),
            transport = transport.name(),
            "bundle issued"
        );

        Ok(CommandResult::Bundle(BundleInfo {
            id: bundle.id().to_string(),
            files: bundle.file_records(),
        }))
    }

    async fn handle_list(&self, request: &Request) -> Result<CommandResult, RouterError> {
        let path = request.path.as_deref().unwrap_or("");
        let files = self.registry.list(path).await?;
        Ok(CommandResult::Listing(Listing { files }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::HttpTransport;
    use crate::vfs::NativeFileSystem;
    use std::fs;
    use std::net::SocketAddr;
    use tempfile::TempDir;

    fn test_addr() -> SocketAddr {
        "127.0.0.1:5000".parse().unwrap()
    }

    fn create_router(temp: &TempDir) -> (CommandRouter, Arc<BundleTable>) {
        fs::write(temp.path().join("readme.txt"), "hello").unwrap();

        let registry = Arc::new(DeviceRegistry::new());
        registry.mount("/", Arc::new(NativeFileSystem::new(temp.path())));

        let bundles = Arc::new(BundleTable::new());
        let mut transports = TransportRegistry::new();
        transports.add(Arc::new(HttpTransport::new(bundles.clone())));

        (
            CommandRouter::new(registry, Arc::new(transports), bundles.clone()),
            bundles,
        )
    }

    #[tokio::test]
    async fn test_fetch_registers_bundle_and_claim() {
        let temp = TempDir::new().unwrap();
        let (router, bundles) = create_router(&temp);
        let conn = ClientConnection::new(test_addr());

        let request = Request::fetch(1, Some("readme.txt".to_string()), None);
        let response = router.route(&request, &conn).await;

        let Some(CommandResult::Bundle(info)) = response.result else {
            panic!("expected bundle result, got {response:?}");
        };
        assert_eq!(info.files.len(), 1);
        assert_eq!(info.files[0].name, "readme.txt");
        assert!(bundles.get(&info.id).is_some());
        assert_eq!(conn.disposables().len().await, 1);

        // Connection disposal invalidates the issued id.
        conn.disposables().dispose_all().await.unwrap();
        assert!(bundles.get(&info.id).is_none());
    }

    #[tokio::test]
    async fn test_fetch_with_unknown_transport() {
        let temp = TempDir::new().unwrap();
        let (router, bundles) = create_router(&temp);
        let conn = ClientConnection::new(test_addr());

        let request = Request::fetch(2, Some("readme.txt".to_string()), Some("bogus".to_string()));
        let response = router.route(&request, &conn).await;

        let error = response.error.expect("expected error result");
        assert_eq!(error.code, ErrorCode::UnknownTransport);
        assert!(bundles.is_empty());
        assert!(conn.disposables().is_empty().await);
    }

    #[tokio::test]
    async fn test_fetch_unmounted_path() {
        let temp = TempDir::new().unwrap();
        let (router, _) = create_router(&temp);
        let conn = ClientConnection::new(test_addr());

        // Replace the registry-backed router with one holding no mounts.
        let empty = CommandRouter::new(
            Arc::new(DeviceRegistry::new()),
            router.transports.clone(),
            router.bundles.clone(),
        );

        let request = Request::fetch(3, Some("anything".to_string()), None);
        let response = empty.route(&request, &conn).await;

        let error = response.error.expect("expected error result");
        assert_eq!(error.code, ErrorCode::NoSuchMount);
    }

    #[tokio::test]
    async fn test_list_returns_records() {
        let temp = TempDir::new().unwrap();
        let (router, _) = create_router(&temp);
        let conn = ClientConnection::new(test_addr());

        let request = Request::list(4, None);
        let response = router.route(&request, &conn).await;

        let Some(CommandResult::Listing(listing)) = response.result else {
            panic!("expected listing result");
        };
        assert_eq!(listing.files.len(), 1);
        assert_eq!(listing.files[0].name, "readme.txt");
    }

    #[tokio::test]
    async fn test_unrecognized_command() {
        let temp = TempDir::new().unwrap();
        let (router, _) = create_router(&temp);
        let conn = ClientConnection::new(test_addr());

        let request = Request {
            id: 5,
            name: "delete".to_string(),
            path: None,
            transport: None,
        };
        let response = router.route(&request, &conn).await;

        let error = response.error.expect("expected error result");
        assert_eq!(error.code, ErrorCode::InvalidCommand);
        assert_eq!(error.message, "Invalid command: delete");
    }
}
