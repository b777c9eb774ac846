//! # FileBeam Daemon Library
//!
//! This crate provides the hosting side of FileBeam: local directories are
//! exposed under one virtual namespace, and remote peers enumerate and
//! fetch them over a persistent command channel.
//!
//! ## Overview
//!
//! - **Virtual filesystem**: mount local directory trees under virtual
//!   endpoints; longest-prefix resolution routes each path to its backend
//! - **Bundles**: a fetch produces an opaque id plus file records; bundle
//!   bytes are delivered separately, out of band of the command channel
//! - **Transports**: pluggable delivery mechanisms for bundle bytes, with
//!   HTTP as the default
//! - **Disposal**: every connection owns an ordered set of disposables
//!   that is released exactly once when the connection closes
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use daemon::{Config, Server};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load_default()?;
//!     let server = Server::new(&config)?;
//!     let handle = server.listen().await?;
//!
//!     tokio::signal::ctrl_c().await?;
//!     handle.shutdown().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Modules
//!
//! - [`config`]: Configuration loading and defaults
//! - [`vfs`]: Virtual filesystem backends and the mount registry
//! - [`bundle`]: Bundles and the server-wide bundle table
//! - [`transport`]: Pluggable bundle-byte delivery
//! - [`dispose`]: Disposal chain released on disconnect
//! - [`connection`]: Per-client connection state
//! - [`router`]: Command dispatch
//! - [`server`]: The listener tying everything together

pub mod bundle;
pub mod config;
pub mod connection;
pub mod dispose;
pub mod router;
pub mod server;
pub mod transport;
pub mod vfs;

// Re-export protocol for convenience
pub use protocol;

// Re-export config types for convenience
pub use config::{Config, ConfigError, MountConfig};

// Re-export vfs types for convenience
pub use vfs::{DeviceRegistry, FileSystem, NativeFileSystem, VfsError};

// Re-export bundle types for convenience
pub use bundle::{new_bundle_id, Bundle, BundleClaim, BundleFile, BundleTable};

// Re-export transport types for convenience
pub use transport::{HttpTransport, Transport, TransportError, TransportRegistry};

// Re-export dispose types for convenience
pub use dispose::{Disposable, DisposableSet, DisposalFailures, DisposeError, DisposeHandle};

// Re-export connection types for convenience
pub use connection::{ClientConnection, ConnectionState};

// Re-export router types for convenience
pub use router::{CommandRouter, RouterError};

// Re-export server types for convenience
pub use server::{Server, ServerEvent, ServerHandle};
