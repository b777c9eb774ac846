//! Pluggable bundle transports.
//!
//! Bundle *metadata* always travels over the command channel; bundle
//! *bytes* travel over whichever [`Transport`] the client negotiated, so
//! bulk data never congests the control channel and new delivery
//! mechanisms can be added without touching the registry or the bundles.

pub mod http;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use axum::Router;
use thiserror::Error;

use crate::bundle::Bundle;

pub use http::{HttpTransport, HTTP_TRANSPORT_NAME};

/// Errors from transport selection and serving.
#[derive(Debug, Error)]
pub enum TransportError {
    /// A transport was named but is not registered.
    #[error("unknown transport: {0}")]
    Unknown(String),

    /// The transport failed to accept a bundle for delivery.
    #[error("transport failed to serve bundle {bundle_id}: {reason}")]
    ServeFailed {
        /// The bundle that could not be served.
        bundle_id: String,
        /// Why the transport refused it.
        reason: String,
    },
}

/// A pluggable delivery mechanism for bundle bytes.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Name clients use to select this transport.
    fn name(&self) -> &'static str;

    /// Announce that a bundle now exists and may be requested through this
    /// transport's delivery channel. Must not block waiting for the
    /// transfer itself; byte delivery is asynchronous.
    async fn serve(&self, bundle: Arc<Bundle>) -> Result<(), TransportError>;

    /// One-time chance to attach this transport's delivery endpoint to the
    /// hosting server, called at listen time. The returned routes are
    /// merged into the server's router.
    fn setup(&self) -> Router;
}

/// Registry of named transports with a settable default.
#[derive(Default)]
pub struct TransportRegistry {
    transports: HashMap<String, Arc<dyn Transport>>,
    default: Option<String>,
}

impl TransportRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a transport under its own name. The first transport added
    /// becomes the default until one is set explicitly.
    pub fn add(&mut self, transport: Arc<dyn Transport>) {
        let name = transport.name().to_string();
        if self.default.is_none() {
            self.default = Some(name.clone());
        }
        self.transports.insert(name, transport);
    }

    /// Select the default transport by name. The name must be registered.
    pub fn set_default(&mut self, name: &str) -> Result<(), TransportError> {
        if !self.transports.contains_key(name) {
            return Err(TransportError::Unknown(name.to_string()));
        }
        self.default = Some(name.to_string());
        Ok(())
    }

    /// Name of the current default transport, if any is registered.
    pub fn default_name(&self) -> Option<&str> {
        self.default.as_deref()
    }

    /// Return the named transport, or the default when no name is given.
    ///
    /// A name that is given but unregistered is an error; it does not fall
    /// back to the default.
    pub fn get_or_default(&self, name: Option<&str>) -> Result<Arc<dyn Transport>, TransportError> {
        let name = match name {
            Some(name) => name,
            None => self
                .default
                .as_deref()
                .ok_or_else(|| TransportError::Unknown("(no default)".to_string()))?,
        };
        self.transports
            .get(name)
            .cloned()
            .ok_or_else(|| TransportError::Unknown(name.to_string()))
    }

    /// All registered transports, for one-time setup at listen time.
    pub fn all(&self) -> Vec<Arc<dyn Transport>> {
        self.transports.values().cloned().collect()
    }
}
