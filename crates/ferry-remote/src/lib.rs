//! Endpoint client layer for ferry.
//!
//! This crate describes what the transfer core needs from a container-management
//! endpoint: entity and snapshot lookups, profile listing, local copies, migration
//! sessions, address discovery and operation polling. The [`Endpoint`] trait is the
//! seam; [`http::HttpEndpoint`] speaks the REST API, [`mock::MockEndpoint`] is an
//! in-memory stand-in for tests, and [`ClientConfig`] maps remote names to endpoints.

pub mod config;
pub mod entity;
pub mod http;
pub mod mock;
pub mod operation;

pub use config::{ClientConfig, RemoteConfig};
pub use entity::{is_snapshot, ContainerInfo, EntityRef, ReplicableState, SNAPSHOT_DELIMITER};
pub use operation::{
    LocalCopyRequest, MigrationRequest, Operation, OperationHandle, OperationStatus, Secrets,
};

use std::sync::Arc;
use thiserror::Error;

/// Protocol version sent as `X-Ferry-Protocol` header on all HTTP requests.
pub const PROTOCOL_VERSION: u32 = 1;

#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("remote I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("HTTP error: {0}")]
    Http(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("serialization error: {0}")]
    Serialization(String),
    #[error("decoding error: {0}")]
    Decode(String),
    #[error("remote config error: {0}")]
    Config(String),
    #[error("operation failed: {0}")]
    OperationFailed(String),
}

impl RemoteError {
    /// The endpoint's own description of the failure, without the variant prefix
    /// for failed operations.
    pub fn reason(&self) -> String {
        match self {
            Self::OperationFailed(msg) => msg.clone(),
            other => other.to_string(),
        }
    }
}

/// A container-management endpoint as seen by the transfer core.
///
/// Every call blocks until the endpoint answers. Asynchronous work is returned as
/// an [`Operation`] that can be awaited with [`Endpoint::wait`].
pub trait Endpoint: Send + Sync {
    /// Remote name this endpoint was connected under.
    fn name(&self) -> &str;

    /// Look up a live container.
    fn container(&self, name: &str) -> Result<ContainerInfo, RemoteError>;

    /// Look up a snapshot, addressed as `container/snapshot`.
    fn snapshot(&self, name: &str) -> Result<ContainerInfo, RemoteError>;

    /// Names of every profile defined on the endpoint.
    fn profiles(&self) -> Result<Vec<String>, RemoteError>;

    /// Copy a container or snapshot within this endpoint.
    fn local_copy(&self, request: &LocalCopyRequest) -> Result<Operation, RemoteError>;

    /// Open a migration source for `name`. The returned operation carries one
    /// secret per migration channel in its metadata.
    fn migration_source(
        &self,
        name: &str,
        live: bool,
        container_only: bool,
    ) -> Result<Operation, RemoteError>;

    /// Network addresses this endpoint listens on, in the endpoint's order.
    fn addresses(&self) -> Result<Vec<String>, RemoteError>;

    /// Ask this endpoint to create a container by pulling from a migration source.
    fn migrate_from(&self, request: &MigrationRequest) -> Result<Operation, RemoteError>;

    /// Block until the operation reaches a terminal state. A failed or cancelled
    /// operation is returned as [`RemoteError::OperationFailed`].
    fn wait(&self, handle: &OperationHandle) -> Result<Operation, RemoteError>;

    /// Current state of an operation, without waiting.
    fn operation(&self, handle: &OperationHandle) -> Result<Operation, RemoteError>;

    /// PEM certificate identifying this endpoint, empty when none is configured.
    fn certificate(&self) -> &str;

    /// Rename a container within this endpoint.
    fn rename(&self, name: &str, new_name: &str) -> Result<Operation, RemoteError>;

    /// Delete a container and its snapshots.
    fn delete(&self, name: &str) -> Result<Operation, RemoteError>;
}

/// Resolves remote names to connected endpoints.
pub trait Connector {
    /// Remote used when an entity reference names none.
    fn default_remote(&self) -> &str;

    fn connect(&self, remote: &str) -> Result<Arc<dyn Endpoint>, RemoteError>;
}
