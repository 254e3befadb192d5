//! Remote inputs of the nodeagent.
//!
//! This crate reads the component repository through a `RepositoryReader`
//! (HTTP(S), a local zip or tar archive, or a local directory, chosen from
//! an ordered URI list), acquires node credentials through a
//! `CredentialProvider` (instance user-data or external-node registration),
//! and fetches the node metadata document through a `MetadataFetcher`.

pub mod archive;
pub mod credentials;
pub mod directory;
pub mod http;
pub mod metadata;
pub mod repository;

#[cfg(test)]
pub(crate) mod test_server;

pub use archive::{ArchiveFormat, ArchiveRepository};
pub use credentials::{
    CredentialProvider, RegistrationProvider, UserDataProvider, DEFAULT_API_URL,
    DEFAULT_USER_DATA_CACHE, DEFAULT_USER_DATA_URL,
};
pub use directory::DirectoryRepository;
pub use http::HttpRepository;
pub use metadata::{HttpMetadataFetcher, MetadataFetcher};
pub use repository::{open_repository, RepositoryOpener, UriRepositoryOpener};

use std::time::Duration;
use thiserror::Error;

/// Timeout applied to every metadata, credentials, and repository request.
pub const HTTP_TIMEOUT: Duration = Duration::from_secs(10);

/// Header carrying the node secret on provider API requests.
pub const AUTH_TOKEN_HEADER: &str = "X-Auth-Token";

#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("remote I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("HTTP error: {0}")]
    Http(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("configuration error: {0}")]
    Config(String),
    #[error("no usable repository in '{0}'")]
    NoRepository(String),
    #[error("archive error: {0}")]
    Archive(String),
    #[error("invalid repository path '{0}'")]
    InvalidPath(String),
    #[error("document error: {0}")]
    Schema(#[from] nodeagent_schema::SchemaError),
}

impl RemoteError {
    /// Network failures that are worth retrying later.
    pub fn is_transient(&self) -> bool {
        matches!(self, RemoteError::Http(_) | RemoteError::Io(_))
    }

    pub fn is_config(&self) -> bool {
        matches!(self, RemoteError::Config(_) | RemoteError::NoRepository(_))
    }
}

/// Read-only view of a component repository.
///
/// Paths are relative, `/`-separated: `releases.yaml` at the root, and
/// `<component>/metadata.yaml` plus recipe sources under each component.
pub trait RepositoryReader: Send + Sync {
    /// Human-readable location, for logs.
    fn location(&self) -> String;

    fn read_file(&self, path: &str) -> Result<Vec<u8>, RemoteError>;

    /// Release transient local resources (e.g. a downloaded archive).
    fn cleanup(&self) -> Result<(), RemoteError> {
        Ok(())
    }
}

pub(crate) fn agent_with_timeout() -> ureq::Agent {
    ureq::Agent::config_builder()
        .timeout_global(Some(HTTP_TIMEOUT))
        .build()
        .into()
}
