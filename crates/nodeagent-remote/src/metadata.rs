use crate::http::get_bytes;
use crate::{agent_with_timeout, RemoteError};
use nodeagent_schema::{NodeMetadata, UserData};

/// Authenticated fetch of the node metadata document.
pub trait MetadataFetcher: Send + Sync {
    fn fetch(&self, credentials: &UserData) -> Result<NodeMetadata, RemoteError>;
}

pub struct HttpMetadataFetcher {
    agent: ureq::Agent,
}

impl HttpMetadataFetcher {
    pub fn new() -> Self {
        Self {
            agent: agent_with_timeout(),
        }
    }
}

impl Default for HttpMetadataFetcher {
    fn default() -> Self {
        Self::new()
    }
}

impl MetadataFetcher for HttpMetadataFetcher {
    fn fetch(&self, credentials: &UserData) -> Result<NodeMetadata, RemoteError> {
        tracing::debug!("GET {}", credentials.metadata_url);
        let body = get_bytes(
            &self.agent,
            &credentials.metadata_url,
            Some(&credentials.node_secret_key),
        )?;
        let mut metadata = NodeMetadata::from_json(&body)?;
        metadata.token.clone_from(&credentials.node_secret_key);
        tracing::info!(
            node = %metadata.name,
            pool_version = %metadata.pool_version,
            "fetched node metadata"
        );
        Ok(metadata)
    }
}
