use crate::http::get_bytes;
use crate::{agent_with_timeout, RemoteError, AUTH_TOKEN_HEADER};
use nodeagent_schema::UserData;
use std::fs;
use std::io::{ErrorKind, Read, Write};
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};

pub const DEFAULT_USER_DATA_URL: &str = "http://169.254.42.42/user_data/k8s";
pub const DEFAULT_API_URL: &str = "https://api.scaleway.com";
pub const DEFAULT_USER_DATA_CACHE: &str = "/etc/nodeagent/userdata.json";

const CACHE_FILE_MODE: u32 = 0o600;

/// Source of the node's credentials: where its metadata lives, and the secret
/// that authenticates the fetch.
pub trait CredentialProvider: Send + Sync {
    fn user_data(&self) -> Result<UserData, RemoteError>;
}

/// Reads credentials from the instance user-data endpoint.
pub struct UserDataProvider {
    url: String,
    agent: ureq::Agent,
}

impl UserDataProvider {
    pub fn new(url: &str) -> Self {
        Self {
            url: url.to_owned(),
            agent: agent_with_timeout(),
        }
    }
}

impl Default for UserDataProvider {
    fn default() -> Self {
        Self::new(DEFAULT_USER_DATA_URL)
    }
}

impl CredentialProvider for UserDataProvider {
    fn user_data(&self) -> Result<UserData, RemoteError> {
        tracing::debug!("GET {}", self.url);
        let body = get_bytes(&self.agent, &self.url, None)?;
        Ok(UserData::from_json(&body)?)
    }
}

/// Registers an external node against the provider API.
///
/// The registration response is cached on disk; once the cache exists the
/// node is considered registered and the API is never called again.
pub struct RegistrationProvider {
    api_url: String,
    pool_id: String,
    region: String,
    secret_key: String,
    cache_file: PathBuf,
    agent: ureq::Agent,
}

impl RegistrationProvider {
    pub fn new(
        api_url: &str,
        pool_id: &str,
        region: &str,
        secret_key: &str,
        cache_file: impl Into<PathBuf>,
    ) -> Self {
        Self {
            api_url: api_url.trim_end_matches('/').to_owned(),
            pool_id: pool_id.to_owned(),
            region: region.to_owned(),
            secret_key: secret_key.to_owned(),
            cache_file: cache_file.into(),
            agent: agent_with_timeout(),
        }
    }

    /// Build from `POOL_ID`, `POOL_REGION`, `SCW_SECRET_KEY` and the optional
    /// `SCW_API_URL` override (falling back to `default_api_url`).
    pub fn from_env(default_api_url: &str, cache_file: impl Into<PathBuf>) -> Result<Self, RemoteError> {
        let required = |name: &str| -> Result<String, RemoteError> {
            match std::env::var(name) {
                Ok(v) if !v.is_empty() => Ok(v),
                _ => Err(RemoteError::Config(format!(
                    "{name} must be set for external node registration"
                ))),
            }
        };
        let pool_id = required("POOL_ID")?;
        let region = required("POOL_REGION")?;
        let secret_key = required("SCW_SECRET_KEY")?;
        let api_url = std::env::var("SCW_API_URL")
            .ok()
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| default_api_url.to_owned());
        Ok(Self::new(&api_url, &pool_id, &region, &secret_key, cache_file))
    }

    pub fn cache_file(&self) -> &Path {
        &self.cache_file
    }

    fn auth_url(&self) -> String {
        format!(
            "{}/k8s/v1/regions/{}/pools/{}/external-nodes/auth",
            self.api_url, self.region, self.pool_id
        )
    }

    fn read_cache(&self) -> Result<Option<UserData>, RemoteError> {
        match fs::read(&self.cache_file) {
            Ok(content) => Ok(Some(UserData::from_json(&content)?)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(RemoteError::Io(e)),
        }
    }

    fn write_cache(&self, body: &[u8]) -> Result<(), RemoteError> {
        if let Some(parent) = self.cache_file.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let mut file = fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(CACHE_FILE_MODE)
            .open(&self.cache_file)?;
        file.write_all(body)?;
        file.sync_all()?;
        Ok(())
    }

    fn register(&self) -> Result<Vec<u8>, RemoteError> {
        let url = self.auth_url();
        tracing::info!("registering external node: POST {url}");
        let resp = match self
            .agent
            .post(&url)
            .header(AUTH_TOKEN_HEADER, &self.secret_key)
            .send_empty()
        {
            Ok(r) => r,
            Err(ureq::Error::StatusCode(code)) => {
                return Err(RemoteError::Http(format!("registration failed: HTTP {code}")));
            }
            Err(e) => return Err(RemoteError::Http(format!("registration failed: {e}"))),
        };
        let mut body = Vec::new();
        resp.into_body()
            .into_reader()
            .read_to_end(&mut body)
            .map_err(|e| RemoteError::Http(e.to_string()))?;
        Ok(body)
    }
}

impl CredentialProvider for RegistrationProvider {
    fn user_data(&self) -> Result<UserData, RemoteError> {
        if let Some(cached) = self.read_cache()? {
            tracing::debug!(
                "node already registered, using {}",
                self.cache_file.display()
            );
            return Ok(cached);
        }
        let body = self.register()?;
        let data = UserData::from_json(&body)?;
        self.write_cache(&body)?;
        Ok(data)
    }
}
