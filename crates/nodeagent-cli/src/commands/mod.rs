pub mod converge;
pub mod run;
pub mod versions;

use nodeagent_controller::ControllerError;
use nodeagent_core::{AgentConfig, ConvergeReport, CoreError, Engine, ShutdownSignal};
use nodeagent_remote::{
    CredentialProvider, HttpMetadataFetcher, MetadataFetcher, RemoteError, UriRepositoryOpener,
};
use nodeagent_runtime::HostApplier;
use nodeagent_schema::NodeMetadata;
use nodeagent_store::{FileVersionStore, StoreError};
use std::fmt;
use std::sync::Arc;

pub const EXIT_SUCCESS: u8 = 0;
pub const EXIT_FAILURE: u8 = 1;
pub const EXIT_CONFIG_ERROR: u8 = 2;
pub const EXIT_LOOKUP_ERROR: u8 = 3;
pub const EXIT_NOT_ROOT: u8 = 4;

/// Version reported on the node and by `--version`.
pub const AGENT_VERSION: &str = env!("CARGO_PKG_VERSION");

/// A failed command: the message for stderr and the process exit code.
#[derive(Debug)]
pub struct Failure {
    pub code: u8,
    pub message: String,
}

impl Failure {
    pub fn new(code: u8, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// Prefix the message, keeping the exit code.
    pub fn context(self, what: &str) -> Self {
        Self {
            code: self.code,
            message: format!("{what}: {}", self.message),
        }
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl From<CoreError> for Failure {
    fn from(e: CoreError) -> Self {
        let code = if e.is_config() {
            EXIT_CONFIG_ERROR
        } else if e.is_lookup() {
            EXIT_LOOKUP_ERROR
        } else {
            EXIT_FAILURE
        };
        Self::new(code, e.to_string())
    }
}

impl From<RemoteError> for Failure {
    fn from(e: RemoteError) -> Self {
        let code = if e.is_config() {
            EXIT_CONFIG_ERROR
        } else {
            EXIT_FAILURE
        };
        Self::new(code, e.to_string())
    }
}

impl From<StoreError> for Failure {
    fn from(e: StoreError) -> Self {
        Self::new(EXIT_FAILURE, format!("store error: {e}"))
    }
}

impl From<ControllerError> for Failure {
    fn from(e: ControllerError) -> Self {
        match e {
            ControllerError::Core(e) => e.into(),
            ControllerError::Remote(e) => e.into(),
            other @ ControllerError::Config(_) => Self::new(EXIT_CONFIG_ERROR, other.to_string()),
            other => Self::new(EXIT_FAILURE, other.to_string()),
        }
    }
}

pub fn json_pretty(value: &impl serde::Serialize) -> Result<String, Failure> {
    serde_json::to_string_pretty(value)
        .map_err(|e| Failure::new(EXIT_FAILURE, format!("JSON serialization failed: {e}")))
}

/// Everything a convergence run needs, wired from the configuration.
pub struct Agent {
    pub credentials: Arc<dyn CredentialProvider>,
    pub fetcher: Arc<dyn MetadataFetcher>,
    pub engine: Arc<Engine>,
}

impl Agent {
    pub fn from_config(config: &AgentConfig, shutdown: &ShutdownSignal) -> Result<Self, Failure> {
        let credentials: Arc<dyn CredentialProvider> = Arc::from(config.credential_provider()?);
        let engine = Engine::new(
            Arc::new(FileVersionStore::new(&config.versions_file)),
            Arc::new(HostApplier::new(
                &config.runtime.shell,
                &config.runtime.systemctl,
            )),
            Arc::new(UriRepositoryOpener),
            shutdown.clone(),
        );
        Ok(Self {
            credentials,
            fetcher: Arc::new(HttpMetadataFetcher::new()),
            engine: Arc::new(engine),
        })
    }

    /// Fetch credentials, then the node metadata they unlock.
    pub fn node_metadata(&self) -> Result<NodeMetadata, Failure> {
        let user_data = self
            .credentials
            .user_data()
            .map_err(|e| Failure::from(e).context("failed to get credentials"))?;
        self.fetcher
            .fetch(&user_data)
            .map_err(|e| Failure::from(e).context("failed to get node metadata"))
    }
}

pub fn log_report(report: &ConvergeReport) {
    for (component, version) in &report.uninstalled {
        tracing::info!("uninstalled {component} {version}");
    }
    for (component, version) in &report.installed {
        tracing::info!("installed {component} {version}");
    }
    if report.is_noop() {
        tracing::info!("all {} components up to date", report.unchanged.len());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn core_errors_map_to_exit_codes() {
        let config = Failure::from(CoreError::Config("bad".to_owned()));
        assert_eq!(config.code, EXIT_CONFIG_ERROR);

        let lookup = nodeagent_schema::parse_release_manifest(b"\"1.30\": []\n")
            .unwrap()
            .resolve("1.99", &[])
            .unwrap_err();
        assert_eq!(Failure::from(CoreError::from(lookup)).code, EXIT_LOOKUP_ERROR);

        let other = Failure::from(CoreError::Cancelled("shutdown".to_owned()));
        assert_eq!(other.code, EXIT_FAILURE);
    }

    #[test]
    fn remote_config_errors_are_config_failures() {
        let e = RemoteError::Config("POOL_ID is not set".to_owned());
        assert_eq!(Failure::from(e).code, EXIT_CONFIG_ERROR);
        let e = RemoteError::Http("timeout".to_owned());
        assert_eq!(Failure::from(e).code, EXIT_FAILURE);
    }

    #[test]
    fn controller_errors_unwrap_core_codes() {
        let e = ControllerError::Core(CoreError::Config("x".to_owned()));
        assert_eq!(Failure::from(e).code, EXIT_CONFIG_ERROR);
        let e = ControllerError::Config("bad CA".to_owned());
        assert_eq!(Failure::from(e).code, EXIT_CONFIG_ERROR);
        let e = ControllerError::NotFound("node-1".to_owned());
        assert_eq!(Failure::from(e).code, EXIT_FAILURE);
    }

    #[test]
    fn context_keeps_code() {
        let f = Failure::new(EXIT_CONFIG_ERROR, "POOL_ID is not set")
            .context("failed to get credentials");
        assert_eq!(f.code, EXIT_CONFIG_ERROR);
        assert_eq!(f.to_string(), "failed to get credentials: POOL_ID is not set");
    }
}
