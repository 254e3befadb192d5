use crate::CoreError;
use nodeagent_remote::{
    CredentialProvider, RegistrationProvider, UserDataProvider, DEFAULT_API_URL,
    DEFAULT_USER_DATA_CACHE, DEFAULT_USER_DATA_URL,
};
use nodeagent_runtime::{DEFAULT_SHELL, DEFAULT_SYSTEMCTL};
use nodeagent_store::DEFAULT_VERSIONS_FILE;
use serde::{Deserialize, Serialize};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_CONFIG_FILE: &str = "/etc/nodeagent/config.toml";
pub const DEFAULT_LOCK_FILE: &str = "/run/nodeagent.lock";

/// Agent configuration, read from a TOML file. Every key is optional.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AgentConfig {
    pub versions_file: PathBuf,
    pub lock_file: PathBuf,
    pub credentials: CredentialsConfig,
    pub controller: ControllerConfig,
    pub runtime: RuntimeConfig,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            versions_file: DEFAULT_VERSIONS_FILE.into(),
            lock_file: DEFAULT_LOCK_FILE.into(),
            credentials: CredentialsConfig::default(),
            controller: ControllerConfig::default(),
            runtime: RuntimeConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CredentialMode {
    /// Instance user-data endpoint (managed instances).
    #[default]
    UserData,
    /// External-node registration against the provider API.
    Registration,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CredentialsConfig {
    pub mode: CredentialMode,
    pub user_data_url: String,
    pub api_url: String,
    pub cache_file: PathBuf,
}

impl Default for CredentialsConfig {
    fn default() -> Self {
        Self {
            mode: CredentialMode::default(),
            user_data_url: DEFAULT_USER_DATA_URL.to_owned(),
            api_url: DEFAULT_API_URL.to_owned(),
            cache_file: DEFAULT_USER_DATA_CACHE.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ControllerConfig {
    pub annotation_prefix: String,
    pub upgrade_annotation: String,
    pub upgrade_value: String,
    pub agent_component: String,
    pub resync_secs: u64,
    pub base_delay_ms: u64,
    pub max_delay_secs: u64,
    pub qps: u32,
    pub burst: u32,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            annotation_prefix: "k8s.scaleway.com/component-".to_owned(),
            upgrade_annotation: "k8s.scaleway.com/agent".to_owned(),
            upgrade_value: "upgrade".to_owned(),
            agent_component: "agent".to_owned(),
            resync_secs: 60,
            base_delay_ms: 5,
            max_delay_secs: 1000,
            qps: 50,
            burst: 300,
        }
    }
}

impl ControllerConfig {
    pub fn resync(&self) -> Duration {
        Duration::from_secs(self.resync_secs)
    }

    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_secs(self.max_delay_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RuntimeConfig {
    pub shell: PathBuf,
    pub systemctl: PathBuf,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            shell: DEFAULT_SHELL.into(),
            systemctl: DEFAULT_SYSTEMCTL.into(),
        }
    }
}

impl AgentConfig {
    pub fn parse(content: &str) -> Result<Self, CoreError> {
        let config: Self =
            toml::from_str(content).map_err(|e| CoreError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load `path`; a missing file yields the defaults.
    pub fn load_or_default(path: &Path) -> Result<Self, CoreError> {
        match std::fs::read_to_string(path) {
            Ok(content) => Self::parse(&content)
                .map_err(|e| CoreError::Config(format!("{}: {e}", path.display()))),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                tracing::debug!("no config at {}, using defaults", path.display());
                Ok(Self::default())
            }
            Err(e) => Err(CoreError::Io(e)),
        }
    }

    fn validate(&self) -> Result<(), CoreError> {
        let c = &self.controller;
        if c.resync_secs == 0 {
            return Err(CoreError::Config("controller.resync_secs must be positive".to_owned()));
        }
        if c.qps == 0 || c.burst == 0 {
            return Err(CoreError::Config(
                "controller.qps and controller.burst must be positive".to_owned(),
            ));
        }
        if c.upgrade_annotation.is_empty() || c.annotation_prefix.is_empty() {
            return Err(CoreError::Config("controller annotation keys must not be empty".to_owned()));
        }
        Ok(())
    }

    /// Credential source selected by `credentials.mode`.
    pub fn credential_provider(&self) -> Result<Box<dyn CredentialProvider>, CoreError> {
        let creds = &self.credentials;
        match creds.mode {
            CredentialMode::UserData => Ok(Box::new(UserDataProvider::new(&creds.user_data_url))),
            CredentialMode::Registration => Ok(Box::new(RegistrationProvider::from_env(
                &creds.api_url,
                &creds.cache_file,
            )?)),
        }
    }
}
