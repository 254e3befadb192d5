//! Core orchestration for the nodeagent.
//!
//! This crate ties together the schema, version store, repository readers, and
//! resource appliers into the `Engine`: it resolves the release for the node's
//! cluster version and converges installed components with an ordered
//! uninstall pass followed by an install pass. It also provides the agent
//! configuration file, the process-wide lock, and the cooperative shutdown
//! signal shared with the controller.

pub mod concurrency;
pub mod config;
pub mod engine;

pub use concurrency::{install_signal_handler, AgentLock, ShutdownSignal};
pub use config::{
    AgentConfig, ControllerConfig, CredentialMode, CredentialsConfig, RuntimeConfig,
    DEFAULT_CONFIG_FILE, DEFAULT_LOCK_FILE,
};
pub use engine::{ConvergeReport, Engine, RECIPE_FILE, RELEASES_FILE};

use nodeagent_runtime::Action;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("document error: {0}")]
    Schema(#[from] nodeagent_schema::SchemaError),
    #[error("store error: {0}")]
    Store(#[from] nodeagent_store::StoreError),
    #[error("remote error: {0}")]
    Remote(#[from] nodeagent_remote::RemoteError),
    #[error("runtime error: {0}")]
    Runtime(#[from] nodeagent_runtime::RuntimeError),
    #[error("failed to {action} component {component} {version}: {source}")]
    Apply {
        component: String,
        version: String,
        action: Action,
        #[source]
        source: nodeagent_runtime::RuntimeError,
    },
    #[error("cancelled before component {0}")]
    Cancelled(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("configuration error: {0}")]
    Config(String),
    #[error("another nodeagent holds {0}")]
    Locked(String),
}

impl CoreError {
    /// Release or recipe version missing from the repository.
    pub fn is_lookup(&self) -> bool {
        matches!(self, CoreError::Schema(e) if e.is_lookup())
    }

    /// Bad configuration file, repository location, or environment.
    pub fn is_config(&self) -> bool {
        match self {
            CoreError::Config(_) => true,
            CoreError::Remote(e) => e.is_config(),
            _ => false,
        }
    }
}
