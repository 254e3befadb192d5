//! Host-side resource application for the nodeagent.
//!
//! This crate implements the `ResourceApplier` contract: one call applies one
//! resource group (files, then services, then scripts) for a component. The
//! `HostApplier` touches the real filesystem, drives systemd through a
//! `ServiceManager`, and runs scripts through a shell. `MockApplier` records
//! calls for engine tests. Templates are Jinja documents rendered against a
//! `TemplateContext` holding the version, architecture, and node metadata.

pub mod host;
pub mod mock;
pub mod ownership;
pub mod service;
pub mod template;

pub use host::{HostApplier, DEFAULT_SHELL};
pub use mock::{AppliedGroup, MockApplier};
pub use ownership::{effective_uid, Accounts};
pub use service::{ServiceManager, Systemctl, DEFAULT_SYSTEMCTL};
pub use template::{go_arch, TemplateContext};

use nodeagent_remote::{RemoteError, RepositoryReader};
use nodeagent_schema::{NodeMetadata, ResourceGroup};
use std::fmt;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("runtime I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("repository error: {0}")]
    Repository(#[from] RemoteError),
    #[error("template error: {0}")]
    Template(String),
    #[error("ownership lookup failed: {0}")]
    Ownership(String),
    #[error("unit {0} not found")]
    UnitNotFound(String),
    #[error("systemctl {action} {unit} failed: {detail}")]
    Service {
        action: String,
        unit: String,
        detail: String,
    },
    #[error("script '{cmd}' failed: {detail}")]
    Script { cmd: String, detail: String },
    #[error("{op} {path} failed: {source}")]
    File {
        op: &'static str,
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("runtime execution failed: {0}")]
    ExecFailed(String),
}

/// Which side of a recipe block is being applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Install,
    Uninstall,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::Install => write!(f, "install"),
            Action::Uninstall => write!(f, "uninstall"),
        }
    }
}

/// Everything an applier needs to know about the component being converged.
///
/// `version` is the full version string (sub-version included); templates see
/// it trimmed.
#[derive(Debug, Clone, Copy)]
pub struct ApplyRequest<'a> {
    pub component: &'a str,
    pub version: &'a str,
    pub metadata: &'a NodeMetadata,
    pub action: Action,
}

pub trait ResourceApplier: Send + Sync {
    /// Apply one resource group: files, then services, then scripts. The first
    /// failure aborts the group.
    fn apply_group(
        &self,
        repo: &dyn RepositoryReader,
        req: &ApplyRequest<'_>,
        group: &ResourceGroup,
    ) -> Result<(), RuntimeError>;

    /// Apply `groups` in order, stopping at the first failing group.
    fn apply_groups(
        &self,
        repo: &dyn RepositoryReader,
        req: &ApplyRequest<'_>,
        groups: &[ResourceGroup],
    ) -> Result<(), RuntimeError> {
        for group in groups {
            self.apply_group(repo, req, group)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn action_display() {
        assert_eq!(Action::Install.to_string(), "install");
        assert_eq!(Action::Uninstall.to_string(), "uninstall");
    }

    #[test]
    fn runtime_error_display_service() {
        let e = RuntimeError::Service {
            action: "start".to_owned(),
            unit: "kubelet".to_owned(),
            detail: "exit status 1".to_owned(),
        };
        assert_eq!(e.to_string(), "systemctl start kubelet failed: exit status 1");
    }
}
