use crate::concurrency::ShutdownSignal;
use crate::CoreError;
use nodeagent_remote::{RepositoryOpener, RepositoryReader};
use nodeagent_runtime::{Action, ApplyRequest, ResourceApplier};
use nodeagent_schema::{
    expand_version, parse_recipe, parse_release_manifest, Component, NodeMetadata, Recipe,
};
use nodeagent_store::VersionStore;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Release manifest at the repository root.
pub const RELEASES_FILE: &str = "releases.yaml";
/// Per-component recipe, relative to the component directory.
pub const RECIPE_FILE: &str = "metadata.yaml";

/// What one convergence run changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConvergeReport {
    /// `(component, previously installed version)` in uninstall order.
    pub uninstalled: Vec<(String, String)>,
    /// `(component, installed version)` in install order.
    pub installed: Vec<(String, String)>,
    /// Components already at their target version.
    pub unchanged: Vec<String>,
}

impl ConvergeReport {
    pub fn is_noop(&self) -> bool {
        self.uninstalled.is_empty() && self.installed.is_empty()
    }
}

/// Component Lifecycle Engine.
///
/// A run resolves the target component list for the node's cluster version,
/// walks it in reverse to uninstall components whose recorded version differs
/// from the target, then walks it forward to install the targets. The version
/// store is written once per installed component, after all of its install
/// groups succeed; uninstall never writes it. Shutdown is checked between
/// components only.
pub struct Engine {
    versions: Arc<dyn VersionStore>,
    applier: Arc<dyn ResourceApplier>,
    opener: Arc<dyn RepositoryOpener>,
    shutdown: ShutdownSignal,
}

impl Engine {
    pub fn new(
        versions: Arc<dyn VersionStore>,
        applier: Arc<dyn ResourceApplier>,
        opener: Arc<dyn RepositoryOpener>,
        shutdown: ShutdownSignal,
    ) -> Self {
        Self {
            versions,
            applier,
            opener,
            shutdown,
        }
    }

    pub fn versions(&self) -> &dyn VersionStore {
        self.versions.as_ref()
    }

    /// Open the node's repository, converge, and release the repository on
    /// success. A failed run keeps the repository (e.g. a bundled archive)
    /// for the next attempt.
    pub fn converge(&self, metadata: &NodeMetadata) -> Result<ConvergeReport, CoreError> {
        info!("opening repositories {}", metadata.repo_uri);
        let repo = self.opener.open(&metadata.repo_uri)?;
        let report = self.converge_with(repo.as_ref(), metadata)?;
        repo.cleanup()?;
        Ok(report)
    }

    /// Converge against an already opened repository. Does not clean it up.
    pub fn converge_with(
        &self,
        repo: &dyn RepositoryReader,
        metadata: &NodeMetadata,
    ) -> Result<ConvergeReport, CoreError> {
        let components = self.resolve(repo, metadata)?;
        info!(
            cluster_version = %metadata.pool_version,
            components = components.len(),
            "resolved release from {}",
            repo.location()
        );

        let mut report = ConvergeReport::default();
        self.uninstall_pass(repo, metadata, &components, &mut report)?;
        self.install_pass(repo, metadata, &components, &mut report)?;
        info!(
            uninstalled = report.uninstalled.len(),
            installed = report.installed.len(),
            unchanged = report.unchanged.len(),
            "components converged"
        );
        Ok(report)
    }

    /// Target component list for the node: the release entry for its cluster
    /// version, filtered by its installer tags.
    pub fn resolve(
        &self,
        repo: &dyn RepositoryReader,
        metadata: &NodeMetadata,
    ) -> Result<Vec<Component>, CoreError> {
        let manifest = parse_release_manifest(&repo.read_file(RELEASES_FILE)?)?;
        Ok(manifest.resolve(&metadata.pool_version, &metadata.installer_tags)?)
    }

    fn load_recipe(repo: &dyn RepositoryReader, component: &str) -> Result<Recipe, CoreError> {
        let raw = repo.read_file(&format!("{component}/{RECIPE_FILE}"))?;
        Ok(parse_recipe(component, &raw)?)
    }

    fn check_cancelled(&self, component: &str) -> Result<(), CoreError> {
        if self.shutdown.is_requested() {
            warn!(component, "shutdown requested, stopping convergence");
            return Err(CoreError::Cancelled(component.to_owned()));
        }
        Ok(())
    }

    fn uninstall_pass(
        &self,
        repo: &dyn RepositoryReader,
        metadata: &NodeMetadata,
        components: &[Component],
        report: &mut ConvergeReport,
    ) -> Result<(), CoreError> {
        for component in components.iter().rev() {
            let name = component.name.as_str();
            self.check_cancelled(name)?;

            let target = expand_version(&component.version, &metadata.pool_version);
            let installed = match self.versions.get(name)? {
                None => continue,
                Some(v) if v == target => continue,
                Some(v) => v,
            };

            let recipe = Self::load_recipe(repo, name)?;
            let block = recipe.block(name, &installed)?;
            info!(component = name, version = %installed, "uninstalling component");
            let req = ApplyRequest {
                component: name,
                version: &installed,
                metadata,
                action: Action::Uninstall,
            };
            self.applier
                .apply_groups(repo, &req, &block.uninstall)
                .map_err(|source| CoreError::Apply {
                    component: name.to_owned(),
                    version: installed.clone(),
                    action: Action::Uninstall,
                    source,
                })?;
            report.uninstalled.push((name.to_owned(), installed));
        }
        Ok(())
    }

    fn install_pass(
        &self,
        repo: &dyn RepositoryReader,
        metadata: &NodeMetadata,
        components: &[Component],
        report: &mut ConvergeReport,
    ) -> Result<(), CoreError> {
        for component in components {
            let name = component.name.as_str();
            self.check_cancelled(name)?;

            let target = expand_version(&component.version, &metadata.pool_version);
            let installed = self.versions.get(name)?;
            if installed.as_deref() == Some(target.as_str()) {
                debug!(component = name, version = %target, "component already installed");
                report.unchanged.push(name.to_owned());
                continue;
            }

            let recipe = Self::load_recipe(repo, name)?;
            let block = recipe.block(name, &target)?;
            info!(component = name, version = %target, "installing component");
            let req = ApplyRequest {
                component: name,
                version: &target,
                metadata,
                action: Action::Install,
            };
            if let Err(source) = self.applier.apply_groups(repo, &req, &block.install) {
                if let Some(previous) = installed {
                    warn!(
                        component = name,
                        recorded = %previous,
                        "install failed after uninstall; recorded version is stale until the next successful run"
                    );
                }
                return Err(CoreError::Apply {
                    component: name.to_owned(),
                    version: target,
                    action: Action::Install,
                    source,
                });
            }
            self.versions.set(name, &target)?;
            report.installed.push((name.to_owned(), target));
        }
        Ok(())
    }
}
