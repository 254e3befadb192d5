//! Typed documents consumed by the nodeagent.
//!
//! This crate defines the schema layer: the per-cluster-version release
//! manifest (`ReleaseManifest`) and its tag-filtered resolution, the
//! per-component recipe (`Recipe`) with its install/uninstall resource groups,
//! the node metadata and user-data documents served by the provider, and the
//! sub-version helpers (`expand_version`, `trim_version`).

pub mod metadata;
pub mod recipe;
pub mod release;
pub mod types;
pub mod version;

pub use metadata::{NodeMetadata, NodeTaint, UserData};
pub use recipe::{
    parse_recipe, FileMode, FileOp, FileSpec, Recipe, RecipeBlock, ResourceGroup, ScriptOp,
    ServiceOp, ServiceState,
};
pub use release::{parse_release_manifest, Component, ReleaseManifest};
pub use types::ComponentName;
pub use version::{expand_version, trim_version, SUB_VERSION_SEPARATOR};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("failed to parse {document}: {source}")]
    Parse {
        document: String,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("failed to parse {document}: {source}")]
    ParseJson {
        document: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("release {0} not found")]
    ReleaseNotFound(String),
    #[error("duplicate component '{component}' in release {release}")]
    DuplicateComponent { release: String, component: String },
    #[error("component {component} version {version} not found")]
    RecipeVersionNotFound { component: String, version: String },
    #[error("invalid file mode '{0}': expected an octal string such as \"0644\"")]
    InvalidMode(String),
}

impl SchemaError {
    /// Whether this error means a requested release or recipe version is
    /// absent, as opposed to a malformed document.
    pub fn is_lookup(&self) -> bool {
        matches!(
            self,
            SchemaError::ReleaseNotFound(_) | SchemaError::RecipeVersionNotFound { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_error_display_release_not_found() {
        let e = SchemaError::ReleaseNotFound("1.31".to_owned());
        assert_eq!(e.to_string(), "release 1.31 not found");
        assert!(e.is_lookup());
    }

    #[test]
    fn schema_error_display_recipe_version_not_found() {
        let e = SchemaError::RecipeVersionNotFound {
            component: "kubelet".to_owned(),
            version: "1.30".to_owned(),
        };
        let msg = e.to_string();
        assert!(msg.contains("kubelet"));
        assert!(msg.contains("1.30"));
        assert!(e.is_lookup());
    }

    #[test]
    fn schema_error_invalid_mode_is_not_lookup() {
        assert!(!SchemaError::InvalidMode("rwx".to_owned()).is_lookup());
    }
}
