//! Installed-version bookkeeping for nodeagent.
//!
//! The `VersionStore` trait maps component names to the exact version string
//! installed on the node (sub-version suffix included). `FileVersionStore`
//! persists the mapping as one JSON object, rewritten atomically on every
//! change; `MemoryVersionStore` keeps it in memory for tests and dry runs.
//! An absent key always means "not installed".

pub mod memory;
pub mod versions;

pub use memory::MemoryVersionStore;
pub use versions::{FileVersionStore, DEFAULT_VERSIONS_FILE};

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Fsync a directory so that a preceding `rename()` into it is durable.
pub(crate) fn fsync_dir(dir: &Path) -> Result<(), std::io::Error> {
    let f = std::fs::File::open(dir)?;
    f.sync_all()
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("version store I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed version store {path}: {source}")]
    Corrupted {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("version store lock poisoned")]
    Poisoned,
}

/// Durable mapping of component name → installed version.
///
/// Implementations merge on `set`: writing one key never alters or drops
/// another. A single writer is assumed.
pub trait VersionStore: Send + Sync {
    /// Installed version of `component`, or `None` when it is not installed.
    fn get(&self, component: &str) -> Result<Option<String>, StoreError>;

    /// Record `version` as installed for `component`.
    fn set(&self, component: &str, version: &str) -> Result<(), StoreError>;

    /// Full mapping of installed components.
    fn list(&self) -> Result<BTreeMap<String, String>, StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_error_display_corrupted() {
        let source = serde_json::from_str::<BTreeMap<String, String>>("nope").unwrap_err();
        let e = StoreError::Corrupted {
            path: PathBuf::from("/etc/nodeagent/versions.json"),
            source,
        };
        assert!(e.to_string().contains("/etc/nodeagent/versions.json"));
    }

    #[test]
    fn store_error_display_poisoned() {
        assert!(StoreError::Poisoned.to_string().contains("poisoned"));
    }
}
