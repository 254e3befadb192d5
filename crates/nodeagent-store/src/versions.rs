use crate::{fsync_dir, StoreError, VersionStore};
use std::collections::BTreeMap;
use std::fs;
use std::io::{ErrorKind, Write};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

pub const DEFAULT_VERSIONS_FILE: &str = "/etc/nodeagent/versions.json";

const VERSIONS_FILE_MODE: u32 = 0o644;

/// Version store backed by a single JSON object file.
///
/// A missing file reads as an empty store; malformed content is an error.
/// Every `set` reads the whole file, merges the one change, and atomically
/// replaces the file. Not safe for concurrent writers across processes.
#[derive(Debug, Clone)]
pub struct FileVersionStore {
    path: PathBuf,
}

impl FileVersionStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    #[inline]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read(&self) -> Result<BTreeMap<String, String>, StoreError> {
        let content = match fs::read(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(BTreeMap::new()),
            Err(e) => return Err(StoreError::Io(e)),
        };
        serde_json::from_slice(&content).map_err(|source| StoreError::Corrupted {
            path: self.path.clone(),
            source,
        })
    }

    fn write(&self, versions: &BTreeMap<String, String>) -> Result<(), StoreError> {
        let content = serde_json::to_vec(versions)?;

        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&dir)?;
        let mut tmp = NamedTempFile::new_in(&dir)?;
        tmp.write_all(&content)?;
        tmp.as_file()
            .set_permissions(fs::Permissions::from_mode(VERSIONS_FILE_MODE))?;
        tmp.as_file().sync_all()?;
        tmp.persist(&self.path)
            .map_err(|e| StoreError::Io(e.error))?;
        fsync_dir(&dir)?;
        Ok(())
    }
}

impl VersionStore for FileVersionStore {
    fn get(&self, component: &str) -> Result<Option<String>, StoreError> {
        Ok(self.read()?.remove(component))
    }

    fn set(&self, component: &str, version: &str) -> Result<(), StoreError> {
        let mut versions = self.read()?;
        versions.insert(component.to_owned(), version.to_owned());
        self.write(&versions)?;
        tracing::debug!(
            component,
            version,
            path = %self.path.display(),
            "recorded component version"
        );
        Ok(())
    }

    fn list(&self) -> Result<BTreeMap<String, String>, StoreError> {
        self.read()
    }
}
