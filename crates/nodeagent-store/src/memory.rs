use crate::{StoreError, VersionStore};
use std::collections::BTreeMap;
use std::sync::Mutex;

/// In-memory version store with the same merge semantics as the file store.
#[derive(Debug, Default)]
pub struct MemoryVersionStore {
    versions: Mutex<BTreeMap<String, String>>,
}

impl MemoryVersionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_versions<I, K, V>(versions: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            versions: Mutex::new(
                versions
                    .into_iter()
                    .map(|(k, v)| (k.into(), v.into()))
                    .collect(),
            ),
        }
    }
}

impl VersionStore for MemoryVersionStore {
    fn get(&self, component: &str) -> Result<Option<String>, StoreError> {
        let versions = self.versions.lock().map_err(|_| StoreError::Poisoned)?;
        Ok(versions.get(component).cloned())
    }

    fn set(&self, component: &str, version: &str) -> Result<(), StoreError> {
        let mut versions = self.versions.lock().map_err(|_| StoreError::Poisoned)?;
        versions.insert(component.to_owned(), version.to_owned());
        Ok(())
    }

    fn list(&self) -> Result<BTreeMap<String, String>, StoreError> {
        let versions = self.versions.lock().map_err(|_| StoreError::Poisoned)?;
        Ok(versions.clone())
    }
}
