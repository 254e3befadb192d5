use crate::{RemoteError, RepositoryReader};
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};

/// Component repository laid out in a local directory.
#[derive(Debug, Clone)]
pub struct DirectoryRepository {
    root: PathBuf,
}

impl DirectoryRepository {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

/// Normalize a repository-relative path, rejecting absolute paths and any
/// `..` component.
pub(crate) fn normalize_path(path: &str) -> Result<String, RemoteError> {
    let mut parts = Vec::new();
    for component in Path::new(path).components() {
        match component {
            Component::Normal(part) => parts.push(part.to_string_lossy().into_owned()),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(RemoteError::InvalidPath(path.to_owned()));
            }
        }
    }
    if parts.is_empty() {
        return Err(RemoteError::InvalidPath(path.to_owned()));
    }
    Ok(parts.join("/"))
}

impl RepositoryReader for DirectoryRepository {
    fn location(&self) -> String {
        format!("file://{}", self.root.display())
    }

    fn read_file(&self, path: &str) -> Result<Vec<u8>, RemoteError> {
        let full = self.root.join(normalize_path(path)?);
        match std::fs::read(&full) {
            Ok(data) => Ok(data),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                Err(RemoteError::NotFound(full.display().to_string()))
            }
            Err(e) => Err(RemoteError::Io(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_rejects_escapes() {
        assert!(normalize_path("../etc/passwd").is_err());
        assert!(normalize_path("/etc/passwd").is_err());
        assert!(normalize_path("cni/../../x").is_err());
        assert!(normalize_path("").is_err());
        assert_eq!(normalize_path("./cni/metadata.yaml").unwrap(), "cni/metadata.yaml");
    }

    #[test]
    fn reads_nested_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("cni")).unwrap();
        std::fs::write(dir.path().join("cni/metadata.yaml"), "x: 1").unwrap();
        let repo = DirectoryRepository::new(dir.path());
        assert_eq!(repo.read_file("cni/metadata.yaml").unwrap(), b"x: 1");
        assert!(repo.location().starts_with("file://"));
    }

    #[test]
    fn missing_file_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let repo = DirectoryRepository::new(dir.path());
        assert!(matches!(
            repo.read_file("releases.yaml"),
            Err(RemoteError::NotFound(_))
        ));
    }
}
