use crate::{ArchiveFormat, ArchiveRepository, DirectoryRepository, HttpRepository, RemoteError, RepositoryReader};

/// Chooses a repository backend from the node's repository location string.
pub trait RepositoryOpener: Send + Sync {
    fn open(&self, uris: &str) -> Result<Box<dyn RepositoryReader>, RemoteError>;
}

/// Default opener: scheme-based dispatch over a comma-separated URI list.
#[derive(Debug, Default, Clone, Copy)]
pub struct UriRepositoryOpener;

impl RepositoryOpener for UriRepositoryOpener {
    fn open(&self, uris: &str) -> Result<Box<dyn RepositoryReader>, RemoteError> {
        open_repository(uris)
    }
}

/// Open the first usable repository in `uris`.
///
/// `http://` and `https://` are accepted without probing. `zip://<path>`,
/// `tar://<path>` and `file://<dir>` fall through to the next URI when the
/// local path cannot be opened. Unknown schemes are skipped.
pub fn open_repository(uris: &str) -> Result<Box<dyn RepositoryReader>, RemoteError> {
    for uri in uris.split(',').map(str::trim).filter(|u| !u.is_empty()) {
        if uri.starts_with("http://") || uri.starts_with("https://") {
            tracing::info!("using repository {uri}");
            return Ok(Box::new(HttpRepository::new(uri)));
        }
        if let Some((format, path)) = archive_location(uri) {
            match ArchiveRepository::open(format, path) {
                Ok(repo) => {
                    tracing::info!("using repository {uri}");
                    return Ok(Box::new(repo));
                }
                Err(e) => {
                    tracing::info!("cannot open archive {uri}, trying next: {e}");
                    continue;
                }
            }
        }
        if let Some(path) = uri.strip_prefix("file://") {
            if std::path::Path::new(path).is_dir() {
                tracing::info!("using repository {uri}");
                return Ok(Box::new(DirectoryRepository::new(path)));
            }
            tracing::info!("repository directory {uri} missing, trying next");
            continue;
        }
        tracing::warn!("unsupported repository URI scheme: {uri}");
    }
    Err(RemoteError::NoRepository(uris.to_owned()))
}

fn archive_location(uri: &str) -> Option<(ArchiveFormat, &str)> {
    [ArchiveFormat::Zip, ArchiveFormat::Tar]
        .into_iter()
        .find_map(|format| {
            uri.strip_prefix(format.scheme())
                .and_then(|rest| rest.strip_prefix("://"))
                .map(|path| (format, path))
        })
}
