use crate::directory::normalize_path;
use crate::{RemoteError, RepositoryReader};
use std::collections::BTreeMap;
use std::fmt;
use std::fs::File;
use std::io::{ErrorKind, Read};
use std::path::{Path, PathBuf};

/// Container format of a bundled repository, named by its URI scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveFormat {
    Zip,
    Tar,
}

impl ArchiveFormat {
    pub fn scheme(self) -> &'static str {
        match self {
            ArchiveFormat::Zip => "zip",
            ArchiveFormat::Tar => "tar",
        }
    }
}

impl fmt::Display for ArchiveFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.scheme())
    }
}

/// Component repository bundled as a local zip or tar archive.
///
/// Regular-file entries are indexed in memory when the archive is opened.
/// `cleanup` deletes the archive from disk; the bundle is single-use.
#[derive(Debug)]
pub struct ArchiveRepository {
    path: PathBuf,
    format: ArchiveFormat,
    files: BTreeMap<String, Vec<u8>>,
}

impl ArchiveRepository {
    pub fn open(format: ArchiveFormat, path: impl Into<PathBuf>) -> Result<Self, RemoteError> {
        let path = path.into();
        let file = File::open(&path)?;
        let files = match format {
            ArchiveFormat::Zip => index_zip(file)?,
            ArchiveFormat::Tar => index_tar(file)?,
        };
        tracing::debug!(
            "indexed {} files from {format} archive {}",
            files.len(),
            path.display()
        );
        Ok(Self {
            path,
            format,
            files,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn format(&self) -> ArchiveFormat {
        self.format
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

fn index_zip(file: File) -> Result<BTreeMap<String, Vec<u8>>, RemoteError> {
    let zip_err = |e: zip::result::ZipError| RemoteError::Archive(e.to_string());
    let mut archive = zip::ZipArchive::new(file).map_err(zip_err)?;
    let mut files = BTreeMap::new();
    for index in 0..archive.len() {
        let mut entry = archive.by_index(index).map_err(zip_err)?;
        if entry.is_dir() {
            continue;
        }
        let key = normalize_path(entry.name())?;
        let mut data = Vec::with_capacity(entry.size() as usize);
        entry.read_to_end(&mut data)?;
        files.insert(key, data);
    }
    Ok(files)
}

fn index_tar(file: File) -> Result<BTreeMap<String, Vec<u8>>, RemoteError> {
    let mut archive = tar::Archive::new(file);
    let mut files = BTreeMap::new();
    for entry in archive.entries()? {
        let mut entry = entry?;
        if !entry.header().entry_type().is_file() {
            continue;
        }
        let name = entry.path()?.to_string_lossy().into_owned();
        let key = normalize_path(&name)?;
        let mut data = Vec::with_capacity(entry.size() as usize);
        entry.read_to_end(&mut data)?;
        files.insert(key, data);
    }
    Ok(files)
}

impl RepositoryReader for ArchiveRepository {
    fn location(&self) -> String {
        format!("{}://{}", self.format, self.path.display())
    }

    fn read_file(&self, path: &str) -> Result<Vec<u8>, RemoteError> {
        let key = normalize_path(path)?;
        self.files.get(&key).cloned().ok_or_else(|| {
            RemoteError::NotFound(format!("{key} in {}", self.path.display()))
        })
    }

    fn cleanup(&self) -> Result<(), RemoteError> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => {
                tracing::info!("removed repository archive {}", self.path.display());
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(RemoteError::Io(e)),
        }
    }
}
