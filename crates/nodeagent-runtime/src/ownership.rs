use crate::RuntimeError;
use std::fs;
use std::path::Path;

pub const PASSWD_FILE: &str = "/etc/passwd";
pub const GROUP_FILE: &str = "/etc/group";

/// Safe wrapper around libc::geteuid().
#[allow(unsafe_code)]
pub fn effective_uid() -> u32 {
    // SAFETY: geteuid() takes no arguments and cannot fail.
    unsafe { libc::geteuid() }
}

/// Look `name` up in a colon-separated account database (`/etc/passwd` or
/// `/etc/group`), returning the id in the third field. Numeric names are
/// taken as ids directly.
pub fn lookup_id(db: &Path, name: &str) -> Result<u32, RuntimeError> {
    if let Ok(id) = name.parse::<u32>() {
        return Ok(id);
    }
    let content = fs::read_to_string(db).map_err(|e| {
        RuntimeError::Ownership(format!("cannot read {}: {e}", db.display()))
    })?;
    for line in content.lines() {
        let mut fields = line.split(':');
        if fields.next() != Some(name) {
            continue;
        }
        let id = fields.nth(1).unwrap_or_default();
        return id.parse().map_err(|_| {
            RuntimeError::Ownership(format!(
                "invalid id '{id}' for '{name}' in {}",
                db.display()
            ))
        });
    }
    Err(RuntimeError::Ownership(format!(
        "'{name}' not found in {}",
        db.display()
    )))
}

/// Account databases used to resolve owner and group names.
#[derive(Debug, Clone)]
pub struct Accounts {
    passwd: std::path::PathBuf,
    group: std::path::PathBuf,
}

impl Default for Accounts {
    fn default() -> Self {
        Self {
            passwd: PASSWD_FILE.into(),
            group: GROUP_FILE.into(),
        }
    }
}

impl Accounts {
    pub fn new(passwd: impl Into<std::path::PathBuf>, group: impl Into<std::path::PathBuf>) -> Self {
        Self {
            passwd: passwd.into(),
            group: group.into(),
        }
    }

    /// Change ownership of `path`. An empty owner or group leaves that side
    /// unchanged.
    pub fn chown(&self, path: &Path, owner: &str, group: &str) -> Result<(), RuntimeError> {
        let uid = match owner {
            "" => None,
            name => Some(lookup_id(&self.passwd, name)?),
        };
        let gid = match group {
            "" => None,
            name => Some(lookup_id(&self.group, name)?),
        };
        if uid.is_none() && gid.is_none() {
            return Ok(());
        }
        std::os::unix::fs::chown(path, uid, gid).map_err(|source| RuntimeError::File {
            op: "chown",
            path: path.display().to_string(),
            source,
        })
    }
}
