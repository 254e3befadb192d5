//! Sub-versioned version strings.
//!
//! A version is either a plain version (`1.2.3`) or a base version followed by
//! a sub-version (`1.30~2`). Sub-versions of one base share a recipe block.

pub const SUB_VERSION_SEPARATOR: char = '~';

/// Expand a requested component version against the cluster's base version.
///
/// An empty request means the base version itself; a request starting with
/// `~` pins a sub-version of the base version; anything else is taken as is.
pub fn expand_version(requested: &str, default: &str) -> String {
    if requested.is_empty() {
        default.to_owned()
    } else if requested.starts_with(SUB_VERSION_SEPARATOR) {
        format!("{default}{requested}")
    } else {
        requested.to_owned()
    }
}

/// Strip the sub-version suffix, keeping everything before the first `~`.
pub fn trim_version(version: &str) -> &str {
    version
        .split(SUB_VERSION_SEPARATOR)
        .next()
        .unwrap_or(version)
}
