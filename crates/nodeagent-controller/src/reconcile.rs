use crate::cluster::Node;
use std::collections::BTreeMap;

/// Whether the node carries the upgrade trigger `key` set to exactly `value`.
pub fn upgrade_requested(node: &Node, key: &str, value: &str) -> bool {
    node.annotation(key) == Some(value)
}

/// Compute the annotations that report `versions` on the node.
///
/// Each component gets `<prefix><component> = <version>`. Prefixed keys of
/// components no longer in `versions` are removed; annotations outside the
/// prefix are left alone. Returns `None` when the result equals `current`, so
/// callers can skip the update.
pub fn reconcile_version_annotations(
    current: &BTreeMap<String, String>,
    versions: &BTreeMap<String, String>,
    prefix: &str,
) -> Option<BTreeMap<String, String>> {
    let mut desired: BTreeMap<String, String> = current
        .iter()
        .filter(|(key, _)| !key.starts_with(prefix))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    for (component, version) in versions {
        desired.insert(format!("{prefix}{component}"), version.clone());
    }

    if desired == *current {
        None
    } else {
        Some(desired)
    }
}
