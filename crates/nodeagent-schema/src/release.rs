use crate::types::ComponentName;
use crate::SchemaError;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// A versioned unit of node software declared by a release.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct Component {
    pub name: ComponentName,
    /// Requested version. Empty means the cluster version, `~N` a sub-version
    /// of the cluster version; see [`crate::expand_version`].
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl Component {
    pub fn shares_tag(&self, filter: &[String]) -> bool {
        self.tags.iter().any(|tag| filter.contains(tag))
    }
}

/// Cluster version → ordered component list, read from `releases.yaml`.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(transparent)]
pub struct ReleaseManifest {
    pub releases: BTreeMap<String, Vec<Component>>,
}

impl ReleaseManifest {
    /// Components to converge to for `cluster_version`, in manifest order.
    ///
    /// With an empty `tags` filter every component is returned; otherwise
    /// only those sharing at least one tag with the filter.
    pub fn resolve(
        &self,
        cluster_version: &str,
        tags: &[String],
    ) -> Result<Vec<Component>, SchemaError> {
        let components = self
            .releases
            .get(cluster_version)
            .ok_or_else(|| SchemaError::ReleaseNotFound(cluster_version.to_owned()))?;

        if tags.is_empty() {
            return Ok(components.clone());
        }
        Ok(components
            .iter()
            .filter(|c| c.shares_tag(tags))
            .cloned()
            .collect())
    }

    fn validate(&self) -> Result<(), SchemaError> {
        for (release, components) in &self.releases {
            let mut seen = BTreeSet::new();
            for component in components {
                if !seen.insert(component.name.as_str()) {
                    return Err(SchemaError::DuplicateComponent {
                        release: release.clone(),
                        component: component.name.to_string(),
                    });
                }
            }
        }
        Ok(())
    }
}

pub fn parse_release_manifest(input: &[u8]) -> Result<ReleaseManifest, SchemaError> {
    let manifest: ReleaseManifest =
        serde_yaml::from_slice(input).map_err(|source| SchemaError::Parse {
            document: "release manifest".to_owned(),
            source,
        })?;
    manifest.validate()?;
    Ok(manifest)
}

#[cfg(test)]
mod tests {
    use super::*;

    const MANIFEST: &str = r#"
"1.30":
  - name: containerd
    version: 1.7.20
    tags: [runtime, gpu]
  - name: cni
    version: 1.2.0
    tags: [network]
  - name: kubelet
    version: "~2"
    tags: [runtime]
"1.31":
  - name: kubelet
"#;

    fn names(components: &[Component]) -> Vec<&str> {
        components.iter().map(|c| c.name.as_str()).collect()
    }

    #[test]
    fn parses_manifest() {
        let manifest = parse_release_manifest(MANIFEST.as_bytes()).unwrap();
        assert_eq!(manifest.releases.len(), 2);
        let release = &manifest.releases["1.30"];
        assert_eq!(release[2].version, "~2");
        assert_eq!(release[0].tags, vec!["runtime", "gpu"]);
        assert_eq!(manifest.releases["1.31"][0].version, "");
    }

    #[test]
    fn resolve_without_tags_returns_full_entry_in_order() {
        let manifest = parse_release_manifest(MANIFEST.as_bytes()).unwrap();
        let components = manifest.resolve("1.30", &[]).unwrap();
        assert_eq!(names(&components), vec!["containerd", "cni", "kubelet"]);
        assert_eq!(components, manifest.releases["1.30"]);
    }

    #[test]
    fn resolve_with_tags_filters_and_keeps_order() {
        let manifest = parse_release_manifest(MANIFEST.as_bytes()).unwrap();
        let filter = vec!["runtime".to_owned()];
        let components = manifest.resolve("1.30", &filter).unwrap();
        assert_eq!(names(&components), vec!["containerd", "kubelet"]);
        assert!(components.iter().all(|c| c.shares_tag(&filter)));
    }

    #[test]
    fn resolve_with_unmatched_tags_is_empty() {
        let manifest = parse_release_manifest(MANIFEST.as_bytes()).unwrap();
        let components = manifest.resolve("1.30", &["storage".to_owned()]).unwrap();
        assert!(components.is_empty());
    }

    #[test]
    fn resolve_missing_release_fails() {
        let manifest = parse_release_manifest(MANIFEST.as_bytes()).unwrap();
        let err = manifest.resolve("1.29", &[]).unwrap_err();
        assert!(matches!(err, SchemaError::ReleaseNotFound(v) if v == "1.29"));
    }

    #[test]
    fn rejects_duplicate_component_names() {
        let input = r#"
"1.30":
  - name: cni
    version: 1.2.0
  - name: cni
    version: 1.3.0
"#;
        let err = parse_release_manifest(input.as_bytes()).unwrap_err();
        assert!(matches!(err, SchemaError::DuplicateComponent { .. }));
    }

    #[test]
    fn rejects_component_without_name() {
        let input = r#"
"1.30":
  - version: 1.2.0
"#;
        assert!(parse_release_manifest(input.as_bytes()).is_err());
    }

    #[test]
    fn rejects_unknown_component_fields() {
        let input = r#"
"1.30":
  - name: cni
    depends_on: [kubelet]
"#;
        assert!(parse_release_manifest(input.as_bytes()).is_err());
    }
}
