use crate::SchemaError;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::fmt;

/// Credentials document returned by the instance user-data endpoint or by
/// external-node registration.
#[derive(Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct UserData {
    pub metadata_url: String,
    pub node_secret_key: String,
}

impl fmt::Debug for UserData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UserData")
            .field("metadata_url", &self.metadata_url)
            .field("node_secret_key", &"<redacted>")
            .finish()
    }
}

impl UserData {
    pub fn from_json(input: &[u8]) -> Result<Self, SchemaError> {
        serde_json::from_slice(input).map_err(|source| SchemaError::ParseJson {
            document: "user data".to_owned(),
            source,
        })
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct NodeTaint {
    pub key: String,
    #[serde(default)]
    pub value: String,
    pub effect: String,
}

/// Node metadata served by the provider's metadata endpoint.
#[derive(Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct NodeMetadata {
    #[serde(default)]
    pub id: String,
    pub name: String,
    pub cluster_url: String,
    /// Base64-encoded PEM bundle of the cluster CA.
    pub cluster_ca: String,
    pub pool_version: String,
    /// Comma-separated repository URIs, tried in order.
    pub repo_uri: String,
    #[serde(default)]
    pub installer_tags: Vec<String>,
    #[serde(default)]
    pub credential_provider_config: String,
    #[serde(default)]
    pub kubelet_config: String,
    #[serde(default)]
    pub node_labels: BTreeMap<String, String>,
    #[serde(default)]
    pub node_taints: Vec<NodeTaint>,
    #[serde(default)]
    pub provider_id: String,
    #[serde(default)]
    pub resolvconf_path: String,
    #[serde(default)]
    pub template_args: BTreeMap<String, String>,
    #[serde(default)]
    pub has_gpu: bool,
    #[serde(default)]
    pub external_ip: String,
    /// Secret used to fetch this document; attached after decoding.
    #[serde(skip)]
    pub token: String,
}

impl fmt::Debug for NodeMetadata {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeMetadata")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("cluster_url", &self.cluster_url)
            .field("pool_version", &self.pool_version)
            .field("repo_uri", &self.repo_uri)
            .field("installer_tags", &self.installer_tags)
            .finish_non_exhaustive()
    }
}

impl NodeMetadata {
    pub fn from_json(input: &[u8]) -> Result<Self, SchemaError> {
        serde_json::from_slice(input).map_err(|source| SchemaError::ParseJson {
            document: "node metadata".to_owned(),
            source,
        })
    }

    /// Node-declared fields exposed to recipe templates, keyed by the names
    /// templates refer to. Scalars stay strings (`HasGPU` is a bool), labels
    /// and template arguments are maps, taints are a list of
    /// `{Key, Value, Effect}` objects.
    pub fn template_values(&self) -> Map<String, Value> {
        let taints: Vec<Value> = self
            .node_taints
            .iter()
            .map(|t| json!({"Key": t.key, "Value": t.value, "Effect": t.effect}))
            .collect();
        let values = json!({
            "ID": self.id,
            "Name": self.name,
            "ClusterURL": self.cluster_url,
            "ClusterCA": self.cluster_ca,
            "PoolVersion": self.pool_version,
            "RepoURI": self.repo_uri,
            "CredentialProviderConfig": self.credential_provider_config,
            "KubeletConfig": self.kubelet_config,
            "ProviderID": self.provider_id,
            "ResolvconfPath": self.resolvconf_path,
            "ExternalIP": self.external_ip,
            "HasGPU": self.has_gpu,
            "InstallerTags": self.installer_tags,
            "NodeLabels": self.node_labels,
            "NodeTaints": taints,
            "TemplateArgs": self.template_args,
        });
        match values {
            Value::Object(map) => map,
            _ => Map::new(),
        }
    }
}
