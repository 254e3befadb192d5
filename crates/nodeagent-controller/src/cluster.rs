use crate::ControllerError;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

/// Node object as returned by the API server.
///
/// Only the metadata the agent reads or writes is typed; everything else is
/// carried through untouched so that a read-modify-update does not drop
/// fields.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Node {
    #[serde(default)]
    pub metadata: ObjectMeta,
    #[serde(flatten)]
    pub rest: Map<String, Value>,
}

impl Node {
    pub fn named(name: &str) -> Self {
        Self {
            metadata: ObjectMeta {
                name: name.to_owned(),
                ..ObjectMeta::default()
            },
            rest: Map::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    pub fn annotation(&self, key: &str) -> Option<&str> {
        self.metadata.annotations.get(key).map(String::as_str)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMeta {
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_version: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// One line of a watch stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "object", rename_all = "UPPERCASE")]
pub enum WatchEvent {
    Added(Node),
    Modified(Node),
    Deleted(Node),
    Bookmark(Node),
    /// Server-side watch failure (e.g. expired resource version); the
    /// watcher must relist.
    Error(Value),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventType {
    Normal,
    Warning,
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventType::Normal => write!(f, "Normal"),
            EventType::Warning => write!(f, "Warning"),
        }
    }
}

/// Human-readable event recorded against the node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeEvent {
    pub event_type: EventType,
    pub reason: String,
    pub message: String,
}

impl NodeEvent {
    pub fn normal(reason: &str, message: impl Into<String>) -> Self {
        Self {
            event_type: EventType::Normal,
            reason: reason.to_owned(),
            message: message.into(),
        }
    }

    pub fn warning(reason: &str, message: impl Into<String>) -> Self {
        Self {
            event_type: EventType::Warning,
            reason: reason.to_owned(),
            message: message.into(),
        }
    }
}

/// Blocking stream of watch events; ends when the server closes the watch.
pub type WatchStream = Box<dyn Iterator<Item = Result<WatchEvent, ControllerError>> + Send>;

/// Access to the cluster-side node object.
pub trait ClusterClient: Send + Sync {
    fn get_node(&self, name: &str) -> Result<Node, ControllerError>;

    /// Replace the node object. Fails with `ControllerError::Conflict` if the
    /// object changed since `node` was read.
    fn update_node(&self, node: &Node) -> Result<Node, ControllerError>;

    fn record_event(&self, node: &Node, event: &NodeEvent) -> Result<(), ControllerError>;

    /// Watch the single node `name`, starting after `resource_version` when
    /// given. The server ends the stream after `timeout`.
    fn watch_node(
        &self,
        name: &str,
        resource_version: Option<&str>,
        timeout: Duration,
    ) -> Result<WatchStream, ControllerError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    const NODE: &str = r#"{
        "apiVersion": "v1",
        "kind": "Node",
        "metadata": {
            "name": "node-1",
            "uid": "abc",
            "resourceVersion": "42",
            "labels": {"zone": "fr-par-1"},
            "annotations": {"k8s.scaleway.com/agent": "upgrade"}
        },
        "spec": {"providerID": "scaleway://1"},
        "status": {"nodeInfo": {"kubeletVersion": "v1.30.2"}}
    }"#;

    #[test]
    fn unknown_fields_survive_round_trip() {
        let node: Node = serde_json::from_str(NODE).unwrap();
        assert_eq!(node.name(), "node-1");
        assert_eq!(node.metadata.resource_version.as_deref(), Some("42"));
        assert_eq!(node.annotation("k8s.scaleway.com/agent"), Some("upgrade"));

        let back: Value = serde_json::to_value(&node).unwrap();
        assert_eq!(back["spec"]["providerID"], "scaleway://1");
        assert_eq!(back["metadata"]["labels"]["zone"], "fr-par-1");
        assert_eq!(back["kind"], "Node");
    }

    #[test]
    fn watch_lines_decode() {
        let line = format!(r#"{{"type":"MODIFIED","object":{NODE}}}"#);
        let event: WatchEvent = serde_json::from_str(&line).unwrap();
        assert!(matches!(event, WatchEvent::Modified(ref n) if n.name() == "node-1"));

        let error: WatchEvent = serde_json::from_str(
            r#"{"type":"ERROR","object":{"kind":"Status","code":410,"reason":"Expired"}}"#,
        )
        .unwrap();
        assert!(matches!(error, WatchEvent::Error(ref s) if s["code"] == 410));
    }

    #[test]
    fn removed_annotations_are_omitted() {
        let mut node: Node = serde_json::from_str(NODE).unwrap();
        node.metadata.annotations.clear();
        let back: Value = serde_json::to_value(&node).unwrap();
        assert!(back["metadata"].get("annotations").is_none());
    }
}
