//! In-memory cluster holding a single node, for tests and dry runs.

use crate::cluster::{ClusterClient, Node, NodeEvent, WatchEvent, WatchStream};
use crate::ControllerError;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

struct Inner {
    node: Node,
    revision: u64,
    events: Vec<NodeEvent>,
    updates: Vec<Node>,
    failing_updates: usize,
    watchers: Vec<Sender<WatchEvent>>,
}

impl Inner {
    fn bump(&mut self) {
        self.revision += 1;
        self.node.metadata.resource_version = Some(self.revision.to_string());
        let event = WatchEvent::Modified(self.node.clone());
        self.watchers.retain(|tx| tx.send(event.clone()).is_ok());
    }
}

/// `ClusterClient` backed by one node kept in memory.
///
/// Updates are checked against the resource version like the API server does,
/// and every change is pushed to open watches. Tests play the outside actor
/// through `set_annotation` and `remove_annotation`.
pub struct FakeCluster {
    inner: Mutex<Inner>,
}

impl FakeCluster {
    pub fn new(mut node: Node) -> Self {
        node.metadata.resource_version = Some("1".to_owned());
        Self {
            inner: Mutex::new(Inner {
                node,
                revision: 1,
                events: Vec::new(),
                updates: Vec::new(),
                failing_updates: 0,
                watchers: Vec::new(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    pub fn set_annotation(&self, key: &str, value: &str) {
        let mut inner = self.lock();
        inner
            .node
            .metadata
            .annotations
            .insert(key.to_owned(), value.to_owned());
        inner.bump();
    }

    pub fn remove_annotation(&self, key: &str) {
        let mut inner = self.lock();
        inner.node.metadata.annotations.remove(key);
        inner.bump();
    }

    /// Make the next `count` updates fail with an API error.
    pub fn fail_updates(&self, count: usize) {
        self.lock().failing_updates = count;
    }

    pub fn node(&self) -> Node {
        self.lock().node.clone()
    }

    pub fn events(&self) -> Vec<NodeEvent> {
        self.lock().events.clone()
    }

    /// Successful updates, in order.
    pub fn updates(&self) -> Vec<Node> {
        self.lock().updates.clone()
    }

    pub fn update_count(&self) -> usize {
        self.lock().updates.len()
    }
}

impl ClusterClient for FakeCluster {
    fn get_node(&self, name: &str) -> Result<Node, ControllerError> {
        let inner = self.lock();
        if inner.node.name() != name {
            return Err(ControllerError::NotFound(name.to_owned()));
        }
        Ok(inner.node.clone())
    }

    fn update_node(&self, node: &Node) -> Result<Node, ControllerError> {
        let mut inner = self.lock();
        if inner.node.name() != node.name() {
            return Err(ControllerError::NotFound(node.name().to_owned()));
        }
        if inner.failing_updates > 0 {
            inner.failing_updates -= 1;
            return Err(ControllerError::Api {
                status: 500,
                url: format!("fake://nodes/{}", node.name()),
            });
        }
        if let Some(rv) = &node.metadata.resource_version {
            if Some(rv) != inner.node.metadata.resource_version.as_ref() {
                return Err(ControllerError::Conflict(node.name().to_owned()));
            }
        }
        inner.node = node.clone();
        inner.bump();
        let stored = inner.node.clone();
        inner.updates.push(stored.clone());
        Ok(stored)
    }

    fn record_event(&self, node: &Node, event: &NodeEvent) -> Result<(), ControllerError> {
        let mut inner = self.lock();
        if inner.node.name() != node.name() {
            return Err(ControllerError::NotFound(node.name().to_owned()));
        }
        inner.events.push(event.clone());
        Ok(())
    }

    fn watch_node(
        &self,
        name: &str,
        resource_version: Option<&str>,
        timeout: Duration,
    ) -> Result<WatchStream, ControllerError> {
        let mut inner = self.lock();
        if inner.node.name() != name {
            return Err(ControllerError::NotFound(name.to_owned()));
        }
        let (tx, rx) = mpsc::channel();
        // A watcher that is behind sees the current state first.
        if resource_version != inner.node.metadata.resource_version.as_deref() {
            let _ = tx.send(WatchEvent::Modified(inner.node.clone()));
        }
        inner.watchers.push(tx);
        Ok(Box::new(FakeWatch {
            rx,
            deadline: Instant::now() + timeout,
        }))
    }
}

struct FakeWatch {
    rx: Receiver<WatchEvent>,
    deadline: Instant,
}

impl Iterator for FakeWatch {
    type Item = Result<WatchEvent, ControllerError>;

    fn next(&mut self) -> Option<Self::Item> {
        let remaining = self.deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return None;
        }
        match self.rx.recv_timeout(remaining) {
            Ok(event) => Some(Ok(event)),
            Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stale_update_conflicts() {
        let cluster = FakeCluster::new(Node::named("node-1"));
        let stale = cluster.get_node("node-1").unwrap();
        cluster.set_annotation("a", "b");

        let err = cluster.update_node(&stale).unwrap_err();
        assert!(matches!(err, ControllerError::Conflict(_)));

        let fresh = cluster.get_node("node-1").unwrap();
        let stored = cluster.update_node(&fresh).unwrap();
        assert_eq!(stored.metadata.resource_version.as_deref(), Some("3"));
        assert_eq!(cluster.update_count(), 1);
    }

    #[test]
    fn unknown_node_is_not_found() {
        let cluster = FakeCluster::new(Node::named("node-1"));
        assert!(matches!(
            cluster.get_node("node-2"),
            Err(ControllerError::NotFound(_))
        ));
    }

    #[test]
    fn watch_delivers_changes_and_ends_at_timeout() {
        let cluster = FakeCluster::new(Node::named("node-1"));
        let mut watch = cluster
            .watch_node("node-1", Some("1"), Duration::from_millis(100))
            .unwrap();
        cluster.set_annotation("k8s.scaleway.com/agent", "upgrade");

        match watch.next() {
            Some(Ok(WatchEvent::Modified(node))) => {
                assert_eq!(node.annotation("k8s.scaleway.com/agent"), Some("upgrade"));
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(watch.next().is_none());
    }

    #[test]
    fn lagging_watch_gets_current_state() {
        let cluster = FakeCluster::new(Node::named("node-1"));
        cluster.set_annotation("a", "b");
        let mut watch = cluster
            .watch_node("node-1", Some("1"), Duration::from_millis(50))
            .unwrap();
        assert!(matches!(watch.next(), Some(Ok(WatchEvent::Modified(_)))));
    }

    #[test]
    fn injected_update_failures() {
        let cluster = FakeCluster::new(Node::named("node-1"));
        cluster.fail_updates(1);
        let node = cluster.get_node("node-1").unwrap();
        assert!(matches!(
            cluster.update_node(&node),
            Err(ControllerError::Api { status: 500, .. })
        ));
        assert!(cluster.update_node(&node).is_ok());
    }
}
