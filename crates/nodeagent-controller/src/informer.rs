use crate::cluster::{ClusterClient, WatchEvent};
use crate::queue::RateLimitingQueue;
use crate::ControllerError;
use nodeagent_core::ShutdownSignal;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, info, warn};

const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// Lists and watches one node and enqueues its name on every change.
///
/// Each watch is opened with the resync period as its server-side timeout;
/// when it ends the node is listed again, which re-enqueues it even if
/// nothing changed. Failed list or watch calls are retried with a doubling
/// backoff.
#[derive(Clone)]
pub struct NodeInformer {
    client: Arc<dyn ClusterClient>,
    name: String,
    resync: Duration,
    synced: Arc<AtomicBool>,
}

impl NodeInformer {
    pub fn new(client: Arc<dyn ClusterClient>, name: &str, resync: Duration) -> Self {
        Self {
            client,
            name: name.to_owned(),
            resync,
            synced: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Whether the initial list has completed.
    pub fn has_synced(&self) -> bool {
        self.synced.load(Ordering::SeqCst)
    }

    /// Block until the initial list completes. Returns `false` if shutdown was
    /// requested first.
    pub fn wait_for_sync(&self, shutdown: &ShutdownSignal) -> bool {
        while !self.has_synced() {
            if shutdown.wait_timeout(Duration::from_millis(50)) {
                return false;
            }
        }
        true
    }

    /// Run the list/watch loop on a new thread until shutdown is requested.
    ///
    /// The thread notices shutdown between watch events, so it may outlive the
    /// request by up to one resync period.
    pub fn spawn(
        &self,
        queue: Arc<RateLimitingQueue<String>>,
        shutdown: ShutdownSignal,
    ) -> JoinHandle<()> {
        let informer = self.clone();
        thread::spawn(move || informer.run(&queue, &shutdown))
    }

    fn run(&self, queue: &RateLimitingQueue<String>, shutdown: &ShutdownSignal) {
        info!("watching node {}", self.name);
        let mut backoff = INITIAL_BACKOFF;
        while !shutdown.is_requested() {
            match self.list_and_watch(queue, shutdown) {
                Ok(()) => backoff = INITIAL_BACKOFF,
                Err(e) => {
                    warn!("watch of node {} failed: {e}; retrying in {backoff:?}", self.name);
                    if shutdown.wait_timeout(backoff) {
                        break;
                    }
                    backoff = (backoff * 2).min(MAX_BACKOFF);
                }
            }
        }
        debug!("node watcher stopped");
    }

    fn list_and_watch(
        &self,
        queue: &RateLimitingQueue<String>,
        shutdown: &ShutdownSignal,
    ) -> Result<(), ControllerError> {
        let node = self.client.get_node(&self.name)?;
        let mut resource_version = node.metadata.resource_version.clone();
        queue.add(self.name.clone());
        self.synced.store(true, Ordering::SeqCst);

        let stream = self
            .client
            .watch_node(&self.name, resource_version.as_deref(), self.resync)?;
        for event in stream {
            if shutdown.is_requested() {
                return Ok(());
            }
            match event? {
                WatchEvent::Added(node) | WatchEvent::Modified(node) | WatchEvent::Deleted(node) => {
                    resource_version = node.metadata.resource_version.clone();
                    debug!("node {} changed (revision {:?})", self.name, resource_version);
                    queue.add(self.name.clone());
                }
                WatchEvent::Bookmark(node) => {
                    resource_version = node.metadata.resource_version;
                }
                WatchEvent::Error(status) => {
                    return Err(ControllerError::Watch(status.to_string()));
                }
            }
        }
        debug!("watch ended at revision {resource_version:?}, relisting");
        Ok(())
    }
}
