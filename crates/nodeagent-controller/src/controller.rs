use crate::cluster::{ClusterClient, Node, NodeEvent};
use crate::informer::NodeInformer;
use crate::queue::RateLimitingQueue;
use crate::ratelimit::MaxOfRateLimiter;
use crate::reconcile::{reconcile_version_annotations, upgrade_requested};
use crate::ControllerError;
use nodeagent_core::{ControllerConfig, Engine, ShutdownSignal};
use nodeagent_remote::{CredentialProvider, MetadataFetcher};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Reason attached to every upgrade event.
pub const UPGRADE_EVENT_REASON: &str = "NodeUpgrade";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerSettings {
    pub node_name: String,
    pub upgrade_annotation: String,
    pub upgrade_value: String,
    pub annotation_prefix: String,
    /// Pseudo-component under which the agent reports its own version.
    pub agent_component: String,
    pub agent_version: String,
    pub resync: Duration,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub qps: u32,
    pub burst: u32,
}

impl ControllerSettings {
    pub fn from_config(config: &ControllerConfig, node_name: &str, agent_version: &str) -> Self {
        Self {
            node_name: node_name.to_owned(),
            upgrade_annotation: config.upgrade_annotation.clone(),
            upgrade_value: config.upgrade_value.clone(),
            annotation_prefix: config.annotation_prefix.clone(),
            agent_component: config.agent_component.clone(),
            agent_version: agent_version.to_owned(),
            resync: config.resync(),
            base_delay: config.base_delay(),
            max_delay: config.max_delay(),
            qps: config.qps,
            burst: config.burst,
        }
    }
}

/// Keeps the node object and the installed components in agreement.
///
/// Every sync first honors a pending upgrade trigger by re-running the engine
/// with freshly fetched node metadata, then republishes the installed versions
/// as node annotations. Failed syncs are retried through the rate-limited
/// queue.
pub struct NodeController {
    settings: ControllerSettings,
    client: Arc<dyn ClusterClient>,
    engine: Arc<Engine>,
    credentials: Arc<dyn CredentialProvider>,
    fetcher: Arc<dyn MetadataFetcher>,
    queue: Arc<RateLimitingQueue<String>>,
    shutdown: ShutdownSignal,
}

impl NodeController {
    pub fn new(
        settings: ControllerSettings,
        client: Arc<dyn ClusterClient>,
        engine: Arc<Engine>,
        credentials: Arc<dyn CredentialProvider>,
        fetcher: Arc<dyn MetadataFetcher>,
        shutdown: ShutdownSignal,
    ) -> Self {
        let limiter = MaxOfRateLimiter::controller_default(
            settings.base_delay,
            settings.max_delay,
            settings.qps,
            settings.burst,
        );
        Self {
            settings,
            client,
            engine,
            credentials,
            fetcher,
            queue: Arc::new(RateLimitingQueue::new(Box::new(limiter))),
            shutdown,
        }
    }

    pub fn queue(&self) -> &Arc<RateLimitingQueue<String>> {
        &self.queue
    }

    /// Watch the node and process changes until shutdown is requested.
    pub fn run(self: Arc<Self>) -> Result<(), ControllerError> {
        info!("starting controller for node {}", self.settings.node_name);
        let informer = NodeInformer::new(
            Arc::clone(&self.client),
            &self.settings.node_name,
            self.settings.resync,
        );
        // Detached: the watcher notices shutdown when its current watch ends.
        let _watcher = informer.spawn(Arc::clone(&self.queue), self.shutdown.clone());

        info!("waiting for node cache to sync");
        if !informer.wait_for_sync(&self.shutdown) {
            self.queue.shut_down();
            return Ok(());
        }

        let worker = {
            let controller = Arc::clone(&self);
            thread::spawn(move || while controller.process_next_item() {})
        };

        while !self.shutdown.wait_timeout(Duration::from_secs(3600)) {}

        info!("stopping controller");
        self.queue.shut_down();
        worker
            .join()
            .map_err(|_| ControllerError::Watch("worker thread panicked".to_owned()))
    }

    /// Take one key off the queue and sync it. Returns `false` once the queue
    /// is shut down.
    pub fn process_next_item(&self) -> bool {
        let Some(key) = self.queue.get() else {
            return false;
        };
        match self.sync(&key) {
            Ok(()) => {
                self.queue.forget(&key);
                debug!("synced node {key}");
            }
            Err(e) => {
                error!(
                    "sync of node {key} failed (attempt {}): {e}",
                    self.queue.num_requeues(&key) + 1
                );
                self.queue.add_rate_limited(key.clone());
            }
        }
        self.queue.done(&key);
        true
    }

    /// Sync handler: upgrade when triggered, then reconcile version
    /// annotations.
    pub fn sync(&self, name: &str) -> Result<(), ControllerError> {
        self.upgrade_node(name)?;
        self.sync_version_annotations(name)
    }

    fn event(&self, node: &Node, event: NodeEvent) {
        if let Err(e) = self.client.record_event(node, &event) {
            warn!("failed to record event {:?}: {e}", event.message);
        }
    }

    fn upgrade_node(&self, name: &str) -> Result<(), ControllerError> {
        let node = self.client.get_node(name)?;
        let key = &self.settings.upgrade_annotation;
        if !upgrade_requested(&node, key, &self.settings.upgrade_value) {
            return Ok(());
        }

        info!("upgrading node {name}");
        self.event(&node, NodeEvent::normal(UPGRADE_EVENT_REASON, "Node upgrading"));

        let credentials = self.credentials.user_data().map_err(|e| {
            self.event(
                &node,
                NodeEvent::warning(UPGRADE_EVENT_REASON, format!("Failed to get credentials: {e}")),
            );
            e
        })?;
        let metadata = self.fetcher.fetch(&credentials).map_err(|e| {
            self.event(
                &node,
                NodeEvent::warning(UPGRADE_EVENT_REASON, format!("Failed to get node metadata: {e}")),
            );
            e
        })?;
        let report = self.engine.converge(&metadata).map_err(|e| {
            self.event(
                &node,
                NodeEvent::warning(
                    UPGRADE_EVENT_REASON,
                    format!("Failed to install components: {e}"),
                ),
            );
            e
        })?;
        info!(
            "converged: {} uninstalled, {} installed, {} unchanged",
            report.uninstalled.len(),
            report.installed.len(),
            report.unchanged.len()
        );

        let mut node = self.client.get_node(name)?;
        node.metadata.annotations.remove(key);
        let node = self.client.update_node(&node).map_err(|e| {
            self.event(
                &node,
                NodeEvent::warning(UPGRADE_EVENT_REASON, format!("Failed to remove annotation: {e}")),
            );
            e
        })?;

        info!("node {name} upgraded");
        self.event(&node, NodeEvent::normal(UPGRADE_EVENT_REASON, "Node upgraded"));
        Ok(())
    }

    fn sync_version_annotations(&self, name: &str) -> Result<(), ControllerError> {
        let mut versions = self.engine.versions().list()?;
        versions.insert(
            self.settings.agent_component.clone(),
            self.settings.agent_version.clone(),
        );

        let mut node = self.client.get_node(name)?;
        let Some(annotations) = reconcile_version_annotations(
            &node.metadata.annotations,
            &versions,
            &self.settings.annotation_prefix,
        ) else {
            debug!("version annotations of node {name} are up to date");
            return Ok(());
        };

        node.metadata.annotations = annotations;
        self.client.update_node(&node)?;
        info!("updated version annotations of node {name}");
        Ok(())
    }
}
