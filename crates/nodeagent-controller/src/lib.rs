//! Node reconciliation controller for the nodeagent.
//!
//! A `NodeInformer` lists and watches the node object through a
//! `ClusterClient` and feeds its name into a deduplicating, rate-limited
//! `RateLimitingQueue`. A single worker drains the queue and runs the
//! `NodeController` sync handler: when the node carries the upgrade trigger it
//! re-runs the lifecycle engine with refreshed metadata and clears the
//! trigger, then it republishes installed component versions as node
//! annotations.

pub mod cluster;
pub mod controller;
pub mod fake;
pub mod informer;
pub mod kube;
pub mod queue;
pub mod ratelimit;
pub mod reconcile;

pub use cluster::{ClusterClient, EventType, Node, NodeEvent, ObjectMeta, WatchEvent, WatchStream};
pub use controller::{ControllerSettings, NodeController, UPGRADE_EVENT_REASON};
pub use fake::FakeCluster;
pub use informer::NodeInformer;
pub use kube::KubeClient;
pub use queue::RateLimitingQueue;
pub use ratelimit::{
    BucketRateLimiter, ItemExponentialFailureRateLimiter, MaxOfRateLimiter, RateLimiter,
};
pub use reconcile::{reconcile_version_annotations, upgrade_requested};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ControllerError {
    #[error("node {0} not found")]
    NotFound(String),
    #[error("conflicting update of node {0}")]
    Conflict(String),
    #[error("API server returned HTTP {status} for {url}")]
    Api { status: u16, url: String },
    #[error("cluster connection error: {0}")]
    Http(String),
    #[error("invalid cluster response: {0}")]
    Decode(String),
    #[error("watch error: {0}")]
    Watch(String),
    #[error("cluster client configuration error: {0}")]
    Config(String),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Core(#[from] nodeagent_core::CoreError),
    #[error("store error: {0}")]
    Store(#[from] nodeagent_store::StoreError),
    #[error("remote error: {0}")]
    Remote(#[from] nodeagent_remote::RemoteError),
}
