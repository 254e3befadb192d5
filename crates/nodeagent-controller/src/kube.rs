//! Minimal Kubernetes REST client for the node object.

use crate::cluster::{ClusterClient, Node, NodeEvent, WatchEvent, WatchStream};
use crate::ControllerError;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use chrono::{SecondsFormat, Utc};
use nodeagent_schema::NodeMetadata;
use std::io::{BufRead, BufReader, Read};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;
use ureq::tls::{parse_pem, PemItem, RootCerts, TlsConfig};

const API_TIMEOUT: Duration = Duration::from_secs(30);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
/// Namespace events about cluster-scoped objects are recorded in.
const EVENT_NAMESPACE: &str = "default";
const EVENT_SOURCE: &str = "nodeagent";

/// Node client for the Kubernetes API server, authenticated with a bearer
/// token and trusting the cluster CA.
pub struct KubeClient {
    base_url: String,
    token: String,
    agent: ureq::Agent,
    /// Watches stay open for the resync period, so they only bound the connect.
    watch_agent: ureq::Agent,
}

impl KubeClient {
    /// `ca_pem` is the PEM bundle to trust; `None` keeps the default roots.
    pub fn new(
        cluster_url: &str,
        token: &str,
        ca_pem: Option<&[u8]>,
    ) -> Result<Self, ControllerError> {
        let tls = match ca_pem {
            Some(pem) => Some(tls_config(pem)?),
            None => None,
        };

        let mut api = ureq::Agent::config_builder().timeout_global(Some(API_TIMEOUT));
        let mut watch = ureq::Agent::config_builder().timeout_connect(Some(CONNECT_TIMEOUT));
        if let Some(tls) = tls {
            api = api.tls_config(tls.clone());
            watch = watch.tls_config(tls);
        }

        Ok(Self {
            base_url: cluster_url.trim_end_matches('/').to_owned(),
            token: token.to_owned(),
            agent: api.build().into(),
            watch_agent: watch.build().into(),
        })
    }

    /// Client for the cluster described by the node metadata: its API URL,
    /// its base64-encoded CA bundle, and the node token.
    pub fn from_metadata(metadata: &NodeMetadata) -> Result<Self, ControllerError> {
        let ca = STANDARD
            .decode(metadata.cluster_ca.trim())
            .map_err(|e| ControllerError::Config(format!("cluster CA is not valid base64: {e}")))?;
        Self::new(&metadata.cluster_url, &metadata.token, Some(&ca))
    }

    fn node_url(&self, name: &str) -> String {
        format!("{}/api/v1/nodes/{name}", self.base_url)
    }

    fn bearer(&self) -> String {
        format!("Bearer {}", self.token)
    }

    fn read_json<T: serde::de::DeserializeOwned>(
        resp: ureq::http::Response<ureq::Body>,
        url: &str,
    ) -> Result<T, ControllerError> {
        let mut body = Vec::new();
        resp.into_body()
            .into_reader()
            .read_to_end(&mut body)
            .map_err(|e| ControllerError::Http(format!("{url}: {e}")))?;
        serde_json::from_slice(&body).map_err(|e| ControllerError::Decode(format!("{url}: {e}")))
    }
}

fn tls_config(pem: &[u8]) -> Result<TlsConfig, ControllerError> {
    let mut certs = Vec::new();
    for item in parse_pem(pem) {
        match item {
            Ok(PemItem::Certificate(cert)) => certs.push(cert.to_owned()),
            Ok(_) => {}
            Err(e) => {
                return Err(ControllerError::Config(format!("invalid cluster CA: {e}")));
            }
        }
    }
    if certs.is_empty() {
        return Err(ControllerError::Config(
            "cluster CA contains no certificate".to_owned(),
        ));
    }
    Ok(TlsConfig::builder()
        .root_certs(RootCerts::Specific(Arc::new(certs)))
        .build())
}

/// Map a transport or status error for `name` at `url`.
fn map_error(err: ureq::Error, name: &str, url: &str) -> ControllerError {
    match err {
        ureq::Error::StatusCode(404) => ControllerError::NotFound(name.to_owned()),
        ureq::Error::StatusCode(409) => ControllerError::Conflict(name.to_owned()),
        ureq::Error::StatusCode(status) => ControllerError::Api {
            status,
            url: url.to_owned(),
        },
        other => ControllerError::Http(format!("{url}: {other}")),
    }
}

fn event_body(node: &Node, event: &NodeEvent) -> serde_json::Value {
    let now = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true);
    serde_json::json!({
        "apiVersion": "v1",
        "kind": "Event",
        "metadata": {
            "generateName": format!("{}.", node.name()),
            "namespace": EVENT_NAMESPACE,
        },
        "involvedObject": {
            "apiVersion": "v1",
            "kind": "Node",
            "name": node.name(),
            "uid": node.metadata.uid.as_deref().unwrap_or_default(),
        },
        "reason": event.reason,
        "message": event.message,
        "type": event.event_type.to_string(),
        "source": {"component": EVENT_SOURCE, "host": node.name()},
        "firstTimestamp": now,
        "lastTimestamp": now,
        "count": 1,
    })
}

impl ClusterClient for KubeClient {
    fn get_node(&self, name: &str) -> Result<Node, ControllerError> {
        let url = self.node_url(name);
        debug!("GET {url}");
        let resp = self
            .agent
            .get(&url)
            .header("Authorization", self.bearer())
            .header("Accept", "application/json")
            .call()
            .map_err(|e| map_error(e, name, &url))?;
        Self::read_json(resp, &url)
    }

    fn update_node(&self, node: &Node) -> Result<Node, ControllerError> {
        let url = self.node_url(node.name());
        let body = serde_json::to_vec(node)?;
        debug!("PUT {url}");
        let resp = self
            .agent
            .put(&url)
            .header("Authorization", self.bearer())
            .header("Content-Type", "application/json")
            .header("Accept", "application/json")
            .send(&body[..])
            .map_err(|e| map_error(e, node.name(), &url))?;
        Self::read_json(resp, &url)
    }

    fn record_event(&self, node: &Node, event: &NodeEvent) -> Result<(), ControllerError> {
        let url = format!("{}/api/v1/namespaces/{EVENT_NAMESPACE}/events", self.base_url);
        let body = serde_json::to_vec(&event_body(node, event))?;
        self.agent
            .post(&url)
            .header("Authorization", self.bearer())
            .header("Content-Type", "application/json")
            .send(&body[..])
            .map_err(|e| map_error(e, node.name(), &url))?;
        Ok(())
    }

    fn watch_node(
        &self,
        name: &str,
        resource_version: Option<&str>,
        timeout: Duration,
    ) -> Result<WatchStream, ControllerError> {
        let mut url = format!(
            "{}/api/v1/nodes?fieldSelector=metadata.name%3D{name}&watch=true&timeoutSeconds={}",
            self.base_url,
            timeout.as_secs().max(1)
        );
        if let Some(rv) = resource_version {
            url.push_str(&format!("&resourceVersion={rv}"));
        }
        debug!("WATCH {url}");
        let resp = self
            .watch_agent
            .get(&url)
            .header("Authorization", self.bearer())
            .call()
            .map_err(|e| map_error(e, name, &url))?;

        let lines = BufReader::new(resp.into_body().into_reader()).lines();
        Ok(Box::new(lines.filter_map(|line| match line {
            Ok(line) if line.trim().is_empty() => None,
            Ok(line) => Some(
                serde_json::from_str::<WatchEvent>(&line)
                    .map_err(|e| ControllerError::Decode(format!("watch event: {e}"))),
            ),
            Err(e) => Some(Err(ControllerError::Watch(e.to_string()))),
        })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::thread;
    use tiny_http::{Header, Response, Server, StatusCode};

    struct Request {
        method: String,
        url: String,
        authorization: Option<String>,
        body: String,
    }

    /// Serves canned `(status, body)` responses in order and reports what it
    /// received.
    fn serve(responses: Vec<(u16, String)>) -> (String, mpsc::Receiver<Request>) {
        let server = Server::http("127.0.0.1:0").unwrap();
        let port = server.server_addr().to_ip().unwrap().port();
        let (tx, rx) = mpsc::channel();
        thread::spawn(move || {
            for (status, body) in responses {
                let Ok(mut req) = server.recv() else { return };
                let mut received = String::new();
                req.as_reader().read_to_string(&mut received).unwrap();
                let authorization = req
                    .headers()
                    .iter()
                    .find(|h| h.field.equiv("Authorization"))
                    .map(|h| h.value.to_string());
                let _ = tx.send(Request {
                    method: req.method().to_string(),
                    url: req.url().to_owned(),
                    authorization,
                    body: received,
                });
                let header = Header::from_bytes("Content-Type", "application/json").unwrap();
                let _ = req.respond(
                    Response::from_string(body)
                        .with_status_code(StatusCode(status))
                        .with_header(header),
                );
            }
        });
        (format!("http://127.0.0.1:{port}"), rx)
    }

    const NODE: &str = r#"{"kind":"Node","metadata":{"name":"node-1","uid":"u-1","resourceVersion":"7","annotations":{"k8s.scaleway.com/agent":"upgrade"}},"spec":{"podCIDR":"100.64.0.0/24"}}"#;

    #[test]
    fn get_node_sends_bearer_token() {
        let (url, rx) = serve(vec![(200, NODE.to_owned())]);
        let client = KubeClient::new(&url, "secret-token", None).unwrap();
        let node = client.get_node("node-1").unwrap();
        assert_eq!(node.metadata.resource_version.as_deref(), Some("7"));

        let req = rx.recv().unwrap();
        assert_eq!(req.method, "GET");
        assert_eq!(req.url, "/api/v1/nodes/node-1");
        assert_eq!(req.authorization.as_deref(), Some("Bearer secret-token"));
    }

    #[test]
    fn status_codes_map_to_errors() {
        let (url, _rx) = serve(vec![
            (404, "{}".to_owned()),
            (409, "{}".to_owned()),
            (403, "{}".to_owned()),
        ]);
        let client = KubeClient::new(&url, "t", None).unwrap();
        assert!(matches!(
            client.get_node("node-1"),
            Err(ControllerError::NotFound(_))
        ));
        let node = Node::named("node-1");
        assert!(matches!(
            client.update_node(&node),
            Err(ControllerError::Conflict(_))
        ));
        assert!(matches!(
            client.get_node("node-1"),
            Err(ControllerError::Api { status: 403, .. })
        ));
    }

    #[test]
    fn update_puts_whole_object() {
        let (url, rx) = serve(vec![(200, NODE.to_owned())]);
        let client = KubeClient::new(&url, "t", None).unwrap();
        let mut node: Node = serde_json::from_str(NODE).unwrap();
        node.metadata.annotations.clear();
        client.update_node(&node).unwrap();

        let req = rx.recv().unwrap();
        assert_eq!(req.method, "PUT");
        let sent: serde_json::Value = serde_json::from_str(&req.body).unwrap();
        assert_eq!(sent["spec"]["podCIDR"], "100.64.0.0/24");
        assert_eq!(sent["metadata"]["resourceVersion"], "7");
        assert!(sent["metadata"].get("annotations").is_none());
    }

    #[test]
    fn events_reference_the_node() {
        let (url, rx) = serve(vec![(201, "{}".to_owned())]);
        let client = KubeClient::new(&url, "t", None).unwrap();
        let node: Node = serde_json::from_str(NODE).unwrap();
        client
            .record_event(&node, &NodeEvent::warning("NodeUpgrade", "Failed to get credentials: x"))
            .unwrap();

        let req = rx.recv().unwrap();
        assert_eq!(req.method, "POST");
        assert_eq!(req.url, "/api/v1/namespaces/default/events");
        let sent: serde_json::Value = serde_json::from_str(&req.body).unwrap();
        assert_eq!(sent["involvedObject"]["kind"], "Node");
        assert_eq!(sent["involvedObject"]["uid"], "u-1");
        assert_eq!(sent["type"], "Warning");
        assert_eq!(sent["reason"], "NodeUpgrade");
        assert_eq!(sent["source"]["component"], "nodeagent");
    }

    #[test]
    fn watch_streams_events_per_line() {
        let stream = format!(
            "{{\"type\":\"MODIFIED\",\"object\":{NODE}}}\n\n{{\"type\":\"BOOKMARK\",\"object\":{{\"metadata\":{{\"resourceVersion\":\"9\"}}}}}}\n"
        );
        let (url, rx) = serve(vec![(200, stream)]);
        let client = KubeClient::new(&url, "t", None).unwrap();
        let events: Vec<WatchEvent> = client
            .watch_node("node-1", Some("7"), Duration::from_secs(60))
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();

        assert_eq!(events.len(), 2);
        assert!(matches!(events[0], WatchEvent::Modified(ref n) if n.name() == "node-1"));
        assert!(matches!(
            events[1],
            WatchEvent::Bookmark(ref n) if n.metadata.resource_version.as_deref() == Some("9")
        ));

        let req = rx.recv().unwrap();
        assert!(req.url.starts_with("/api/v1/nodes?fieldSelector=metadata.name%3Dnode-1"));
        assert!(req.url.contains("watch=true"));
        assert!(req.url.contains("timeoutSeconds=60"));
        assert!(req.url.contains("resourceVersion=7"));
    }

    #[test]
    fn bad_ca_is_config_error() {
        let mut meta = NodeMetadata::from_json(
            br#"{"name":"n","cluster_url":"https://c","cluster_ca":"not base64!","pool_version":"1.30","repo_uri":"r"}"#,
        )
        .unwrap();
        assert!(matches!(
            KubeClient::from_metadata(&meta),
            Err(ControllerError::Config(_))
        ));

        meta.cluster_ca = STANDARD.encode("no certificate here");
        assert!(matches!(
            KubeClient::from_metadata(&meta),
            Err(ControllerError::Config(_))
        ));
    }
}
