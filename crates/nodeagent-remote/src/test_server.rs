use std::collections::BTreeMap;
use std::io::Read;
use std::sync::{Arc, Mutex};
use tiny_http::{Header, Response, Server, StatusCode};

#[derive(Debug, Clone)]
pub(crate) struct Recorded {
    pub method: String,
    pub url: String,
    pub auth_token: Option<String>,
    pub body: Vec<u8>,
}

/// Canned-response HTTP server on a loopback port.
pub(crate) struct TestServer {
    pub url: String,
    requests: Arc<Mutex<Vec<Recorded>>>,
}

impl TestServer {
    /// Serves `routes` (path → status, body); unknown paths get 404.
    pub fn start(routes: &[(&str, u16, &str)]) -> Self {
        let routes: BTreeMap<String, (u16, Vec<u8>)> = routes
            .iter()
            .map(|(path, code, body)| ((*path).to_owned(), (*code, body.as_bytes().to_vec())))
            .collect();
        let server = Server::http("127.0.0.1:0").expect("bind test server");
        let port = server.server_addr().to_ip().expect("not an IP addr").port();
        let requests = Arc::new(Mutex::new(Vec::new()));
        let log = Arc::clone(&requests);

        std::thread::spawn(move || {
            for mut req in server.incoming_requests() {
                let mut body = Vec::new();
                let _ = req.as_reader().read_to_end(&mut body);
                let auth_token = req
                    .headers()
                    .iter()
                    .find(|h| h.field.equiv(crate::AUTH_TOKEN_HEADER))
                    .map(|h| h.value.as_str().to_owned());
                let path = req.url().split('?').next().unwrap_or("").to_owned();
                log.lock().unwrap().push(Recorded {
                    method: req.method().to_string(),
                    url: req.url().to_owned(),
                    auth_token,
                    body,
                });
                let (code, payload) = routes
                    .get(&path)
                    .cloned()
                    .unwrap_or((404, b"not found".to_vec()));
                let response = Response::from_data(payload)
                    .with_status_code(StatusCode(code))
                    .with_header(
                        Header::from_bytes("Content-Type", "application/octet-stream").unwrap(),
                    );
                let _ = req.respond(response);
            }
        });

        Self {
            url: format!("http://127.0.0.1:{port}"),
            requests,
        }
    }

    pub fn requests(&self) -> Vec<Recorded> {
        self.requests.lock().unwrap().clone()
    }
}
