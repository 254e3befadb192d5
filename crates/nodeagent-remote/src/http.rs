use crate::{agent_with_timeout, RemoteError, RepositoryReader};
use std::io::Read;

/// Component repository served over HTTP(S).
///
/// Files are fetched on demand as `GET <base>/<path>`. Nothing is cached
/// locally, so `cleanup` has nothing to release.
pub struct HttpRepository {
    base_url: String,
    agent: ureq::Agent,
}

impl HttpRepository {
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_owned(),
            agent: agent_with_timeout(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }
}

/// GET `url`, optionally authenticated, returning the full body.
pub(crate) fn get_bytes(
    agent: &ureq::Agent,
    url: &str,
    auth_token: Option<&str>,
) -> Result<Vec<u8>, RemoteError> {
    let mut req = agent.get(url);
    if let Some(token) = auth_token {
        req = req.header(crate::AUTH_TOKEN_HEADER, token);
    }
    let resp = match req.call() {
        Ok(r) => r,
        Err(ureq::Error::StatusCode(404)) => {
            return Err(RemoteError::NotFound(url.to_owned()));
        }
        Err(ureq::Error::StatusCode(code)) => {
            return Err(RemoteError::Http(format!("HTTP {code} for {url}")));
        }
        Err(e) => return Err(RemoteError::Http(format!("{url}: {e}"))),
    };

    let mut body = Vec::new();
    resp.into_body()
        .into_reader()
        .read_to_end(&mut body)
        .map_err(|e| RemoteError::Http(format!("{url}: {e}")))?;
    Ok(body)
}

impl RepositoryReader for HttpRepository {
    fn location(&self) -> String {
        self.base_url.clone()
    }

    fn read_file(&self, path: &str) -> Result<Vec<u8>, RemoteError> {
        let url = self.url(path);
        tracing::debug!("GET {url}");
        get_bytes(&self.agent, &url, None)
    }
}
