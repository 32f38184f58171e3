//! Forwarding of unmatched requests to a real upstream.

use crate::config::PassThroughConfig;
use crate::http::{HttpRequest, HttpResponse};
use std::time::{Duration, Instant};
use tracing::debug;

pub const PROXIED_HEADER: &str = "x-mimic-proxied";

/// Request headers never forwarded upstream
const SKIPPED_REQUEST_HEADERS: &[&str] = &["host", "content-length", "connection", "keep-alive"];

/// Response headers never relayed back
const SKIPPED_RESPONSE_HEADERS: &[&str] =
    &["transfer-encoding", "connection", "keep-alive", "content-length"];

static HTTP_CLIENT: std::sync::OnceLock<reqwest::Client> = std::sync::OnceLock::new();

fn get_http_client() -> &'static reqwest::Client {
    HTTP_CLIENT.get_or_init(|| {
        reqwest::Client::builder()
            .pool_max_idle_per_host(0) // Disable connection pooling to avoid stale connections
            .build()
            .expect("Failed to create HTTP client")
    })
}

#[derive(Debug, thiserror::Error)]
pub enum PassThroughError {
    #[error("invalid method '{0}'")]
    Method(String),
    #[error("upstream {url} timed out after {timeout_ms}ms")]
    Timeout { url: String, timeout_ms: u64 },
    #[error("upstream {url} failed: {source}")]
    Upstream {
        url: String,
        #[source]
        source: reqwest::Error,
    },
}

impl PassThroughError {
    /// 502 returned to the client
    pub fn to_response(&self) -> HttpResponse {
        HttpResponse::error(502, &self.to_string()).with_header(PROXIED_HEADER, "true")
    }
}

#[derive(Debug, Clone)]
pub struct PassThrough {
    base_url: String,
    timeout: Duration,
}

impl PassThrough {
    pub fn new(config: &PassThroughConfig) -> Self {
        Self {
            base_url: config.url.trim_end_matches('/').to_string(),
            timeout: Duration::from_millis(config.timeout_ms),
        }
    }

    pub fn target_url(&self, request: &HttpRequest) -> String {
        let mut url = format!("{}{}", self.base_url, request.path);
        if !request.raw_query.is_empty() {
            url.push('?');
            url.push_str(&request.raw_query);
        }
        url
    }

    /// Forward the request verbatim and relay the upstream response.
    pub async fn forward(&self, request: &HttpRequest) -> Result<HttpResponse, PassThroughError> {
        let url = self.target_url(request);
        let method = reqwest::Method::from_bytes(request.method.as_bytes())
            .map_err(|_| PassThroughError::Method(request.method.clone()))?;

        let mut upstream = get_http_client()
            .request(method, &url)
            .timeout(self.timeout);
        for (key, value) in &request.headers {
            if !SKIPPED_REQUEST_HEADERS.contains(&key.as_str()) {
                upstream = upstream.header(key, value);
            }
        }
        if !request.raw_body.is_empty() {
            upstream = upstream.body(request.raw_body.clone());
        }

        let start = Instant::now();
        let to_error = |source: reqwest::Error| {
            if source.is_timeout() {
                PassThroughError::Timeout {
                    url: url.clone(),
                    timeout_ms: self.timeout.as_millis() as u64,
                }
            } else {
                PassThroughError::Upstream {
                    url: url.clone(),
                    source,
                }
            }
        };

        let response = upstream.send().await.map_err(to_error)?;
        let status = response.status().as_u16();
        // Every value of a repeated header is relayed
        let headers: Vec<(String, String)> = response
            .headers()
            .iter()
            .filter(|(k, _)| !SKIPPED_RESPONSE_HEADERS.contains(&k.as_str()))
            .map(|(k, v)| (k.to_string(), String::from_utf8_lossy(v.as_bytes()).into_owned()))
            .collect();
        let body = response.bytes().await.map_err(to_error)?;

        debug!(
            url = %url,
            status,
            latency_ms = start.elapsed().as_millis() as u64,
            "Pass-through response received"
        );

        let mut relayed = HttpResponse::new(status, body);
        relayed.headers = headers;
        Ok(relayed.with_header(PROXIED_HEADER, "true"))
    }
}
