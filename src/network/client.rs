//! HTTP client for forwarding requests to the upstream service

use std::future::Future;
use std::time::Duration;

use http_body_util::Full;
use hyper::body::Bytes;
use hyper::{Method, Request, Uri};
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use tracing::{debug, warn};

use crate::recording::{CapturedRequest, CapturedResponse, Headers};
use crate::{Result, TapeError};

use super::HttpHandler;

/// Headers that only make sense on a single connection and are never
/// forwarded
pub const HOP_BY_HOP_HEADERS: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "proxy-connection",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
    "host",
];

/// Something that can execute a request against the real service
pub trait Upstream: Send + Sync + 'static {
    /// Forward `request` and buffer the full response.
    ///
    /// # Errors
    ///
    /// Returns `UpstreamError` on transport failure or timeout, and
    /// `PayloadTooLarge` if the response body exceeds the capture ceiling
    fn forward(
        &self,
        request: &CapturedRequest,
    ) -> impl Future<Output = Result<CapturedResponse>> + Send;
}

/// Upstream backed by a pooled hyper client (plain HTTP)
#[derive(Clone)]
pub struct HttpClient {
    client: Client<HttpConnector, Full<Bytes>>,
    timeout: Duration,
    max_response_size: usize,
}

impl HttpClient {
    /// Create a new HTTP client
    #[must_use]
    pub fn new(timeout: Duration, max_response_size: usize) -> Self {
        let client = Client::builder(TokioExecutor::new())
            .pool_idle_timeout(Duration::from_secs(90))
            .pool_max_idle_per_host(10)
            .build_http();

        Self {
            client,
            timeout,
            max_response_size,
        }
    }

    async fn send(&self, request: &CapturedRequest) -> Result<CapturedResponse> {
        let uri = request
            .uri
            .parse::<Uri>()
            .map_err(|e| TapeError::UpstreamError(format!("Invalid URI '{}': {e}", request.uri)))?;

        let method = request.method.parse::<Method>().map_err(|e| {
            TapeError::UpstreamError(format!("Invalid HTTP method '{}': {e}", request.method))
        })?;

        let mut request_builder = Request::builder().method(method).uri(uri);
        for (name, values) in request.headers.iter() {
            for value in values {
                request_builder = request_builder.header(name, value.as_str());
            }
        }

        let body = request.body.clone().map(Bytes::from).unwrap_or_default();
        let http_request = request_builder
            .body(Full::new(body))
            .map_err(|e| TapeError::UpstreamError(format!("Failed to build request: {e}")))?;

        let response = self.client.request(http_request).await.map_err(|e| {
            warn!("Request failed: {e}");
            TapeError::UpstreamError(format!("Request failed: {e}"))
        })?;

        let status = response.status().as_u16();
        let mut headers = Headers::new();
        for (name, value) in response.headers() {
            headers.append(
                name.as_str(),
                String::from_utf8_lossy(value.as_bytes()).into_owned(),
            );
        }

        let body = HttpHandler::read_body(response.into_body(), self.max_response_size)
            .await
            .map_err(|e| match e {
                TapeError::PayloadTooLarge { .. } => e,
                other => TapeError::UpstreamError(other.to_string()),
            })?;

        let mut captured = CapturedResponse::new(status, body.to_vec());
        captured.headers = headers;
        Ok(captured)
    }
}

impl Upstream for HttpClient {
    async fn forward(&self, request: &CapturedRequest) -> Result<CapturedResponse> {
        debug!("Forwarding {}", request.describe());

        tokio::time::timeout(self.timeout, self.send(request))
            .await
            .map_err(|_| {
                TapeError::UpstreamError(format!(
                    "Upstream timed out after {}ms: {}",
                    self.timeout.as_millis(),
                    request.describe()
                ))
            })?
    }
}

/// Join an upstream base (`scheme://authority[/prefix]`) with the path and
/// query of an inbound request target
///
/// # Errors
///
/// Returns error if the base is not an absolute URI
pub fn build_uri(base: &str, path_and_query: &str) -> Result<String> {
    let base = base.trim().trim_end_matches('/');
    let parsed = base
        .parse::<Uri>()
        .map_err(|e| TapeError::UpstreamError(format!("Invalid upstream base '{base}': {e}")))?;
    if parsed.scheme().is_none() || parsed.authority().is_none() {
        return Err(TapeError::UpstreamError(format!(
            "Upstream base must be absolute: '{base}'"
        )));
    }

    let suffix = if path_and_query.starts_with('/') {
        path_and_query.to_string()
    } else {
        format!("/{path_and_query}")
    };
    Ok(format!("{base}{suffix}"))
}

/// Remove hop-by-hop headers and every header named in `extra`
pub fn strip_headers(headers: &mut Headers, extra: &[&str]) {
    for name in HOP_BY_HOP_HEADERS.iter().chain(extra) {
        headers.remove(name);
    }
}
