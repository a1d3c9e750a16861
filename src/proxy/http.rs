//! HTTP proxy dispatching on session mode

use std::sync::Arc;

use hyper::body::Body;
use hyper::{Method, Request, Response};
use tracing::{debug, warn};

use crate::config::LimitsConfig;
use crate::network::{build_uri, strip_headers, BoxError, HttpHandler, ProxyBody, Upstream};
use crate::recording::{CapturedRequest, RecordingEngine};
use crate::replay::{PlaybackEngine, PlaybackStats};
use crate::session::{Mode, SessionManager};
use crate::{Result, TapeError};

use super::admin::{self, AdminRoute};
use super::{
    header_str, PROXY_HEADERS, RECORDING_ID_HEADER, RECORDING_MODE_HEADER, UPSTREAM_BASE_HEADER,
};

/// Routes every inbound request to the management surface, the upstream,
/// or a session's recording
pub struct ProxyService<U> {
    sessions: Arc<SessionManager>,
    upstream: Arc<U>,
    recorder: RecordingEngine<U>,
    player: PlaybackEngine,
    default_upstream: Option<String>,
    limits: LimitsConfig,
}

impl<U: Upstream> ProxyService<U> {
    /// Create a proxy service
    #[must_use]
    pub fn new(
        sessions: Arc<SessionManager>,
        upstream: U,
        default_upstream: Option<String>,
        limits: LimitsConfig,
    ) -> Self {
        let upstream = Arc::new(upstream);
        Self {
            sessions,
            recorder: RecordingEngine::new(Arc::clone(&upstream)),
            upstream,
            player: PlaybackEngine::new(),
            default_upstream,
            limits,
        }
    }

    /// Session registry
    #[must_use]
    pub fn sessions(&self) -> &Arc<SessionManager> {
        &self.sessions
    }

    /// Playback hit/miss counters
    #[must_use]
    pub fn playback_stats(&self) -> PlaybackStats {
        self.player.stats()
    }

    /// Handle one request. Failures become structured error responses.
    pub async fn handle<B>(&self, request: Request<B>) -> Response<ProxyBody>
    where
        B: Body,
        B::Error: Into<BoxError>,
    {
        let method = request.method().clone();
        let uri = request.uri().clone();

        match self.dispatch(request).await {
            Ok(response) => response,
            Err(e) => {
                warn!("{} {} failed: {}", method, uri, e);
                HttpHandler::error_response(&e)
            }
        }
    }

    async fn dispatch<B>(&self, request: Request<B>) -> Result<Response<ProxyBody>>
    where
        B: Body,
        B::Error: Into<BoxError>,
    {
        HttpHandler::validate_request(
            &request,
            self.limits.max_request_size,
            self.limits.max_headers,
        )?;

        let (parts, body) = request.into_parts();
        let body = HttpHandler::read_body(body, self.limits.max_request_size).await?;
        let upstream_base = header_str(&parts.headers, UPSTREAM_BASE_HEADER);

        if upstream_base.is_none() && parts.method == Method::POST {
            if let Some(route) = AdminRoute::parse(parts.uri.path()) {
                debug!("Management request {:?}", route);
                return admin::handle(&self.sessions, route, &parts.headers, &body).await;
            }
        }

        let session = header_str(&parts.headers, RECORDING_ID_HEADER)
            .map(|id| self.sessions.get(id))
            .transpose()?;
        let forced_none = header_str(&parts.headers, RECORDING_MODE_HEADER)
            .is_some_and(|mode| mode.eq_ignore_ascii_case("none"));

        let base = upstream_base
            .or(self.default_upstream.as_deref())
            .ok_or_else(|| {
                TapeError::UpstreamError(format!(
                    "No upstream for {} {}: set {UPSTREAM_BASE_HEADER} or default_upstream",
                    parts.method, parts.uri
                ))
            })?;
        let path_and_query = parts.uri.path_and_query().map_or("/", |pq| pq.as_str());

        let mut headers = HttpHandler::capture_headers(&parts.headers);
        strip_headers(&mut headers, PROXY_HEADERS);

        let mut captured =
            CapturedRequest::new(parts.method.as_str(), &build_uri(base, path_and_query)?)
                .with_body(body.to_vec());
        captured.headers = headers;

        let response = match session {
            Some(session) if !forced_none => match session.mode() {
                Mode::Record => self.recorder.record(&session, captured).await?,
                Mode::Playback => self.player.play(&session, captured).await?,
                Mode::Passthrough => self.upstream.forward(&captured).await?,
            },
            _ => {
                debug!("Pass-through {}", captured.describe());
                self.upstream.forward(&captured).await?
            }
        };

        Ok(HttpHandler::from_captured(response))
    }
}
