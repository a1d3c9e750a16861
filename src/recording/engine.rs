//! Record path: forward upstream, capture, sanitize, append

use std::sync::Arc;

use tracing::{debug, warn};

use crate::network::Upstream;
use crate::session::Session;
use crate::{Result, TapeError};

use super::{CapturedRequest, CapturedResponse, Interaction};

/// Forwards requests for record sessions and captures the exchanges
pub struct RecordingEngine<U> {
    upstream: Arc<U>,
}

impl<U: Upstream> RecordingEngine<U> {
    /// Create a recording engine forwarding through `upstream`
    #[must_use]
    pub fn new(upstream: Arc<U>) -> Self {
        Self { upstream }
    }

    /// Forward `request`, append the sanitized exchange to the session's
    /// recording and return the real, unsanitized response.
    ///
    /// The session lock is only taken after the response is fully buffered,
    /// and the exchange is appended in one step. Nothing is appended when
    /// forwarding fails.
    ///
    /// # Errors
    ///
    /// Returns `UpstreamError` or `PayloadTooLarge` from the upstream, and
    /// `SessionNotFound` if the session was stopped while the request was in
    /// flight
    pub async fn record(&self, session: &Session, request: CapturedRequest) -> Result<CapturedResponse> {
        let response = match self.upstream.forward(&request).await {
            Ok(response) => response,
            Err(e) => {
                warn!(
                    "Record session {}: {} failed: {}",
                    session.id(),
                    request.describe(),
                    e
                );
                return Err(e);
            }
        };

        let description = request.describe();
        let status = response.status;

        let count = {
            let mut state = session.lock().await;
            if state
                .append(Interaction {
                    request,
                    response: response.clone(),
                })
                .is_err()
            {
                warn!(
                    "Record session {} stopped before {} was captured",
                    session.id(),
                    description
                );
                return Err(TapeError::SessionNotFound(session.id().to_string()));
            }
            state.bound_recording().len()
        };

        debug!(
            "Recorded {} -> {} (session: {}, count: {})",
            description,
            status,
            session.id(),
            count
        );

        Ok(response)
    }
}
