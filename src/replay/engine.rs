//! Playback engine for serving recorded responses

use std::sync::atomic::{AtomicUsize, Ordering};

use tracing::{debug, warn};

use crate::recording::{CapturedRequest, CapturedResponse};
use crate::session::Session;
use crate::Result;

/// Answers playback sessions from their recordings
#[derive(Debug, Default)]
pub struct PlaybackEngine {
    hits: AtomicUsize,
    misses: AtomicUsize,
}

impl PlaybackEngine {
    /// Create a new playback engine
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer `request` from the session's recording.
    ///
    /// The request is sanitized with the session's pipeline (seeded with the
    /// recording's variables, so known secrets map to their recorded
    /// placeholders) and its variable families collapsed, so a freshly
    /// generated value still lines up with the recorded placeholder. It is
    /// then matched against the remaining entries, and the chosen response is
    /// returned with its placeholders restored. Matching and consumption
    /// happen under the session lock.
    ///
    /// # Errors
    ///
    /// Returns `NoMatch` if no remaining entry answers the request
    pub async fn play(&self, session: &Session, mut request: CapturedRequest) -> Result<CapturedResponse> {
        let mut state = session.lock().await;

        state.prepare_live(&mut request);

        let index = match state.select(&request) {
            Ok(index) => index,
            Err(e) => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                warn!("Playback miss in session {}: {}", session.id(), request.describe());
                return Err(e);
            }
        };

        let recording = state.bound_recording();
        let mut response = recording.entries[index].response.clone();
        recording.variables.restore_response(&mut response);
        let remaining = state.remaining_count();
        drop(state);

        self.hits.fetch_add(1, Ordering::Relaxed);
        debug!(
            "Playback hit: {} -> entry {} ({}), {} remaining (session: {})",
            request.describe(),
            index,
            response.status,
            remaining,
            session.id()
        );

        Ok(response)
    }

    /// Hit and miss counters
    #[must_use]
    pub fn stats(&self) -> PlaybackStats {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;

        PlaybackStats {
            hits,
            misses,
            hit_rate: if total == 0 {
                0.0
            } else {
                hits as f64 / total as f64
            },
        }
    }
}

/// Playback statistics
#[derive(Debug, Clone, Copy)]
pub struct PlaybackStats {
    /// Requests answered from a recording
    pub hits: usize,
    /// Requests with no matching entry
    pub misses: usize,
    /// Hit rate (0.0 to 1.0)
    pub hit_rate: f64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::matcher::DefaultMatcher;
    use crate::recording::{Interaction, Recording};
    use crate::sanitizer::{SanitizerPipeline, SanitizerSpec};
    use crate::session::{Mode, SessionState};
    use crate::TapeError;

    fn playback_session(recording: Recording, sanitizers: SanitizerPipeline, repeatable: bool) -> Session {
        Session::new(
            "p1",
            Mode::Playback,
            "rec",
            SessionState::playback(
                recording,
                Arc::new(DefaultMatcher::default()),
                sanitizers,
                repeatable,
            ),
        )
    }

    fn poll_recording() -> Recording {
        let mut recording = Recording::new();
        for status in ["pending", "done"] {
            recording.entries.push(Interaction {
                request: CapturedRequest::new("GET", "http://h/poll"),
                response: CapturedResponse::new(200, format!(r#"{{"status":"{status}"}}"#)),
            });
        }
        recording
    }

    #[tokio::test]
    async fn test_sequential_consumption() {
        let engine = PlaybackEngine::new();
        let session = playback_session(poll_recording(), SanitizerPipeline::new(), false);

        let first = engine
            .play(&session, CapturedRequest::new("GET", "http://h/poll"))
            .await
            .unwrap();
        let second = engine
            .play(&session, CapturedRequest::new("GET", "http://h/poll"))
            .await
            .unwrap();

        assert_eq!(first.body.as_deref(), Some(br#"{"status":"pending"}"#.as_slice()));
        assert_eq!(second.body.as_deref(), Some(br#"{"status":"done"}"#.as_slice()));

        let exhausted = engine
            .play(&session, CapturedRequest::new("GET", "http://h/poll"))
            .await;
        assert!(matches!(exhausted, Err(TapeError::NoMatch { .. })));

        let stats = engine.stats();
        assert_eq!(stats.hits, 2);
        assert_eq!(stats.misses, 1);
    }

    #[tokio::test]
    async fn test_repeatable_playback() {
        let engine = PlaybackEngine::new();
        let session = playback_session(poll_recording(), SanitizerPipeline::new(), true);

        for _ in 0..4 {
            let response = engine
                .play(&session, CapturedRequest::new("GET", "http://h/poll"))
                .await
                .unwrap();
            assert_eq!(response.body.as_deref(), Some(br#"{"status":"pending"}"#.as_slice()));
        }
    }

    #[tokio::test]
    async fn test_placeholders_restored_and_request_sanitized() {
        let spec: SanitizerSpec = serde_json::from_str(
            r#"{"kind":"variable","target":"body","pattern":"SECRET[0-9]+","variable":"var1"}"#,
        )
        .unwrap();
        let pipeline = SanitizerPipeline::from_specs(&[spec]).unwrap();

        let mut recording = Recording::new();
        recording.variables.insert("var1", "SECRET123");
        recording.entries.push(Interaction {
            request: CapturedRequest::new("POST", "http://h/login").with_body(r#"{"key":"${var1}"}"#),
            response: CapturedResponse::new(200, r#"{"echo":"${var1}"}"#)
                .with_header("X-Token", "${var1}"),
        });

        let engine = PlaybackEngine::new();
        let session = playback_session(recording, pipeline, false);

        let live = CapturedRequest::new("POST", "http://h/login").with_body(r#"{"key":"SECRET123"}"#);
        let response = engine.play(&session, live).await.unwrap();

        assert_eq!(response.body.as_deref(), Some(br#"{"echo":"SECRET123"}"#.as_slice()));
        assert_eq!(response.headers.get("x-token"), Some("SECRET123"));

        // The scratch table never leaks back into the recording.
        let state = session.lock().await;
        assert_eq!(state.bound_recording().variables.len(), 1);
    }

    #[tokio::test]
    async fn test_no_match_lists_remaining() {
        let mut recording = Recording::new();
        recording.entries.push(Interaction {
            request: CapturedRequest::new("GET", "http://h/a"),
            response: CapturedResponse::new(200, "a"),
        });

        let engine = PlaybackEngine::new();
        let session = playback_session(recording, SanitizerPipeline::new(), false);

        match engine.play(&session, CapturedRequest::new("GET", "http://h/b")).await {
            Err(TapeError::NoMatch { remaining, .. }) => {
                assert_eq!(remaining, vec!["GET http://h/a".to_string()]);
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_plays_never_share_an_entry() {
        let mut recording = Recording::new();
        recording.entries.push(Interaction {
            request: CapturedRequest::new("GET", "http://h/once"),
            response: CapturedResponse::new(200, "once"),
        });

        let engine = Arc::new(PlaybackEngine::new());
        let session = Arc::new(playback_session(recording, SanitizerPipeline::new(), false));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let engine = Arc::clone(&engine);
            let session = Arc::clone(&session);
            handles.push(tokio::spawn(async move {
                engine
                    .play(&session, CapturedRequest::new("GET", "http://h/once"))
                    .await
            }));
        }

        let mut served = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(response) => {
                    assert_eq!(response.body.as_deref(), Some(b"once".as_slice()));
                    served += 1;
                }
                Err(e) => assert!(matches!(e, TapeError::NoMatch { .. })),
            }
        }

        assert_eq!(served, 1);
        assert_eq!(engine.stats().misses, 7);
    }
}
