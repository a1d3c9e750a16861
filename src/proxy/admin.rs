//! Management endpoints
//!
//! `POST /record/start`, `/record/stop`, `/playback/start`,
//! `/playback/stop`, `/admin/add-sanitizer` and `/admin/set-matcher`.
//! JSON bodies are optional where noted; keys are matched case-insensitively.

use hyper::header::HeaderValue;
use hyper::{HeaderMap, Response, StatusCode};
use serde_json::json;
use tracing::info;

use crate::json;
use crate::matcher::MatcherConfig;
use crate::network::{HttpHandler, ProxyBody};
use crate::sanitizer::SanitizerSpec;
use crate::session::{Mode, SessionManager};
use crate::{Result, TapeError};

use super::{header_str, RECORDING_FILE_KEY, RECORDING_ID_HEADER, RECORDING_SAVE_HEADER};

/// A management endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdminRoute {
    /// Start a record session
    RecordStart,
    /// Stop a record session, optionally saving
    RecordStop,
    /// Start a playback session
    PlaybackStart,
    /// Stop a playback session
    PlaybackStop,
    /// Add a sanitizer to a session or to the defaults
    AddSanitizer,
    /// Replace the matcher of a session or the default
    SetMatcher,
}

impl AdminRoute {
    /// Recognize a management path (case-insensitive, trailing slash
    /// ignored)
    #[must_use]
    pub fn parse(path: &str) -> Option<Self> {
        let path = path.trim_end_matches('/').to_ascii_lowercase();
        match path.as_str() {
            "/record/start" => Some(Self::RecordStart),
            "/record/stop" => Some(Self::RecordStop),
            "/playback/start" => Some(Self::PlaybackStart),
            "/playback/stop" => Some(Self::PlaybackStop),
            "/admin/add-sanitizer" | "/admin/addsanitizer" => Some(Self::AddSanitizer),
            "/admin/set-matcher" | "/admin/setmatcher" => Some(Self::SetMatcher),
            _ => None,
        }
    }
}

/// Execute a management request
///
/// # Errors
///
/// Returns `ParseError` (with the raw body) for malformed JSON, plus any
/// error from the session manager
pub async fn handle(
    sessions: &SessionManager,
    route: AdminRoute,
    headers: &HeaderMap,
    body: &[u8],
) -> Result<Response<ProxyBody>> {
    let document = json::parse_lenient(body)?;
    let session_id = header_str(headers, RECORDING_ID_HEADER);

    match route {
        AdminRoute::RecordStart => {
            let name = match &document {
                Some(doc) => json::get_string(doc, RECORDING_FILE_KEY)?,
                None => None,
            };
            let id = sessions.create(Mode::Record, name.as_deref()).await?;
            session_response(&id)
        }
        AdminRoute::PlaybackStart => {
            let doc = document.as_ref().ok_or_else(|| missing_file(body))?;
            let recording_id = json::get_string(doc, RECORDING_FILE_KEY)?
                .ok_or_else(|| missing_file(body))?;
            let repeatable = json::get_bool(doc, "repeatable").unwrap_or(false);

            let id = sessions.create_playback(&recording_id, repeatable).await?;
            session_response(&id)
        }
        AdminRoute::RecordStop => {
            let id = require_session_id(session_id)?;
            let save = header_str(headers, RECORDING_SAVE_HEADER)
                .map_or(true, |value| !value.eq_ignore_ascii_case("false"));

            let recording_id = sessions.stop(id, save).await?;
            Ok(HttpHandler::json_response(
                StatusCode::OK,
                &json!({ "RecordingId": recording_id }),
            ))
        }
        AdminRoute::PlaybackStop => {
            let id = require_session_id(session_id)?;
            sessions.stop(id, false).await?;
            Ok(HttpHandler::json_response(StatusCode::OK, &json!({})))
        }
        AdminRoute::AddSanitizer => {
            let doc = document.ok_or_else(|| TapeError::InvalidSanitizer(
                "request body must contain a sanitizer definition".to_string(),
            ))?;
            let spec: SanitizerSpec = serde_json::from_value(doc)
                .map_err(|e| TapeError::InvalidSanitizer(e.to_string()))?;
            let sanitizer = spec.build()?;

            let scope = if let Some(id) = session_id {
                sessions.get(id)?.lock().await.add_sanitizer(sanitizer);
                "session"
            } else {
                sessions.add_default_sanitizer(sanitizer).await;
                "global"
            };
            info!("Added {:?} sanitizer ({})", spec, scope);
            Ok(HttpHandler::json_response(
                StatusCode::OK,
                &json!({ "Scope": scope }),
            ))
        }
        AdminRoute::SetMatcher => {
            let config: MatcherConfig = match document {
                Some(doc) => serde_json::from_value(doc).map_err(|e| TapeError::ParseError {
                    detail: format!("Invalid matcher settings: {e}"),
                    raw: String::from_utf8_lossy(body).into_owned(),
                })?,
                None => MatcherConfig::default(),
            };
            let matcher = config.build()?;

            let scope = if let Some(id) = session_id {
                sessions.get(id)?.lock().await.set_matcher(matcher);
                "session"
            } else {
                sessions.set_default_matcher(matcher).await;
                "global"
            };
            info!("Set {:?} matcher ({})", config.kind, scope);
            Ok(HttpHandler::json_response(
                StatusCode::OK,
                &json!({ "Scope": scope }),
            ))
        }
    }
}

fn session_response(id: &str) -> Result<Response<ProxyBody>> {
    let mut response = HttpHandler::json_response(StatusCode::OK, &json!({ "SessionId": id }));
    let value = HeaderValue::from_str(id)
        .map_err(|e| TapeError::Other(format!("Invalid session id '{id}': {e}")))?;
    response.headers_mut().insert(RECORDING_ID_HEADER, value);
    Ok(response)
}

fn require_session_id(id: Option<&str>) -> Result<&str> {
    id.ok_or_else(|| TapeError::Other(format!("Missing {RECORDING_ID_HEADER} header")))
}

fn missing_file(body: &[u8]) -> TapeError {
    TapeError::ParseError {
        detail: format!("Body must contain a string '{RECORDING_FILE_KEY}'"),
        raw: String::from_utf8_lossy(body).into_owned(),
    }
}
