//! Interaction matching for playback
//!
//! A [`Matcher`] picks which of a session's remaining recorded interactions
//! answers a live request. Every implementation must fail with an
//! informative `NoMatch` (see [`no_match`]) when nothing fits.

mod body_field;
mod default;
mod normalize;

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::recording::{CapturedRequest, Interaction};
use crate::{Result, TapeError};

pub use body_field::BodyFieldMatcher;
pub use default::{DefaultMatcher, VOLATILE_HEADERS};
pub use normalize::{bodies_equal, canonical_headers, normalize_uri, NormalizedUri};

/// A recorded interaction still eligible for matching
#[derive(Debug, Clone, Copy)]
pub struct Candidate<'a> {
    /// Position in the recording
    pub index: usize,
    /// The recorded interaction
    pub interaction: &'a Interaction,
}

/// Strategy selecting the recorded interaction for a live request
pub trait Matcher: Send + Sync + fmt::Debug {
    /// Short name for logs
    fn name(&self) -> &'static str;

    /// Select among `candidates` (in recorded order) and return the chosen
    /// candidate's recording index.
    ///
    /// # Errors
    ///
    /// Returns `NoMatch` listing the request and every candidate
    fn select(&self, request: &CapturedRequest, candidates: &[Candidate<'_>]) -> Result<usize>;
}

/// Build the `NoMatch` error for `request` against `candidates`
#[must_use]
pub fn no_match(request: &CapturedRequest, candidates: &[Candidate<'_>]) -> TapeError {
    TapeError::NoMatch {
        method: request.method.clone(),
        uri: request.uri.clone(),
        remaining: candidates
            .iter()
            .map(|c| c.interaction.request.describe())
            .collect(),
    }
}

/// Which matcher implementation to use
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MatcherKind {
    /// Method + normalized URI, optional headers and body
    #[default]
    Default,
    /// Method + normalized URI + one JSON body field
    BodyField,
}

/// Declarative matcher settings, shared by the config file and the admin
/// endpoint
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatcherConfig {
    /// Implementation
    pub kind: MatcherKind,
    /// Require equal bodies (bytes, or JSON structure)
    pub compare_bodies: bool,
    /// Require equal headers
    pub compare_headers: bool,
    /// Headers excluded from comparison, on top of [`VOLATILE_HEADERS`]
    pub ignored_headers: Vec<String>,
    /// Query parameters stripped before comparing URIs
    pub ignored_query_parameters: Vec<String>,
    /// JSON field compared by the body-field matcher
    pub body_field: Option<String>,
}

impl MatcherConfig {
    /// Build the configured matcher
    ///
    /// # Errors
    ///
    /// Returns error if the body-field matcher has no field
    pub fn build(&self) -> Result<Arc<dyn Matcher>> {
        match self.kind {
            MatcherKind::Default => Ok(Arc::new(DefaultMatcher::new(self))),
            MatcherKind::BodyField => {
                let field = self
                    .body_field
                    .as_deref()
                    .filter(|f| !f.is_empty())
                    .ok_or_else(|| {
                        TapeError::ConfigError(
                            "body-field matcher requires 'body_field'".to_string(),
                        )
                    })?;
                Ok(Arc::new(BodyFieldMatcher::new(
                    field,
                    self.ignored_query_parameters.clone(),
                )))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recording::CapturedResponse;

    #[test]
    fn test_config_defaults() {
        let config: MatcherConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config.kind, MatcherKind::Default);
        assert!(!config.compare_bodies);
        assert_eq!(config.build().unwrap().name(), "default");
    }

    #[test]
    fn test_config_body_field_requires_field() {
        let config: MatcherConfig = serde_json::from_str(r#"{"kind":"body-field"}"#).unwrap();
        assert!(config.build().is_err());

        let config: MatcherConfig =
            serde_json::from_str(r#"{"kind":"body-field","body_field":"op"}"#).unwrap();
        assert_eq!(config.build().unwrap().name(), "body-field");
    }

    #[test]
    fn test_no_match_lists_candidates() {
        let recorded = Interaction {
            request: CapturedRequest::new("GET", "http://h/a"),
            response: CapturedResponse::new(200, Vec::new()),
        };
        let candidates = [Candidate {
            index: 0,
            interaction: &recorded,
        }];

        let error = no_match(&CapturedRequest::new("GET", "http://h/b"), &candidates);
        match error {
            TapeError::NoMatch {
                method,
                uri,
                remaining,
            } => {
                assert_eq!(method, "GET");
                assert_eq!(uri, "http://h/b");
                assert_eq!(remaining, vec!["GET http://h/a".to_string()]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
