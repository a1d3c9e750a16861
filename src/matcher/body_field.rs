//! Matcher keyed on a single JSON body field

use serde_json::Value;

use super::normalize::normalize_uri;
use super::{no_match, Candidate, Matcher};
use crate::json;
use crate::recording::CapturedRequest;
use crate::Result;

/// Matches on method, normalized URI and one top-level JSON body field
/// (looked up case-insensitively), ignoring the rest of the body.
///
/// Useful for RPC-style APIs where every call goes to the same URI and the
/// operation is named inside the payload.
#[derive(Debug, Clone)]
pub struct BodyFieldMatcher {
    field: String,
    ignored_query_parameters: Vec<String>,
}

impl BodyFieldMatcher {
    /// Create a matcher for `field`
    #[must_use]
    pub fn new(field: &str, ignored_query_parameters: Vec<String>) -> Self {
        Self {
            field: field.to_string(),
            ignored_query_parameters,
        }
    }

    fn field_value(&self, request: &CapturedRequest) -> Option<Value> {
        let body = request.body.as_deref()?;
        let document: Value = serde_json::from_slice(body).ok()?;
        json::get_key(&document, &self.field).cloned()
    }
}

impl Matcher for BodyFieldMatcher {
    fn name(&self) -> &'static str {
        "body-field"
    }

    fn select(&self, request: &CapturedRequest, candidates: &[Candidate<'_>]) -> Result<usize> {
        let live_uri = normalize_uri(&request.uri, &self.ignored_query_parameters);
        let live_field = self.field_value(request);

        candidates
            .iter()
            .find(|candidate| {
                let recorded = &candidate.interaction.request;
                recorded.method.eq_ignore_ascii_case(&request.method)
                    && normalize_uri(&recorded.uri, &self.ignored_query_parameters) == live_uri
                    && self.field_value(recorded) == live_field
            })
            .map(|candidate| candidate.index)
            .ok_or_else(|| no_match(request, candidates))
    }
}
