//! Default matcher: method and normalized URI, optional headers and body

use tracing::trace;

use super::normalize::{bodies_equal, canonical_headers, normalize_uri};
use super::{no_match, Candidate, Matcher, MatcherConfig};
use crate::recording::CapturedRequest;
use crate::Result;

/// Headers that change on every call and never take part in matching
pub const VOLATILE_HEADERS: &[&str] = &[
    "date",
    "user-agent",
    "traceparent",
    "tracestate",
    "request-id",
    "x-request-id",
    "x-ms-client-request-id",
    "x-ms-date",
    "content-length",
    "connection",
    "host",
];

/// Matches on method and normalized URI, optionally on headers and body.
/// The first eligible candidate in recorded order wins.
#[derive(Debug, Clone)]
pub struct DefaultMatcher {
    compare_bodies: bool,
    compare_headers: bool,
    ignored_headers: Vec<String>,
    ignored_query_parameters: Vec<String>,
}

impl DefaultMatcher {
    /// Create a matcher from config
    #[must_use]
    pub fn new(config: &MatcherConfig) -> Self {
        let mut ignored_headers: Vec<String> =
            VOLATILE_HEADERS.iter().map(ToString::to_string).collect();
        ignored_headers.extend(config.ignored_headers.iter().cloned());

        Self {
            compare_bodies: config.compare_bodies,
            compare_headers: config.compare_headers,
            ignored_headers,
            ignored_query_parameters: config.ignored_query_parameters.clone(),
        }
    }

    fn is_match(&self, live: &CapturedRequest, recorded: &CapturedRequest) -> bool {
        if !live.method.eq_ignore_ascii_case(&recorded.method) {
            return false;
        }

        if normalize_uri(&live.uri, &self.ignored_query_parameters)
            != normalize_uri(&recorded.uri, &self.ignored_query_parameters)
        {
            return false;
        }

        if self.compare_headers
            && canonical_headers(&live.headers, &self.ignored_headers)
                != canonical_headers(&recorded.headers, &self.ignored_headers)
        {
            return false;
        }

        !self.compare_bodies || bodies_equal(live.body.as_deref(), recorded.body.as_deref())
    }
}

impl Default for DefaultMatcher {
    fn default() -> Self {
        Self::new(&MatcherConfig::default())
    }
}

impl Matcher for DefaultMatcher {
    fn name(&self) -> &'static str {
        "default"
    }

    fn select(&self, request: &CapturedRequest, candidates: &[Candidate<'_>]) -> Result<usize> {
        let chosen = candidates
            .iter()
            .find(|candidate| self.is_match(request, &candidate.interaction.request))
            .map(|candidate| candidate.index);

        trace!(
            "default matcher: {} against {} candidates -> {:?}",
            request.describe(),
            candidates.len(),
            chosen
        );

        chosen.ok_or_else(|| no_match(request, candidates))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recording::{CapturedResponse, Interaction};
    use crate::TapeError;

    fn interaction(method: &str, uri: &str, body: &str, response: &str) -> Interaction {
        Interaction {
            request: CapturedRequest::new(method, uri).with_body(body),
            response: CapturedResponse::new(200, response),
        }
    }

    fn candidates(entries: &[Interaction]) -> Vec<Candidate<'_>> {
        entries
            .iter()
            .enumerate()
            .map(|(index, interaction)| Candidate { index, interaction })
            .collect()
    }

    #[test]
    fn test_matches_method_and_uri() {
        let entries = vec![
            interaction("GET", "http://h/a", "", "a"),
            interaction("GET", "http://h/b", "", "b"),
        ];
        let matcher = DefaultMatcher::default();

        let chosen = matcher
            .select(&CapturedRequest::new("GET", "HTTP://H/b"), &candidates(&entries))
            .unwrap();
        assert_eq!(chosen, 1);
    }

    #[test]
    fn test_method_mismatch() {
        let entries = vec![interaction("GET", "http://h/a", "", "a")];
        let result = DefaultMatcher::default()
            .select(&CapturedRequest::new("POST", "http://h/a"), &candidates(&entries));

        assert!(matches!(result, Err(TapeError::NoMatch { .. })));
    }

    #[test]
    fn test_oldest_first() {
        let entries = vec![
            interaction("GET", "http://h/poll", "", "pending"),
            interaction("GET", "http://h/poll", "", "done"),
        ];
        let all = candidates(&entries);

        let chosen = DefaultMatcher::default()
            .select(&CapturedRequest::new("GET", "http://h/poll"), &all)
            .unwrap();
        assert_eq!(chosen, 0);

        // Deterministic for identical inputs.
        let again = DefaultMatcher::default()
            .select(&CapturedRequest::new("GET", "http://h/poll"), &all)
            .unwrap();
        assert_eq!(again, chosen);
    }

    #[test]
    fn test_body_ignored_by_default() {
        let entries = vec![interaction("POST", "http://h/a", "{\"x\":1}", "ok")];
        let live = CapturedRequest::new("POST", "http://h/a").with_body("{\"x\":2}");

        assert!(DefaultMatcher::default()
            .select(&live, &candidates(&entries))
            .is_ok());
    }

    #[test]
    fn test_body_comparison_disambiguates() {
        let entries = vec![
            interaction("POST", "http://h/a", r#"{"x":1,"y":2}"#, "one"),
            interaction("POST", "http://h/a", r#"{"x":2,"y":2}"#, "two"),
        ];
        let matcher = DefaultMatcher::new(&MatcherConfig {
            compare_bodies: true,
            ..MatcherConfig::default()
        });

        let live = CapturedRequest::new("POST", "http://h/a").with_body(r#"{"y":2,"x":2}"#);
        assert_eq!(matcher.select(&live, &candidates(&entries)).unwrap(), 1);

        let unknown = CapturedRequest::new("POST", "http://h/a").with_body(r#"{"x":3}"#);
        assert!(matcher.select(&unknown, &candidates(&entries)).is_err());
    }

    #[test]
    fn test_header_comparison_skips_volatile() {
        let mut recorded = interaction("GET", "http://h/a", "", "ok");
        recorded.request.headers.append("Accept", "application/json");
        recorded.request.headers.append("Date", "Mon, 01 Jan 2024 00:00:00 GMT");
        recorded.request.headers.append("X-Nonce", "1");
        let entries = vec![recorded];

        let matcher = DefaultMatcher::new(&MatcherConfig {
            compare_headers: true,
            ignored_headers: vec!["x-nonce".to_string()],
            ..MatcherConfig::default()
        });

        let live = CapturedRequest::new("GET", "http://h/a")
            .with_header("accept", "application/json")
            .with_header("date", "Tue, 02 Jan 2024 00:00:00 GMT")
            .with_header("x-nonce", "2");
        assert!(matcher.select(&live, &candidates(&entries)).is_ok());

        let wrong_accept = CapturedRequest::new("GET", "http://h/a").with_header("Accept", "text/xml");
        assert!(matcher.select(&wrong_accept, &candidates(&entries)).is_err());
    }

    #[test]
    fn test_ignored_query_parameters() {
        let entries = vec![interaction("GET", "http://h/a?ts=1&id=7", "", "ok")];
        let matcher = DefaultMatcher::new(&MatcherConfig {
            ignored_query_parameters: vec!["ts".to_string()],
            ..MatcherConfig::default()
        });

        let live = CapturedRequest::new("GET", "http://h/a?id=7&ts=999");
        assert_eq!(matcher.select(&live, &candidates(&entries)).unwrap(), 0);
    }
}
