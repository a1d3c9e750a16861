//! Sanitizer pipeline
//!
//! Sanitizers scrub secrets out of captured traffic before it is persisted.
//! The same pipeline runs over live requests during playback, so a request
//! carrying a real secret compares equal to the recorded, sanitized one.
//!
//! Sanitizers run in configuration order and each one sees the output of the
//! previous one. Overlapping patterns are resolved by that order alone.

mod generalized;
mod structural;
mod variables;

use std::fmt;
use std::sync::Arc;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::recording::{CapturedRequest, CapturedResponse, Headers, Interaction};
use crate::{Result, TapeError};

pub use generalized::VariableSanitizer;
pub use structural::{HeaderSanitizer, JsonPathSanitizer, RegexSanitizer};
pub use variables::VariableTable;

/// Default literal written over scrubbed values
pub const DEFAULT_REPLACEMENT: &str = "Sanitized";

/// Part of an interaction a sanitizer rewrites
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    /// The full request URI
    Uri,
    /// Request and response bodies
    Body,
    /// Every value of the named header (case-insensitive), both directions
    Header(String),
}

/// A single transformation over one target
pub trait Sanitizer: Send + Sync + fmt::Debug {
    /// What this sanitizer rewrites
    fn target(&self) -> &Target;

    /// Rewrite `value`, recording any substituted variables.
    ///
    /// Returns `None` when the value is left unchanged.
    fn apply(&self, value: &str, variables: &mut VariableTable) -> Option<String>;

    /// Base variable name, for sanitizers that tokenize into variables
    fn variable(&self) -> Option<&str> {
        None
    }
}

/// Ordered list of sanitizers
#[derive(Debug, Clone, Default)]
pub struct SanitizerPipeline {
    sanitizers: Vec<Arc<dyn Sanitizer>>,
}

impl SanitizerPipeline {
    /// Create an empty pipeline
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a pipeline from declarative specs
    ///
    /// # Errors
    ///
    /// Returns error if any spec is invalid
    pub fn from_specs(specs: &[SanitizerSpec]) -> Result<Self> {
        let mut pipeline = Self::new();
        for spec in specs {
            pipeline.push(spec.build()?);
        }
        Ok(pipeline)
    }

    /// Append a sanitizer at the end of the pipeline
    pub fn push(&mut self, sanitizer: Arc<dyn Sanitizer>) {
        self.sanitizers.push(sanitizer);
    }

    /// Number of sanitizers
    #[must_use]
    pub fn len(&self) -> usize {
        self.sanitizers.len()
    }

    /// True if the pipeline does nothing
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sanitizers.is_empty()
    }

    /// Base names of every variable sanitizer, in pipeline order
    #[must_use]
    pub fn variable_bases(&self) -> Vec<String> {
        let mut bases: Vec<String> = Vec::new();
        for base in self.sanitizers.iter().filter_map(|s| s.variable()) {
            if !bases.iter().any(|b| b == base) {
                bases.push(base.to_string());
            }
        }
        bases
    }

    /// Sanitize the request half only (playback, before matching)
    pub fn sanitize_request(&self, request: &mut CapturedRequest, variables: &mut VariableTable) {
        for sanitizer in &self.sanitizers {
            apply_to_request(sanitizer.as_ref(), request, variables);
        }
        variables::encode_request(request);
    }

    /// Sanitize a full interaction (record, before persisting)
    pub fn sanitize_interaction(
        &self,
        interaction: &mut Interaction,
        variables: &mut VariableTable,
    ) {
        for sanitizer in &self.sanitizers {
            apply_to_request(sanitizer.as_ref(), &mut interaction.request, variables);
            apply_to_response(sanitizer.as_ref(), &mut interaction.response, variables);
        }
        variables::encode_request(&mut interaction.request);
        variables::encode_response(&mut interaction.response);
    }
}

fn apply_to_request(
    sanitizer: &dyn Sanitizer,
    request: &mut CapturedRequest,
    variables: &mut VariableTable,
) {
    match sanitizer.target() {
        Target::Uri => {
            if let Some(uri) = sanitizer.apply(&request.uri, variables) {
                request.uri = uri;
            }
        }
        Target::Body => apply_to_body(sanitizer, &mut request.body, variables),
        Target::Header(name) => apply_to_header(sanitizer, name, &mut request.headers, variables),
    }
}

fn apply_to_response(
    sanitizer: &dyn Sanitizer,
    response: &mut CapturedResponse,
    variables: &mut VariableTable,
) {
    match sanitizer.target() {
        Target::Uri => {}
        Target::Body => apply_to_body(sanitizer, &mut response.body, variables),
        Target::Header(name) => {
            apply_to_header(sanitizer, name, &mut response.headers, variables);
        }
    }
}

fn apply_to_body(
    sanitizer: &dyn Sanitizer,
    body: &mut Option<Vec<u8>>,
    variables: &mut VariableTable,
) {
    let Some(bytes) = body.as_mut() else {
        return;
    };
    // Binary bodies are stored as-is.
    let Ok(text) = std::str::from_utf8(bytes) else {
        return;
    };
    if let Some(sanitized) = sanitizer.apply(text, variables) {
        *bytes = sanitized.into_bytes();
    }
}

fn apply_to_header(
    sanitizer: &dyn Sanitizer,
    target: &str,
    headers: &mut Headers,
    variables: &mut VariableTable,
) {
    for (name, values) in headers.iter_mut() {
        if !name.eq_ignore_ascii_case(target) {
            continue;
        }
        for value in values.iter_mut() {
            if let Some(sanitized) = sanitizer.apply(value, variables) {
                *value = sanitized;
            }
        }
    }
}

/// Target selector used in declarative specs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetKind {
    /// Request URI
    Uri,
    /// Bodies
    Body,
    /// A named header
    Header,
}

/// Declarative sanitizer definition, shared by the config file and the
/// admin endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum SanitizerSpec {
    /// Regex substitution with a fixed literal
    Regex {
        /// Part to rewrite
        target: TargetKind,
        /// Header name when `target` is `header`
        #[serde(default)]
        header: Option<String>,
        /// Regular expression
        pattern: String,
        /// Only replace this capture group
        #[serde(default)]
        group: Option<usize>,
        /// Replacement literal
        #[serde(default = "default_replacement")]
        replacement: String,
    },
    /// Replace a whole header value
    Header {
        /// Header name
        header: String,
        /// Replacement literal
        #[serde(default = "default_replacement")]
        replacement: String,
    },
    /// Replace a value inside a JSON body
    JsonPath {
        /// Dotted path such as `$.credentials.password`
        path: String,
        /// Replacement literal
        #[serde(default = "default_replacement")]
        replacement: String,
    },
    /// Replace matches with a recorded placeholder variable
    Variable {
        /// Part to rewrite
        target: TargetKind,
        /// Header name when `target` is `header`
        #[serde(default)]
        header: Option<String>,
        /// Regular expression
        pattern: String,
        /// Only replace this capture group
        #[serde(default)]
        group: Option<usize>,
        /// Variable base name
        variable: String,
    },
}

fn default_replacement() -> String {
    DEFAULT_REPLACEMENT.to_string()
}

impl SanitizerSpec {
    /// Compile the spec into a sanitizer
    ///
    /// # Errors
    ///
    /// Returns error if the pattern does not compile or fields are missing
    pub fn build(&self) -> Result<Arc<dyn Sanitizer>> {
        match self {
            Self::Regex {
                target,
                header,
                pattern,
                group,
                replacement,
            } => {
                let target = resolve_target(*target, header.as_deref())?;
                let regex = compile(pattern, *group)?;
                Ok(Arc::new(RegexSanitizer::new(
                    target,
                    regex,
                    *group,
                    replacement.clone(),
                )))
            }
            Self::Header {
                header,
                replacement,
            } => {
                if header.trim().is_empty() {
                    return Err(TapeError::InvalidSanitizer(
                        "header sanitizer needs a header name".to_string(),
                    ));
                }
                Ok(Arc::new(HeaderSanitizer::new(header, replacement.clone())))
            }
            Self::JsonPath { path, replacement } => Ok(Arc::new(JsonPathSanitizer::parse(
                path,
                replacement.clone(),
            )?)),
            Self::Variable {
                target,
                header,
                pattern,
                group,
                variable,
            } => {
                if variable.is_empty() || variable.contains(['{', '}']) {
                    return Err(TapeError::InvalidSanitizer(format!(
                        "invalid variable name: '{variable}'"
                    )));
                }
                let target = resolve_target(*target, header.as_deref())?;
                let regex = compile(pattern, *group)?;
                Ok(Arc::new(VariableSanitizer::new(
                    target,
                    regex,
                    *group,
                    variable.clone(),
                )))
            }
        }
    }
}

fn resolve_target(kind: TargetKind, header: Option<&str>) -> Result<Target> {
    match kind {
        TargetKind::Uri => Ok(Target::Uri),
        TargetKind::Body => Ok(Target::Body),
        TargetKind::Header => match header {
            Some(name) if !name.trim().is_empty() => Ok(Target::Header(name.to_string())),
            _ => Err(TapeError::InvalidSanitizer(
                "target 'header' requires a 'header' name".to_string(),
            )),
        },
    }
}

fn compile(pattern: &str, group: Option<usize>) -> Result<Regex> {
    let regex = Regex::new(pattern)
        .map_err(|e| TapeError::InvalidSanitizer(format!("bad pattern '{pattern}': {e}")))?;

    if let Some(group) = group {
        if group >= regex.captures_len() {
            return Err(TapeError::InvalidSanitizer(format!(
                "pattern '{pattern}' has no capture group {group}"
            )));
        }
    }

    Ok(regex)
}

/// Replace the matches of `regex` (or one of its groups) in `value` using
/// `replace`. Shared by the regex and variable sanitizers.
pub(crate) fn replace_matches(
    regex: &Regex,
    group: Option<usize>,
    value: &str,
    mut replace: impl FnMut(&str) -> String,
) -> Option<String> {
    let mut output = String::with_capacity(value.len());
    let mut last = 0;
    let mut changed = false;

    for captures in regex.captures_iter(value) {
        let Some(span) = captures.get(group.unwrap_or(0)) else {
            continue;
        };
        if span.as_str().is_empty() {
            continue;
        }
        output.push_str(&value[last..span.start()]);
        output.push_str(&replace(span.as_str()));
        last = span.end();
        changed = true;
    }

    if !changed {
        return None;
    }
    output.push_str(&value[last..]);
    Some(output)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn login_interaction(secret: &str) -> Interaction {
        Interaction {
            request: CapturedRequest::new("POST", "http://example.com/login")
                .with_header("Authorization", &format!("Bearer {secret}"))
                .with_body(format!("{{\"key\":\"{secret}\"}}")),
            response: CapturedResponse::new(200, format!("{{\"echo\":\"{secret}\"}}")),
        }
    }

    #[test]
    fn test_spec_from_toml() {
        #[derive(Deserialize)]
        struct Section {
            sanitizers: Vec<SanitizerSpec>,
        }

        let section: Section = toml::from_str(
            r#"
            [[sanitizers]]
            kind = "variable"
            target = "body"
            pattern = "SECRET\\w+"
            variable = "var1"

            [[sanitizers]]
            kind = "header"
            header = "Authorization"
            "#,
        )
        .unwrap();

        let specs = section.sanitizers;
        assert_eq!(specs.len(), 2);
        assert!(matches!(
            &specs[1],
            SanitizerSpec::Header { replacement, .. } if replacement == DEFAULT_REPLACEMENT
        ));
    }

    #[test]
    fn test_spec_from_json() {
        let spec: SanitizerSpec = serde_json::from_str(
            r#"{"kind":"regex","target":"uri","pattern":"sig=([^&]+)","group":1}"#,
        )
        .unwrap();
        assert!(spec.build().is_ok());
    }

    #[test]
    fn test_invalid_specs_rejected() {
        let bad_regex = SanitizerSpec::Regex {
            target: TargetKind::Body,
            header: None,
            pattern: "(".to_string(),
            group: None,
            replacement: default_replacement(),
        };
        assert!(matches!(
            bad_regex.build(),
            Err(TapeError::InvalidSanitizer(_))
        ));

        let missing_header = SanitizerSpec::Variable {
            target: TargetKind::Header,
            header: None,
            pattern: ".+".to_string(),
            group: None,
            variable: "v".to_string(),
        };
        assert!(missing_header.build().is_err());

        let bad_group = SanitizerSpec::Regex {
            target: TargetKind::Body,
            header: None,
            pattern: "abc".to_string(),
            group: Some(1),
            replacement: default_replacement(),
        };
        assert!(bad_group.build().is_err());
    }

    #[test]
    fn test_pipeline_order_matters() {
        let upper = SanitizerSpec::Regex {
            target: TargetKind::Body,
            header: None,
            pattern: "abc".to_string(),
            group: None,
            replacement: "xyz".to_string(),
        };
        let second = SanitizerSpec::Regex {
            target: TargetKind::Body,
            header: None,
            pattern: "xyz".to_string(),
            group: None,
            replacement: "done".to_string(),
        };

        let mut forward = Interaction {
            request: CapturedRequest::new("POST", "http://h/").with_body("abc"),
            response: CapturedResponse::new(200, Vec::new()),
        };
        let mut reverse = forward.clone();
        let mut variables = VariableTable::new();

        SanitizerPipeline::from_specs(&[upper.clone(), second.clone()])
            .unwrap()
            .sanitize_interaction(&mut forward, &mut variables);
        SanitizerPipeline::from_specs(&[second, upper])
            .unwrap()
            .sanitize_interaction(&mut reverse, &mut variables);

        assert_eq!(forward.request.body.as_deref(), Some(&b"done"[..]));
        assert_eq!(reverse.request.body.as_deref(), Some(&b"xyz"[..]));
    }

    #[test]
    fn test_playback_request_matches_recorded_form() {
        let pipeline = SanitizerPipeline::from_specs(&[
            SanitizerSpec::Variable {
                target: TargetKind::Body,
                header: None,
                pattern: "SECRET\\w+".to_string(),
                group: None,
                variable: "var1".to_string(),
            },
            SanitizerSpec::Header {
                header: "authorization".to_string(),
                replacement: default_replacement(),
            },
        ])
        .unwrap();

        let mut recorded = login_interaction("SECRET123");
        let mut variables = VariableTable::new();
        pipeline.sanitize_interaction(&mut recorded, &mut variables);

        assert_eq!(
            recorded.request.body.as_deref(),
            Some(&b"{\"key\":\"${var1}\"}"[..])
        );
        assert_eq!(recorded.request.headers.get("Authorization"), Some("Sanitized"));
        assert_eq!(variables.get("var1"), Some("SECRET123"));

        let mut live = login_interaction("SECRET123").request;
        let mut scratch = variables.clone();
        pipeline.sanitize_request(&mut live, &mut scratch);
        assert_eq!(live, recorded.request);
        assert_eq!(scratch, variables);
    }

    #[test]
    fn test_variable_bases() {
        let spec = |variable: &str| SanitizerSpec::Variable {
            target: TargetKind::Uri,
            header: None,
            pattern: "[0-9]+".to_string(),
            group: None,
            variable: variable.to_string(),
        };
        let pipeline = SanitizerPipeline::from_specs(&[
            spec("id"),
            SanitizerSpec::Header {
                header: "authorization".to_string(),
                replacement: default_replacement(),
            },
            spec("page"),
            spec("id"),
        ])
        .unwrap();

        assert_eq!(pipeline.variable_bases(), ["id", "page"]);
    }

    #[test]
    fn test_literal_placeholder_text_escaped() {
        let mut interaction = Interaction {
            request: CapturedRequest::new("POST", "http://h/echo").with_body("echo ${token}"),
            response: CapturedResponse::new(200, "echo ${token}"),
        };
        let original = interaction.clone();
        let mut variables = VariableTable::new();

        SanitizerPipeline::new().sanitize_interaction(&mut interaction, &mut variables);
        assert_eq!(interaction.request.body.as_deref(), Some(&b"echo $${token}"[..]));

        variables.insert("token", "SECRET");
        variables.restore_interaction(&mut interaction);
        assert_eq!(interaction, original);
    }

    #[test]
    fn test_binary_body_untouched() {
        let pipeline = SanitizerPipeline::from_specs(&[SanitizerSpec::Regex {
            target: TargetKind::Body,
            header: None,
            pattern: ".".to_string(),
            group: None,
            replacement: "x".to_string(),
        }])
        .unwrap();

        let mut request = CapturedRequest::new("PUT", "http://h/blob").with_body(vec![0xff, 0xfe]);
        pipeline.sanitize_request(&mut request, &mut VariableTable::new());
        assert_eq!(request.body, Some(vec![0xff, 0xfe]));
    }

    #[test]
    fn test_replace_matches_group() {
        let regex = Regex::new("sig=([^&]+)").unwrap();
        let out = replace_matches(&regex, Some(1), "a=1&sig=abc&b=2", |_| "X".to_string());
        assert_eq!(out.as_deref(), Some("a=1&sig=X&b=2"));
        assert!(replace_matches(&regex, Some(1), "a=1", |_| "X".to_string()).is_none());
    }
}
