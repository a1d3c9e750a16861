//! Sanitizers that overwrite values with a fixed literal

use regex::Regex;
use serde_json::Value;

use super::{replace_matches, Sanitizer, Target, VariableTable};
use crate::{Result, TapeError};

/// Regex substitution with a literal replacement
#[derive(Debug)]
pub struct RegexSanitizer {
    target: Target,
    regex: Regex,
    group: Option<usize>,
    replacement: String,
}

impl RegexSanitizer {
    /// Create a regex sanitizer
    #[must_use]
    pub fn new(target: Target, regex: Regex, group: Option<usize>, replacement: String) -> Self {
        Self {
            target,
            regex,
            group,
            replacement,
        }
    }
}

impl Sanitizer for RegexSanitizer {
    fn target(&self) -> &Target {
        &self.target
    }

    fn apply(&self, value: &str, _variables: &mut VariableTable) -> Option<String> {
        let replaced = replace_matches(&self.regex, self.group, value, |_| {
            self.replacement.clone()
        })?;
        (replaced != value).then_some(replaced)
    }
}

/// Overwrites every value of one header
#[derive(Debug)]
pub struct HeaderSanitizer {
    target: Target,
    replacement: String,
}

impl HeaderSanitizer {
    /// Create a header sanitizer
    #[must_use]
    pub fn new(header: &str, replacement: String) -> Self {
        Self {
            target: Target::Header(header.to_string()),
            replacement,
        }
    }
}

impl Sanitizer for HeaderSanitizer {
    fn target(&self) -> &Target {
        &self.target
    }

    fn apply(&self, value: &str, _variables: &mut VariableTable) -> Option<String> {
        (value != self.replacement).then(|| self.replacement.clone())
    }
}

/// One step of a JSON path
#[derive(Debug, Clone, PartialEq, Eq)]
enum PathSegment {
    Key(String),
    Index(usize),
}

/// Overwrites the value at a dotted path inside JSON bodies.
///
/// Paths look like `$.credentials.password` or `$.items.0.token`. A numeric
/// segment indexes arrays and is treated as a key on objects. Bodies that are
/// not JSON, or do not contain the path, are left alone.
#[derive(Debug)]
pub struct JsonPathSanitizer {
    target: Target,
    path: Vec<PathSegment>,
    replacement: String,
}

impl JsonPathSanitizer {
    /// Parse a path expression
    ///
    /// # Errors
    ///
    /// Returns error if the path is empty or malformed
    pub fn parse(path: &str, replacement: String) -> Result<Self> {
        let trimmed = path.trim();
        let body = trimmed
            .strip_prefix("$.")
            .or_else(|| trimmed.strip_prefix('$'))
            .unwrap_or(trimmed);

        if body.is_empty() {
            return Err(TapeError::InvalidSanitizer(format!(
                "json path '{path}' selects nothing"
            )));
        }

        let mut segments = Vec::new();
        for part in body.split('.') {
            if part.is_empty() {
                return Err(TapeError::InvalidSanitizer(format!(
                    "json path '{path}' has an empty segment"
                )));
            }
            segments.push(match part.parse::<usize>() {
                Ok(index) => PathSegment::Index(index),
                Err(_) => PathSegment::Key(part.to_string()),
            });
        }

        Ok(Self {
            target: Target::Body,
            path: segments,
            replacement,
        })
    }

    fn locate<'a>(&self, mut node: &'a mut Value) -> Option<&'a mut Value> {
        for segment in &self.path {
            node = match (segment, node) {
                (PathSegment::Key(key), Value::Object(map)) => map.get_mut(key)?,
                (PathSegment::Index(index), Value::Array(items)) => items.get_mut(*index)?,
                (PathSegment::Index(index), Value::Object(map)) => {
                    map.get_mut(&index.to_string())?
                }
                _ => return None,
            };
        }
        Some(node)
    }
}

impl Sanitizer for JsonPathSanitizer {
    fn target(&self) -> &Target {
        &self.target
    }

    fn apply(&self, value: &str, _variables: &mut VariableTable) -> Option<String> {
        let mut document: Value = serde_json::from_str(value).ok()?;
        let slot = self.locate(&mut document)?;

        if slot.as_str() == Some(self.replacement.as_str()) {
            return None;
        }
        *slot = Value::String(self.replacement.clone());

        serde_json::to_string(&document).ok()
    }
}
