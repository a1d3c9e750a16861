//! In-memory recording data model

use std::fmt;

use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::sanitizer::VariableTable;

/// Ordered, case-insensitive multi-map of HTTP headers.
///
/// Each distinct name (compared case-insensitively) appears once and owns the
/// list of its values in arrival order. The first spelling of a name wins.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers {
    entries: Vec<(String, Vec<String>)>,
}

impl Headers {
    /// Create an empty header map
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a value, keeping earlier values of the same name
    pub fn append(&mut self, name: &str, value: impl Into<String>) {
        let value = value.into();
        if let Some((_, values)) = self.find_mut(name) {
            values.push(value);
        } else {
            self.entries.push((name.to_string(), vec![value]));
        }
    }

    /// Replace every value of `name` with a single value
    pub fn set(&mut self, name: &str, value: impl Into<String>) {
        let value = value.into();
        if let Some((_, values)) = self.find_mut(name) {
            *values = vec![value];
        } else {
            self.entries.push((name.to_string(), vec![value]));
        }
    }

    /// All values of `name`
    #[must_use]
    pub fn get_all(&self, name: &str) -> Option<&[String]> {
        self.entries
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, values)| values.as_slice())
    }

    /// First value of `name`
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.get_all(name)
            .and_then(|values| values.first())
            .map(String::as_str)
    }

    /// Remove `name`, returning its values
    pub fn remove(&mut self, name: &str) -> Option<Vec<String>> {
        let position = self
            .entries
            .iter()
            .position(|(n, _)| n.eq_ignore_ascii_case(name))?;
        Some(self.entries.remove(position).1)
    }

    /// Check for a header
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.get_all(name).is_some()
    }

    /// Iterate names with their value lists
    pub fn iter(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.entries
            .iter()
            .map(|(name, values)| (name.as_str(), values.as_slice()))
    }

    /// Mutable access to every value list
    pub fn iter_mut(&mut self) -> impl Iterator<Item = (&str, &mut Vec<String>)> {
        self.entries
            .iter_mut()
            .map(|(name, values)| (name.as_str(), values))
    }

    /// Number of distinct names
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if no headers are present
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn find_mut(&mut self, name: &str) -> Option<&mut (String, Vec<String>)> {
        self.entries
            .iter_mut()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
    }
}

impl<'a> FromIterator<(&'a str, &'a str)> for Headers {
    fn from_iter<I: IntoIterator<Item = (&'a str, &'a str)>>(iter: I) -> Self {
        let mut headers = Self::new();
        for (name, value) in iter {
            headers.append(name, value);
        }
        headers
    }
}

impl Serialize for Headers {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (name, values) in &self.entries {
            map.serialize_entry(name, values)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for Headers {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct HeadersVisitor;

        impl<'de> Visitor<'de> for HeadersVisitor {
            type Value = Headers;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a map of header names to lists of values")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Headers, A::Error> {
                let mut headers = Headers::new();
                while let Some((name, values)) = access.next_entry::<String, Vec<String>>()? {
                    for value in values {
                        headers.append(&name, value);
                    }
                }
                Ok(headers)
            }
        }

        deserializer.deserialize_map(HeadersVisitor)
    }
}

/// Request half of an interaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapturedRequest {
    /// HTTP method, upper-case
    pub method: String,
    /// Full URI (scheme, host, path, query)
    pub uri: String,
    /// Request headers
    pub headers: Headers,
    /// Request body, absent when empty
    pub body: Option<Vec<u8>>,
}

impl CapturedRequest {
    /// Create a request with no headers and no body
    #[must_use]
    pub fn new(method: &str, uri: &str) -> Self {
        Self {
            method: method.to_ascii_uppercase(),
            uri: uri.to_string(),
            headers: Headers::new(),
            body: None,
        }
    }

    /// Attach a body; an empty body is stored as absent
    #[must_use]
    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        let body = body.into();
        self.body = if body.is_empty() { None } else { Some(body) };
        self
    }

    /// Attach a header
    #[must_use]
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.append(name, value);
        self
    }

    /// `METHOD uri`, used in diagnostics
    #[must_use]
    pub fn describe(&self) -> String {
        format!("{} {}", self.method, self.uri)
    }
}

/// Response half of an interaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapturedResponse {
    /// HTTP status code
    pub status: u16,
    /// Response headers
    pub headers: Headers,
    /// Response body, absent when empty
    pub body: Option<Vec<u8>>,
}

impl CapturedResponse {
    /// Create a response with no headers
    #[must_use]
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        let body = body.into();
        Self {
            status,
            headers: Headers::new(),
            body: if body.is_empty() { None } else { Some(body) },
        }
    }

    /// Attach a header
    #[must_use]
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.append(name, value);
        self
    }
}

/// One captured request/response exchange
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Interaction {
    /// Captured request
    pub request: CapturedRequest,
    /// Captured response
    pub response: CapturedResponse,
}

/// Ordered interactions plus the variables sanitized out of them
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Recording {
    /// Interactions in capture order
    pub entries: Vec<Interaction>,
    /// Placeholder name to original value
    pub variables: VariableTable,
}

impl Recording {
    /// Create an empty recording
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of interactions
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if nothing was captured
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
