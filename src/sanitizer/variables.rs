//! Placeholder variables substituted out by generalized sanitizers
//!
//! Persisted text carries placeholders as `${name}`. A literal `${` in
//! captured content is escaped by doubling the `$` run in front of the
//! brace, so a run of `k` dollars before `{` stands for `k / 2` literal
//! dollars and opens a placeholder exactly when `k` is odd.
//!
//! While a pipeline runs, placeholders are held as `U+E000 name U+E001`
//! markers and only written out in persisted form by [`VariableTable::encode`]
//! once every sanitizer has seen the text. Captured content must not itself
//! contain those two private-use characters.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::recording::{CapturedRequest, CapturedResponse, Headers, Interaction};

/// Opens a placeholder inside pipeline output
pub(crate) const MARK_OPEN: char = '\u{E000}';
/// Closes a placeholder inside pipeline output
pub(crate) const MARK_CLOSE: char = '\u{E001}';

/// Variable name to original value, persisted as a recording's `Variables`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VariableTable {
    values: BTreeMap<String, String>,
}

impl VariableTable {
    /// Create an empty table
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The persisted placeholder token for variable `name`
    #[must_use]
    pub fn token(name: &str) -> String {
        format!("${{{name}}}")
    }

    /// Original value of `name`
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.values.get(name).map(String::as_str)
    }

    /// Insert a variable directly
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.values.insert(name.into(), value.into());
    }

    /// Number of variables
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// True if no variables are recorded
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Iterate name/value pairs in name order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Assign a variable for `value` under `base` and return its pipeline
    /// marker.
    ///
    /// A value already held by `base` or one of its suffixed names
    /// (`base_2`, `base_3`, ...) keeps that name, so the same secret always
    /// yields the same token within one recording.
    pub fn assign(&mut self, base: &str, value: &str) -> String {
        let mut suffix = 1usize;
        loop {
            let name = if suffix == 1 {
                base.to_string()
            } else {
                format!("{base}_{suffix}")
            };

            match self.values.get(&name) {
                Some(existing) if existing == value => return marker(&name),
                Some(_) => suffix += 1,
                None => {
                    self.values.insert(name.clone(), value.to_string());
                    return marker(&name);
                }
            }
        }
    }

    /// Write pipeline output in persisted form: escape literal `${` runs and
    /// turn markers into `${name}` tokens.
    #[must_use]
    pub fn encode(text: &str) -> String {
        let mut output = String::with_capacity(text.len());
        let mut dollars = 0usize;
        let mut chars = text.chars();

        while let Some(c) = chars.next() {
            match c {
                '$' => dollars += 1,
                '{' => {
                    push_dollars(&mut output, dollars * 2);
                    dollars = 0;
                    output.push('{');
                }
                MARK_OPEN => {
                    push_dollars(&mut output, dollars * 2);
                    dollars = 0;
                    let name: String = chars.by_ref().take_while(|&c| c != MARK_CLOSE).collect();
                    output.push_str(&Self::token(&name));
                }
                _ => {
                    push_dollars(&mut output, dollars);
                    dollars = 0;
                    output.push(c);
                }
            }
        }

        push_dollars(&mut output, dollars);
        output
    }

    /// Replace every known `${name}` token in persisted `text` with its
    /// original value and unescape literal runs. Unknown tokens come back
    /// as plain `${name}`.
    #[must_use]
    pub fn restore(&self, text: &str) -> String {
        scan(text, false, |name, output| match self.values.get(name) {
            Some(value) => output.push_str(value),
            None => output.push_str(&Self::token(name)),
        })
    }

    /// Rename every token of a variable family (`base`, `base_2`, ...) in
    /// persisted `text` to the bare `${base}`, leaving escapes intact.
    ///
    /// Two requests that differ only in which value a variable sanitizer
    /// tokenized compare equal after this.
    #[must_use]
    pub fn generalize(text: &str, bases: &[String]) -> String {
        scan(text, true, |name, output| {
            output.push_str(&Self::token(family(name, bases).unwrap_or(name)));
        })
    }

    /// Restore placeholders in a request
    pub fn restore_request(&self, request: &mut CapturedRequest) {
        request.uri = self.restore(&request.uri);
        self.restore_headers(&mut request.headers);
        self.restore_body(&mut request.body);
    }

    /// Restore placeholders in a response
    pub fn restore_response(&self, response: &mut CapturedResponse) {
        self.restore_headers(&mut response.headers);
        self.restore_body(&mut response.body);
    }

    /// Restore placeholders in both halves of an interaction
    pub fn restore_interaction(&self, interaction: &mut Interaction) {
        self.restore_request(&mut interaction.request);
        self.restore_response(&mut interaction.response);
    }

    /// Collapse variable families in the URI, headers and body of `request`
    pub fn generalize_request(request: &mut CapturedRequest, bases: &[String]) {
        if bases.is_empty() {
            return;
        }
        rewrite_request(request, |text| Self::generalize(text, bases));
    }

    fn restore_headers(&self, headers: &mut Headers) {
        rewrite_headers(headers, |text| self.restore(text));
    }

    fn restore_body(&self, body: &mut Option<Vec<u8>>) {
        rewrite_body(body, |text| self.restore(text));
    }
}

/// Encode the URI, headers and UTF-8 body of a request after sanitizing
pub(crate) fn encode_request(request: &mut CapturedRequest) {
    rewrite_request(request, VariableTable::encode);
}

/// Encode the headers and UTF-8 body of a response after sanitizing
pub(crate) fn encode_response(response: &mut CapturedResponse) {
    rewrite_headers(&mut response.headers, VariableTable::encode);
    rewrite_body(&mut response.body, VariableTable::encode);
}

fn marker(name: &str) -> String {
    format!("{MARK_OPEN}{name}{MARK_CLOSE}")
}

fn push_dollars(output: &mut String, count: usize) {
    output.extend(std::iter::repeat('$').take(count));
}

/// Base of the family `name` belongs to, if any
fn family<'a>(name: &str, bases: &'a [String]) -> Option<&'a str> {
    bases
        .iter()
        .find(|base| {
            name == base.as_str()
                || name
                    .strip_prefix(base.as_str())
                    .and_then(|rest| rest.strip_prefix('_'))
                    .is_some_and(|n| !n.is_empty() && n.bytes().all(|b| b.is_ascii_digit()))
        })
        .map(String::as_str)
}

/// Walk persisted text, handing each token name to `on_token`.
///
/// With `keep_escapes` the dollar runs are copied verbatim (persisted to
/// persisted); otherwise they are unescaped.
fn scan(text: &str, keep_escapes: bool, mut on_token: impl FnMut(&str, &mut String)) -> String {
    if !text.contains('$') {
        return text.to_string();
    }

    let mut output = String::with_capacity(text.len());
    let mut rest = text;

    while let Some(start) = rest.find('$') {
        output.push_str(&rest[..start]);
        let run_end = rest[start..]
            .find(|c: char| c != '$')
            .map_or(rest.len(), |offset| start + offset);
        let run = run_end - start;
        let after = &rest[run_end..];

        if !after.starts_with('{') {
            push_dollars(&mut output, run);
            rest = after;
            continue;
        }

        let literal = if keep_escapes { run - run % 2 } else { run / 2 };
        push_dollars(&mut output, literal);

        if run % 2 == 0 {
            output.push('{');
            rest = &after[1..];
            continue;
        }

        match after[1..].find('}') {
            Some(end) => {
                on_token(&after[1..=end], &mut output);
                rest = &after[end + 2..];
            }
            None => {
                output.push('$');
                output.push_str(after);
                rest = "";
            }
        }
    }

    output.push_str(rest);
    output
}

fn rewrite_request(request: &mut CapturedRequest, rewrite: impl Fn(&str) -> String) {
    request.uri = rewrite(&request.uri);
    rewrite_headers(&mut request.headers, &rewrite);
    rewrite_body(&mut request.body, &rewrite);
}

fn rewrite_headers(headers: &mut Headers, rewrite: impl Fn(&str) -> String) {
    for (_, values) in headers.iter_mut() {
        for value in values.iter_mut() {
            *value = rewrite(value);
        }
    }
}

/// Binary bodies are never tokenized, so only UTF-8 bodies are rewritten
fn rewrite_body(body: &mut Option<Vec<u8>>, rewrite: impl Fn(&str) -> String) {
    if let Some(bytes) = body.as_mut() {
        if let Ok(text) = std::str::from_utf8(bytes) {
            let rewritten = rewrite(text);
            if rewritten != text {
                *bytes = rewritten.into_bytes();
            }
        }
    }
}
