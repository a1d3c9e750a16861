//! Dynamic JSON inspection for control payloads and body matching

use serde_json::Value;

use crate::{Result, TapeError};

/// Parse a JSON document, tolerating trailing commas.
///
/// An empty (or all-whitespace) input is an absent document, not an error.
/// On failure the error carries the original text verbatim.
///
/// # Errors
///
/// Returns `ParseError` if the text is not valid JSON
pub fn parse_lenient(raw: &[u8]) -> Result<Option<Value>> {
    let text = String::from_utf8_lossy(raw);
    if text.trim().is_empty() {
        return Ok(None);
    }

    let cleaned = strip_trailing_commas(&text);
    serde_json::from_str(&cleaned)
        .map(Some)
        .map_err(|e| TapeError::ParseError {
            detail: format!("The body of this request is invalid JSON: {e}"),
            raw: text.into_owned(),
        })
}

/// Look up `key` on an object, ignoring ASCII case.
///
/// Returns `None` when the value is not an object or the key is absent.
#[must_use]
pub fn get_key<'a>(value: &'a Value, key: &str) -> Option<&'a Value> {
    let object = value.as_object()?;
    object
        .get(key)
        .or_else(|| {
            object
                .iter()
                .find(|(name, _)| name.eq_ignore_ascii_case(key))
                .map(|(_, v)| v)
        })
}

/// Look up a string-valued key, ignoring ASCII case.
///
/// `Ok(None)` means the key is absent or null. A present key with a
/// non-string value is a parse error that reports the whole document.
///
/// # Errors
///
/// Returns `ParseError` if the key holds something other than a string
pub fn get_string(value: &Value, key: &str) -> Result<Option<String>> {
    match get_key(value, key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(other) => Err(TapeError::ParseError {
            detail: format!("Key '{key}' must be a string, found {other}"),
            raw: value.to_string(),
        }),
    }
}

/// Look up a boolean key, ignoring ASCII case. Absent keys yield `None`.
#[must_use]
pub fn get_bool(value: &Value, key: &str) -> Option<bool> {
    get_key(value, key).and_then(Value::as_bool)
}

/// Blank out commas that directly precede a closing `]` or `}` (ignoring
/// whitespace), leaving string contents untouched.
///
/// A comma is only trailing when it follows a value, so `[,]` and `{,}` stay
/// invalid. Commas become spaces so parser positions still match the input.
fn strip_trailing_commas(text: &str) -> String {
    let chars: Vec<char> = text.chars().collect();
    let mut output = String::with_capacity(text.len());
    let mut in_string = false;
    let mut escaped = false;

    for (i, &c) in chars.iter().enumerate() {
        if in_string {
            output.push(c);
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }

        match c {
            '"' => {
                in_string = true;
                output.push(c);
            }
            ',' => {
                let next = chars[i + 1..]
                    .iter()
                    .find(|ch| !ch.is_whitespace())
                    .copied();
                let previous = output.trim_end().chars().last();
                let follows_value = !matches!(previous, None | Some('[' | '{' | ','));
                if follows_value && matches!(next, Some(']' | '}')) {
                    output.push(' ');
                } else {
                    output.push(c);
                }
            }
            _ => output.push(c),
        }
    }

    output
}
