//! On-disk recording format
//!
//! Recordings are JSON documents with PascalCase keys:
//!
//! ```json
//! { "Entries": [ { "RequestUri": "...", "RequestMethod": "GET",
//!     "RequestHeaders": { "Accept": ["*/*"] }, "RequestBody": null,
//!     "StatusCode": 200, "ResponseHeaders": {}, "ResponseBody": "..." } ],
//!   "Variables": { "token": "..." } }
//! ```
//!
//! Bodies are stored as text when they are valid UTF-8. Anything else is
//! hex-encoded and flagged with `RequestBodyEncoding` / `ResponseBodyEncoding`.

use serde::{Deserialize, Serialize};

use crate::recording::{CapturedRequest, CapturedResponse, Headers, Interaction, Recording};
use crate::sanitizer::VariableTable;
use crate::{Result, TapeError};

/// Encoding marker for hex-encoded bodies
pub const HEX_ENCODING: &str = "hex";

/// Serialized recording document
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RecordingFile {
    /// Interactions in capture order
    #[serde(default)]
    pub entries: Vec<EntryFile>,
    /// Placeholder values
    #[serde(default)]
    pub variables: VariableTable,
}

/// Serialized interaction
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct EntryFile {
    /// Full request URI
    pub request_uri: String,
    /// Request method
    pub request_method: String,
    /// Request headers
    #[serde(default)]
    pub request_headers: Headers,
    /// Request body text (or hex)
    #[serde(default)]
    pub request_body: Option<String>,
    /// Set to `hex` when the request body is hex-encoded
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_body_encoding: Option<String>,
    /// Response status
    pub status_code: u16,
    /// Response headers
    #[serde(default)]
    pub response_headers: Headers,
    /// Response body text (or hex)
    #[serde(default)]
    pub response_body: Option<String>,
    /// Set to `hex` when the response body is hex-encoded
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_body_encoding: Option<String>,
}

impl From<&Recording> for RecordingFile {
    fn from(recording: &Recording) -> Self {
        Self {
            entries: recording.entries.iter().map(EntryFile::from).collect(),
            variables: recording.variables.clone(),
        }
    }
}

impl From<&Interaction> for EntryFile {
    fn from(interaction: &Interaction) -> Self {
        let (request_body, request_body_encoding) =
            encode_body(interaction.request.body.as_deref());
        let (response_body, response_body_encoding) =
            encode_body(interaction.response.body.as_deref());

        Self {
            request_uri: interaction.request.uri.clone(),
            request_method: interaction.request.method.clone(),
            request_headers: interaction.request.headers.clone(),
            request_body,
            request_body_encoding,
            status_code: interaction.response.status,
            response_headers: interaction.response.headers.clone(),
            response_body,
            response_body_encoding,
        }
    }
}

impl RecordingFile {
    /// Convert into the in-memory model
    ///
    /// # Errors
    ///
    /// Returns error if a body encoding is unknown or its hex is invalid
    pub fn into_recording(self) -> Result<Recording> {
        let entries = self
            .entries
            .into_iter()
            .enumerate()
            .map(|(index, entry)| entry.into_interaction(index))
            .collect::<Result<Vec<_>>>()?;

        Ok(Recording {
            entries,
            variables: self.variables,
        })
    }
}

impl EntryFile {
    fn into_interaction(self, index: usize) -> Result<Interaction> {
        let request_body = decode_body(
            self.request_body,
            self.request_body_encoding.as_deref(),
            index,
        )?;
        let response_body = decode_body(
            self.response_body,
            self.response_body_encoding.as_deref(),
            index,
        )?;

        let mut request = CapturedRequest::new(&self.request_method, &self.request_uri);
        request.headers = self.request_headers;
        request.body = request_body;

        let mut response = CapturedResponse::new(self.status_code, Vec::new());
        response.headers = self.response_headers;
        response.body = response_body;

        Ok(Interaction { request, response })
    }
}

/// Serialize a recording as pretty-printed JSON
///
/// # Errors
///
/// Returns error if serialization fails
pub fn to_json(recording: &Recording) -> Result<String> {
    serde_json::to_string_pretty(&RecordingFile::from(recording))
        .map_err(|e| TapeError::StorageError(format!("Failed to serialize recording: {e}")))
}

/// Parse a recording document.
///
/// # Errors
///
/// Returns `ParseError` carrying the raw text if the document is malformed
pub fn from_json(raw: &str) -> Result<Recording> {
    let file: RecordingFile = serde_json::from_str(raw).map_err(|e| TapeError::ParseError {
        detail: format!("Invalid recording file: {e}"),
        raw: raw.to_string(),
    })?;

    file.into_recording().map_err(|e| match e {
        TapeError::ParseError { detail, .. } => TapeError::ParseError {
            detail,
            raw: raw.to_string(),
        },
        other => other,
    })
}

fn encode_body(body: Option<&[u8]>) -> (Option<String>, Option<String>) {
    match body {
        None => (None, None),
        Some(bytes) => match std::str::from_utf8(bytes) {
            Ok(text) => (Some(text.to_string()), None),
            Err(_) => (Some(hex::encode(bytes)), Some(HEX_ENCODING.to_string())),
        },
    }
}

fn decode_body(
    body: Option<String>,
    encoding: Option<&str>,
    index: usize,
) -> Result<Option<Vec<u8>>> {
    let Some(body) = body else {
        return Ok(None);
    };

    let bytes = match encoding {
        None => body.into_bytes(),
        Some(HEX_ENCODING) => hex::decode(&body).map_err(|e| TapeError::ParseError {
            detail: format!("Entry {index}: invalid hex body: {e}"),
            raw: String::new(),
        })?,
        Some(other) => {
            return Err(TapeError::ParseError {
                detail: format!("Entry {index}: unknown body encoding '{other}'"),
                raw: String::new(),
            })
        }
    };

    Ok(if bytes.is_empty() { None } else { Some(bytes) })
}
