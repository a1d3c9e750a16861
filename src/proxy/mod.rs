//! Proxy service: session dispatch and the management surface

mod admin;
mod http;

pub use admin::AdminRoute;
pub use http::ProxyService;

/// Session id of a proxied or management request
pub const RECORDING_ID_HEADER: &str = "x-recording-id";

/// Optional per-request mode override; `none` forces pass-through
pub const RECORDING_MODE_HEADER: &str = "x-recording-mode";

/// Scheme and authority (optionally a path prefix) of the real service
pub const UPSTREAM_BASE_HEADER: &str = "x-recording-upstream-base-uri";

/// `false` on record stop discards the recording
pub const RECORDING_SAVE_HEADER: &str = "x-recording-save";

/// Body key naming the test id (record) or recording id (playback)
pub const RECORDING_FILE_KEY: &str = "x-recording-file";

/// Proxy bookkeeping headers, never forwarded or captured
pub const PROXY_HEADERS: &[&str] = &[
    RECORDING_ID_HEADER,
    RECORDING_MODE_HEADER,
    UPSTREAM_BASE_HEADER,
    RECORDING_SAVE_HEADER,
];

/// First value of a header as text, if present and valid
pub(crate) fn header_str<'a>(headers: &'a hyper::HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
}
