//! HTTP helpers shared by the proxy and management surfaces

use http_body_util::{BodyExt, Full, LengthLimitError, Limited};
use hyper::body::Bytes;
use hyper::header::{HeaderName, HeaderValue, CONTENT_TYPE};
use hyper::{Request, Response, StatusCode};
use serde_json::json;
use tracing::debug;

use crate::recording::{CapturedResponse, Headers};
use crate::{Result, TapeError};

/// Header carrying the error kind on every proxy-generated failure
pub const PROXY_ERROR_HEADER: &str = "x-proxy-error";

/// Response body type produced by the proxy
pub type ProxyBody = Full<Bytes>;

/// Error type accepted from inbound and upstream bodies
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Stateless HTTP helpers
pub struct HttpHandler;

impl HttpHandler {
    /// Build a response with a body and no headers
    #[must_use]
    pub fn create_response(status: StatusCode, body: impl Into<Bytes>) -> Response<ProxyBody> {
        let mut response = Response::new(Full::new(body.into()));
        *response.status_mut() = status;
        response
    }

    /// Build a JSON response
    #[must_use]
    pub fn json_response(status: StatusCode, value: &serde_json::Value) -> Response<ProxyBody> {
        let mut response = Self::create_response(status, value.to_string());
        response
            .headers_mut()
            .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        response
    }

    /// Map an error to a structured response.
    ///
    /// The body is `{"Kind": ..., "Detail": ...}` and the kind is repeated in
    /// the `x-proxy-error` header, so clients can tell a proxy failure from an
    /// upstream one.
    #[must_use]
    pub fn error_response(error: &TapeError) -> Response<ProxyBody> {
        let status = match error {
            TapeError::NoMatch { .. } | TapeError::SessionNotFound(_) | TapeError::NotFound(_) => {
                StatusCode::NOT_FOUND
            }
            TapeError::ParseError { .. }
            | TapeError::InvalidSanitizer(_)
            | TapeError::InvalidTestName(_)
            | TapeError::ConfigError(_)
            | TapeError::Other(_) => StatusCode::BAD_REQUEST,
            TapeError::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            TapeError::UpstreamError(_) => StatusCode::BAD_GATEWAY,
            TapeError::StorageError(_) | TapeError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let mut response = Self::json_response(
            status,
            &json!({ "Kind": error.kind(), "Detail": error.to_string() }),
        );
        response.headers_mut().insert(
            HeaderName::from_static(PROXY_ERROR_HEADER),
            HeaderValue::from_static(error.kind()),
        );
        response
    }

    /// Turn a captured (or recorded) response into an HTTP response.
    ///
    /// Framing headers are dropped; the length is recomputed from the body.
    #[must_use]
    pub fn from_captured(captured: CapturedResponse) -> Response<ProxyBody> {
        let status = StatusCode::from_u16(captured.status).unwrap_or(StatusCode::OK);
        let mut response =
            Self::create_response(status, captured.body.map(Bytes::from).unwrap_or_default());

        for (name, values) in captured.headers.iter() {
            if is_framing_header(name) {
                continue;
            }
            let Ok(name) = HeaderName::from_bytes(name.as_bytes()) else {
                debug!("Skipping invalid header name {:?}", name);
                continue;
            };
            for value in values {
                if let Ok(value) = HeaderValue::from_str(value) {
                    response.headers_mut().append(name.clone(), value);
                }
            }
        }

        response
    }

    /// Validate an incoming request before its body is read
    ///
    /// # Errors
    ///
    /// Returns error if the declared length exceeds `max_size` or there are
    /// more than `max_headers` headers
    pub fn validate_request<B>(
        request: &Request<B>,
        max_size: usize,
        max_headers: usize,
    ) -> Result<()> {
        if let Some(length) = request
            .headers()
            .get(hyper::header::CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<usize>().ok())
        {
            if length > max_size {
                return Err(TapeError::PayloadTooLarge {
                    size: length,
                    limit: max_size,
                });
            }
        }

        let header_count = request.headers().len();
        if header_count > max_headers {
            return Err(TapeError::Other(format!(
                "Too many headers: {header_count} > {max_headers}"
            )));
        }

        Ok(())
    }

    /// Copy request headers into the capture model, in arrival order
    #[must_use]
    pub fn capture_headers(headers: &hyper::HeaderMap) -> Headers {
        let mut captured = Headers::new();
        for (name, value) in headers {
            captured.append(
                name.as_str(),
                String::from_utf8_lossy(value.as_bytes()).into_owned(),
            );
        }
        captured
    }

    /// Read a body with a size limit.
    ///
    /// Frames are pulled through [`Limited`], so reading stops at the first
    /// frame that crosses `max_size` instead of buffering the whole body.
    ///
    /// # Errors
    ///
    /// Returns `PayloadTooLarge` if the body exceeds `max_size`, or an error
    /// if reading fails
    pub async fn read_body<B>(body: B, max_size: usize) -> Result<Bytes>
    where
        B: hyper::body::Body,
        B::Error: Into<BoxError>,
    {
        match Limited::new(body, max_size).collect().await {
            Ok(collected) => Ok(collected.to_bytes()),
            Err(e) if e.is::<LengthLimitError>() => Err(TapeError::PayloadTooLarge {
                size: max_size.saturating_add(1),
                limit: max_size,
            }),
            Err(e) => Err(TapeError::Other(format!("Failed to read body: {e}"))),
        }
    }
}

fn is_framing_header(name: &str) -> bool {
    ["content-length", "transfer-encoding", "connection"]
        .iter()
        .any(|h| h.eq_ignore_ascii_case(name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::Empty;
    use hyper::body::Frame;
    use std::pin::Pin;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::task::{Context, Poll};

    async fn body_json(response: Response<ProxyBody>) -> serde_json::Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[test]
    fn test_create_response() {
        let response = HttpHandler::create_response(StatusCode::OK, "Hello");
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_error_response_no_match() {
        let error = TapeError::NoMatch {
            method: "GET".to_string(),
            uri: "http://h/b".to_string(),
            remaining: vec!["GET http://h/a".to_string()],
        };
        let response = HttpHandler::error_response(&error);

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(response.headers()[PROXY_ERROR_HEADER], "NoMatch");

        let body = body_json(response).await;
        assert_eq!(body["Kind"], "NoMatch");
        assert!(body["Detail"].as_str().unwrap().contains("GET http://h/a"));
    }

    #[test]
    fn test_error_status_mapping() {
        let cases = [
            (TapeError::SessionNotFound("x".into()), StatusCode::NOT_FOUND),
            (TapeError::NotFound("x".into()), StatusCode::NOT_FOUND),
            (
                TapeError::ParseError {
                    detail: "d".into(),
                    raw: "r".into(),
                },
                StatusCode::BAD_REQUEST,
            ),
            (
                TapeError::PayloadTooLarge { size: 2, limit: 1 },
                StatusCode::PAYLOAD_TOO_LARGE,
            ),
            (TapeError::UpstreamError("x".into()), StatusCode::BAD_GATEWAY),
            (
                TapeError::StorageError("x".into()),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];

        for (error, status) in cases {
            assert_eq!(HttpHandler::error_response(&error).status(), status);
        }
    }

    #[tokio::test]
    async fn test_from_captured_recomputes_length() {
        let captured = CapturedResponse::new(201, "hello")
            .with_header("Content-Length", "999")
            .with_header("Transfer-Encoding", "chunked")
            .with_header("X-Multi", "a")
            .with_header("X-Multi", "b");

        let response = HttpHandler::from_captured(captured);
        assert_eq!(response.status(), StatusCode::CREATED);
        assert!(response.headers().get("content-length").is_none());
        assert!(response.headers().get("transfer-encoding").is_none());
        assert_eq!(response.headers().get_all("x-multi").iter().count(), 2);

        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&bytes[..], b"hello");
    }

    #[test]
    fn test_validate_request() {
        let ok = Request::builder()
            .uri("/test")
            .body(Empty::<Bytes>::new())
            .unwrap();
        assert!(HttpHandler::validate_request(&ok, 1024, 8).is_ok());

        let too_large = Request::builder()
            .method("POST")
            .uri("/test")
            .header(hyper::header::CONTENT_LENGTH, "10000")
            .body(Empty::<Bytes>::new())
            .unwrap();
        assert!(matches!(
            HttpHandler::validate_request(&too_large, 1024, 8),
            Err(TapeError::PayloadTooLarge { .. })
        ));

        let crowded = Request::builder()
            .uri("/test")
            .header("a", "1")
            .header("b", "2")
            .body(Empty::<Bytes>::new())
            .unwrap();
        assert!(HttpHandler::validate_request(&crowded, 1024, 1).is_err());
    }

    #[tokio::test]
    async fn test_read_body() {
        let data = Bytes::from("test data");
        let result = HttpHandler::read_body(Full::new(data.clone()), 1024).await;
        assert_eq!(result.unwrap(), data);
    }

    /// Streams `frames` chunks of `chunk` bytes, counting each poll
    struct Chunked {
        frames: usize,
        chunk: usize,
        polled: Arc<AtomicUsize>,
    }

    impl hyper::body::Body for Chunked {
        type Data = Bytes;
        type Error = std::convert::Infallible;

        fn poll_frame(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
        ) -> Poll<Option<std::result::Result<Frame<Bytes>, Self::Error>>> {
            let this = self.get_mut();
            if this.polled.load(Ordering::SeqCst) == this.frames {
                return Poll::Ready(None);
            }
            this.polled.fetch_add(1, Ordering::SeqCst);
            Poll::Ready(Some(Ok(Frame::data(Bytes::from(vec![b'x'; this.chunk])))))
        }
    }

    #[tokio::test]
    async fn test_read_body_stops_at_limit() {
        let polled = Arc::new(AtomicUsize::new(0));
        let body = Chunked {
            frames: 1000,
            chunk: 1024,
            polled: Arc::clone(&polled),
        };

        let result = HttpHandler::read_body(body, 10).await;
        assert!(matches!(result, Err(TapeError::PayloadTooLarge { limit: 10, .. })));
        assert_eq!(polled.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_read_body_across_frames_within_limit() {
        let polled = Arc::new(AtomicUsize::new(0));
        let body = Chunked {
            frames: 4,
            chunk: 8,
            polled: Arc::clone(&polled),
        };

        let bytes = HttpHandler::read_body(body, 32).await.unwrap();
        assert_eq!(bytes.len(), 32);
        assert_eq!(polled.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_read_body_too_large() {
        let body = Full::new(Bytes::from("test data that is too long"));
        assert!(matches!(
            HttpHandler::read_body(body, 5).await,
            Err(TapeError::PayloadTooLarge { .. })
        ));
    }
}
