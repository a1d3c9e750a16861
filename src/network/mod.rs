//! Network layer for tapeproxy
//!
//! Provides the listener loop with bounded concurrency, shared HTTP helpers
//! and the upstream client.

mod client;
mod connection_pool;
mod handler;
mod http;

pub use client::{build_uri, strip_headers, HttpClient, Upstream, HOP_BY_HOP_HEADERS};
pub use connection_pool::{ConnectionGuard, ConnectionPool};
pub use handler::NetworkHandler;
pub use http::{BoxError, HttpHandler, ProxyBody, PROXY_ERROR_HEADER};

/// Maximum number of concurrent connections
pub const MAX_CONNECTIONS: usize = 4096;

/// Graceful shutdown timeout
pub const SHUTDOWN_TIMEOUT_MS: u64 = 5000;
