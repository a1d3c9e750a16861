//! Configuration types for tapeproxy

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::matcher::MatcherConfig;
use crate::sanitizer::{SanitizerPipeline, SanitizerSpec};
use crate::session::SessionDefaults;
use crate::{Result, TapeError};

/// Default listening port
pub const DEFAULT_PORT: u16 = 5000;

/// Main configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Port the proxy listens on
    #[serde(default = "default_port")]
    pub listen_port: u16,
    /// Directory for storing/loading recordings
    pub recording_dir: PathBuf,
    /// Upstream used when a request carries no upstream base header
    #[serde(default)]
    pub default_upstream: Option<String>,
    /// Log filter used when `RUST_LOG` is unset
    #[serde(default = "default_log_filter")]
    pub log_filter: String,
    /// Sanitizers every session starts with, in order
    #[serde(default)]
    pub sanitizers: Vec<SanitizerSpec>,
    /// Matcher every session starts with
    #[serde(default)]
    pub matcher: MatcherConfig,
    /// Resource limits
    #[serde(default)]
    pub limits: LimitsConfig,
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_log_filter() -> String {
    "info".to_string()
}

/// Resource limits
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Maximum concurrent connections
    pub max_connections: usize,
    /// Maximum request body size in bytes
    pub max_request_size: usize,
    /// Maximum response body size in bytes
    pub max_response_size: usize,
    /// Maximum headers per request
    pub max_headers: usize,
    /// Maximum live sessions
    pub max_sessions: usize,
    /// Upstream request timeout in milliseconds
    pub upstream_timeout_ms: u64,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_connections: 4096,
            max_request_size: 16 * 1024 * 1024,   // 16 MB
            max_response_size: 256 * 1024 * 1024, // 256 MB
            max_headers: 128,
            max_sessions: 1024,
            upstream_timeout_ms: 30_000,
        }
    }
}

impl LimitsConfig {
    /// Upstream timeout as a duration
    #[must_use]
    pub fn upstream_timeout(&self) -> Duration {
        Duration::from_millis(self.upstream_timeout_ms)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_port: DEFAULT_PORT,
            recording_dir: PathBuf::from("recordings"),
            default_upstream: None,
            log_filter: default_log_filter(),
            sanitizers: Vec::new(),
            matcher: MatcherConfig::default(),
            limits: LimitsConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from TOML file
    ///
    /// # Errors
    ///
    /// Returns error if file cannot be read or parsed
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| TapeError::ConfigError(format!("Failed to read config file: {e}")))?;

        let config: Self = toml::from_str(&content)
            .map_err(|e| TapeError::ConfigError(format!("Failed to parse config: {e}")))?;

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    ///
    /// # Errors
    ///
    /// Returns error if configuration is invalid
    pub fn validate(&self) -> Result<()> {
        if self.listen_port == 0 {
            return Err(TapeError::ConfigError(
                "listen_port cannot be 0".to_string(),
            ));
        }

        if self.recording_dir.as_os_str().is_empty() {
            return Err(TapeError::ConfigError(
                "recording_dir cannot be empty".to_string(),
            ));
        }

        if let Some(upstream) = &self.default_upstream {
            if !upstream.starts_with("http://") {
                return Err(TapeError::ConfigError(format!(
                    "default_upstream must be an http:// URI: {upstream}"
                )));
            }
        }

        let limits = [
            ("max_connections", self.limits.max_connections),
            ("max_request_size", self.limits.max_request_size),
            ("max_response_size", self.limits.max_response_size),
            ("max_headers", self.limits.max_headers),
            ("max_sessions", self.limits.max_sessions),
        ];
        for (name, value) in limits {
            if value == 0 {
                return Err(TapeError::ConfigError(format!("{name} must be > 0")));
            }
        }
        if self.limits.upstream_timeout_ms == 0 {
            return Err(TapeError::ConfigError(
                "upstream_timeout_ms must be > 0".to_string(),
            ));
        }

        self.session_defaults()?;
        Ok(())
    }

    /// Build the matcher and sanitizers new sessions start with
    ///
    /// # Errors
    ///
    /// Returns error if a sanitizer or the matcher is misconfigured
    pub fn session_defaults(&self) -> Result<SessionDefaults> {
        Ok(SessionDefaults {
            matcher: self.matcher.build()?,
            sanitizers: SanitizerPipeline::from_specs(&self.sanitizers)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matcher::MatcherKind;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const FULL: &str = r#"
        listen_port = 5001
        recording_dir = "/tmp/recordings"
        default_upstream = "http://localhost:8080"
        log_filter = "tapeproxy=debug"

        [[sanitizers]]
        kind = "header"
        header = "Authorization"

        [[sanitizers]]
        kind = "variable"
        target = "body"
        pattern = "SECRET[0-9]+"
        variable = "var1"

        [matcher]
        kind = "default"
        compare_bodies = true
        ignored_query_parameters = ["timestamp"]

        [limits]
        max_sessions = 8
        upstream_timeout_ms = 250
    "#;

    #[test]
    fn test_config_parse() {
        let config: Config = toml::from_str(FULL).unwrap();

        assert_eq!(config.listen_port, 5001);
        assert_eq!(config.default_upstream.as_deref(), Some("http://localhost:8080"));
        assert_eq!(config.sanitizers.len(), 2);
        assert_eq!(config.matcher.kind, MatcherKind::Default);
        assert!(config.matcher.compare_bodies);
        assert_eq!(config.limits.max_sessions, 8);
        assert_eq!(config.limits.upstream_timeout(), Duration::from_millis(250));
        // Unset limits keep their defaults.
        assert_eq!(config.limits.max_headers, 128);

        let defaults = config.session_defaults().unwrap();
        assert_eq!(defaults.sanitizers.len(), 2);
    }

    #[test]
    fn test_minimal_config() {
        let config: Config = toml::from_str(r#"recording_dir = "recs""#).unwrap();

        assert_eq!(config.listen_port, DEFAULT_PORT);
        assert_eq!(config.log_filter, "info");
        assert!(config.sanitizers.is_empty());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(FULL.as_bytes()).unwrap();

        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.listen_port, 5001);
    }

    #[test]
    fn test_invalid_configs() {
        let zero_limit: Config = toml::from_str(
            r#"
            recording_dir = "recs"
            [limits]
            max_connections = 0
        "#,
        )
        .unwrap();
        assert!(zero_limit.validate().is_err());

        let https_upstream: Config = toml::from_str(
            r#"
            recording_dir = "recs"
            default_upstream = "https://example.com"
        "#,
        )
        .unwrap();
        assert!(https_upstream.validate().is_err());

        let bad_regex: Config = toml::from_str(
            r#"
            recording_dir = "recs"
            [[sanitizers]]
            kind = "regex"
            target = "uri"
            pattern = "("
        "#,
        )
        .unwrap();
        assert!(bad_regex.validate().is_err());
    }

    #[test]
    fn test_missing_file() {
        assert!(matches!(
            Config::from_file(Path::new("/nonexistent/tapeproxy.toml")),
            Err(TapeError::ConfigError(_))
        ));
    }
}
