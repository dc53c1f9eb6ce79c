//! # Server Configuration
//!
//! Layered configuration for the HTTP server: compiled defaults, then an
//! optional TOML file (`--config`), then `GLIMPSE_*` environment
//! variables. Later layers win.
//!
//! ## Environment Variables
//!
//! - `GLIMPSE_HOST` / `GLIMPSE_PORT`: bind address
//! - `GLIMPSE_DATABASE`: path to the redb directory database
//! - `GLIMPSE_COOKIE_SECRET`: HMAC key for session cookies (empty
//!   disables session issuance)
//! - `GLIMPSE_SESSION_LIFETIME_SECS`: session cookie lifetime
//!
//! Per-organization authentication settings (JWT issuer, embed window,
//! ...) are directory state, not process configuration; see
//! `glimpse_core::OrgSettings`.

use glimpse_core::GlimpseError;
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Default session cookie lifetime: 31 days.
pub const DEFAULT_SESSION_LIFETIME_SECS: i64 = 31 * 24 * 3600;

// =============================================================================
// SERVER CONFIG
// =============================================================================

/// Process-level configuration for `glimpse serve`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    /// Host to bind to.
    pub host: String,
    /// Port to bind to.
    pub port: u16,
    /// Path to the redb directory database.
    pub database: PathBuf,
    /// HMAC key for session cookies. Empty disables session issuance.
    pub cookie_secret: String,
    /// Lifetime of issued session cookies, in seconds.
    pub session_lifetime_secs: i64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            database: PathBuf::from("glimpse.db"),
            cookie_secret: String::new(),
            session_lifetime_secs: DEFAULT_SESSION_LIFETIME_SECS,
        }
    }
}

impl ServerConfig {
    /// Load configuration: defaults, the TOML file when given, then
    /// environment overrides.
    pub fn load(file: Option<&Path>) -> Result<Self, GlimpseError> {
        let mut config = match file {
            Some(path) => {
                let text = std::fs::read_to_string(path).map_err(|e| {
                    GlimpseError::Io(format!("Read config {}: {}", path.display(), e))
                })?;
                toml::from_str(&text).map_err(|e| {
                    GlimpseError::Serialization(format!("Parse config {}: {}", path.display(), e))
                })?
            }
            None => Self::default(),
        };
        config.apply_env();
        Ok(config)
    }

    fn apply_env(&mut self) {
        if let Ok(host) = std::env::var("GLIMPSE_HOST") {
            self.host = host;
        }
        if let Ok(port) = std::env::var("GLIMPSE_PORT") {
            if let Ok(port) = port.parse() {
                self.port = port;
            }
        }
        if let Ok(path) = std::env::var("GLIMPSE_DATABASE") {
            self.database = PathBuf::from(path);
        }
        if let Ok(secret) = std::env::var("GLIMPSE_COOKIE_SECRET") {
            self.cookie_secret = secret;
        }
        if let Ok(secs) = std::env::var("GLIMPSE_SESSION_LIFETIME_SECS") {
            if let Ok(secs) = secs.parse() {
                self.session_lifetime_secs = secs;
            }
        }
    }

    /// Bind address in `host:port` form.
    #[must_use]
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_localhost() {
        let config = ServerConfig::default();
        assert_eq!(config.bind_addr(), "127.0.0.1:8080");
        assert!(config.cookie_secret.is_empty());
    }

    #[test]
    fn toml_file_overrides_defaults() {
        let config: ServerConfig = toml::from_str(
            r#"
            host = "0.0.0.0"
            port = 9090
            cookie_secret = "s3cr3t"
            "#,
        )
        .expect("config should parse");

        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 9090);
        assert_eq!(config.cookie_secret, "s3cr3t");
        // Untouched fields keep their defaults.
        assert_eq!(config.database, PathBuf::from("glimpse.db"));
        assert_eq!(config.session_lifetime_secs, DEFAULT_SESSION_LIFETIME_SECS);
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let parsed = toml::from_str::<ServerConfig>("listen = \"0.0.0.0\"\n");
        assert!(parsed.is_err());
    }
}
