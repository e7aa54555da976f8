use std::env;
use std::net::SocketAddr;

use thiserror::Error;

use crate::cookies::CookieEnvironment;

const DEFAULT_BIND_ADDR: &str = "127.0.0.1:5000";
const DEFAULT_LOG_FILTER: &str = "info";
const DEFAULT_LOG_JSON: bool = false;
const DEFAULT_PUBLIC_ORIGIN: &str = "http://localhost:5000";
const DEFAULT_DOCUMENT_COOKIES: bool = true;
const DEFAULT_LANGUAGE: &str = "en";

#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: SocketAddr,
    pub log_filter: String,
    pub log_json: bool,
    pub public_origin: String,
    pub document_cookies: bool,
    pub default_language: String,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid MB_WEB_BIND_ADDR value '{value}': {source}")]
    InvalidBindAddr {
        value: String,
        source: std::net::AddrParseError,
    },
    #[error("invalid MB_WEB_PUBLIC_ORIGIN value '{value}': missing URL scheme")]
    InvalidPublicOrigin { value: String },
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        let bind_addr_raw = env::var("MB_WEB_BIND_ADDR")
            .ok()
            .filter(|value| !value.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string());

        let bind_addr = bind_addr_raw
            .parse()
            .map_err(|source| ConfigError::InvalidBindAddr {
                value: bind_addr_raw,
                source,
            })?;

        let log_filter = env::var("MB_WEB_LOG_FILTER")
            .ok()
            .filter(|value| !value.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_LOG_FILTER.to_string());

        let log_json = env::var("MB_WEB_LOG_JSON")
            .ok()
            .map(|value| matches!(value.trim().to_lowercase().as_str(), "1" | "true" | "yes"))
            .unwrap_or(DEFAULT_LOG_JSON);

        let public_origin = env::var("MB_WEB_PUBLIC_ORIGIN")
            .ok()
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
            .unwrap_or_else(|| DEFAULT_PUBLIC_ORIGIN.to_string());

        if scheme_of(&public_origin).is_none() {
            return Err(ConfigError::InvalidPublicOrigin {
                value: public_origin,
            });
        }

        let document_cookies = env::var("MB_WEB_DOCUMENT_COOKIES")
            .ok()
            .map(|value| matches!(value.trim().to_lowercase().as_str(), "1" | "true" | "yes"))
            .unwrap_or(DEFAULT_DOCUMENT_COOKIES);

        let default_language = env::var("MB_WEB_DEFAULT_LANGUAGE")
            .ok()
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
            .unwrap_or_else(|| DEFAULT_LANGUAGE.to_string());

        Ok(Self {
            bind_addr,
            log_filter,
            log_json,
            public_origin,
            document_cookies,
            default_language,
        })
    }

    /// The environment the cookie strategy is selected from at startup.
    pub fn cookie_environment(&self) -> CookieEnvironment {
        CookieEnvironment {
            document_available: self.document_cookies,
            location_protocol: scheme_of(&self.public_origin)
                .map(|scheme| format!("{scheme}:"))
                .unwrap_or_default(),
        }
    }
}

#[cfg(test)]
impl Config {
    #[must_use]
    pub fn for_tests() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 0)),
            log_filter: "debug".to_string(),
            log_json: false,
            public_origin: DEFAULT_PUBLIC_ORIGIN.to_string(),
            document_cookies: true,
            default_language: DEFAULT_LANGUAGE.to_string(),
        }
    }
}

fn scheme_of(origin: &str) -> Option<String> {
    let (scheme, _) = origin.split_once(':')?;
    let valid = !scheme.is_empty()
        && scheme
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || matches!(ch, '+' | '-' | '.'));
    valid.then(|| scheme.to_lowercase())
}

#[cfg(test)]
mod tests {
    use super::{Config, scheme_of};

    #[test]
    fn test_fixture_selects_document_cookies_over_http() {
        let config = Config::for_tests();
        assert_eq!(config.bind_addr.port(), 0);
        let environment = config.cookie_environment();
        assert!(environment.document_available);
        assert_eq!(environment.location_protocol, "http:");
    }

    #[test]
    fn file_origin_reports_file_protocol() {
        let mut config = Config::for_tests();
        config.public_origin = "FILE:///srv/musicbrainz/export".to_string();
        assert_eq!(config.cookie_environment().location_protocol, "file:");
    }

    #[test]
    fn scheme_of_rejects_origins_without_a_scheme() {
        assert_eq!(scheme_of("localhost"), None);
        assert_eq!(scheme_of(":5000"), None);
        assert_eq!(scheme_of("https://musicbrainz.org").as_deref(), Some("https"));
    }
}
