//! Cookie writes with an in-process fallback.
//!
//! Pages served from `file:` URLs, or rendered without a document to write
//! to, cannot persist cookies. For those environments the value is kept in a
//! process-local map instead, which only lives as long as the process does.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Duration, Utc};
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};

pub const DEFAULT_COOKIE_PATH: &str = "/";

// Characters `encodeURIComponent` leaves alone.
const COOKIE_VALUE: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'!')
    .remove(b'~')
    .remove(b'*')
    .remove(b'\'')
    .remove(b'(')
    .remove(b')');

pub fn one_year_from_now() -> DateTime<Utc> {
    Utc::now() + Duration::days(365)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CookieEnvironment {
    pub document_available: bool,
    /// Scheme of the page location including the colon, e.g. `https:`.
    pub location_protocol: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CookieStrategy {
    Document,
    Fallback,
}

impl CookieStrategy {
    pub fn select(environment: &CookieEnvironment) -> Self {
        if !environment.document_available
            || environment.location_protocol.eq_ignore_ascii_case("file:")
        {
            Self::Fallback
        } else {
            Self::Document
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Document => "document",
            Self::Fallback => "fallback",
        }
    }
}

/// Serializes `name=value; Expires=<date>; Path=/`. Returns `None` when the
/// name is not a valid cookie token.
pub fn serialize_cookie(name: &str, value: &str, expiration: DateTime<Utc>) -> Option<String> {
    if !is_cookie_token(name) {
        return None;
    }
    let value = utf8_percent_encode(value, COOKIE_VALUE);
    let expires = expiration.format("%a, %d %b %Y %H:%M:%S GMT");
    Some(format!(
        "{name}={value}; Expires={expires}; Path={DEFAULT_COOKIE_PATH}"
    ))
}

fn is_cookie_token(name: &str) -> bool {
    !name.is_empty()
        && name.bytes().all(|byte| {
            byte.is_ascii_graphic()
                && !matches!(
                    byte,
                    b'(' | b')'
                        | b'<'
                        | b'>'
                        | b'@'
                        | b','
                        | b';'
                        | b':'
                        | b'\\'
                        | b'"'
                        | b'/'
                        | b'['
                        | b']'
                        | b'?'
                        | b'='
                        | b'{'
                        | b'}'
                )
        })
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct DocumentCookie {
    name: String,
    value: String,
    serialized: String,
}

/// The document cookie store of one page.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DocumentCookies {
    cookies: Vec<DocumentCookie>,
}

impl DocumentCookies {
    /// Equivalent of assigning to `document.cookie`: a later write for the
    /// same name replaces the earlier one.
    pub fn write(&mut self, serialized: String) {
        let pair = serialized.split(';').next().unwrap_or_default();
        let Some((name, value)) = pair.split_once('=') else {
            return;
        };
        let cookie = DocumentCookie {
            name: name.trim().to_string(),
            value: value.trim().to_string(),
            serialized,
        };
        match self.cookies.iter_mut().find(|existing| existing.name == cookie.name) {
            Some(existing) => *existing = cookie,
            None => self.cookies.push(cookie),
        }
    }

    /// Equivalent of reading `document.cookie`.
    pub fn cookie_string(&self) -> String {
        self.cookies
            .iter()
            .map(|cookie| format!("{}={}", cookie.name, cookie.value))
            .collect::<Vec<_>>()
            .join("; ")
    }

    pub fn serialized(&self) -> impl Iterator<Item = &str> {
        self.cookies.iter().map(|cookie| cookie.serialized.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.cookies.is_empty()
    }
}

/// The process-local substitute for a cookie store.
#[derive(Debug, Clone, Default)]
pub struct FallbackCookies {
    values: Arc<Mutex<HashMap<String, String>>>,
}

impl FallbackCookies {
    pub fn set(&self, name: &str, value: &str) {
        self.values
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.to_string(), value.to_string());
    }

    pub fn get(&self, name: &str) -> Option<String> {
        self.values
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }
}

/// Writes cookies with the strategy chosen at startup.
#[derive(Debug)]
pub struct CookieSetter {
    strategy: CookieStrategy,
    document: DocumentCookies,
    fallback: FallbackCookies,
}

impl CookieSetter {
    pub fn new(strategy: CookieStrategy, fallback: FallbackCookies) -> Self {
        Self {
            strategy,
            document: DocumentCookies::default(),
            fallback,
        }
    }

    pub fn strategy(&self) -> CookieStrategy {
        self.strategy
    }

    pub fn set_cookie(&mut self, name: &str, value: &str) {
        self.set_cookie_with_expiration(name, value, one_year_from_now());
    }

    /// The fallback store has no notion of expiry, so `expiration` only
    /// applies to document writes.
    pub fn set_cookie_with_expiration(
        &mut self,
        name: &str,
        value: &str,
        expiration: DateTime<Utc>,
    ) {
        match self.strategy {
            CookieStrategy::Document => match serialize_cookie(name, value, expiration) {
                Some(serialized) => self.document.write(serialized),
                None => tracing::warn!(cookie = name, "dropping cookie with invalid name"),
            },
            CookieStrategy::Fallback => self.fallback.set(name, value),
        }
    }

    pub fn document(&self) -> &DocumentCookies {
        &self.document
    }

    pub fn into_document(self) -> DocumentCookies {
        self.document
    }
}
