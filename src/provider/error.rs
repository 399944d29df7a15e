//! CI provider error types.
//!
//! Errors are categorised so callers can decide what to do next:
//!
//! - **Transient** errors are retried with backoff (5xx, network failures)
//! - **RateLimited** errors are surfaced immediately; the client backs off
//!   its polling instead of the engine hammering the API
//! - **Permanent** errors need a human (bad credentials, missing repository)

use std::fmt;
use thiserror::Error;

/// The kind of provider error, categorised for retry decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderErrorKind {
    /// Safe to retry with backoff.
    Transient,

    /// The provider asked us to slow down (HTTP 429, or 403 with a rate
    /// limit message). Not retried.
    RateLimited,

    /// Requires human intervention.
    Permanent,
}

impl ProviderErrorKind {
    pub fn is_retriable(&self) -> bool {
        matches!(self, ProviderErrorKind::Transient)
    }
}

/// A provider API error with categorisation.
#[derive(Debug, Error)]
pub struct ProviderError {
    pub kind: ProviderErrorKind,

    /// The HTTP status code, if available.
    pub status_code: Option<u16>,

    pub message: String,

    /// The underlying octocrab error, if available.
    #[source]
    pub source: Option<octocrab::Error>,
}

impl fmt::Display for ProviderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.status_code {
            Some(code) => write!(f, "provider error (HTTP {}): {}", code, self.message),
            None => write!(f, "provider error: {}", self.message),
        }
    }
}

impl ProviderError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self::without_source(ProviderErrorKind::Transient, message)
    }

    pub fn rate_limited(message: impl Into<String>) -> Self {
        Self::without_source(ProviderErrorKind::RateLimited, message)
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self::without_source(ProviderErrorKind::Permanent, message)
    }

    fn without_source(kind: ProviderErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            status_code: None,
            message: message.into(),
            source: None,
        }
    }

    pub fn is_rate_limited(&self) -> bool {
        self.kind == ProviderErrorKind::RateLimited
    }

    /// Categorises an octocrab error.
    pub fn from_octocrab(err: octocrab::Error) -> Self {
        let status_code = extract_status_code(&err);
        let message = err.to_string();
        let kind = categorize(status_code, &message);

        Self {
            kind,
            status_code,
            message,
            source: Some(err),
        }
    }
}

/// Picks an error kind from the HTTP status and message text.
fn categorize(status_code: Option<u16>, message: &str) -> ProviderErrorKind {
    match status_code {
        Some(429) => ProviderErrorKind::RateLimited,
        Some(403) if is_rate_limit_error(message) => ProviderErrorKind::RateLimited,
        Some(code) if (500..600).contains(&code) => ProviderErrorKind::Transient,
        Some(_) => ProviderErrorKind::Permanent,
        None if is_rate_limit_error(message) => ProviderErrorKind::RateLimited,
        None if is_network_error(message) => ProviderErrorKind::Transient,
        None => ProviderErrorKind::Permanent,
    }
}

/// Extracts the HTTP status code from an octocrab error, if present.
///
/// API errors carry the status directly; for transport-level errors the
/// message text is the only hint, so fall back to scanning it.
fn extract_status_code(err: &octocrab::Error) -> Option<u16> {
    if let octocrab::Error::GitHub { source, .. } = err {
        return Some(source.status_code.as_u16());
    }

    let text = err.to_string();
    if let Some(idx) = text.find("status: ") {
        let digits: String = text[idx + 8..]
            .chars()
            .take_while(|c| c.is_ascii_digit())
            .collect();
        if let Ok(code) = digits.parse() {
            return Some(code);
        }
    }
    None
}

fn is_rate_limit_error(message: &str) -> bool {
    let message_lower = message.to_lowercase();
    message_lower.contains("rate limit")
        || message_lower.contains("api rate")
        || message_lower.contains("secondary rate")
        || message_lower.contains("abuse detection")
}

fn is_network_error(message: &str) -> bool {
    let message_lower = message.to_lowercase();
    message_lower.contains("timeout")
        || message_lower.contains("connection")
        || message_lower.contains("network")
        || message_lower.contains("dns")
        || message_lower.contains("timed out")
}
