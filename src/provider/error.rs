//! Hosting API error types.
//!
//! Requests are never retried. Each error is still classified so the failure
//! report tells an operator whether re-running the deploy is likely to help:
//!
//! - **Transient**: 5xx, rate limits, network failures, request timeouts
//! - **Permanent**: most 4xx (bad credentials, unknown branch, PR already
//!   exists, not mergeable), unsupported hosts

use std::fmt;
use thiserror::Error;

type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Whether a provider failure is expected to clear up by itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderErrorKind {
    /// Outage, rate limit or timeout; a later re-run may succeed.
    Transient,

    /// Requires human intervention.
    Permanent,
}

impl fmt::Display for ProviderErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProviderErrorKind::Transient => write!(f, "transient"),
            ProviderErrorKind::Permanent => write!(f, "permanent"),
        }
    }
}

/// A classified hosting API error.
#[derive(Debug, Error)]
pub struct ProviderApiError {
    pub kind: ProviderErrorKind,

    /// The HTTP status code, if available.
    pub status_code: Option<u16>,

    pub message: String,

    #[source]
    pub source: Option<BoxError>,
}

impl fmt::Display for ProviderApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.status_code {
            Some(code) => write!(
                f,
                "provider API error (HTTP {}, {}): {}",
                code, self.kind, self.message
            ),
            None => write!(f, "provider API error ({}): {}", self.kind, self.message),
        }
    }
}

impl ProviderApiError {
    pub fn permanent_without_source(message: impl Into<String>) -> Self {
        Self {
            kind: ProviderErrorKind::Permanent,
            status_code: None,
            message: message.into(),
            source: None,
        }
    }

    pub fn transient_without_source(message: impl Into<String>) -> Self {
        Self {
            kind: ProviderErrorKind::Transient,
            status_code: None,
            message: message.into(),
            source: None,
        }
    }

    /// Categorizes a non-success HTTP response by status code and body.
    pub fn from_status(status_code: u16, body: impl Into<String>) -> Self {
        let message = body.into();
        Self {
            kind: classify(Some(status_code), &message),
            status_code: Some(status_code),
            message,
            source: None,
        }
    }

    /// Categorizes an octocrab error.
    pub fn from_octocrab(err: octocrab::Error) -> Self {
        let status_code = octocrab_status_code(&err);
        let message = err.to_string();
        Self {
            kind: classify(status_code, &message),
            status_code,
            message,
            source: Some(Box::new(err)),
        }
    }

    /// Categorizes a reqwest error.
    pub fn from_reqwest(err: reqwest::Error) -> Self {
        let status_code = err.status().map(|s| s.as_u16());
        let message = err.to_string();
        let kind = if err.is_timeout() || err.is_connect() {
            ProviderErrorKind::Transient
        } else {
            classify(status_code, &message)
        };
        Self {
            kind,
            status_code,
            message,
            source: Some(Box::new(err)),
        }
    }
}

fn classify(status_code: Option<u16>, message: &str) -> ProviderErrorKind {
    if is_transient_message(message) {
        return ProviderErrorKind::Transient;
    }
    match status_code {
        Some(429) => ProviderErrorKind::Transient,
        Some(403) if is_rate_limit_error(message) => ProviderErrorKind::Transient,
        Some(code) if (500..600).contains(&code) => ProviderErrorKind::Transient,
        Some(_) => ProviderErrorKind::Permanent,
        None if is_network_error(message) => ProviderErrorKind::Transient,
        None => ProviderErrorKind::Permanent,
    }
}

/// Status code of an octocrab error.
///
/// API errors carry it structurally; for the rest only the message is left,
/// where a `status: NNN` fragment is the most reliable marker.
fn octocrab_status_code(err: &octocrab::Error) -> Option<u16> {
    if let octocrab::Error::GitHub { source, .. } = err {
        return Some(source.status_code.as_u16());
    }

    let err_str = err.to_string();
    let idx = err_str.find("status: ")?;
    let rest = &err_str[idx + 8..];
    let end = rest.find(|c: char| !c.is_ascii_digit()).unwrap_or(rest.len());
    rest[..end].parse().ok()
}

/// Messages that indicate a condition which resolves by itself.
fn is_transient_message(message: &str) -> bool {
    let message_lower = message.to_lowercase();

    // Base branch moved while the merge was evaluated
    if message_lower.contains("base branch was modified") {
        return true;
    }

    // Freshly opened merge request whose mergeability is still being computed
    if message_lower.contains("not mergeable yet") {
        return true;
    }

    message_lower.contains("try again")
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_message_detection() {
        assert!(is_transient_message("Base branch was modified"));
        assert!(is_transient_message("Please try again later"));
        assert!(is_transient_message("Merge request is not mergeable yet"));
        assert!(!is_transient_message("Pull request is not mergeable"));
        assert!(!is_transient_message("A pull request already exists"));
    }

    #[test]
    fn rate_limit_detection() {
        assert!(is_rate_limit_error("API rate limit exceeded"));
        assert!(is_rate_limit_error("secondary rate limit"));
        assert!(!is_rate_limit_error("Permission denied"));
    }

    #[test]
    fn network_error_detection() {
        assert!(is_network_error("connection reset"));
        assert!(is_network_error("DNS resolution failed"));
        assert!(is_network_error("request timed out"));
        assert!(!is_network_error("Not found"));
    }

    #[test]
    fn status_classification() {
        assert_eq!(
            ProviderApiError::from_status(502, "bad gateway").kind,
            ProviderErrorKind::Transient
        );
        assert_eq!(
            ProviderApiError::from_status(429, "slow down").kind,
            ProviderErrorKind::Transient
        );
        assert_eq!(
            ProviderApiError::from_status(403, "API rate limit exceeded").kind,
            ProviderErrorKind::Transient
        );
        assert_eq!(
            ProviderApiError::from_status(403, "Resource not accessible").kind,
            ProviderErrorKind::Permanent
        );
        assert_eq!(
            ProviderApiError::from_status(422, "Validation Failed").kind,
            ProviderErrorKind::Permanent
        );
    }

    #[test]
    fn display_includes_status() {
        let err = ProviderApiError::from_status(404, "Not Found");
        assert_eq!(
            err.to_string(),
            "provider API error (HTTP 404, permanent): Not Found"
        );
        let err = ProviderApiError::transient_without_source("request timed out");
        assert_eq!(
            err.to_string(),
            "provider API error (transient): request timed out"
        );
    }
}
