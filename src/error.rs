//! Error types for TrackHub
//!
//! One enum covering the integration layer's failure taxonomy.
//! Uses thiserror for ergonomic error handling.

use crate::model::Platform;
use thiserror::Error;

/// Result type alias for TrackHub operations
pub type Result<T> = std::result::Result<T, TrackHubError>;

/// Comprehensive error type for TrackHub operations
#[derive(Error, Debug)]
pub enum TrackHubError {
    /// No connection exists for the platform (or it has lapsed)
    #[error("Not connected to {0}")]
    NotConnected(Platform),

    /// No active provider is selected on the integration manager
    #[error("No active provider")]
    NoActiveProvider,

    /// The OAuth callback could not be exchanged for credentials
    #[error("Authorization exchange failed: {0}")]
    AuthExchangeFailed(String),

    /// Token refresh was impossible or rejected; connection invalidated
    #[error("Re-authentication required for {platform}: {reason}")]
    ReauthRequired { platform: Platform, reason: String },

    /// Provider returned 401 on an otherwise-valid connection; invalidated
    #[error("Authentication failed for {0}")]
    AuthenticationFailed(Platform),

    /// Provider returned 403; credentials are fine, scope is not
    #[error("Permission denied by {platform}: {detail}")]
    PermissionDenied { platform: Platform, detail: String },

    /// Client-side precondition failure (e.g. unknown issue type)
    #[error("Validation error: {0}")]
    Validation(String),

    /// Any other non-2xx provider response, with raw body for diagnostics
    #[error("{platform} API error: HTTP {status}: {body}")]
    Provider {
        platform: Platform,
        status: u16,
        body: String,
    },

    /// Transform could not classify a native record as ticket/project/user
    #[error("Unrecognized native record from {0}")]
    UnknownNativeFormat(Platform),

    /// Migration source and target are the same platform
    #[error("Cannot migrate a ticket onto its own platform ({0})")]
    InvalidMigration(Platform),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML parsing errors
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// HTTP request errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Rate limited (with retry-after duration in seconds)
    #[error("Rate limited, retry after {0} seconds")]
    RateLimited(u64),

    /// Other errors
    #[error("{0}")]
    Other(String),

    /// Anyhow errors (for more context)
    #[error("{0}")]
    Anyhow(#[from] anyhow::Error),
}

impl TrackHubError {
    /// True for errors that should prompt the user to reconnect
    /// rather than retry the operation.
    pub fn requires_reauth(&self) -> bool {
        matches!(
            self,
            TrackHubError::ReauthRequired { .. } | TrackHubError::AuthenticationFailed(_)
        )
    }
}

impl crate::providers::retry::RetryableError for TrackHubError {
    fn retry_decision(&self) -> crate::providers::retry::RetryDecision {
        use crate::providers::retry::RetryDecision;
        use std::time::Duration;

        match self {
            TrackHubError::Http(e) => {
                if e.is_connect() || e.is_timeout() {
                    RetryDecision::Retry
                } else {
                    RetryDecision::NoRetry
                }
            }
            TrackHubError::RateLimited(secs) => {
                RetryDecision::RetryAfter(Duration::from_secs(*secs))
            }
            TrackHubError::Provider { status, .. } => match status {
                429 => RetryDecision::RetryAfter(Duration::from_secs(60)),
                500..=599 => RetryDecision::Retry,
                _ => RetryDecision::NoRetry,
            },
            // Auth errors never retry: a 401 cannot succeed on replay, and
            // replaying a refresh exchange double-spends the refresh token.
            _ => RetryDecision::NoRetry,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::retry::{RetryDecision, RetryableError};

    #[test]
    fn test_requires_reauth() {
        assert!(TrackHubError::AuthenticationFailed(Platform::Jira).requires_reauth());
        assert!(TrackHubError::ReauthRequired {
            platform: Platform::Jira,
            reason: "refresh rejected".to_string(),
        }
        .requires_reauth());
        assert!(!TrackHubError::Validation("bad type".to_string()).requires_reauth());
        assert!(!TrackHubError::Provider {
            platform: Platform::Trello,
            status: 500,
            body: String::new(),
        }
        .requires_reauth());
    }

    #[test]
    fn test_retry_classification() {
        let server_err = TrackHubError::Provider {
            platform: Platform::Jira,
            status: 503,
            body: "unavailable".to_string(),
        };
        assert_eq!(server_err.retry_decision(), RetryDecision::Retry);

        let client_err = TrackHubError::Provider {
            platform: Platform::Jira,
            status: 404,
            body: "missing".to_string(),
        };
        assert_eq!(client_err.retry_decision(), RetryDecision::NoRetry);

        let auth = TrackHubError::AuthenticationFailed(Platform::Trello);
        assert_eq!(auth.retry_decision(), RetryDecision::NoRetry);

        let rate = TrackHubError::RateLimited(30);
        assert!(matches!(rate.retry_decision(), RetryDecision::RetryAfter(_)));
    }
}
