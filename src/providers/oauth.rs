//! Token-exchange delegate client
//!
//! Adapters never hold client secrets; authorization-code and
//! refresh-token exchanges go through small server-side delegate
//! endpoints. The contract: POST the grant in, receive
//! `{accessToken, refreshToken?, expiresInSeconds}` back, or a non-2xx
//! meaning the exchange was rejected.

use crate::{Result, TrackHubError};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;

/// Per-request timeout for token exchanges
const EXCHANGE_TIMEOUT: Duration = Duration::from_secs(15);

/// Tokens minted by a delegate endpoint
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenGrant {
    pub access_token: String,

    #[serde(default)]
    pub refresh_token: Option<String>,

    #[serde(default)]
    pub expires_in_seconds: Option<u64>,
}

impl TokenGrant {
    /// Absolute expiry in epoch millis, if the grant carries a lifetime
    pub fn expiry_millis(&self) -> Option<i64> {
        self.expires_in_seconds
            .map(|secs| chrono::Utc::now().timestamp_millis() + (secs as i64) * 1000)
    }
}

/// Seam for the delegate endpoints. Injectable so adapter auth logic is
/// testable without a live endpoint.
#[async_trait]
pub trait TokenExchanger: Send + Sync {
    /// Exchange an authorization code for tokens
    async fn exchange_code(&self, code: &str) -> Result<TokenGrant>;

    /// Exchange a refresh token for a fresh access token
    async fn exchange_refresh(&self, refresh_token: &str) -> Result<TokenGrant>;
}

/// Production exchanger: POSTs form grants to the configured delegate.
pub struct HttpTokenExchanger {
    client: Client,
    endpoint: String,
}

impl HttpTokenExchanger {
    pub fn new(endpoint: impl Into<String>) -> Result<Self> {
        let client = Client::builder().timeout(EXCHANGE_TIMEOUT).build()?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
        })
    }

    async fn post_grant(&self, form: &[(&str, &str)]) -> Result<TokenGrant> {
        let response = self
            .client
            .post(&self.endpoint)
            .header("Accept", "application/json")
            .form(form)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TrackHubError::AuthExchangeFailed(format!(
                "delegate returned HTTP {}: {}",
                status, body
            )));
        }

        let grant: TokenGrant = response.json().await.map_err(|e| {
            TrackHubError::AuthExchangeFailed(format!("unreadable delegate response: {}", e))
        })?;

        if grant.access_token.is_empty() {
            return Err(TrackHubError::AuthExchangeFailed(
                "delegate returned an empty access token".to_string(),
            ));
        }

        Ok(grant)
    }
}

#[async_trait]
impl TokenExchanger for HttpTokenExchanger {
    async fn exchange_code(&self, code: &str) -> Result<TokenGrant> {
        tracing::debug!("Exchanging authorization code");
        self.post_grant(&[("grant_type", "authorization_code"), ("code", code)])
            .await
    }

    async fn exchange_refresh(&self, refresh_token: &str) -> Result<TokenGrant> {
        tracing::debug!("Exchanging refresh token");
        self.post_grant(&[
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
        ])
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_grant_parses_delegate_shape() {
        let json = r#"{"accessToken":"at","refreshToken":"rt","expiresInSeconds":3600}"#;
        let grant: TokenGrant = serde_json::from_str(json).unwrap();
        assert_eq!(grant.access_token, "at");
        assert_eq!(grant.refresh_token.as_deref(), Some("rt"));

        let expiry = grant.expiry_millis().unwrap();
        let now = chrono::Utc::now().timestamp_millis();
        assert!(expiry > now + 3_500_000 && expiry < now + 3_700_000);
    }

    #[test]
    fn test_grant_without_lifetime() {
        let json = r#"{"accessToken":"at"}"#;
        let grant: TokenGrant = serde_json::from_str(json).unwrap();
        assert!(grant.refresh_token.is_none());
        assert!(grant.expiry_millis().is_none());
    }
}
