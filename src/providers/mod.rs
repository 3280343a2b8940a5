//! Provider adapters
//!
//! One adapter per provider family, each the sole translator between its
//! provider's wire format and the canonical model, and the sole owner of
//! that provider's connection lifecycle.
//!
//! # Contract
//!
//! Every network-calling operation invokes `refresh_token_if_needed`
//! before issuing its first request; no authenticated request may begin
//! while a refresh for that adapter is pending. Read and write operations
//! fail with `NotConnected` when no usable connection exists, without
//! attempting a network call.

pub mod jira;
pub mod oauth;
pub mod retry;
pub mod trello;

use crate::connection::Connection;
use crate::model::{Platform, Project, SearchCriteria, Ticket, TicketDraft, TicketUpdate, User};
use crate::Result;
use async_trait::async_trait;
use serde::Serialize;
use std::collections::HashMap;

pub use jira::JiraProvider;
pub use oauth::{HttpTokenExchanger, TokenExchanger, TokenGrant};
pub use trello::TrelloProvider;

/// Result of starting an OAuth flow: the URL to send the user to, and an
/// opaque state nonce for flows that carry one.
#[derive(Debug, Clone, Serialize)]
pub struct OAuthStart {
    pub auth_url: String,
    pub state: Option<String>,
}

/// The per-provider adapter contract.
#[async_trait]
pub trait TicketProvider: Send + Sync {
    /// The platform this adapter serves
    fn platform(&self) -> Platform;

    /// Owned snapshot of the current connection state
    async fn connection(&self) -> Connection;

    /// Pessimistic readiness check (see [`Connection::is_usable`])
    async fn is_connected(&self) -> bool;

    /// Build the provider-specific authorization URL. Pure construction;
    /// the authorization itself completes via an external redirect.
    async fn start_oauth_flow(&self, instance_url: Option<&str>) -> Result<OAuthStart>;

    /// Exchange a completed external authorization for a new connection.
    /// Fails with `AuthExchangeFailed` on missing parameters or provider
    /// rejection.
    async fn handle_oauth_callback(&self, params: &HashMap<String, String>) -> Result<Connection>;

    /// No-op when the access token is unexpired; otherwise exchanges the
    /// refresh token and persists the result. Fails with `ReauthRequired`
    /// (clearing the connection) when refresh is impossible or rejected.
    /// Concurrent callers collapse onto one outstanding refresh.
    async fn refresh_token_if_needed(&self) -> Result<()>;

    /// Discard credentials and persisted state; the adapter can no longer
    /// make authenticated calls afterward.
    async fn disconnect(&self) -> Result<()>;

    /// Restrict which projects/boards searches scan. Persisted alongside
    /// the connection.
    async fn set_selected_projects(&self, project_ids: Vec<String>) -> Result<()>;

    async fn search_tickets(&self, criteria: &SearchCriteria) -> Result<Vec<Ticket>>;

    async fn get_ticket(&self, key: &str) -> Result<Ticket>;

    async fn get_projects(&self) -> Result<Vec<Project>>;

    async fn get_current_user(&self) -> Result<User>;

    /// Validates provider-side preconditions (issue type, priority)
    /// before issuing any write.
    async fn create_ticket(&self, project_key: &str, draft: &TicketDraft) -> Result<Ticket>;

    async fn update_ticket(&self, key: &str, update: &TicketUpdate) -> Result<Ticket>;
}

/// OAuth state nonces derive from clock nanos; good enough for CSRF
/// correlation on a localhost redirect, with no extra dependency.
pub(crate) fn state_nonce() -> String {
    use std::time::{SystemTime, UNIX_EPOCH};
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0);
    format!("{:x}", nanos)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_nonce_is_nonempty_hex() {
        let nonce = state_nonce();
        assert!(!nonce.is_empty());
        assert!(nonce.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
