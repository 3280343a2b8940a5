//! TrackHub configuration file handling
//!
//! Loads and manages the ~/.config/trackhub/config.yaml file with
//! per-provider settings.

use crate::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// OAuth2 provider settings (Jira-style)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JiraProviderConfig {
    /// OAuth app client id
    pub client_id: String,

    /// Redirect URI registered with the OAuth app
    pub redirect_uri: String,

    /// Server-side delegate endpoint that performs the actual token
    /// exchange, so the client secret never reaches this process
    pub token_exchange_url: String,

    /// Authorization page root
    #[serde(default = "default_jira_auth_base")]
    pub auth_base_url: String,

    /// Requested OAuth scopes
    #[serde(default = "default_jira_scopes")]
    pub scopes: String,
}

fn default_jira_auth_base() -> String {
    "https://auth.atlassian.com".to_string()
}

fn default_jira_scopes() -> String {
    "read:jira-work write:jira-work read:jira-user offline_access".to_string()
}

impl Default for JiraProviderConfig {
    fn default() -> Self {
        Self {
            client_id: String::new(),
            redirect_uri: "http://localhost:8787/callback/jira".to_string(),
            token_exchange_url: String::new(),
            auth_base_url: default_jira_auth_base(),
            scopes: default_jira_scopes(),
        }
    }
}

/// OAuth1.0a provider settings (Trello-style)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrelloProviderConfig {
    /// Application key appended to every API call
    pub api_key: String,

    /// Application name shown on the authorization page
    #[serde(default = "default_trello_app_name")]
    pub app_name: String,

    /// Where the authorization page sends the user back to
    #[serde(default = "default_trello_return_url")]
    pub return_url: String,

    /// Maximum boards scanned per search when the user has not selected
    /// a board subset yet. Bounds API volume against rate limits.
    #[serde(default = "default_board_scan_limit")]
    pub board_scan_limit: usize,
}

fn default_trello_app_name() -> String {
    "TrackHub".to_string()
}

fn default_trello_return_url() -> String {
    "http://localhost:8787/callback/trello".to_string()
}

fn default_board_scan_limit() -> usize {
    10
}

impl Default for TrelloProviderConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            app_name: default_trello_app_name(),
            return_url: default_trello_return_url(),
            board_scan_limit: default_board_scan_limit(),
        }
    }
}

/// TrackHub configuration
///
/// Represents the complete ~/.config/trackhub/config.yaml file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TrackHubConfig {
    #[serde(default)]
    pub jira: JiraProviderConfig,

    #[serde(default)]
    pub trello: TrelloProviderConfig,

    /// Directory for persisted connection records.
    /// Defaults to ~/.config/trackhub/connections if not specified.
    #[serde(default)]
    pub connections_dir: Option<PathBuf>,
}

impl TrackHubConfig {
    /// Load configuration from the default path, falling back to
    /// defaults when no file exists yet.
    pub fn load_default() -> Result<Self> {
        let path = Self::default_path();
        if !path.exists() {
            return Ok(Self::default());
        }
        Self::load(&path)
    }

    /// Load configuration from a specific path
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(crate::TrackHubError::Config(format!(
                "Config file not found: {}",
                path.display()
            )));
        }

        tracing::info!(path = %path.display(), "Loading TrackHub configuration");

        let content = fs::read_to_string(path)?;
        let config: Self = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to a specific path
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        tracing::info!(path = %path.display(), "Saving TrackHub configuration");

        let yaml = serde_yaml::to_string(self)?;
        fs::write(path, yaml)?;
        Ok(())
    }

    /// Get the default config path (~/.config/trackhub/config.yaml)
    pub fn default_path() -> PathBuf {
        let mut path = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
        path.push(".config");
        path.push("trackhub");
        path.push("config.yaml");
        path
    }

    /// Resolved connection-store directory
    pub fn connections_dir(&self) -> PathBuf {
        self.connections_dir
            .clone()
            .unwrap_or_else(crate::connection::ConnectionStore::default_dir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[test]
    fn test_defaults() {
        let config = TrackHubConfig::default();
        assert_eq!(config.trello.board_scan_limit, 10);
        assert!(config.jira.scopes.contains("offline_access"));
        assert!(config.connections_dir.is_none());
    }

    #[test]
    fn test_save_and_load() {
        let temp_file = NamedTempFile::new().unwrap();
        let path = temp_file.path();

        let mut config = TrackHubConfig::default();
        config.jira.client_id = "abc123".to_string();
        config.trello.board_scan_limit = 3;

        config.save(path).unwrap();

        let loaded = TrackHubConfig::load(path).unwrap();
        assert_eq!(loaded.jira.client_id, "abc123");
        assert_eq!(loaded.trello.board_scan_limit, 3);
    }

    #[test]
    fn test_load_missing_file() {
        let result = TrackHubConfig::load("/nonexistent/config.yaml");
        assert!(result.is_err());
    }

    #[test]
    fn test_partial_yaml_uses_defaults() {
        let temp_file = NamedTempFile::new().unwrap();
        fs::write(temp_file.path(), "jira:\n  client_id: cid\n").unwrap();

        let loaded = TrackHubConfig::load(temp_file.path()).unwrap();
        assert_eq!(loaded.jira.client_id, "cid");
        assert_eq!(loaded.trello.board_scan_limit, 10);
    }

    #[test]
    fn test_default_path() {
        let path = TrackHubConfig::default_path();
        assert!(path.ends_with("trackhub/config.yaml"));
    }
}
