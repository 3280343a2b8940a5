//! Per-provider connection state and its local persistence.
//!
//! Each adapter owns exactly one [`Connection`] and is the only component
//! that mutates it, through [`ConnectionStore`] load/save/clear.

use crate::model::Platform;
use crate::Result;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Tokens are treated as expired this long before their recorded expiry,
/// so a refresh lands before the provider starts returning 401s.
const EXPIRY_SKEW_MS: i64 = 60_000;

/// Per-provider credentials, discriminated by protocol family.
///
/// A sum type rather than one struct with optional fields for both
/// families: a half-populated credential cannot be constructed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Credentials {
    /// OAuth2 bearer-token flow (Jira-style)
    OAuth2 {
        access_token: String,
        #[serde(default)]
        refresh_token: Option<String>,
        /// Epoch millis
        #[serde(default)]
        token_expiry: Option<i64>,
        /// Provider-side site identifier (Atlassian cloud id)
        #[serde(default)]
        site_id: Option<String>,
    },
    /// OAuth1.0a key/token flow (Trello-style)
    KeyToken {
        api_key: String,
        token: String,
        #[serde(default)]
        token_expiry: Option<i64>,
    },
}

impl Credentials {
    /// Recorded expiry in epoch millis, if any
    pub fn token_expiry(&self) -> Option<i64> {
        match self {
            Credentials::OAuth2 { token_expiry, .. } => *token_expiry,
            Credentials::KeyToken { token_expiry, .. } => *token_expiry,
        }
    }

    /// True when an expiry is recorded and (minus skew) has passed
    pub fn is_expired(&self) -> bool {
        match self.token_expiry() {
            Some(expiry) => Utc::now().timestamp_millis() >= expiry - EXPIRY_SKEW_MS,
            None => false,
        }
    }

    /// True when an expired access token can still be repaired
    pub fn has_refresh_token(&self) -> bool {
        matches!(
            self,
            Credentials::OAuth2 {
                refresh_token: Some(_),
                ..
            }
        )
    }
}

/// Connection state for one provider.
///
/// Created empty at process start, populated by a successful OAuth
/// callback, mutated in place by token refresh, and cleared on explicit
/// disconnect or unrecoverable auth failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Connection {
    pub platform: Platform,

    #[serde(default)]
    pub is_connected: bool,

    /// Self-hosted deployment root, if any. Retained across disconnects
    /// for reconnection convenience.
    #[serde(default)]
    pub instance_url: Option<String>,

    #[serde(default)]
    pub user_email: Option<String>,

    #[serde(default)]
    pub site_name: Option<String>,

    #[serde(default)]
    pub credentials: Option<Credentials>,

    /// Explicitly selected project/board identifiers. Empty means no
    /// selection has been made yet (first-run: scan everything, bounded).
    #[serde(default)]
    pub selected_projects: Vec<String>,
}

impl Connection {
    /// The empty, disconnected state for a platform
    pub fn disconnected(platform: Platform) -> Self {
        Self {
            platform,
            is_connected: false,
            instance_url: None,
            user_email: None,
            site_name: None,
            credentials: None,
            selected_projects: Vec::new(),
        }
    }

    /// Pessimistic readiness: credentials exist AND either no expiry is
    /// set, the expiry is in the future, or a refresh token can repair
    /// an expired access token. Not a guarantee the next call succeeds.
    pub fn is_usable(&self) -> bool {
        if !self.is_connected {
            return false;
        }
        match &self.credentials {
            None => false,
            Some(creds) => !creds.is_expired() || creds.has_refresh_token(),
        }
    }

    /// Discard credentials; keep `instance_url` and the board selection
    /// so a reconnect picks up where the user left off.
    pub fn clear(&mut self) {
        self.is_connected = false;
        self.credentials = None;
        self.user_email = None;
        self.site_name = None;
    }
}

/// Scoped persistence for connection records: one JSON file per platform
/// under the store directory.
#[derive(Debug, Clone)]
pub struct ConnectionStore {
    dir: PathBuf,
}

impl ConnectionStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Default store location (~/.config/trackhub/connections)
    pub fn default_dir() -> PathBuf {
        let mut path = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
        path.push(".config");
        path.push("trackhub");
        path.push("connections");
        path
    }

    fn path_for(&self, platform: Platform) -> PathBuf {
        self.dir.join(format!("{}.json", platform.as_str()))
    }

    /// Reconstruct connection state from disk. Never fails: a missing
    /// or unparseable file degrades to the disconnected state.
    pub fn load(&self, platform: Platform) -> Connection {
        let path = self.path_for(platform);
        match fs::read_to_string(&path) {
            Ok(content) => match serde_json::from_str::<Connection>(&content) {
                Ok(conn) => conn,
                Err(e) => {
                    tracing::warn!(
                        platform = %platform,
                        path = %path.display(),
                        error = %e,
                        "Stored connection unreadable, starting disconnected"
                    );
                    Connection::disconnected(platform)
                }
            },
            Err(_) => Connection::disconnected(platform),
        }
    }

    /// Persist a connection atomically (temp file + rename).
    pub fn save(&self, connection: &Connection) -> Result<()> {
        fs::create_dir_all(&self.dir)?;

        let json = serde_json::to_string_pretty(connection)?;
        let mut tmp = tempfile::NamedTempFile::new_in(&self.dir)?;
        tmp.write_all(json.as_bytes())?;

        let path = self.path_for(connection.platform);
        tmp.persist(&path)
            .map_err(|e| crate::TrackHubError::Io(e.error))?;

        tracing::debug!(
            platform = %connection.platform,
            connected = connection.is_connected,
            "Saved connection"
        );
        Ok(())
    }

    /// Remove the persisted record for a platform, if present.
    pub fn clear(&self, platform: Platform) -> Result<()> {
        let path = self.path_for(platform);
        if path.exists() {
            fs::remove_file(&path)?;
        }
        Ok(())
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn oauth2_creds(expiry: Option<i64>, refresh: Option<&str>) -> Credentials {
        Credentials::OAuth2 {
            access_token: "at-123".to_string(),
            refresh_token: refresh.map(String::from),
            token_expiry: expiry,
            site_id: None,
        }
    }

    #[test]
    fn test_disconnected_is_not_usable() {
        let conn = Connection::disconnected(Platform::Jira);
        assert!(!conn.is_usable());
    }

    #[test]
    fn test_usable_without_expiry() {
        let mut conn = Connection::disconnected(Platform::Jira);
        conn.is_connected = true;
        conn.credentials = Some(oauth2_creds(None, None));
        assert!(conn.is_usable());
    }

    #[test]
    fn test_expired_without_refresh_is_not_usable() {
        let past = Utc::now().timestamp_millis() - 10_000;
        let mut conn = Connection::disconnected(Platform::Jira);
        conn.is_connected = true;
        conn.credentials = Some(oauth2_creds(Some(past), None));
        assert!(!conn.is_usable());
    }

    #[test]
    fn test_expired_with_refresh_is_usable() {
        let past = Utc::now().timestamp_millis() - 10_000;
        let mut conn = Connection::disconnected(Platform::Jira);
        conn.is_connected = true;
        conn.credentials = Some(oauth2_creds(Some(past), Some("rt-1")));
        assert!(conn.is_usable());
    }

    #[test]
    fn test_expiry_skew_applies() {
        // 30s in the future is inside the 60s skew window
        let soon = Utc::now().timestamp_millis() + 30_000;
        let creds = oauth2_creds(Some(soon), None);
        assert!(creds.is_expired());

        let later = Utc::now().timestamp_millis() + 600_000;
        let creds = oauth2_creds(Some(later), None);
        assert!(!creds.is_expired());
    }

    #[test]
    fn test_clear_retains_instance_url_and_selection() {
        let mut conn = Connection::disconnected(Platform::Jira);
        conn.is_connected = true;
        conn.instance_url = Some("https://jira.corp.example".to_string());
        conn.credentials = Some(oauth2_creds(None, None));
        conn.selected_projects = vec!["ENG".to_string()];

        conn.clear();
        assert!(!conn.is_connected);
        assert!(conn.credentials.is_none());
        assert_eq!(
            conn.instance_url.as_deref(),
            Some("https://jira.corp.example")
        );
        assert_eq!(conn.selected_projects, vec!["ENG".to_string()]);
    }

    #[test]
    fn test_store_round_trip() {
        let dir = TempDir::new().unwrap();
        let store = ConnectionStore::new(dir.path());

        let mut conn = Connection::disconnected(Platform::Trello);
        conn.is_connected = true;
        conn.credentials = Some(Credentials::KeyToken {
            api_key: "key".to_string(),
            token: "tok".to_string(),
            token_expiry: None,
        });

        store.save(&conn).unwrap();
        let loaded = store.load(Platform::Trello);
        assert!(loaded.is_connected);
        assert_eq!(loaded.credentials, conn.credentials);
    }

    #[test]
    fn test_store_load_missing_returns_disconnected() {
        let dir = TempDir::new().unwrap();
        let store = ConnectionStore::new(dir.path());
        let conn = store.load(Platform::Jira);
        assert!(!conn.is_connected);
        assert_eq!(conn.platform, Platform::Jira);
    }

    #[test]
    fn test_store_load_corrupt_returns_disconnected() {
        let dir = TempDir::new().unwrap();
        let store = ConnectionStore::new(dir.path());
        fs::write(dir.path().join("jira.json"), "{not json").unwrap();

        let conn = store.load(Platform::Jira);
        assert!(!conn.is_connected);
    }

    #[test]
    fn test_store_clear_removes_file() {
        let dir = TempDir::new().unwrap();
        let store = ConnectionStore::new(dir.path());

        let conn = Connection::disconnected(Platform::Jira);
        store.save(&conn).unwrap();
        store.clear(Platform::Jira).unwrap();
        assert!(!dir.path().join("jira.json").exists());
        // Clearing twice is fine
        store.clear(Platform::Jira).unwrap();
    }

    #[test]
    fn test_credentials_tagged_serialization() {
        let creds = Credentials::KeyToken {
            api_key: "k".to_string(),
            token: "t".to_string(),
            token_expiry: None,
        };
        let json = serde_json::to_string(&creds).unwrap();
        assert!(json.contains("\"kind\":\"key_token\""));

        let back: Credentials = serde_json::from_str(&json).unwrap();
        assert_eq!(back, creds);
    }
}
