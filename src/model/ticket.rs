//! Canonical ticket, project, and user records plus write payloads.

use super::Platform;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

/// Canonical ticket, the only ticket representation callers see.
///
/// `key` is unique within `(platform, project_key)`. `platform` is set at
/// construction and never changes. Unmapped native fields live in
/// `platform_specific` and are never interpreted generically.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ticket {
    /// Provider-native identifier
    pub id: String,

    /// Human-facing short code, unique within the project
    pub key: String,

    pub title: String,

    /// Plain text. Rich-markup sources are flattened, which is lossy:
    /// formatting, marks, and non-text nodes do not survive.
    #[serde(default)]
    pub description: String,

    pub ticket_type: String,
    pub status: String,
    pub priority: String,

    #[serde(default)]
    pub assignee: Option<String>,

    pub reporter: String,

    /// Project display name
    pub project: String,

    /// Stable project identifier
    pub project_key: String,

    /// Parent/epic reference, if the provider models one
    #[serde(default)]
    pub epic: Option<String>,

    #[serde(default)]
    pub labels: BTreeSet<String>,

    #[serde(default)]
    pub components: Vec<String>,

    pub last_modified: DateTime<Utc>,
    pub created: DateTime<Utc>,

    pub url: String,
    pub platform: Platform,

    /// Escape hatch for provider-only fields
    #[serde(default)]
    pub platform_specific: HashMap<String, serde_json::Value>,
}

/// Canonical project (Jira project, Trello board)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    pub id: String,
    pub key: String,
    pub name: String,
    pub platform: Platform,

    #[serde(default)]
    pub description: Option<String>,

    #[serde(default)]
    pub avatar_url: Option<String>,

    #[serde(default)]
    pub platform_specific: HashMap<String, serde_json::Value>,
}

/// Canonical user
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub display_name: String,

    #[serde(default)]
    pub email: Option<String>,

    #[serde(default)]
    pub avatar_url: Option<String>,

    pub platform: Platform,
}

/// Output of an adapter's transform: the discriminant is inferred from
/// the shape of the native record.
#[derive(Debug, Clone)]
pub enum UniversalRecord {
    Ticket(Box<Ticket>),
    Project(Project),
    User(User),
}

/// Payload for creating a ticket
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TicketDraft {
    pub title: String,

    #[serde(default)]
    pub description: String,

    /// Requested issue type; validated against the target project's
    /// schema before any write is issued
    pub ticket_type: String,

    #[serde(default)]
    pub priority: Option<String>,

    #[serde(default)]
    pub labels: Vec<String>,

    #[serde(default)]
    pub assignee: Option<String>,
}

/// Payload for updating a ticket; `None` fields are left untouched
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TicketUpdate {
    #[serde(default)]
    pub title: Option<String>,

    #[serde(default)]
    pub description: Option<String>,

    /// Target status. Providers resolve this against their own status
    /// mechanism (transition for Jira, list move for Trello).
    #[serde(default)]
    pub status: Option<String>,

    #[serde(default)]
    pub priority: Option<String>,

    #[serde(default)]
    pub labels: Option<Vec<String>>,
}

/// Collect top-level keys of a native JSON object that the typed mapping
/// did not consume, preserving them for `platform_specific`.
pub(crate) fn collect_extras(
    native: &serde_json::Value,
    mapped: &[&str],
) -> HashMap<String, serde_json::Value> {
    let mut extras = HashMap::new();
    if let Some(obj) = native.as_object() {
        for (k, v) in obj {
            if !mapped.contains(&k.as_str()) {
                extras.insert(k.clone(), v.clone());
            }
        }
    }
    extras
}
