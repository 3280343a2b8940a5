//! Canonical data model
//!
//! The single ticket/project/user shape every caller outside the
//! integration layer consumes, regardless of which provider produced it.

mod search;
pub(crate) mod ticket;

pub use search::{SearchCriteria, SearchType};
pub use ticket::{Project, Ticket, TicketDraft, TicketUpdate, UniversalRecord, User};

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Provider discriminant. Immutable once attached to a canonical record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Jira,
    Trello,
}

impl Platform {
    /// Stable identifier used in persisted files and CLI arguments
    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Jira => "jira",
            Platform::Trello => "trello",
        }
    }

    /// Human-facing provider name (used in migration back-references)
    pub fn display_name(&self) -> &'static str {
        match self {
            Platform::Jira => "Jira",
            Platform::Trello => "Trello",
        }
    }

    /// All platforms this build knows about
    pub fn all() -> &'static [Platform] {
        &[Platform::Jira, Platform::Trello]
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Platform {
    type Err = crate::TrackHubError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "jira" => Ok(Platform::Jira),
            "trello" => Ok(Platform::Trello),
            other => Err(crate::TrackHubError::Config(format!(
                "Unknown platform: {}",
                other
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_platform_round_trip() {
        for p in Platform::all() {
            let parsed: Platform = p.as_str().parse().unwrap();
            assert_eq!(*p, parsed);
        }
    }

    #[test]
    fn test_platform_parse_is_case_insensitive() {
        assert_eq!("JIRA".parse::<Platform>().unwrap(), Platform::Jira);
        assert!("asana".parse::<Platform>().is_err());
    }

    #[test]
    fn test_platform_serde_tag() {
        let json = serde_json::to_string(&Platform::Trello).unwrap();
        assert_eq!(json, "\"trello\"");
    }
}
