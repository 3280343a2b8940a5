//! Search criteria: pure input value, no identity.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// What kind of search the caller wants
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SearchType {
    /// Tickets modified within the recent window
    Recent,
    /// Tickets assigned to the authenticated user
    AssignedToMe,
    /// Free-text search over title/description
    Text,
    /// No implicit constraint beyond the explicit filters
    All,
}

/// Provider-agnostic search input. Adapters translate this into their
/// native query mechanism (JQL for Jira, client-side filtering for
/// Trello). Filters compose with AND semantics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchCriteria {
    pub search_type: SearchType,

    #[serde(default)]
    pub query: String,

    #[serde(default = "default_max_results")]
    pub max_results: usize,

    #[serde(default)]
    pub projects: BTreeSet<String>,

    #[serde(default)]
    pub statuses: BTreeSet<String>,

    #[serde(default)]
    pub assignees: BTreeSet<String>,
}

fn default_max_results() -> usize {
    50
}

impl SearchCriteria {
    pub fn new(search_type: SearchType) -> Self {
        Self {
            search_type,
            query: String::new(),
            max_results: default_max_results(),
            projects: BTreeSet::new(),
            statuses: BTreeSet::new(),
            assignees: BTreeSet::new(),
        }
    }

    /// Free-text search shorthand
    pub fn text(query: impl Into<String>) -> Self {
        let mut criteria = Self::new(SearchType::Text);
        criteria.query = query.into();
        criteria
    }

    pub fn with_max_results(mut self, max: usize) -> Self {
        self.max_results = max;
        self
    }

    pub fn with_project(mut self, key: impl Into<String>) -> Self {
        self.projects.insert(key.into());
        self
    }

    pub fn with_status(mut self, status: impl Into<String>) -> Self {
        self.statuses.insert(status.into());
        self
    }

    pub fn with_assignee(mut self, assignee: impl Into<String>) -> Self {
        self.assignees.insert(assignee.into());
        self
    }
}

impl Default for SearchCriteria {
    fn default() -> Self {
        Self::new(SearchType::Recent)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_composes_filters() {
        let criteria = SearchCriteria::text("login bug")
            .with_project("ENG")
            .with_status("To Do")
            .with_status("In Progress")
            .with_max_results(10);

        assert_eq!(criteria.search_type, SearchType::Text);
        assert_eq!(criteria.query, "login bug");
        assert_eq!(criteria.max_results, 10);
        assert_eq!(criteria.statuses.len(), 2);
        assert!(criteria.projects.contains("ENG"));
    }

    #[test]
    fn test_default_is_recent() {
        let criteria = SearchCriteria::default();
        assert_eq!(criteria.search_type, SearchType::Recent);
        assert_eq!(criteria.max_results, 50);
        assert!(criteria.query.is_empty());
    }
}
