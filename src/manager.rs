//! Integration manager
//!
//! Single entry point over the registry: routes unified operations to the
//! active provider, fans searches out across every connected provider with
//! per-provider error isolation, and drives cross-platform migration.
//!
//! The active platform is advisory state. `active_service` re-checks
//! connectedness on every call and falls back to another connected
//! provider rather than handing out a dead adapter.

use crate::model::{
    Platform, Project, SearchCriteria, Ticket, TicketDraft, TicketUpdate, User,
};
use crate::providers::{OAuthStart, TicketProvider};
use crate::registry::ProviderRegistry;
use crate::{Result, TrackHubError};
use futures::future::join_all;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tracing::{info, warn};

/// One provider's slice of a fan-out result. A failure here is data, not
/// an error of the whole operation.
#[derive(Debug)]
pub struct ProviderSearchResult {
    pub platform: Platform,
    pub result: Result<Vec<Ticket>>,
}

/// One provider's slice of a project-listing fan-out.
#[derive(Debug)]
pub struct ProviderProjectResult {
    pub platform: Platform,
    pub result: Result<Vec<Project>>,
}

/// Routes unified ticket operations across registered providers.
pub struct IntegrationManager {
    registry: ProviderRegistry,
    // Held only for synchronous reads/writes, never across an await
    active: RwLock<Option<Platform>>,
}

impl IntegrationManager {
    /// Build a manager and pick the first connected provider (in
    /// registration order) as the active one.
    pub async fn new(registry: ProviderRegistry) -> Self {
        let mut active = None;
        for provider in registry.providers() {
            if provider.is_connected().await {
                active = Some(provider.platform());
                break;
            }
        }
        if let Some(platform) = active {
            info!(platform = %platform, "Active provider selected");
        }

        Self {
            registry,
            active: RwLock::new(active),
        }
    }

    pub fn registry(&self) -> &ProviderRegistry {
        &self.registry
    }

    /// The currently active platform, if any
    pub fn active_platform(&self) -> Option<Platform> {
        *self.active.read().unwrap_or_else(|e| e.into_inner())
    }

    fn set_active(&self, platform: Option<Platform>) {
        *self.active.write().unwrap_or_else(|e| e.into_inner()) = platform;
    }

    /// Explicitly select the active platform. The target must be
    /// registered and connected.
    pub async fn set_active_platform(&self, platform: Platform) -> Result<()> {
        let provider = self
            .registry
            .get(platform)
            .ok_or(TrackHubError::NotConnected(platform))?;
        if !provider.is_connected().await {
            return Err(TrackHubError::NotConnected(platform));
        }
        self.set_active(Some(platform));
        info!(platform = %platform, "Active provider set");
        Ok(())
    }

    /// Re-derive the active platform from current connection state. Keeps
    /// the existing choice when it is still connected.
    pub async fn refresh_active_platform(&self) {
        if let Some(platform) = self.active_platform() {
            if let Some(provider) = self.registry.get(platform) {
                if provider.is_connected().await {
                    return;
                }
            }
        }

        let mut next = None;
        for provider in self.registry.providers() {
            if provider.is_connected().await {
                next = Some(provider.platform());
                break;
            }
        }
        self.set_active(next);
    }

    /// The adapter unified operations route to. Falls back to another
    /// connected provider when the active one has lapsed.
    pub async fn active_service(&self) -> Result<Arc<dyn TicketProvider>> {
        if let Some(platform) = self.active_platform() {
            if let Some(provider) = self.registry.get(platform) {
                if provider.is_connected().await {
                    return Ok(provider);
                }
                warn!(platform = %platform, "Active provider lapsed, falling back");
            }
        }

        for provider in self.registry.providers() {
            if provider.is_connected().await {
                let platform = provider.platform();
                self.set_active(Some(platform));
                info!(platform = %platform, "Fell back to connected provider");
                return Ok(provider.clone());
            }
        }

        self.set_active(None);
        Err(TrackHubError::NoActiveProvider)
    }

    fn provider(&self, platform: Platform) -> Result<Arc<dyn TicketProvider>> {
        self.registry
            .get(platform)
            .ok_or(TrackHubError::NotConnected(platform))
    }

    async fn connected_provider(&self, platform: Platform) -> Result<Arc<dyn TicketProvider>> {
        let provider = self.provider(platform)?;
        if !provider.is_connected().await {
            return Err(TrackHubError::NotConnected(platform));
        }
        Ok(provider)
    }

    // -- Connection lifecycle ------------------------------------------------

    /// Start the OAuth flow for a platform
    pub async fn connect_platform(
        &self,
        platform: Platform,
        instance_url: Option<&str>,
    ) -> Result<OAuthStart> {
        self.provider(platform)?.start_oauth_flow(instance_url).await
    }

    /// Complete the OAuth flow for a platform. A first successful
    /// connection becomes active when nothing else is.
    pub async fn handle_oauth_callback(
        &self,
        platform: Platform,
        params: &HashMap<String, String>,
    ) -> Result<()> {
        self.provider(platform)?.handle_oauth_callback(params).await?;
        if self.active_platform().is_none() {
            self.set_active(Some(platform));
        }
        Ok(())
    }

    /// Disconnect a platform, reassigning the active provider if needed
    pub async fn disconnect_platform(&self, platform: Platform) -> Result<()> {
        self.provider(platform)?.disconnect().await?;
        self.refresh_active_platform().await;
        Ok(())
    }

    pub async fn set_selected_projects(
        &self,
        platform: Platform,
        project_ids: Vec<String>,
    ) -> Result<()> {
        self.provider(platform)?
            .set_selected_projects(project_ids)
            .await
    }

    // -- Unified operations (active provider) --------------------------------

    pub async fn search_tickets(&self, criteria: &SearchCriteria) -> Result<Vec<Ticket>> {
        self.active_service().await?.search_tickets(criteria).await
    }

    pub async fn get_ticket(&self, key: &str) -> Result<Ticket> {
        self.active_service().await?.get_ticket(key).await
    }

    pub async fn get_projects(&self) -> Result<Vec<Project>> {
        self.active_service().await?.get_projects().await
    }

    pub async fn get_current_user(&self) -> Result<User> {
        self.active_service().await?.get_current_user().await
    }

    pub async fn create_ticket(&self, project_key: &str, draft: &TicketDraft) -> Result<Ticket> {
        self.active_service()
            .await?
            .create_ticket(project_key, draft)
            .await
    }

    pub async fn update_ticket(&self, key: &str, update: &TicketUpdate) -> Result<Ticket> {
        self.active_service().await?.update_ticket(key, update).await
    }

    // -- Fan-out operations ---------------------------------------------------

    /// Search every connected provider concurrently. One provider's
    /// failure never suppresses another's results.
    pub async fn search_all_providers(
        &self,
        criteria: &SearchCriteria,
    ) -> Vec<ProviderSearchResult> {
        let mut targets = Vec::new();
        for provider in self.registry.providers() {
            if provider.is_connected().await {
                targets.push(provider.clone());
            }
        }

        let futures = targets.iter().map(|provider| {
            let platform = provider.platform();
            async move {
                ProviderSearchResult {
                    platform,
                    result: provider.search_tickets(criteria).await,
                }
            }
        });

        join_all(futures).await
    }

    /// List projects from every connected provider concurrently.
    pub async fn list_all_projects(&self) -> Vec<ProviderProjectResult> {
        let mut targets = Vec::new();
        for provider in self.registry.providers() {
            if provider.is_connected().await {
                targets.push(provider.clone());
            }
        }

        let futures = targets.iter().map(|provider| {
            let platform = provider.platform();
            async move {
                ProviderProjectResult {
                    platform,
                    result: provider.get_projects().await,
                }
            }
        });

        join_all(futures).await
    }

    // -- Migration --------------------------------------------------------------

    /// Recreate a ticket from one platform on another, appending a
    /// back-reference to the origin. The source ticket is left untouched.
    pub async fn migrate_ticket(
        &self,
        source_platform: Platform,
        key: &str,
        target_platform: Platform,
        target_project_key: &str,
    ) -> Result<Ticket> {
        if source_platform == target_platform {
            return Err(TrackHubError::InvalidMigration(source_platform));
        }

        let source = self.connected_provider(source_platform).await?;
        let target = self.connected_provider(target_platform).await?;

        let original = source.get_ticket(key).await?;
        let draft = migration_draft(&original);

        info!(
            key = %key,
            from = %source_platform,
            to = %target_platform,
            project = %target_project_key,
            "Migrating ticket"
        );
        target.create_ticket(target_project_key, &draft).await
    }
}

/// Build the target-side draft for a migration: same title, labels, and
/// priority, with a provenance trailer appended to the description.
fn migration_draft(original: &Ticket) -> TicketDraft {
    let description = format!(
        "{}\n\n---\nMigrated from {}: {}",
        original.description,
        original.platform.display_name(),
        original.url
    );

    TicketDraft {
        title: original.title.clone(),
        description,
        ticket_type: original.ticket_type.clone(),
        priority: Some(original.priority.clone()),
        labels: original.labels.iter().cloned().collect(),
        assignee: None,
    }
}
