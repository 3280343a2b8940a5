//! Provider registry
//!
//! Holds one adapter per platform in registration order. Registration is
//! idempotent per platform: re-registering keeps the first adapter, so
//! wiring code can run more than once without an initialization-order
//! dance.

use crate::model::Platform;
use crate::providers::TicketProvider;
use std::sync::Arc;
use tracing::debug;

/// Ordered collection of provider adapters, keyed by platform.
#[derive(Default)]
pub struct ProviderRegistry {
    providers: Vec<Arc<dyn TicketProvider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an adapter. Re-registering a platform is a keep-first
    /// no-op, never a silent swap.
    pub fn register(&mut self, provider: Arc<dyn TicketProvider>) {
        let platform = provider.platform();
        if self.providers.iter().any(|p| p.platform() == platform) {
            debug!(platform = %platform, "Provider already registered, keeping the first");
            return;
        }
        debug!(platform = %platform, "Registered provider");
        self.providers.push(provider);
    }

    /// Look up the adapter for a platform
    pub fn get(&self, platform: Platform) -> Option<Arc<dyn TicketProvider>> {
        self.providers
            .iter()
            .find(|p| p.platform() == platform)
            .cloned()
    }

    /// All registered platforms, in registration order
    pub fn platforms(&self) -> Vec<Platform> {
        self.providers.iter().map(|p| p.platform()).collect()
    }

    /// All registered adapters, in registration order
    pub fn providers(&self) -> &[Arc<dyn TicketProvider>] {
        &self.providers
    }

    /// Platforms whose adapters currently hold a usable connection
    pub async fn connected_platforms(&self) -> Vec<Platform> {
        let mut connected = Vec::new();
        for provider in &self.providers {
            if provider.is_connected().await {
                connected.push(provider.platform());
            }
        }
        connected
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::Connection;
    use crate::model::{
        Project, SearchCriteria, Ticket, TicketDraft, TicketUpdate, User,
    };
    use crate::providers::OAuthStart;
    use crate::Result;
    use async_trait::async_trait;
    use std::collections::HashMap;

    struct StubProvider {
        platform: Platform,
        connected: bool,
    }

    #[async_trait]
    impl TicketProvider for StubProvider {
        fn platform(&self) -> Platform {
            self.platform
        }

        async fn connection(&self) -> Connection {
            Connection::disconnected(self.platform)
        }

        async fn is_connected(&self) -> bool {
            self.connected
        }

        async fn start_oauth_flow(&self, _instance_url: Option<&str>) -> Result<OAuthStart> {
            unimplemented!()
        }

        async fn handle_oauth_callback(
            &self,
            _params: &HashMap<String, String>,
        ) -> Result<Connection> {
            unimplemented!()
        }

        async fn refresh_token_if_needed(&self) -> Result<()> {
            Ok(())
        }

        async fn disconnect(&self) -> Result<()> {
            Ok(())
        }

        async fn set_selected_projects(&self, _project_ids: Vec<String>) -> Result<()> {
            Ok(())
        }

        async fn search_tickets(&self, _criteria: &SearchCriteria) -> Result<Vec<Ticket>> {
            Ok(Vec::new())
        }

        async fn get_ticket(&self, _key: &str) -> Result<Ticket> {
            unimplemented!()
        }

        async fn get_projects(&self) -> Result<Vec<Project>> {
            Ok(Vec::new())
        }

        async fn get_current_user(&self) -> Result<User> {
            unimplemented!()
        }

        async fn create_ticket(&self, _project_key: &str, _draft: &TicketDraft) -> Result<Ticket> {
            unimplemented!()
        }

        async fn update_ticket(&self, _key: &str, _update: &TicketUpdate) -> Result<Ticket> {
            unimplemented!()
        }
    }

    #[test]
    fn test_register_and_lookup() {
        let mut registry = ProviderRegistry::new();
        registry.register(Arc::new(StubProvider {
            platform: Platform::Jira,
            connected: false,
        }));
        registry.register(Arc::new(StubProvider {
            platform: Platform::Trello,
            connected: true,
        }));

        assert!(registry.get(Platform::Jira).is_some());
        assert_eq!(registry.platforms(), vec![Platform::Jira, Platform::Trello]);
    }

    #[tokio::test]
    async fn test_duplicate_registration_keeps_first() {
        let mut registry = ProviderRegistry::new();
        registry.register(Arc::new(StubProvider {
            platform: Platform::Jira,
            connected: false,
        }));
        // Re-running wiring code must not fail or swap the adapter
        registry.register(Arc::new(StubProvider {
            platform: Platform::Jira,
            connected: true,
        }));

        assert_eq!(registry.platforms(), vec![Platform::Jira]);
        // The first (disconnected) adapter is still the registered one
        assert!(registry.connected_platforms().await.is_empty());
    }

    #[tokio::test]
    async fn test_connected_platforms() {
        let mut registry = ProviderRegistry::new();
        registry.register(Arc::new(StubProvider {
            platform: Platform::Jira,
            connected: false,
        }));
        registry.register(Arc::new(StubProvider {
            platform: Platform::Trello,
            connected: true,
        }));

        assert_eq!(registry.connected_platforms().await, vec![Platform::Trello]);
    }
}
