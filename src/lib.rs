//! TrackHub - Multi-platform ticket integration layer
//!
//! A canonical ticket/project/user model with per-provider adapters
//! (Jira, Trello) behind a single [`providers::TicketProvider`] contract,
//! a [`registry::ProviderRegistry`] holding one adapter per platform, and
//! an [`manager::IntegrationManager`] that routes unified operations to
//! the active provider, fans searches out across every connected
//! provider, and migrates tickets between platforms.
//!
//! Adapters own their provider's connection lifecycle end to end:
//! building the authorization URL, exchanging the callback, refreshing
//! tokens (single-flight), and persisting connection state to disk.

pub mod config;
pub mod connection;
pub mod error;
pub mod logging;
pub mod manager;
pub mod model;
pub mod providers;
pub mod registry;

pub use error::{Result, TrackHubError};
pub use manager::IntegrationManager;
pub use registry::ProviderRegistry;
