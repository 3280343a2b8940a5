//! Jira-family provider adapter (OAuth2 bearer flow)
//!
//! Owns the Jira connection lifecycle and translates between Jira's wire
//! format and the canonical model: JQL composition for search, ADF
//! (Atlassian Document Format) flattening for descriptions, and the
//! two-step createmeta-then-create protocol for writes.

use crate::config::JiraProviderConfig;
use crate::connection::{Connection, ConnectionStore, Credentials};
use crate::model::ticket::collect_extras;
use crate::model::{
    Platform, Project, SearchCriteria, SearchType, Ticket, TicketDraft, TicketUpdate,
    UniversalRecord, User,
};
use crate::providers::oauth::{HttpTokenExchanger, TokenExchanger};
use crate::providers::retry::{with_retry, RetryConfig};
use crate::providers::{state_nonce, OAuthStart, TicketProvider};
use crate::{Result, TrackHubError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, Response, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

/// Per-request timeout for search/query operations (large result sets)
const SEARCH_TIMEOUT: Duration = Duration::from_secs(30);
/// Per-request timeout for single record fetches
const GET_TIMEOUT: Duration = Duration::from_secs(10);
/// Per-request timeout for create/update operations
const WRITE_TIMEOUT: Duration = Duration::from_secs(15);

/// "Recent" searches constrain to this modification window
const RECENT_WINDOW_DAYS: u32 = 7;

const FIELDS: &str = "summary,description,issuetype,status,priority,labels,assignee,reporter,\
                      updated,created,project,parent,components";

const ACCESSIBLE_RESOURCES_URL: &str =
    "https://api.atlassian.com/oauth/token/accessible-resources";

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
struct JiraSearchResponse {
    #[serde(default)]
    issues: Vec<Value>,
}

#[derive(Debug, Clone, Deserialize)]
struct JiraIssue {
    id: String,
    key: String,
    fields: JiraFields,
}

#[derive(Debug, Clone, Deserialize)]
struct JiraFields {
    summary: String,
    /// ADF document tree; flattened to plain text
    #[serde(default)]
    description: Option<Value>,
    #[serde(rename = "issuetype")]
    issue_type: JiraNamed,
    status: JiraNamed,
    #[serde(default)]
    priority: Option<JiraNamed>,
    #[serde(default)]
    labels: Vec<String>,
    #[serde(default)]
    assignee: Option<JiraUser>,
    #[serde(default)]
    reporter: Option<JiraUser>,
    #[serde(default)]
    updated: Option<String>,
    #[serde(default)]
    created: Option<String>,
    #[serde(default)]
    project: Option<JiraProjectRef>,
    #[serde(default)]
    parent: Option<JiraParentRef>,
    #[serde(default)]
    components: Vec<JiraNamed>,
}

#[derive(Debug, Clone, Deserialize)]
struct JiraNamed {
    name: String,
}

#[derive(Debug, Clone, Deserialize)]
struct JiraUser {
    #[serde(rename = "accountId", default)]
    account_id: Option<String>,
    #[serde(rename = "displayName")]
    display_name: String,
    #[serde(rename = "emailAddress", default)]
    email: Option<String>,
    #[serde(rename = "avatarUrls", default)]
    avatar_urls: Option<HashMap<String, String>>,
}

#[derive(Debug, Clone, Deserialize)]
struct JiraProjectRef {
    key: String,
    name: String,
}

#[derive(Debug, Clone, Deserialize)]
struct JiraParentRef {
    key: String,
}

#[derive(Debug, Clone, Deserialize)]
struct JiraProjectSearchResponse {
    #[serde(default)]
    values: Vec<Value>,
}

#[derive(Debug, Clone, Deserialize)]
struct JiraTransition {
    id: String,
    to: JiraNamed,
}

#[derive(Debug, Clone, Deserialize)]
struct JiraTransitionsResponse {
    #[serde(default)]
    transitions: Vec<JiraTransition>,
}

#[derive(Debug, Clone, Deserialize)]
struct CreateMeta {
    #[serde(default)]
    projects: Vec<CreateMetaProject>,
}

#[derive(Debug, Clone, Deserialize)]
struct CreateMetaProject {
    key: String,
    #[serde(default)]
    issuetypes: Vec<CreateMetaIssueType>,
}

#[derive(Debug, Clone, Deserialize)]
struct CreateMetaIssueType {
    name: String,
    /// Field schemas; priority allowed values live under fields.priority
    #[serde(default)]
    fields: Option<HashMap<String, Value>>,
}

#[derive(Debug, Clone, Deserialize)]
struct CreatedIssue {
    key: String,
}

#[derive(Debug, Clone, Deserialize)]
struct AccessibleResource {
    id: String,
    name: String,
    url: String,
}

// ---------------------------------------------------------------------------
// Adapter
// ---------------------------------------------------------------------------

/// Jira API adapter
pub struct JiraProvider {
    client: Client,
    config: JiraProviderConfig,
    store: ConnectionStore,
    connection: RwLock<Connection>,
    /// Single-flight gate: at most one refresh exchange in flight
    refresh_gate: Mutex<()>,
    exchanger: Box<dyn TokenExchanger>,
}

impl JiraProvider {
    /// Create an adapter, reconstructing connection state from the store.
    pub fn new(config: JiraProviderConfig, store: ConnectionStore) -> Result<Self> {
        let client = Client::builder().timeout(SEARCH_TIMEOUT).build()?;
        let exchanger = HttpTokenExchanger::new(&config.token_exchange_url)?;
        let connection = store.load(Platform::Jira);

        Ok(Self {
            client,
            config,
            store,
            connection: RwLock::new(connection),
            refresh_gate: Mutex::new(()),
            exchanger: Box::new(exchanger),
        })
    }

    /// Swap the token-exchange delegate (tests inject a counting one)
    pub fn with_exchanger(mut self, exchanger: Box<dyn TokenExchanger>) -> Self {
        self.exchanger = exchanger;
        self
    }

    /// Bearer token for the next request, or `NotConnected`
    async fn bearer(&self) -> Result<String> {
        let conn = self.connection.read().await;
        match &conn.credentials {
            Some(Credentials::OAuth2 { access_token, .. }) if !access_token.is_empty() => {
                Ok(access_token.clone())
            }
            _ => Err(TrackHubError::NotConnected(Platform::Jira)),
        }
    }

    /// REST root for the connected site
    async fn api_base(&self) -> Result<String> {
        let conn = self.connection.read().await;
        if let Some(Credentials::OAuth2 {
            site_id: Some(site),
            ..
        }) = &conn.credentials
        {
            return Ok(format!(
                "https://api.atlassian.com/ex/jira/{}/rest/api/3",
                site
            ));
        }
        if let Some(instance) = &conn.instance_url {
            return Ok(format!("{}/rest/api/3", instance.trim_end_matches('/')));
        }
        Err(TrackHubError::NotConnected(Platform::Jira))
    }

    /// Root for human-facing browse links
    async fn browse_base(&self) -> String {
        let conn = self.connection.read().await;
        conn.instance_url
            .as_deref()
            .map(|u| u.trim_end_matches('/').to_string())
            .unwrap_or_default()
    }

    /// Readiness gate every operation runs first: `NotConnected` without
    /// any network call when the connection is unusable, then a refresh
    /// if the access token has expired.
    async fn ensure_ready(&self) -> Result<()> {
        if !self.is_connected().await {
            return Err(TrackHubError::NotConnected(Platform::Jira));
        }
        self.refresh_token_if_needed().await
    }

    async fn needs_refresh(&self) -> bool {
        let conn = self.connection.read().await;
        conn.credentials
            .as_ref()
            .map(|c| c.is_expired())
            .unwrap_or(false)
    }

    /// Drop credentials in memory and on disk. 401s and rejected
    /// refreshes land here; 403s never do.
    async fn invalidate(&self) -> Result<()> {
        let mut conn = self.connection.write().await;
        conn.clear();
        self.store.save(&conn)?;
        warn!(platform = %Platform::Jira, "Connection invalidated");
        Ok(())
    }

    /// Map a non-2xx response per the failure taxonomy.
    async fn check(&self, response: Response) -> Result<Response> {
        let status = response.status();
        match status {
            StatusCode::UNAUTHORIZED => {
                self.invalidate().await?;
                Err(TrackHubError::AuthenticationFailed(Platform::Jira))
            }
            StatusCode::FORBIDDEN => {
                let detail = response.text().await.unwrap_or_default();
                Err(TrackHubError::PermissionDenied {
                    platform: Platform::Jira,
                    detail,
                })
            }
            s if !s.is_success() => {
                let body = response.text().await.unwrap_or_default();
                Err(TrackHubError::Provider {
                    platform: Platform::Jira,
                    status: s.as_u16(),
                    body,
                })
            }
            _ => Ok(response),
        }
    }

    async fn api_get(&self, url: &str, timeout: Duration) -> Result<Response> {
        let token = self.bearer().await?;
        let response = self
            .client
            .get(url)
            .bearer_auth(token)
            .timeout(timeout)
            .send()
            .await?;
        self.check(response).await
    }

    async fn search_once(&self, jql: &str, max_results: usize) -> Result<Vec<Value>> {
        let base = self.api_base().await?;
        let url = format!("{}/search", base);
        let token = self.bearer().await?;

        debug!(jql = %jql, max_results, "Searching Jira issues");

        let response = self
            .client
            .get(&url)
            .bearer_auth(token)
            .query(&[
                ("jql", jql.to_string()),
                ("maxResults", max_results.to_string()),
                ("fields", FIELDS.to_string()),
            ])
            .timeout(SEARCH_TIMEOUT)
            .send()
            .await?;

        let response = self.check(response).await?;
        let result: JiraSearchResponse = response.json().await?;
        Ok(result.issues)
    }

    async fn fetch_issue(&self, key: &str) -> Result<Value> {
        let base = self.api_base().await?;
        let url = format!("{}/issue/{}?fields={}", base, key, FIELDS);
        let response = self.api_get(&url, GET_TIMEOUT).await?;
        Ok(response.json().await?)
    }

    async fn fetch_transitions(&self, key: &str) -> Result<Vec<JiraTransition>> {
        let base = self.api_base().await?;
        let url = format!("{}/issue/{}/transitions", base, key);
        let response = self.api_get(&url, GET_TIMEOUT).await?;
        let result: JiraTransitionsResponse = response.json().await?;
        Ok(result.transitions)
    }

    async fn apply_transition(&self, key: &str, transition_id: &str) -> Result<()> {
        let base = self.api_base().await?;
        let url = format!("{}/issue/{}/transitions", base, key);
        let token = self.bearer().await?;

        info!(key = %key, transition_id = %transition_id, "Transitioning Jira issue");

        let body = json!({ "transition": { "id": transition_id } });
        let response = self
            .client
            .post(&url)
            .bearer_auth(token)
            .json(&body)
            .timeout(WRITE_TIMEOUT)
            .send()
            .await?;
        self.check(response).await?;
        Ok(())
    }

    /// Pure transform from a native Jira record to the canonical model.
    /// The discriminant is inferred from the record's shape.
    pub fn transform_to_universal(&self, native: &Value, browse_base: &str) -> Result<UniversalRecord> {
        transform_to_universal(native, browse_base)
    }
}

#[async_trait]
impl TicketProvider for JiraProvider {
    fn platform(&self) -> Platform {
        Platform::Jira
    }

    async fn connection(&self) -> Connection {
        self.connection.read().await.clone()
    }

    async fn is_connected(&self) -> bool {
        self.connection.read().await.is_usable()
    }

    async fn start_oauth_flow(&self, instance_url: Option<&str>) -> Result<OAuthStart> {
        if self.config.client_id.is_empty() {
            return Err(TrackHubError::Config(
                "Jira OAuth client_id is not configured".to_string(),
            ));
        }

        // Remember the instance for the callback and future reconnects
        if let Some(instance) = instance_url {
            let mut conn = self.connection.write().await;
            conn.instance_url = Some(instance.trim_end_matches('/').to_string());
            self.store.save(&conn)?;
        }

        let state = state_nonce();
        let auth_url = format!(
            "{}/authorize?audience=api.atlassian.com&client_id={}&scope={}&redirect_uri={}&state={}&response_type=code&prompt=consent",
            self.config.auth_base_url.trim_end_matches('/'),
            urlencoding::encode(&self.config.client_id),
            urlencoding::encode(&self.config.scopes),
            urlencoding::encode(&self.config.redirect_uri),
            state,
        );

        Ok(OAuthStart {
            auth_url,
            state: Some(state),
        })
    }

    async fn handle_oauth_callback(&self, params: &HashMap<String, String>) -> Result<Connection> {
        let code = params
            .get("code")
            .filter(|c| !c.is_empty())
            .ok_or_else(|| {
                TrackHubError::AuthExchangeFailed(
                    "callback is missing the authorization code".to_string(),
                )
            })?;

        let grant = self.exchanger.exchange_code(code).await?;

        // Resolve which cloud site this token can reach. Self-hosted
        // connections (instance_url already set) skip site routing.
        let instance_known = self.connection.read().await.instance_url.is_some();
        let mut site_id = None;
        let mut site_name = None;
        let mut site_url = None;

        if !instance_known {
            let response = self
                .client
                .get(ACCESSIBLE_RESOURCES_URL)
                .bearer_auth(&grant.access_token)
                .timeout(GET_TIMEOUT)
                .send()
                .await?;

            if !response.status().is_success() {
                let status = response.status();
                let body = response.text().await.unwrap_or_default();
                return Err(TrackHubError::AuthExchangeFailed(format!(
                    "accessible-resources lookup failed: HTTP {}: {}",
                    status, body
                )));
            }

            let resources: Vec<AccessibleResource> = response.json().await?;
            let site = resources.into_iter().next().ok_or_else(|| {
                TrackHubError::AuthExchangeFailed(
                    "token grants access to no Jira sites".to_string(),
                )
            })?;
            site_id = Some(site.id);
            site_name = Some(site.name);
            site_url = Some(site.url);
        }

        {
            let mut conn = self.connection.write().await;
            conn.credentials = Some(Credentials::OAuth2 {
                access_token: grant.access_token.clone(),
                refresh_token: grant.refresh_token.clone(),
                token_expiry: grant.expiry_millis(),
                site_id,
            });
            conn.is_connected = true;
            conn.site_name = site_name;
            if conn.instance_url.is_none() {
                conn.instance_url = site_url;
            }
            self.store.save(&conn)?;
        }

        // Best effort: record who we connected as
        match self.get_current_user().await {
            Ok(user) => {
                let mut conn = self.connection.write().await;
                conn.user_email = user.email;
                self.store.save(&conn)?;
            }
            Err(e) => warn!(error = %e, "Connected, but current-user lookup failed"),
        }

        info!(platform = %Platform::Jira, "OAuth callback completed");
        Ok(self.connection.read().await.clone())
    }

    async fn refresh_token_if_needed(&self) -> Result<()> {
        if !self.needs_refresh().await {
            return Ok(());
        }

        // Single-flight: concurrent callers queue here; whoever held the
        // gate first performs the exchange, the rest see a fresh token on
        // the re-check and return.
        let _gate = self.refresh_gate.lock().await;
        if !self.needs_refresh().await {
            return Ok(());
        }

        let refresh_token = {
            let conn = self.connection.read().await;
            match &conn.credentials {
                Some(Credentials::OAuth2 { refresh_token, .. }) => refresh_token.clone(),
                _ => None,
            }
        };

        let Some(refresh_token) = refresh_token else {
            self.invalidate().await?;
            return Err(TrackHubError::ReauthRequired {
                platform: Platform::Jira,
                reason: "access token expired and no refresh token is available".to_string(),
            });
        };

        match self.exchanger.exchange_refresh(&refresh_token).await {
            Ok(grant) => {
                let mut conn = self.connection.write().await;
                if let Some(Credentials::OAuth2 {
                    access_token,
                    refresh_token,
                    token_expiry,
                    ..
                }) = &mut conn.credentials
                {
                    *access_token = grant.access_token.clone();
                    if grant.refresh_token.is_some() {
                        *refresh_token = grant.refresh_token.clone();
                    }
                    *token_expiry = grant.expiry_millis();
                }
                self.store.save(&conn)?;
                info!(platform = %Platform::Jira, "Access token refreshed");
                Ok(())
            }
            Err(e) => {
                self.invalidate().await?;
                Err(TrackHubError::ReauthRequired {
                    platform: Platform::Jira,
                    reason: format!("refresh rejected: {}", e),
                })
            }
        }
    }

    async fn disconnect(&self) -> Result<()> {
        let mut conn = self.connection.write().await;
        conn.clear();
        self.store.clear(Platform::Jira)?;
        self.store.save(&conn)?;
        info!(platform = %Platform::Jira, "Disconnected");
        Ok(())
    }

    async fn set_selected_projects(&self, project_ids: Vec<String>) -> Result<()> {
        let mut conn = self.connection.write().await;
        conn.selected_projects = project_ids;
        self.store.save(&conn)?;
        Ok(())
    }

    async fn search_tickets(&self, criteria: &SearchCriteria) -> Result<Vec<Ticket>> {
        self.ensure_ready().await?;

        let selected = self.connection.read().await.selected_projects.clone();
        let jql = build_jql(criteria, &selected);
        let browse_base = self.browse_base().await;

        let issues = with_retry(&RetryConfig::quick(), "jira_search", || {
            self.search_once(&jql, criteria.max_results)
        })
        .await?;

        let tickets = transform_issues(&issues, &browse_base);
        info!(count = tickets.len(), "Jira search complete");
        Ok(tickets)
    }

    async fn get_ticket(&self, key: &str) -> Result<Ticket> {
        self.ensure_ready().await?;
        let browse_base = self.browse_base().await;
        let native = with_retry(&RetryConfig::quick(), "jira_get_ticket", || {
            self.fetch_issue(key)
        })
        .await?;
        transform_issue(&native, &browse_base)
    }

    async fn get_projects(&self) -> Result<Vec<Project>> {
        self.ensure_ready().await?;

        let base = self.api_base().await?;
        let url = format!("{}/project/search", base);
        let response = with_retry(&RetryConfig::quick(), "jira_get_projects", || {
            self.api_get(&url, GET_TIMEOUT)
        })
        .await?;

        let result: JiraProjectSearchResponse = response.json().await?;
        result.values.iter().map(transform_project).collect()
    }

    async fn get_current_user(&self) -> Result<User> {
        self.ensure_ready().await?;

        let base = self.api_base().await?;
        let url = format!("{}/myself", base);
        let response = self.api_get(&url, GET_TIMEOUT).await?;
        let native: Value = response.json().await?;
        transform_user(&native)
    }

    async fn create_ticket(&self, project_key: &str, draft: &TicketDraft) -> Result<Ticket> {
        self.ensure_ready().await?;

        // Two-step create: fetch the project's create schema first and
        // validate the request against it, so a bad type or priority is
        // a descriptive client-side error instead of an opaque 400.
        let base = self.api_base().await?;
        let meta_url = format!(
            "{}/issue/createmeta?projectKeys={}&expand=projects.issuetypes.fields",
            base,
            urlencoding::encode(project_key)
        );
        let response = self.api_get(&meta_url, GET_TIMEOUT).await?;
        let meta: CreateMeta = response.json().await?;

        let type_name = validate_create(&meta, project_key, draft)?;

        let mut fields = json!({
            "project": { "key": project_key },
            "summary": draft.title,
            "description": text_to_adf(&draft.description),
            "issuetype": { "name": type_name },
            "labels": draft.labels,
        });
        if let Some(priority) = &draft.priority {
            fields["priority"] = json!({ "name": priority });
        }

        let url = format!("{}/issue", base);
        let token = self.bearer().await?;

        info!(project = %project_key, title = %draft.title, "Creating Jira issue");

        let response = self
            .client
            .post(&url)
            .bearer_auth(token)
            .json(&json!({ "fields": fields }))
            .timeout(WRITE_TIMEOUT)
            .send()
            .await?;
        let response = self.check(response).await?;
        let created: CreatedIssue = response.json().await?;

        self.get_ticket(&created.key).await
    }

    async fn update_ticket(&self, key: &str, update: &TicketUpdate) -> Result<Ticket> {
        self.ensure_ready().await?;

        let mut fields = serde_json::Map::new();
        if let Some(title) = &update.title {
            fields.insert("summary".to_string(), json!(title));
        }
        if let Some(description) = &update.description {
            fields.insert("description".to_string(), text_to_adf(description));
        }
        if let Some(priority) = &update.priority {
            fields.insert("priority".to_string(), json!({ "name": priority }));
        }
        if let Some(labels) = &update.labels {
            fields.insert("labels".to_string(), json!(labels));
        }

        if !fields.is_empty() {
            let base = self.api_base().await?;
            let url = format!("{}/issue/{}", base, key);
            let token = self.bearer().await?;

            let response = self
                .client
                .put(&url)
                .bearer_auth(token)
                .json(&json!({ "fields": fields }))
                .timeout(WRITE_TIMEOUT)
                .send()
                .await?;
            self.check(response).await?;
        }

        // Status changes go through the transition protocol
        if let Some(status) = &update.status {
            let transitions = self.fetch_transitions(key).await?;
            let target = transitions
                .iter()
                .find(|t| t.to.name.eq_ignore_ascii_case(status));

            match target {
                Some(t) => self.apply_transition(key, &t.id).await?,
                None => warn!(
                    key = %key,
                    requested = %status,
                    available = ?transitions.iter().map(|t| &t.to.name).collect::<Vec<_>>(),
                    "No transition to requested status, leaving status unchanged"
                ),
            }
        }

        self.get_ticket(key).await
    }
}

// ---------------------------------------------------------------------------
// Pure functions: query building, ADF handling, transforms
// ---------------------------------------------------------------------------

/// Strip characters that would break out of a quoted JQL value.
fn sanitize_jql_value(value: &str) -> String {
    value
        .chars()
        .filter(|c| c.is_alphanumeric() || *c == '-' || *c == '_' || *c == ' ' || *c == '.')
        .collect()
}

fn quoted_list(values: impl IntoIterator<Item = impl AsRef<str>>) -> String {
    values
        .into_iter()
        .map(|v| format!("\"{}\"", sanitize_jql_value(v.as_ref())))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Compose independently-specified filters into one JQL query with AND
/// semantics. `selected_projects` applies only when the criteria carry no
/// explicit project filter.
fn build_jql(criteria: &SearchCriteria, selected_projects: &[String]) -> String {
    let mut clauses = Vec::new();

    if !criteria.projects.is_empty() {
        clauses.push(format!("project in ({})", quoted_list(&criteria.projects)));
    } else if !selected_projects.is_empty() {
        clauses.push(format!("project in ({})", quoted_list(selected_projects)));
    }

    if !criteria.statuses.is_empty() {
        clauses.push(format!("status in ({})", quoted_list(&criteria.statuses)));
    }

    if !criteria.assignees.is_empty() {
        clauses.push(format!("assignee in ({})", quoted_list(&criteria.assignees)));
    }

    if !criteria.query.is_empty() {
        clauses.push(format!("text ~ \"{}\"", sanitize_jql_value(&criteria.query)));
    }

    match criteria.search_type {
        SearchType::Recent => clauses.push(format!("updated >= -{}d", RECENT_WINDOW_DAYS)),
        // Provider-native sentinel avoids round-tripping the user id
        SearchType::AssignedToMe => clauses.push("assignee = currentUser()".to_string()),
        SearchType::Text | SearchType::All => {}
    }

    if clauses.is_empty() {
        "ORDER BY updated DESC".to_string()
    } else {
        format!("{} ORDER BY updated DESC", clauses.join(" AND "))
    }
}

/// Flatten an ADF block/inline document tree to plain text: concatenate
/// inline text runs, one newline per block boundary. Lossy: marks,
/// media, and structure do not survive.
fn flatten_adf(node: &Value) -> String {
    let blocks = match node.get("content").and_then(Value::as_array) {
        Some(blocks) => blocks,
        None => return node.get("text").and_then(Value::as_str).unwrap_or("").to_string(),
    };

    let mut lines = Vec::with_capacity(blocks.len());
    for block in blocks {
        let mut line = String::new();
        collect_inline_text(block, &mut line);
        lines.push(line);
    }
    lines.join("\n")
}

fn collect_inline_text(node: &Value, out: &mut String) {
    if let Some(text) = node.get("text").and_then(Value::as_str) {
        out.push_str(text);
    }
    if let Some(children) = node.get("content").and_then(Value::as_array) {
        for child in children {
            collect_inline_text(child, out);
        }
    }
}

/// Wrap plain text into a minimal ADF document, one paragraph per line.
fn text_to_adf(text: &str) -> Value {
    let paragraphs: Vec<Value> = text
        .split('\n')
        .map(|line| {
            if line.is_empty() {
                json!({ "type": "paragraph", "content": [] })
            } else {
                json!({
                    "type": "paragraph",
                    "content": [{ "type": "text", "text": line }]
                })
            }
        })
        .collect();

    json!({ "type": "doc", "version": 1, "content": paragraphs })
}

/// Validate a draft against the project's create schema. Returns the
/// schema-cased issue type name to use in the create call.
fn validate_create(meta: &CreateMeta, project_key: &str, draft: &TicketDraft) -> Result<String> {
    let project = meta
        .projects
        .iter()
        .find(|p| p.key.eq_ignore_ascii_case(project_key))
        .ok_or_else(|| {
            TrackHubError::Validation(format!(
                "Project {} is not visible to this connection",
                project_key
            ))
        })?;

    let issue_type = project
        .issuetypes
        .iter()
        .find(|t| t.name.eq_ignore_ascii_case(&draft.ticket_type))
        .ok_or_else(|| {
            let available: Vec<&str> =
                project.issuetypes.iter().map(|t| t.name.as_str()).collect();
            TrackHubError::Validation(format!(
                "Issue type \"{}\" does not exist in project {}; available types: {}",
                draft.ticket_type,
                project_key,
                available.join(", ")
            ))
        })?;

    if let Some(priority) = &draft.priority {
        if let Some(allowed) = allowed_priorities(issue_type) {
            if !allowed.iter().any(|p| p.eq_ignore_ascii_case(priority)) {
                return Err(TrackHubError::Validation(format!(
                    "Priority \"{}\" is not allowed for type {}; allowed: {}",
                    priority,
                    issue_type.name,
                    allowed.join(", ")
                )));
            }
        }
    }

    Ok(issue_type.name.clone())
}

fn allowed_priorities(issue_type: &CreateMetaIssueType) -> Option<Vec<String>> {
    let fields = issue_type.fields.as_ref()?;
    let allowed = fields.get("priority")?.get("allowedValues")?.as_array()?;
    Some(
        allowed
            .iter()
            .filter_map(|v| v.get("name").and_then(Value::as_str))
            .map(String::from)
            .collect(),
    )
}

fn parse_jira_time(value: Option<&str>) -> DateTime<Utc> {
    value
        .and_then(|s| {
            DateTime::parse_from_rfc3339(s)
                .or_else(|_| DateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.3f%z"))
                .ok()
        })
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(Utc::now)
}

/// Classify a native Jira record by shape and transform it.
pub fn transform_to_universal(native: &Value, browse_base: &str) -> Result<UniversalRecord> {
    if native.get("fields").is_some() {
        return Ok(UniversalRecord::Ticket(Box::new(transform_issue(
            native,
            browse_base,
        )?)));
    }
    if native.get("accountId").is_some() {
        return Ok(UniversalRecord::User(transform_user(native)?));
    }
    if native.get("key").is_some() && native.get("name").is_some() {
        return Ok(UniversalRecord::Project(transform_project(native)?));
    }
    Err(TrackHubError::UnknownNativeFormat(Platform::Jira))
}

/// Transform a page of search hits. One unparseable record is skipped
/// with a warning rather than failing the whole search.
fn transform_issues(issues: &[Value], browse_base: &str) -> Vec<Ticket> {
    let mut tickets = Vec::with_capacity(issues.len());
    for issue in issues {
        match transform_issue(issue, browse_base) {
            Ok(ticket) => tickets.push(ticket),
            Err(e) => warn!(
                key = issue.get("key").and_then(serde_json::Value::as_str).unwrap_or("?"),
                error = %e,
                "Skipping unparseable search result"
            ),
        }
    }
    tickets
}

fn transform_issue(native: &Value, browse_base: &str) -> Result<Ticket> {
    let issue: JiraIssue = serde_json::from_value(native.clone())
        .map_err(|_| TrackHubError::UnknownNativeFormat(Platform::Jira))?;

    let fields = &issue.fields;
    let description = fields
        .description
        .as_ref()
        .map(flatten_adf)
        .unwrap_or_default();

    // Unmapped field payloads are retained, never dropped
    let mut platform_specific = collect_extras(
        native.get("fields").unwrap_or(&Value::Null),
        &[
            "summary",
            "description",
            "issuetype",
            "status",
            "priority",
            "labels",
            "assignee",
            "reporter",
            "updated",
            "created",
            "project",
            "parent",
            "components",
        ],
    );
    if let Some(self_url) = native.get("self") {
        platform_specific.insert("self".to_string(), self_url.clone());
    }

    let url = if browse_base.is_empty() {
        format!("/browse/{}", issue.key)
    } else {
        format!("{}/browse/{}", browse_base, issue.key)
    };

    Ok(Ticket {
        id: issue.id,
        key: issue.key,
        title: fields.summary.clone(),
        description,
        ticket_type: fields.issue_type.name.clone(),
        status: fields.status.name.clone(),
        priority: fields
            .priority
            .as_ref()
            .map(|p| p.name.clone())
            .unwrap_or_else(|| "Medium".to_string()),
        assignee: fields.assignee.as_ref().map(|u| u.display_name.clone()),
        reporter: fields
            .reporter
            .as_ref()
            .map(|u| u.display_name.clone())
            .unwrap_or_else(|| "Unknown".to_string()),
        project: fields
            .project
            .as_ref()
            .map(|p| p.name.clone())
            .unwrap_or_default(),
        project_key: fields
            .project
            .as_ref()
            .map(|p| p.key.clone())
            .unwrap_or_default(),
        epic: fields.parent.as_ref().map(|p| p.key.clone()),
        labels: fields.labels.iter().cloned().collect(),
        components: fields.components.iter().map(|c| c.name.clone()).collect(),
        last_modified: parse_jira_time(fields.updated.as_deref()),
        created: parse_jira_time(fields.created.as_deref()),
        url,
        platform: Platform::Jira,
        platform_specific,
    })
}

fn transform_project(native: &Value) -> Result<Project> {
    let id = native
        .get("id")
        .and_then(Value::as_str)
        .map(String::from)
        .or_else(|| native.get("id").and_then(Value::as_i64).map(|i| i.to_string()))
        .ok_or(TrackHubError::UnknownNativeFormat(Platform::Jira))?;
    let key = native
        .get("key")
        .and_then(Value::as_str)
        .ok_or(TrackHubError::UnknownNativeFormat(Platform::Jira))?;
    let name = native
        .get("name")
        .and_then(Value::as_str)
        .ok_or(TrackHubError::UnknownNativeFormat(Platform::Jira))?;

    Ok(Project {
        id,
        key: key.to_string(),
        name: name.to_string(),
        platform: Platform::Jira,
        description: native
            .get("description")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .map(String::from),
        avatar_url: native
            .get("avatarUrls")
            .and_then(|a| a.get("48x48"))
            .and_then(Value::as_str)
            .map(String::from),
        platform_specific: collect_extras(
            native,
            &["id", "key", "name", "description", "avatarUrls"],
        ),
    })
}

fn transform_user(native: &Value) -> Result<User> {
    let user: JiraUser = serde_json::from_value(native.clone())
        .map_err(|_| TrackHubError::UnknownNativeFormat(Platform::Jira))?;

    Ok(User {
        id: user
            .account_id
            .ok_or(TrackHubError::UnknownNativeFormat(Platform::Jira))?,
        display_name: user.display_name,
        email: user.email,
        avatar_url: user
            .avatar_urls
            .as_ref()
            .and_then(|a| a.get("48x48").cloned()),
        platform: Platform::Jira,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::SearchCriteria;
    use serde_json::json;

    fn criteria(search_type: SearchType) -> SearchCriteria {
        SearchCriteria::new(search_type)
    }

    #[test]
    fn test_jql_recent_window() {
        let jql = build_jql(&criteria(SearchType::Recent), &[]);
        assert_eq!(jql, "updated >= -7d ORDER BY updated DESC");
    }

    #[test]
    fn test_jql_assigned_to_me_uses_sentinel() {
        let jql = build_jql(&criteria(SearchType::AssignedToMe), &[]);
        assert!(jql.contains("assignee = currentUser()"));
    }

    #[test]
    fn test_jql_composes_filters_with_and() {
        let c = SearchCriteria::text("login bug")
            .with_project("ENG")
            .with_status("To Do")
            .with_assignee("ada");
        let jql = build_jql(&c, &[]);

        assert!(jql.contains("project in (\"ENG\")"));
        assert!(jql.contains("status in (\"To Do\")"));
        assert!(jql.contains("assignee in (\"ada\")"));
        assert!(jql.contains("text ~ \"login bug\""));
        assert_eq!(jql.matches(" AND ").count(), 3);
        assert!(jql.ends_with("ORDER BY updated DESC"));
    }

    #[test]
    fn test_jql_selected_projects_fallback() {
        let selected = vec!["OPS".to_string()];
        let jql = build_jql(&criteria(SearchType::All), &selected);
        assert!(jql.contains("project in (\"OPS\")"));

        // Explicit criteria projects win over the persisted selection
        let c = criteria(SearchType::All).with_project("ENG");
        let jql = build_jql(&c, &selected);
        assert!(jql.contains("project in (\"ENG\")"));
        assert!(!jql.contains("OPS"));
    }

    #[test]
    fn test_jql_injection_is_stripped() {
        let c = SearchCriteria::text("\" OR 1=1 --");
        let jql = build_jql(&c, &[]);
        assert!(!jql.contains("\"\" OR"));
        assert!(!jql.contains("1=1"));
    }

    #[test]
    fn test_flatten_adf_one_newline_per_block() {
        let doc = json!({
            "type": "doc",
            "version": 1,
            "content": [
                { "type": "paragraph", "content": [
                    { "type": "text", "text": "First " },
                    { "type": "text", "text": "line" }
                ]},
                { "type": "paragraph", "content": [
                    { "type": "text", "text": "Second line" }
                ]},
                { "type": "bulletList", "content": [
                    { "type": "listItem", "content": [
                        { "type": "paragraph", "content": [
                            { "type": "text", "text": "item" }
                        ]}
                    ]}
                ]}
            ]
        });

        assert_eq!(flatten_adf(&doc), "First line\nSecond line\nitem");
    }

    #[test]
    fn test_text_to_adf_round_trips_through_flatten() {
        let text = "line one\nline two";
        let adf = text_to_adf(text);
        assert_eq!(adf["type"], "doc");
        assert_eq!(flatten_adf(&adf), text);
    }

    fn sample_meta() -> CreateMeta {
        serde_json::from_value(json!({
            "projects": [{
                "key": "ENG",
                "issuetypes": [
                    { "name": "Task" },
                    { "name": "Bug", "fields": {
                        "priority": { "allowedValues": [
                            { "name": "High" }, { "name": "Medium" }
                        ]}
                    }}
                ]
            }]
        }))
        .unwrap()
    }

    #[test]
    fn test_validate_create_unknown_type_names_available() {
        let draft = TicketDraft {
            title: "t".to_string(),
            ticket_type: "Story".to_string(),
            ..Default::default()
        };
        let err = validate_create(&sample_meta(), "ENG", &draft).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("Story"));
        assert!(msg.contains("Task"));
        assert!(msg.contains("Bug"));
    }

    #[test]
    fn test_validate_create_accepts_known_type_case_insensitive() {
        let draft = TicketDraft {
            title: "t".to_string(),
            ticket_type: "bug".to_string(),
            ..Default::default()
        };
        let name = validate_create(&sample_meta(), "ENG", &draft).unwrap();
        assert_eq!(name, "Bug");
    }

    #[test]
    fn test_validate_create_rejects_disallowed_priority() {
        let draft = TicketDraft {
            title: "t".to_string(),
            ticket_type: "Bug".to_string(),
            priority: Some("Blocker".to_string()),
            ..Default::default()
        };
        let err = validate_create(&sample_meta(), "ENG", &draft).unwrap_err();
        assert!(matches!(err, TrackHubError::Validation(_)));
        assert!(err.to_string().contains("High"));
    }

    #[test]
    fn test_validate_create_unknown_project() {
        let draft = TicketDraft {
            title: "t".to_string(),
            ticket_type: "Task".to_string(),
            ..Default::default()
        };
        let err = validate_create(&sample_meta(), "OPS", &draft).unwrap_err();
        assert!(matches!(err, TrackHubError::Validation(_)));
    }

    fn sample_issue() -> Value {
        json!({
            "id": "10001",
            "key": "ENG-42",
            "self": "https://example.atlassian.net/rest/api/3/issue/10001",
            "fields": {
                "summary": "Fix login flow",
                "description": {
                    "type": "doc", "version": 1,
                    "content": [
                        { "type": "paragraph", "content": [
                            { "type": "text", "text": "Broken on mobile" }
                        ]}
                    ]
                },
                "issuetype": { "name": "Bug" },
                "status": { "name": "In Progress" },
                "priority": { "name": "High" },
                "labels": ["auth", "mobile"],
                "assignee": { "accountId": "a1", "displayName": "Ada" },
                "reporter": { "accountId": "g1", "displayName": "Grace" },
                "updated": "2024-03-01T12:00:00.000+0000",
                "created": "2024-02-01T09:30:00.000+0000",
                "project": { "key": "ENG", "name": "Engineering" },
                "parent": { "key": "ENG-1" },
                "components": [{ "name": "backend" }],
                "customfield_10016": 5
            }
        })
    }

    #[test]
    fn test_transform_issue_maps_canonical_fields() {
        let ticket =
            transform_issue(&sample_issue(), "https://example.atlassian.net").unwrap();

        assert_eq!(ticket.key, "ENG-42");
        assert_eq!(ticket.title, "Fix login flow");
        assert_eq!(ticket.description, "Broken on mobile");
        assert_eq!(ticket.ticket_type, "Bug");
        assert_eq!(ticket.status, "In Progress");
        assert_eq!(ticket.priority, "High");
        assert_eq!(ticket.assignee.as_deref(), Some("Ada"));
        assert_eq!(ticket.reporter, "Grace");
        assert_eq!(ticket.project_key, "ENG");
        assert_eq!(ticket.epic.as_deref(), Some("ENG-1"));
        assert_eq!(ticket.components, vec!["backend".to_string()]);
        assert_eq!(ticket.url, "https://example.atlassian.net/browse/ENG-42");
        assert_eq!(ticket.platform, Platform::Jira);
    }

    #[test]
    fn test_transform_issue_retains_unmapped_fields() {
        let ticket = transform_issue(&sample_issue(), "").unwrap();
        assert_eq!(ticket.platform_specific["customfield_10016"], json!(5));
        assert!(ticket.platform_specific.contains_key("self"));
    }

    #[test]
    fn test_transform_issue_defaults() {
        let native = json!({
            "id": "1", "key": "ENG-1",
            "fields": {
                "summary": "Bare",
                "issuetype": { "name": "Task" },
                "status": { "name": "To Do" }
            }
        });
        let ticket = transform_issue(&native, "").unwrap();
        assert_eq!(ticket.priority, "Medium");
        assert_eq!(ticket.reporter, "Unknown");
        assert!(ticket.assignee.is_none());
        assert!(ticket.description.is_empty());
    }

    #[test]
    fn test_search_results_skip_malformed_records() {
        let issues = vec![
            sample_issue(),
            // No fields object: cannot become a ticket
            json!({ "id": "9999", "key": "ENG-99" }),
            json!({
                "id": "2", "key": "ENG-2",
                "fields": {
                    "summary": "Still fine",
                    "issuetype": { "name": "Task" },
                    "status": { "name": "To Do" }
                }
            }),
        ];

        let tickets = transform_issues(&issues, "");
        assert_eq!(tickets.len(), 2);
        assert_eq!(tickets[0].key, "ENG-42");
        assert_eq!(tickets[1].key, "ENG-2");
    }

    #[test]
    fn test_transform_universal_classifies_by_shape() {
        let issue = transform_to_universal(&sample_issue(), "").unwrap();
        assert!(matches!(issue, UniversalRecord::Ticket(_)));

        let project = transform_to_universal(
            &json!({ "id": "100", "key": "ENG", "name": "Engineering" }),
            "",
        )
        .unwrap();
        assert!(matches!(project, UniversalRecord::Project(_)));

        let user = transform_to_universal(
            &json!({ "accountId": "a1", "displayName": "Ada" }),
            "",
        )
        .unwrap();
        assert!(matches!(user, UniversalRecord::User(_)));

        let err = transform_to_universal(&json!({ "weird": true }), "").unwrap_err();
        assert!(matches!(err, TrackHubError::UnknownNativeFormat(_)));
    }

    #[test]
    fn test_create_then_transform_preserves_title_type_description() {
        // Round-trip: native -> canonical -> create payload fields
        let ticket = transform_issue(&sample_issue(), "").unwrap();
        let draft = TicketDraft {
            title: ticket.title.clone(),
            description: ticket.description.clone(),
            ticket_type: ticket.ticket_type.clone(),
            ..Default::default()
        };

        assert_eq!(draft.title, "Fix login flow");
        assert_eq!(draft.ticket_type, "Bug");
        // Flattening is lossy by design; the plain text survives
        assert_eq!(flatten_adf(&text_to_adf(&draft.description)), "Broken on mobile");
    }

    #[test]
    fn test_parse_jira_time_formats() {
        let iso = parse_jira_time(Some("2024-03-01T12:00:00.000+0000"));
        assert_eq!(iso.timestamp(), 1_709_294_400);

        let rfc = parse_jira_time(Some("2024-03-01T12:00:00Z"));
        assert_eq!(rfc.timestamp(), 1_709_294_400);
    }
}
