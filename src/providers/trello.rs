//! Trello-family provider adapter (OAuth1.0a key/token flow)
//!
//! Trello has no server-side query language and models status as "which
//! list the card sits in". Search fetches candidate cards per board
//! (bounded when no board subset is selected), filters client-side, sorts
//! by last activity, and truncates. Priority has no native field and is
//! derived from label text.

use crate::config::TrelloProviderConfig;
use crate::connection::{Connection, ConnectionStore, Credentials};
use crate::model::ticket::collect_extras;
use crate::model::{
    Platform, Project, SearchCriteria, SearchType, Ticket, TicketDraft, TicketUpdate,
    UniversalRecord, User,
};
use crate::providers::retry::{with_retry, RetryConfig};
use crate::providers::{OAuthStart, TicketProvider};
use crate::{Result, TrackHubError};
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
use reqwest::{Client, Response, StatusCode};
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Public API root; all filtering happens client-side
const TRELLO_API: &str = "https://api.trello.com/1";
const TRELLO_AUTHORIZE: &str = "https://trello.com/1/authorize";

/// Per-request timeout for list/card collection fetches
const SEARCH_TIMEOUT: Duration = Duration::from_secs(30);
/// Per-request timeout for single record fetches
const GET_TIMEOUT: Duration = Duration::from_secs(10);
/// Per-request timeout for create/update operations
const WRITE_TIMEOUT: Duration = Duration::from_secs(15);

/// "Recent" searches constrain to this activity window
const RECENT_WINDOW_DAYS: i64 = 7;

const CARD_FIELDS: &str = "name,desc,idBoard,idList,idMembers,idMemberCreator,labels,\
                           dateLastActivity,shortLink,shortUrl,closed";

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
struct TrelloCard {
    id: String,
    name: String,
    #[serde(default)]
    desc: String,
    #[serde(rename = "idBoard", default)]
    id_board: String,
    #[serde(rename = "idList", default)]
    id_list: String,
    #[serde(rename = "idMembers", default)]
    id_members: Vec<String>,
    #[serde(rename = "idMemberCreator", default)]
    id_member_creator: Option<String>,
    #[serde(default)]
    labels: Vec<TrelloLabel>,
    #[serde(rename = "dateLastActivity", default)]
    date_last_activity: Option<String>,
    #[serde(rename = "shortLink", default)]
    short_link: Option<String>,
    #[serde(rename = "shortUrl", default)]
    short_url: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct TrelloLabel {
    #[serde(default)]
    name: String,
}

#[derive(Debug, Clone, Deserialize)]
struct TrelloBoard {
    id: String,
    name: String,
    #[serde(default)]
    closed: bool,
}

#[derive(Debug, Clone, Deserialize)]
struct TrelloList {
    id: String,
    name: String,
}

#[derive(Debug, Clone, Deserialize)]
struct TrelloBoardLabel {
    id: String,
    #[serde(default)]
    name: String,
}

#[derive(Debug, Clone, Deserialize)]
struct TrelloMember {
    id: String,
    #[serde(default)]
    username: String,
    #[serde(rename = "fullName", default)]
    full_name: String,
    #[serde(default)]
    email: Option<String>,
    #[serde(rename = "avatarUrl", default)]
    avatar_url: Option<String>,
}

/// Board-scoped context a card needs to become a canonical ticket
#[derive(Debug, Clone, Default)]
struct BoardContext {
    board_name: String,
    /// list id -> list name
    lists: HashMap<String, String>,
    /// member id -> display name
    members: HashMap<String, String>,
}

// ---------------------------------------------------------------------------
// Adapter
// ---------------------------------------------------------------------------

/// Trello API adapter
pub struct TrelloProvider {
    client: Client,
    config: TrelloProviderConfig,
    store: ConnectionStore,
    connection: RwLock<Connection>,
}

impl TrelloProvider {
    /// Create an adapter, reconstructing connection state from the store.
    pub fn new(config: TrelloProviderConfig, store: ConnectionStore) -> Result<Self> {
        let client = Client::builder().timeout(SEARCH_TIMEOUT).build()?;
        let connection = store.load(Platform::Trello);

        Ok(Self {
            client,
            config,
            store,
            connection: RwLock::new(connection),
        })
    }

    /// key/token query parameters appended to every call
    async fn auth_params(&self) -> Result<[(String, String); 2]> {
        let conn = self.connection.read().await;
        match &conn.credentials {
            Some(Credentials::KeyToken { api_key, token, .. }) => Ok([
                ("key".to_string(), api_key.clone()),
                ("token".to_string(), token.clone()),
            ]),
            _ => Err(TrackHubError::NotConnected(Platform::Trello)),
        }
    }

    async fn ensure_ready(&self) -> Result<()> {
        if !self.is_connected().await {
            return Err(TrackHubError::NotConnected(Platform::Trello));
        }
        self.refresh_token_if_needed().await
    }

    async fn invalidate(&self) -> Result<()> {
        let mut conn = self.connection.write().await;
        conn.clear();
        self.store.save(&conn)?;
        warn!(platform = %Platform::Trello, "Connection invalidated");
        Ok(())
    }

    async fn check(&self, response: Response) -> Result<Response> {
        let status = response.status();
        match status {
            StatusCode::UNAUTHORIZED => {
                self.invalidate().await?;
                Err(TrackHubError::AuthenticationFailed(Platform::Trello))
            }
            StatusCode::FORBIDDEN => {
                let detail = response.text().await.unwrap_or_default();
                Err(TrackHubError::PermissionDenied {
                    platform: Platform::Trello,
                    detail,
                })
            }
            s if !s.is_success() => {
                let body = response.text().await.unwrap_or_default();
                Err(TrackHubError::Provider {
                    platform: Platform::Trello,
                    status: s.as_u16(),
                    body,
                })
            }
            _ => Ok(response),
        }
    }

    async fn api_get(&self, path: &str, query: &[(&str, &str)], timeout: Duration) -> Result<Value> {
        let auth = self.auth_params().await?;
        let url = format!("{}{}", TRELLO_API, path);
        let response = self
            .client
            .get(&url)
            .query(&auth)
            .query(query)
            .timeout(timeout)
            .send()
            .await?;
        let response = self.check(response).await?;
        Ok(response.json().await?)
    }

    async fn api_get_retrying(
        &self,
        name: &str,
        path: &str,
        query: &[(&str, &str)],
        timeout: Duration,
    ) -> Result<Value> {
        with_retry(&RetryConfig::quick(), name, || {
            self.api_get(path, query, timeout)
        })
        .await
    }

    /// Boards in scope for a search: the explicit criteria filter, then
    /// the persisted selection, then (first run) the member's boards
    /// capped to the configured scan limit.
    async fn boards_in_scope(&self, criteria: &SearchCriteria) -> Result<Vec<TrelloBoard>> {
        let selected: Vec<String> = if !criteria.projects.is_empty() {
            criteria.projects.iter().cloned().collect()
        } else {
            self.connection.read().await.selected_projects.clone()
        };

        if selected.is_empty() {
            let native = self
                .api_get_retrying(
                    "trello_member_boards",
                    "/members/me/boards",
                    &[("fields", "name,desc,closed")],
                    SEARCH_TIMEOUT,
                )
                .await?;
            let boards: Vec<TrelloBoard> = serde_json::from_value(native)?;
            let open: Vec<TrelloBoard> = boards.into_iter().filter(|b| !b.closed).collect();

            if open.len() > self.config.board_scan_limit {
                debug!(
                    total = open.len(),
                    cap = self.config.board_scan_limit,
                    "No board selection yet; capping scan"
                );
            }
            Ok(open
                .into_iter()
                .take(self.config.board_scan_limit)
                .collect())
        } else {
            let mut boards = Vec::with_capacity(selected.len());
            for id in &selected {
                let native = self
                    .api_get_retrying(
                        "trello_get_board",
                        &format!("/boards/{}", id),
                        &[("fields", "name,desc,closed")],
                        GET_TIMEOUT,
                    )
                    .await?;
                boards.push(serde_json::from_value(native)?);
            }
            Ok(boards)
        }
    }

    async fn board_context(&self, board: &TrelloBoard) -> Result<BoardContext> {
        let lists_native = self
            .api_get_retrying(
                "trello_board_lists",
                &format!("/boards/{}/lists", board.id),
                &[("fields", "name")],
                GET_TIMEOUT,
            )
            .await?;
        let lists: Vec<TrelloList> = serde_json::from_value(lists_native)?;

        let members_native = self
            .api_get_retrying(
                "trello_board_members",
                &format!("/boards/{}/members", board.id),
                &[("fields", "fullName,username")],
                GET_TIMEOUT,
            )
            .await?;
        let members: Vec<TrelloMember> = serde_json::from_value(members_native)?;

        Ok(BoardContext {
            board_name: board.name.clone(),
            lists: lists.into_iter().map(|l| (l.id, l.name)).collect(),
            members: members
                .into_iter()
                .map(|m| {
                    let name = if m.full_name.is_empty() {
                        m.username
                    } else {
                        m.full_name
                    };
                    (m.id, name)
                })
                .collect(),
        })
    }

    async fn board_labels(&self, board_id: &str) -> Result<Vec<TrelloBoardLabel>> {
        let native = self
            .api_get_retrying(
                "trello_board_labels",
                &format!("/boards/{}/labels", board_id),
                &[("fields", "name")],
                GET_TIMEOUT,
            )
            .await?;
        Ok(serde_json::from_value(native)?)
    }

    async fn current_member(&self) -> Result<TrelloMember> {
        let native = self
            .api_get_retrying(
                "trello_me",
                "/members/me",
                &[("fields", "username,fullName,email,avatarUrl")],
                GET_TIMEOUT,
            )
            .await?;
        Ok(serde_json::from_value(native)?)
    }

    /// Pure transform from a native Trello record to the canonical model.
    pub fn transform_to_universal(&self, native: &Value) -> Result<UniversalRecord> {
        transform_to_universal(native)
    }
}

#[async_trait]
impl TicketProvider for TrelloProvider {
    fn platform(&self) -> Platform {
        Platform::Trello
    }

    async fn connection(&self) -> Connection {
        self.connection.read().await.clone()
    }

    async fn is_connected(&self) -> bool {
        self.connection.read().await.is_usable()
    }

    async fn start_oauth_flow(&self, _instance_url: Option<&str>) -> Result<OAuthStart> {
        if self.config.api_key.is_empty() {
            return Err(TrackHubError::Config(
                "Trello api_key is not configured".to_string(),
            ));
        }

        let auth_url = format!(
            "{}?expiration=never&name={}&scope=read,write&response_type=token&key={}&return_url={}",
            TRELLO_AUTHORIZE,
            urlencoding::encode(&self.config.app_name),
            urlencoding::encode(&self.config.api_key),
            urlencoding::encode(&self.config.return_url),
        );

        // Token-response flow carries no state parameter
        Ok(OAuthStart {
            auth_url,
            state: None,
        })
    }

    async fn handle_oauth_callback(&self, params: &HashMap<String, String>) -> Result<Connection> {
        let token = params
            .get("token")
            .filter(|t| !t.is_empty())
            .ok_or_else(|| {
                TrackHubError::AuthExchangeFailed("callback is missing the token".to_string())
            })?;

        {
            let mut conn = self.connection.write().await;
            conn.credentials = Some(Credentials::KeyToken {
                api_key: self.config.api_key.clone(),
                token: token.clone(),
                token_expiry: None,
            });
            conn.is_connected = true;
        }

        // Validate the token before persisting anything
        match self.current_member().await {
            Ok(member) => {
                let mut conn = self.connection.write().await;
                conn.user_email = member.email;
                conn.site_name = Some(if member.full_name.is_empty() {
                    member.username
                } else {
                    member.full_name
                });
                self.store.save(&conn)?;
                info!(platform = %Platform::Trello, "OAuth callback completed");
                Ok(conn.clone())
            }
            Err(e) => {
                let mut conn = self.connection.write().await;
                conn.clear();
                Err(TrackHubError::AuthExchangeFailed(format!(
                    "token was rejected by the provider: {}",
                    e
                )))
            }
        }
    }

    async fn refresh_token_if_needed(&self) -> Result<()> {
        // Key/token credentials have no refresh path: an expired token
        // can only be repaired by reconnecting.
        let expired = {
            let conn = self.connection.read().await;
            conn.credentials
                .as_ref()
                .map(|c| c.is_expired())
                .unwrap_or(false)
        };

        if expired {
            self.invalidate().await?;
            return Err(TrackHubError::ReauthRequired {
                platform: Platform::Trello,
                reason: "token expired and key/token credentials cannot be refreshed".to_string(),
            });
        }
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        let mut conn = self.connection.write().await;
        conn.clear();
        self.store.clear(Platform::Trello)?;
        self.store.save(&conn)?;
        info!(platform = %Platform::Trello, "Disconnected");
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

        let me_id = if criteria.search_type == SearchType::AssignedToMe {
            Some(self.current_member().await?.id)
        } else {
            None
        };

        let boards = self.boards_in_scope(criteria).await?;
        let mut matches: Vec<(DateTime<Utc>, Ticket)> = Vec::new();

        for board in &boards {
            let ctx = self.board_context(board).await?;
            let cards_native = self
                .api_get_retrying(
                    "trello_board_cards",
                    &format!("/boards/{}/cards", board.id),
                    &[("fields", CARD_FIELDS), ("filter", "open")],
                    SEARCH_TIMEOUT,
                )
                .await?;

            let cards = cards_native
                .as_array()
                .cloned()
                .unwrap_or_default();

            for native in &cards {
                let card: TrelloCard = match serde_json::from_value(native.clone()) {
                    Ok(card) => card,
                    Err(e) => {
                        warn!(board = %board.id, error = %e, "Skipping unparseable card");
                        continue;
                    }
                };

                if !card_matches(&card, &ctx, criteria, me_id.as_deref()) {
                    continue;
                }

                let ticket = transform_card(native, &card, &ctx)?;
                matches.push((ticket.last_modified, ticket));
            }
        }

        // Last activity descending, then truncate
        matches.sort_by(|a, b| b.0.cmp(&a.0));
        matches.truncate(criteria.max_results);

        let tickets: Vec<Ticket> = matches.into_iter().map(|(_, t)| t).collect();
        info!(
            boards = boards.len(),
            count = tickets.len(),
            "Trello search complete"
        );
        Ok(tickets)
    }

    async fn get_ticket(&self, key: &str) -> Result<Ticket> {
        self.ensure_ready().await?;

        let native = self
            .api_get_retrying(
                "trello_get_card",
                &format!("/cards/{}", key),
                &[("fields", CARD_FIELDS)],
                GET_TIMEOUT,
            )
            .await?;
        let card: TrelloCard = serde_json::from_value(native.clone())
            .map_err(|_| TrackHubError::UnknownNativeFormat(Platform::Trello))?;

        let board_native = self
            .api_get_retrying(
                "trello_get_board",
                &format!("/boards/{}", card.id_board),
                &[("fields", "name,desc,closed")],
                GET_TIMEOUT,
            )
            .await?;
        let board: TrelloBoard = serde_json::from_value(board_native)?;
        let ctx = self.board_context(&board).await?;

        transform_card(&native, &card, &ctx)
    }

    async fn get_projects(&self) -> Result<Vec<Project>> {
        self.ensure_ready().await?;

        let native = self
            .api_get_retrying(
                "trello_member_boards",
                "/members/me/boards",
                &[("fields", "name,desc,closed,shortLink,shortUrl,prefs")],
                SEARCH_TIMEOUT,
            )
            .await?;

        let boards = native.as_array().cloned().unwrap_or_default();
        boards
            .iter()
            .filter(|b| !b.get("closed").and_then(Value::as_bool).unwrap_or(false))
            .map(transform_board)
            .collect()
    }

    async fn get_current_user(&self) -> Result<User> {
        self.ensure_ready().await?;
        let native = self
            .api_get_retrying(
                "trello_me",
                "/members/me",
                &[("fields", "username,fullName,email,avatarUrl")],
                GET_TIMEOUT,
            )
            .await?;
        transform_member(&native)
    }

    async fn create_ticket(&self, project_key: &str, draft: &TicketDraft) -> Result<Ticket> {
        self.ensure_ready().await?;

        // Cards must land in a list; an empty board is a client-side
        // precondition failure, not an opaque provider rejection.
        let lists_native = self
            .api_get_retrying(
                "trello_board_lists",
                &format!("/boards/{}/lists", project_key),
                &[("fields", "name")],
                GET_TIMEOUT,
            )
            .await?;
        let lists: Vec<TrelloList> = serde_json::from_value(lists_native)?;
        if lists.is_empty() {
            return Err(TrackHubError::Validation(format!(
                "Board {} has no lists to place a card in",
                project_key
            )));
        }

        // New cards land in the first list (typically the backlog)
        let list_id = lists[0].id.clone();

        let mut params: Vec<(&str, String)> = vec![
            ("idList", list_id),
            ("name", draft.title.clone()),
            ("desc", draft.description.clone()),
        ];

        // Priority has no native field; it and the requested labels ride
        // on the board's labels.
        if !draft.labels.is_empty() || draft.priority.is_some() {
            let board_labels = self.board_labels(project_key).await?;
            let (ids, unmatched) =
                resolve_label_ids(&board_labels, &draft.labels, draft.priority.as_deref());
            if !ids.is_empty() {
                params.push(("idLabels", ids.join(",")));
            }
            if !unmatched.is_empty() {
                warn!(
                    board = %project_key,
                    unmatched = ?unmatched,
                    "No board label matches these requests, skipping them"
                );
            }
        }

        let auth = self.auth_params().await?;
        info!(board = %project_key, title = %draft.title, "Creating Trello card");

        let response = self
            .client
            .post(format!("{}/cards", TRELLO_API))
            .query(&auth)
            .query(&params)
            .timeout(WRITE_TIMEOUT)
            .send()
            .await?;
        let response = self.check(response).await?;
        let created: TrelloCard = response.json().await?;

        self.get_ticket(&created.id).await
    }

    async fn update_ticket(&self, key: &str, update: &TicketUpdate) -> Result<Ticket> {
        self.ensure_ready().await?;

        let native = self
            .api_get_retrying(
                "trello_get_card",
                &format!("/cards/{}", key),
                &[("fields", "idBoard,idLabels")],
                GET_TIMEOUT,
            )
            .await?;
        let board_id = native
            .get("idBoard")
            .and_then(Value::as_str)
            .ok_or(TrackHubError::UnknownNativeFormat(Platform::Trello))?
            .to_string();
        let current_label_ids: Vec<String> = native
            .get("idLabels")
            .and_then(Value::as_array)
            .map(|a| {
                a.iter()
                    .filter_map(Value::as_str)
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default();

        let mut params: Vec<(&str, String)> = Vec::new();
        if let Some(title) = &update.title {
            params.push(("name", title.clone()));
        }
        if let Some(description) = &update.description {
            params.push(("desc", description.clone()));
        }

        // Labels and priority both resolve against the board's labels;
        // `idLabels` replaces the card's whole label set, so a
        // priority-only change keeps the existing labels.
        if update.labels.is_some() || update.priority.is_some() {
            let board_labels = self.board_labels(&board_id).await?;
            let names = update.labels.clone().unwrap_or_default();
            let (mut ids, unmatched) =
                resolve_label_ids(&board_labels, &names, update.priority.as_deref());
            if update.labels.is_none() {
                for id in current_label_ids {
                    if !ids.contains(&id) {
                        ids.push(id);
                    }
                }
            }
            params.push(("idLabels", ids.join(",")));
            if !unmatched.is_empty() {
                warn!(
                    key = %key,
                    unmatched = ?unmatched,
                    "No board label matches these requests, skipping them"
                );
            }
        }

        // Status is "which list the card sits in": move it to a list
        // matched by case-insensitive substring, or skip silently.
        if let Some(status) = &update.status {
            let lists_native = self
                .api_get_retrying(
                    "trello_board_lists",
                    &format!("/boards/{}/lists", board_id),
                    &[("fields", "name")],
                    GET_TIMEOUT,
                )
                .await?;
            let lists: Vec<TrelloList> = serde_json::from_value(lists_native)?;

            match find_list_for_status(&lists, status) {
                Some(list) => params.push(("idList", list.id.clone())),
                None => debug!(
                    key = %key,
                    requested = %status,
                    "No list matches requested status, skipping status change"
                ),
            }
        }

        if !params.is_empty() {
            let auth = self.auth_params().await?;
            let response = self
                .client
                .put(format!("{}/cards/{}", TRELLO_API, key))
                .query(&auth)
                .query(&params)
                .timeout(WRITE_TIMEOUT)
                .send()
                .await?;
            self.check(response).await?;
        }

        self.get_ticket(key).await
    }
}

// ---------------------------------------------------------------------------
// Pure functions: filtering, priority derivation, transforms
// ---------------------------------------------------------------------------

/// Derive a canonical priority from label text. Case-insensitive
/// substring match against a fixed ordered table; first tier wins.
fn priority_from_labels<'a>(labels: impl IntoIterator<Item = &'a str>) -> &'static str {
    const TABLE: &[(&[&str], &str)] = &[
        (&["critical", "urgent"], "Highest"),
        (&["high", "important"], "High"),
        (&["low", "minor"], "Low"),
    ];

    let lowered: Vec<String> = labels.into_iter().map(str::to_lowercase).collect();
    for (needles, priority) in TABLE {
        for label in &lowered {
            if needles.iter().any(|n| label.contains(n)) {
                return priority;
            }
        }
    }
    "Medium"
}

/// Label text a requested priority tier rides on. Medium is the default
/// tier and needs no label; the needles mirror `priority_from_labels` so
/// a written priority reads back as itself.
fn label_needles_for_priority(priority: &str) -> &'static [&'static str] {
    match priority.to_lowercase().as_str() {
        "highest" => &["critical", "urgent"],
        "high" => &["high", "important"],
        "low" | "lowest" => &["low", "minor"],
        _ => &[],
    }
}

/// Resolve requested label names (and a priority tier) against the
/// board's labels: exact case-insensitive match for names, substring
/// match for the priority needles. Returns matched ids plus the requests
/// nothing matched.
fn resolve_label_ids(
    board_labels: &[TrelloBoardLabel],
    names: &[String],
    priority: Option<&str>,
) -> (Vec<String>, Vec<String>) {
    let mut ids = Vec::new();
    let mut unmatched = Vec::new();

    for name in names {
        let needle = name.to_lowercase();
        match board_labels
            .iter()
            .find(|l| l.name.to_lowercase() == needle)
        {
            Some(label) => ids.push(label.id.clone()),
            None => unmatched.push(name.clone()),
        }
    }

    if let Some(priority) = priority {
        let needles = label_needles_for_priority(priority);
        if !needles.is_empty() {
            let hit = board_labels.iter().find(|l| {
                let name = l.name.to_lowercase();
                needles.iter().any(|n| name.contains(n))
            });
            match hit {
                Some(label) => {
                    if !ids.contains(&label.id) {
                        ids.push(label.id.clone());
                    }
                }
                None => unmatched.push(format!("priority {}", priority)),
            }
        }
    }

    (ids, unmatched)
}

/// Case-insensitive substring match of a requested status against list
/// names. `None` means the status change is skipped.
fn find_list_for_status<'a>(lists: &'a [TrelloList], status: &str) -> Option<&'a TrelloList> {
    if status.is_empty() {
        return None;
    }
    let needle = status.to_lowercase();
    lists.iter().find(|l| {
        let name = l.name.to_lowercase();
        name.contains(&needle) || needle.contains(&name)
    })
}

fn parse_activity(value: Option<&str>) -> Option<DateTime<Utc>> {
    value
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc))
}

/// Card creation time is encoded in the first 8 hex chars of its id
fn created_from_id(id: &str) -> Option<DateTime<Utc>> {
    let hex = id.get(0..8)?;
    let secs = i64::from_str_radix(hex, 16).ok()?;
    Utc.timestamp_opt(secs, 0).single()
}

/// Client-side filter: all criteria compose with AND semantics.
fn card_matches(
    card: &TrelloCard,
    ctx: &BoardContext,
    criteria: &SearchCriteria,
    me_id: Option<&str>,
) -> bool {
    let list_name = ctx.lists.get(&card.id_list).cloned().unwrap_or_default();

    if !criteria.statuses.is_empty() {
        let list_lower = list_name.to_lowercase();
        let hit = criteria
            .statuses
            .iter()
            .any(|s| list_lower.contains(&s.to_lowercase()));
        if !hit {
            return false;
        }
    }

    if !criteria.assignees.is_empty() {
        let names: Vec<String> = card
            .id_members
            .iter()
            .filter_map(|id| ctx.members.get(id))
            .map(|n| n.to_lowercase())
            .collect();
        let hit = criteria
            .assignees
            .iter()
            .any(|a| names.iter().any(|n| n.contains(&a.to_lowercase())));
        if !hit {
            return false;
        }
    }

    if !criteria.query.is_empty() {
        let needle = criteria.query.to_lowercase();
        if !card.name.to_lowercase().contains(&needle)
            && !card.desc.to_lowercase().contains(&needle)
        {
            return false;
        }
    }

    match criteria.search_type {
        SearchType::AssignedToMe => match me_id {
            Some(me) => card.id_members.iter().any(|id| id == me),
            None => false,
        },
        SearchType::Recent => {
            let cutoff = Utc::now() - ChronoDuration::days(RECENT_WINDOW_DAYS);
            parse_activity(card.date_last_activity.as_deref())
                .map(|dt| dt >= cutoff)
                .unwrap_or(false)
        }
        SearchType::Text | SearchType::All => true,
    }
}

fn transform_card(native: &Value, card: &TrelloCard, ctx: &BoardContext) -> Result<Ticket> {
    let status = ctx
        .lists
        .get(&card.id_list)
        .cloned()
        .unwrap_or_else(|| card.id_list.clone());

    let label_names: Vec<String> = card
        .labels
        .iter()
        .map(|l| l.name.clone())
        .filter(|n| !n.is_empty())
        .collect();

    let created = created_from_id(&card.id).unwrap_or_else(Utc::now);
    let last_modified = parse_activity(card.date_last_activity.as_deref()).unwrap_or(created);

    let platform_specific = collect_extras(
        native,
        &[
            "id",
            "name",
            "desc",
            "idList",
            "idMembers",
            "idMemberCreator",
            "labels",
            "dateLastActivity",
            "shortUrl",
        ],
    );

    Ok(Ticket {
        id: card.id.clone(),
        key: card.short_link.clone().unwrap_or_else(|| card.id.clone()),
        title: card.name.clone(),
        description: card.desc.clone(),
        ticket_type: "Card".to_string(),
        status,
        priority: priority_from_labels(label_names.iter().map(String::as_str)).to_string(),
        assignee: card
            .id_members
            .first()
            .and_then(|id| ctx.members.get(id))
            .cloned(),
        reporter: card
            .id_member_creator
            .as_ref()
            .and_then(|id| ctx.members.get(id))
            .cloned()
            .unwrap_or_else(|| "Unknown".to_string()),
        project: ctx.board_name.clone(),
        project_key: card.id_board.clone(),
        epic: None,
        labels: label_names.into_iter().collect(),
        components: Vec::new(),
        last_modified,
        created,
        url: card
            .short_url
            .clone()
            .unwrap_or_else(|| format!("https://trello.com/c/{}", card.id)),
        platform: Platform::Trello,
        platform_specific,
    })
}

fn transform_board(native: &Value) -> Result<Project> {
    let id = native
        .get("id")
        .and_then(Value::as_str)
        .ok_or(TrackHubError::UnknownNativeFormat(Platform::Trello))?;
    let name = native
        .get("name")
        .and_then(Value::as_str)
        .ok_or(TrackHubError::UnknownNativeFormat(Platform::Trello))?;

    Ok(Project {
        id: id.to_string(),
        key: native
            .get("shortLink")
            .and_then(Value::as_str)
            .unwrap_or(id)
            .to_string(),
        name: name.to_string(),
        platform: Platform::Trello,
        description: native
            .get("desc")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .map(String::from),
        avatar_url: None,
        platform_specific: collect_extras(native, &["id", "name", "desc", "shortLink"]),
    })
}

fn transform_member(native: &Value) -> Result<User> {
    let member: TrelloMember = serde_json::from_value(native.clone())
        .map_err(|_| TrackHubError::UnknownNativeFormat(Platform::Trello))?;

    Ok(User {
        id: member.id,
        display_name: if member.full_name.is_empty() {
            member.username
        } else {
            member.full_name
        },
        email: member.email,
        avatar_url: member.avatar_url,
        platform: Platform::Trello,
    })
}

/// Classify a native Trello record by shape and transform it.
pub fn transform_to_universal(native: &Value) -> Result<UniversalRecord> {
    if native.get("username").is_some() {
        return Ok(UniversalRecord::User(transform_member(native)?));
    }
    if native.get("idList").is_some() || native.get("idBoard").is_some() {
        let card: TrelloCard = serde_json::from_value(native.clone())
            .map_err(|_| TrackHubError::UnknownNativeFormat(Platform::Trello))?;
        let ctx = BoardContext::default();
        return Ok(UniversalRecord::Ticket(Box::new(transform_card(
            native, &card, &ctx,
        )?)));
    }
    if native.get("id").is_some() && native.get("name").is_some() {
        return Ok(UniversalRecord::Project(transform_board(native)?));
    }
    Err(TrackHubError::UnknownNativeFormat(Platform::Trello))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_priority_urgent_label_is_highest() {
        assert_eq!(priority_from_labels(["urgent", "design"]), "Highest");
    }

    #[test]
    fn test_priority_no_labels_is_medium() {
        assert_eq!(priority_from_labels([]), "Medium");
    }

    #[test]
    fn test_priority_tiers_and_substring_match() {
        assert_eq!(priority_from_labels(["CRITICAL-path"]), "Highest");
        assert_eq!(priority_from_labels(["very important"]), "High");
        assert_eq!(priority_from_labels(["minor polish"]), "Low");
        assert_eq!(priority_from_labels(["design", "frontend"]), "Medium");
        // Highest tier wins even when listed later
        assert_eq!(priority_from_labels(["low", "urgent"]), "Highest");
    }

    fn board_labels() -> Vec<TrelloBoardLabel> {
        serde_json::from_value(json!([
            { "id": "lab1", "name": "Urgent" },
            { "id": "lab2", "name": "design" },
            { "id": "lab3", "name": "backend" }
        ]))
        .unwrap()
    }

    #[test]
    fn test_resolve_label_ids_matches_names_case_insensitive() {
        let (ids, unmatched) = resolve_label_ids(
            &board_labels(),
            &["DESIGN".to_string(), "frontend".to_string()],
            None,
        );
        assert_eq!(ids, vec!["lab2".to_string()]);
        assert_eq!(unmatched, vec!["frontend".to_string()]);
    }

    #[test]
    fn test_resolve_label_ids_maps_priority_onto_board_label() {
        let (ids, unmatched) = resolve_label_ids(&board_labels(), &[], Some("Highest"));
        assert_eq!(ids, vec!["lab1".to_string()]);
        assert!(unmatched.is_empty());

        // A written priority reads back as itself
        assert_eq!(priority_from_labels(["Urgent"]), "Highest");
    }

    #[test]
    fn test_resolve_label_ids_priority_with_no_matching_label() {
        let (ids, unmatched) = resolve_label_ids(&board_labels(), &[], Some("High"));
        assert!(ids.is_empty());
        assert_eq!(unmatched, vec!["priority High".to_string()]);
    }

    #[test]
    fn test_resolve_label_ids_medium_needs_no_label() {
        let (ids, unmatched) = resolve_label_ids(&board_labels(), &[], Some("Medium"));
        assert!(ids.is_empty());
        assert!(unmatched.is_empty());
        assert!(label_needles_for_priority("Medium").is_empty());
    }

    #[test]
    fn test_resolve_label_ids_deduplicates_priority_label() {
        // The name request already picked the priority-bearing label
        let (ids, unmatched) =
            resolve_label_ids(&board_labels(), &["urgent".to_string()], Some("Highest"));
        assert_eq!(ids, vec!["lab1".to_string()]);
        assert!(unmatched.is_empty());
    }

    fn lists() -> Vec<TrelloList> {
        serde_json::from_value(json!([
            { "id": "l1", "name": "Backlog" },
            { "id": "l2", "name": "In Progress" },
            { "id": "l3", "name": "Done" }
        ]))
        .unwrap()
    }

    #[test]
    fn test_find_list_for_status_substring_case_insensitive() {
        let lists = lists();
        assert_eq!(find_list_for_status(&lists, "progress").unwrap().id, "l2");
        assert_eq!(find_list_for_status(&lists, "DONE").unwrap().id, "l3");
        assert!(find_list_for_status(&lists, "Review").is_none());
        assert!(find_list_for_status(&lists, "").is_none());
    }

    fn sample_card() -> Value {
        json!({
            "id": "65f1c0000000000000000001",
            "name": "Polish onboarding",
            "desc": "Tighten the copy",
            "idBoard": "b1",
            "idList": "l2",
            "idMembers": ["m1"],
            "idMemberCreator": "m2",
            "labels": [{ "name": "urgent" }, { "name": "design" }],
            "dateLastActivity": "2024-03-10T08:00:00.000Z",
            "shortLink": "abCd1234",
            "shortUrl": "https://trello.com/c/abCd1234",
            "badges": { "votes": 2 }
        })
    }

    fn sample_ctx() -> BoardContext {
        BoardContext {
            board_name: "Product".to_string(),
            lists: [("l2".to_string(), "In Progress".to_string())]
                .into_iter()
                .collect(),
            members: [
                ("m1".to_string(), "Ada".to_string()),
                ("m2".to_string(), "Grace".to_string()),
            ]
            .into_iter()
            .collect(),
        }
    }

    #[test]
    fn test_transform_card_maps_canonical_fields() {
        let native = sample_card();
        let card: TrelloCard = serde_json::from_value(native.clone()).unwrap();
        let ticket = transform_card(&native, &card, &sample_ctx()).unwrap();

        assert_eq!(ticket.key, "abCd1234");
        assert_eq!(ticket.title, "Polish onboarding");
        assert_eq!(ticket.status, "In Progress");
        assert_eq!(ticket.priority, "Highest");
        assert_eq!(ticket.assignee.as_deref(), Some("Ada"));
        assert_eq!(ticket.reporter, "Grace");
        assert_eq!(ticket.project, "Product");
        assert_eq!(ticket.project_key, "b1");
        assert_eq!(ticket.ticket_type, "Card");
        assert_eq!(ticket.platform, Platform::Trello);
        assert!(ticket.labels.contains("design"));
        // Creation time decodes from the id prefix
        assert_eq!(ticket.created.timestamp(), 0x65f1c000);
    }

    #[test]
    fn test_transform_card_retains_unmapped_fields() {
        let native = sample_card();
        let card: TrelloCard = serde_json::from_value(native.clone()).unwrap();
        let ticket = transform_card(&native, &card, &sample_ctx()).unwrap();
        assert_eq!(ticket.platform_specific["badges"]["votes"], json!(2));
        assert!(ticket.platform_specific.contains_key("idBoard"));
    }

    fn criteria(search_type: SearchType) -> SearchCriteria {
        SearchCriteria::new(search_type)
    }

    fn card() -> TrelloCard {
        serde_json::from_value(sample_card()).unwrap()
    }

    #[test]
    fn test_card_matches_status_filter() {
        let mut c = criteria(SearchType::All);
        c.statuses.insert("progress".to_string());
        assert!(card_matches(&card(), &sample_ctx(), &c, None));

        c.statuses.clear();
        c.statuses.insert("Done".to_string());
        assert!(!card_matches(&card(), &sample_ctx(), &c, None));
    }

    #[test]
    fn test_card_matches_text_filter() {
        let c = SearchCriteria::text("onboarding");
        assert!(card_matches(&card(), &sample_ctx(), &c, None));

        let c = SearchCriteria::text("billing");
        assert!(!card_matches(&card(), &sample_ctx(), &c, None));
    }

    #[test]
    fn test_card_matches_assigned_to_me() {
        let c = criteria(SearchType::AssignedToMe);
        assert!(card_matches(&card(), &sample_ctx(), &c, Some("m1")));
        assert!(!card_matches(&card(), &sample_ctx(), &c, Some("m9")));
    }

    #[test]
    fn test_card_matches_assignee_filter() {
        let mut c = criteria(SearchType::All);
        c.assignees.insert("ada".to_string());
        assert!(card_matches(&card(), &sample_ctx(), &c, None));

        c.assignees.clear();
        c.assignees.insert("grace".to_string());
        // Grace created the card but is not a member of it
        assert!(!card_matches(&card(), &sample_ctx(), &c, None));
    }

    #[test]
    fn test_transform_universal_classifies_by_shape() {
        let ticket = transform_to_universal(&sample_card()).unwrap();
        assert!(matches!(ticket, UniversalRecord::Ticket(_)));

        let board = transform_to_universal(&json!({ "id": "b1", "name": "Product" })).unwrap();
        assert!(matches!(board, UniversalRecord::Project(_)));

        let member = transform_to_universal(
            &json!({ "id": "m1", "username": "ada", "fullName": "Ada" }),
        )
        .unwrap();
        assert!(matches!(member, UniversalRecord::User(_)));

        let err = transform_to_universal(&json!({ "weird": true })).unwrap_err();
        assert!(matches!(err, TrackHubError::UnknownNativeFormat(_)));
    }

    #[test]
    fn test_transform_board() {
        let project = transform_board(&json!({
            "id": "b1",
            "name": "Product",
            "desc": "Roadmap",
            "shortLink": "bShort",
            "starred": true
        }))
        .unwrap();

        assert_eq!(project.key, "bShort");
        assert_eq!(project.name, "Product");
        assert_eq!(project.description.as_deref(), Some("Roadmap"));
        assert_eq!(project.platform_specific["starred"], json!(true));
    }
}
