//! TrackHub - Multi-platform ticket integration layer
//!
//! Main entry point for the TrackHub CLI.

use clap::{Parser, Subcommand};
use std::collections::HashMap;
use std::process;
use std::sync::Arc;
use trackhub::config::TrackHubConfig;
use trackhub::connection::ConnectionStore;
use trackhub::manager::IntegrationManager;
use trackhub::model::{Platform, SearchCriteria, SearchType, Ticket, TicketDraft, TicketUpdate};
use trackhub::providers::{JiraProvider, TrelloProvider};
use trackhub::registry::ProviderRegistry;
use trackhub::Result;

/// TrackHub - Unified tickets across Jira and Trello
#[derive(Parser, Debug)]
#[command(name = "trackhub")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to config file (default: ~/.config/trackhub/config.yaml)
    #[arg(short, long)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Show connection status for every registered platform
    Status,

    /// Start the authorization flow for a platform
    Connect {
        /// Platform to connect (jira, trello)
        platform: String,

        /// Self-hosted instance URL (Jira Server/Data Center)
        #[arg(long)]
        instance_url: Option<String>,

        /// Print the authorization URL instead of opening a browser
        #[arg(long)]
        no_browser: bool,
    },

    /// Complete an authorization flow with the redirect parameters
    Callback {
        /// Platform the callback belongs to
        platform: String,

        /// Raw query string from the redirect (e.g. "code=...&state=...")
        params: String,
    },

    /// Discard a platform's credentials
    Disconnect {
        platform: String,
    },

    /// Make a platform the target of unified operations
    Use {
        platform: String,
    },

    /// Restrict which projects/boards a platform's searches scan
    SelectProjects {
        platform: String,

        /// Project keys or board ids
        ids: Vec<String>,
    },

    /// Search tickets on the active platform (or everywhere with --all)
    Search {
        /// Free-text query over title/description
        query: Option<String>,

        /// Only tickets assigned to you
        #[arg(long)]
        mine: bool,

        /// Only tickets with recent activity
        #[arg(long)]
        recent: bool,

        /// Filter by project key / board id (repeatable)
        #[arg(short, long)]
        project: Vec<String>,

        /// Filter by status (repeatable)
        #[arg(short, long)]
        status: Vec<String>,

        /// Maximum results per provider
        #[arg(short, long, default_value_t = 50)]
        limit: usize,

        /// Fan out across every connected platform
        #[arg(long)]
        all: bool,
    },

    /// List projects/boards
    Projects {
        /// List from every connected platform
        #[arg(long)]
        all: bool,
    },

    /// Show one ticket
    Get {
        /// Ticket key (e.g. ENG-42 or a Trello card short link)
        key: String,
    },

    /// Create a ticket on the active platform
    Create {
        /// Project key / board id to create in
        #[arg(short, long)]
        project: String,

        /// Ticket title
        title: String,

        /// Ticket description
        #[arg(short, long, default_value = "")]
        description: String,

        /// Issue type (validated against the target project)
        #[arg(short = 't', long, default_value = "Task")]
        ticket_type: String,

        #[arg(long)]
        priority: Option<String>,

        /// Labels (repeatable)
        #[arg(short, long)]
        label: Vec<String>,
    },

    /// Update a ticket on the active platform
    Update {
        key: String,

        #[arg(long)]
        title: Option<String>,

        #[arg(short, long)]
        description: Option<String>,

        /// Target status (Jira transition / Trello list move)
        #[arg(short, long)]
        status: Option<String>,

        #[arg(long)]
        priority: Option<String>,
    },

    /// Recreate a ticket on another platform with a back-reference
    Migrate {
        /// Ticket key on the source platform
        key: String,

        /// Source platform
        #[arg(long)]
        from: String,

        /// Target platform
        #[arg(long)]
        to: String,

        /// Target project key / board id
        #[arg(long)]
        project: String,
    },

    /// Show the authenticated user on the active platform
    Whoami,
}

#[tokio::main]
async fn main() {
    if let Err(e) = trackhub::logging::init() {
        eprintln!("Failed to initialize logging: {}", e);
        process::exit(1);
    }

    let cli = Cli::parse();
    if let Err(e) = run(cli).await {
        eprintln!("Error: {}", e);
        if e.requires_reauth() {
            eprintln!("Run `trackhub connect <platform>` to reconnect.");
        }
        process::exit(1);
    }
}

async fn build_manager(config_path: Option<&str>) -> Result<IntegrationManager> {
    let config = match config_path {
        Some(path) => TrackHubConfig::load(path)?,
        None => TrackHubConfig::load_default()?,
    };

    let connections_dir = config.connections_dir();
    let mut registry = ProviderRegistry::new();
    registry.register(Arc::new(JiraProvider::new(
        config.jira.clone(),
        ConnectionStore::new(&connections_dir),
    )?));
    registry.register(Arc::new(TrelloProvider::new(
        config.trello.clone(),
        ConnectionStore::new(&connections_dir),
    )?));

    Ok(IntegrationManager::new(registry).await)
}

/// Parse a raw redirect query string into callback parameters
fn parse_callback_params(raw: &str) -> HashMap<String, String> {
    let query = raw.rsplit('?').next().unwrap_or(raw);
    query
        .split('&')
        .filter_map(|pair| {
            let (k, v) = pair.split_once('=')?;
            let k = urlencoding::decode(k).ok()?.into_owned();
            let v = urlencoding::decode(v).ok()?.into_owned();
            Some((k, v))
        })
        .collect()
}

fn print_ticket_line(ticket: &Ticket) {
    println!(
        "  [{}] {} - {} ({} / {} / {})",
        ticket.platform,
        ticket.key,
        ticket.title,
        ticket.status,
        ticket.priority,
        ticket.assignee.as_deref().unwrap_or("unassigned"),
    );
}

fn print_ticket_full(ticket: &Ticket) {
    println!("{} - {}", ticket.key, ticket.title);
    println!("  Platform:  {}", ticket.platform.display_name());
    println!("  Project:   {} ({})", ticket.project, ticket.project_key);
    println!("  Type:      {}", ticket.ticket_type);
    println!("  Status:    {}", ticket.status);
    println!("  Priority:  {}", ticket.priority);
    println!(
        "  Assignee:  {}",
        ticket.assignee.as_deref().unwrap_or("unassigned")
    );
    println!("  Reporter:  {}", ticket.reporter);
    if let Some(epic) = &ticket.epic {
        println!("  Epic:      {}", epic);
    }
    if !ticket.labels.is_empty() {
        let labels: Vec<&str> = ticket.labels.iter().map(String::as_str).collect();
        println!("  Labels:    {}", labels.join(", "));
    }
    println!("  Updated:   {}", ticket.last_modified.to_rfc3339());
    println!("  URL:       {}", ticket.url);
    if !ticket.description.is_empty() {
        println!("\n{}", ticket.description);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let manager = build_manager(cli.config.as_deref()).await?;

    match cli.command {
        Commands::Status => {
            let active = manager.active_platform();
            for provider in manager.registry().providers() {
                let conn = provider.connection().await;
                let marker = if Some(provider.platform()) == active {
                    "*"
                } else {
                    " "
                };
                let state = if provider.is_connected().await {
                    "connected"
                } else {
                    "not connected"
                };
                print!("{} {:<8} {}", marker, provider.platform().to_string(), state);
                if let Some(site) = &conn.site_name {
                    print!(" ({})", site);
                }
                if let Some(email) = &conn.user_email {
                    print!(" as {}", email);
                }
                println!();
            }
        }

        Commands::Connect {
            platform,
            instance_url,
            no_browser,
        } => {
            let platform: Platform = platform.parse()?;
            let start = manager
                .connect_platform(platform, instance_url.as_deref())
                .await?;

            println!("Authorize {} in your browser:", platform.display_name());
            println!("  {}", start.auth_url);
            if let Some(state) = &start.state {
                println!("  (state: {})", state);
            }
            println!("Then run: trackhub callback {} '<redirect query string>'", platform);

            if !no_browser && open::that(&start.auth_url).is_err() {
                eprintln!("Could not open a browser; use the URL above.");
            }
        }

        Commands::Callback { platform, params } => {
            let platform: Platform = platform.parse()?;
            let params = parse_callback_params(&params);
            manager.handle_oauth_callback(platform, &params).await?;
            println!("Connected to {}.", platform.display_name());
        }

        Commands::Disconnect { platform } => {
            let platform: Platform = platform.parse()?;
            manager.disconnect_platform(platform).await?;
            println!("Disconnected from {}.", platform.display_name());
        }

        Commands::Use { platform } => {
            let platform: Platform = platform.parse()?;
            manager.set_active_platform(platform).await?;
            println!("Active platform: {}", platform.display_name());
        }

        Commands::SelectProjects { platform, ids } => {
            let platform: Platform = platform.parse()?;
            let count = ids.len();
            manager.set_selected_projects(platform, ids).await?;
            println!(
                "Searches on {} now scan {} selected project(s).",
                platform.display_name(),
                count
            );
        }

        Commands::Search {
            query,
            mine,
            recent,
            project,
            status,
            limit,
            all,
        } => {
            let search_type = match (&query, mine, recent) {
                (_, true, _) => SearchType::AssignedToMe,
                (_, _, true) => SearchType::Recent,
                (Some(_), _, _) => SearchType::Text,
                (None, _, _) => SearchType::All,
            };

            let mut criteria = SearchCriteria::new(search_type).with_max_results(limit);
            if let Some(q) = query {
                criteria.query = q;
            }
            for p in project {
                criteria = criteria.with_project(p);
            }
            for s in status {
                criteria = criteria.with_status(s);
            }

            if all {
                for slice in manager.search_all_providers(&criteria).await {
                    match slice.result {
                        Ok(tickets) => {
                            println!("{}: {} ticket(s)", slice.platform.display_name(), tickets.len());
                            for ticket in &tickets {
                                print_ticket_line(ticket);
                            }
                        }
                        Err(e) => {
                            println!("{}: search failed: {}", slice.platform.display_name(), e)
                        }
                    }
                }
            } else {
                let tickets = manager.search_tickets(&criteria).await?;
                println!("{} ticket(s)", tickets.len());
                for ticket in &tickets {
                    print_ticket_line(ticket);
                }
            }
        }

        Commands::Projects { all } => {
            if all {
                for slice in manager.list_all_projects().await {
                    match slice.result {
                        Ok(projects) => {
                            println!("{}:", slice.platform.display_name());
                            for project in &projects {
                                println!("  {} - {}", project.key, project.name);
                            }
                        }
                        Err(e) => {
                            println!("{}: listing failed: {}", slice.platform.display_name(), e)
                        }
                    }
                }
            } else {
                for project in manager.get_projects().await? {
                    println!("{} - {}", project.key, project.name);
                }
            }
        }

        Commands::Get { key } => {
            let ticket = manager.get_ticket(&key).await?;
            print_ticket_full(&ticket);
        }

        Commands::Create {
            project,
            title,
            description,
            ticket_type,
            priority,
            label,
        } => {
            let draft = TicketDraft {
                title,
                description,
                ticket_type,
                priority,
                labels: label,
                assignee: None,
            };
            let ticket = manager.create_ticket(&project, &draft).await?;
            println!("Created {}", ticket.key);
            println!("  {}", ticket.url);
        }

        Commands::Update {
            key,
            title,
            description,
            status,
            priority,
        } => {
            let update = TicketUpdate {
                title,
                description,
                status,
                priority,
                labels: None,
            };
            let ticket = manager.update_ticket(&key, &update).await?;
            print_ticket_full(&ticket);
        }

        Commands::Migrate {
            key,
            from,
            to,
            project,
        } => {
            let from: Platform = from.parse()?;
            let to: Platform = to.parse()?;
            let ticket = manager.migrate_ticket(from, &key, to, &project).await?;
            println!(
                "Migrated {} from {} to {} as {}",
                key,
                from.display_name(),
                to.display_name(),
                ticket.key
            );
            println!("  {}", ticket.url);
        }

        Commands::Whoami => {
            let user = manager.get_current_user().await?;
            println!("{} ({})", user.display_name, user.platform.display_name());
            if let Some(email) = &user.email {
                println!("  {}", email);
            }
            println!("  id: {}", user.id);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_callback_params() {
        let params = parse_callback_params("code=abc%20def&state=1f");
        assert_eq!(params["code"], "abc def");
        assert_eq!(params["state"], "1f");
    }

    #[test]
    fn test_parse_callback_params_from_full_url() {
        let params =
            parse_callback_params("http://localhost:8787/callback/trello?token=tok123");
        assert_eq!(params["token"], "tok123");
    }
}
