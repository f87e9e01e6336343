mod auth;
mod commands;
mod config;
mod error;
mod graph;
mod mcp;
mod models;
mod server;
pub mod util;

use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::{Shell, generate};
use config::Config;
use models::{Output, SearchTerms};
use std::io;
use tracing::error;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "outlook-mcp")]
#[command(version, about = "MCP server and CLI for Outlook mail via Microsoft Graph", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the MCP server on stdio
    Mcp {
        /// Don't start the OAuth callback server alongside
        #[arg(long)]
        no_auth_server: bool,
    },

    /// Run only the OAuth callback server
    AuthServer,

    /// Show authentication status
    Status,

    /// Refresh the access token now
    Refresh,

    /// Delete stored credentials
    Logout,

    /// List resources
    #[command(subcommand)]
    List(ListCommands),

    /// Search emails, falling back to simpler queries when nothing matches
    Search {
        /// General search text
        query: Option<String>,

        /// Folder to search in (default: inbox)
        #[arg(long)]
        folder: Option<String>,

        /// Sender address or name
        #[arg(long)]
        from: Option<String>,

        /// Recipient address or name
        #[arg(long)]
        to: Option<String>,

        /// Subject text
        #[arg(long)]
        subject: Option<String>,

        /// Only emails with attachments
        #[arg(long)]
        has_attachments: bool,

        /// Only unread emails
        #[arg(long)]
        unread: bool,

        /// Maximum results (max 50)
        #[arg(short, long, default_value = "10")]
        limit: u32,
    },

    /// Read an email by ID
    Read {
        /// Email ID
        email_id: String,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Subcommand)]
enum ListCommands {
    /// List mail folders
    Folders,

    /// List emails in a folder
    Emails {
        /// Folder name (default: inbox)
        #[arg(short, long, default_value = "inbox")]
        folder: String,

        /// Maximum results (max 50)
        #[arg(short, long, default_value = "10")]
        limit: u32,
    },
}

#[tokio::main]
async fn main() {
    // stdout belongs to the MCP transport and JSON output
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(io::stderr)
        .with_target(false)
        .init();

    let cli = Cli::parse();

    let config = match Config::load() {
        Ok(c) => c,
        Err(e) => {
            Output::<()>::error(e.to_string()).print();
            std::process::exit(1);
        }
    };

    let result = match cli.command {
        Commands::Mcp { no_auth_server } => {
            if !no_auth_server {
                let server_config = config.clone();
                tokio::spawn(async move {
                    if let Err(e) = server::run_server(server_config).await {
                        error!(error = %e, "Authentication server stopped");
                    }
                });
            }
            mcp::run_server(&config).await
        }

        Commands::AuthServer => server::run_server(config).await.map_err(anyhow::Error::from),

        Commands::Status => commands::status(&config).await,
        Commands::Refresh => commands::refresh(&config).await,
        Commands::Logout => commands::logout(&config).await,

        Commands::List(cmd) => match cmd {
            ListCommands::Folders => commands::list_folders(&config).await,
            ListCommands::Emails { folder, limit } => {
                commands::list_emails(&config, &folder, util::clamp_count(Some(limit), 10)).await
            }
        },

        Commands::Search {
            query,
            folder,
            from,
            to,
            subject,
            has_attachments,
            unread,
            limit,
        } => {
            let terms = SearchTerms {
                query,
                from,
                to,
                subject,
                has_attachments,
                unread_only: unread,
            };
            commands::search(
                &config,
                folder.as_deref(),
                &terms,
                util::clamp_count(Some(limit), 10),
            )
            .await
        }

        Commands::Read { email_id } => commands::read_email(&config, &email_id).await,

        Commands::Completions { shell } => {
            generate(shell, &mut Cli::command(), "outlook-mcp", &mut io::stdout());
            return;
        }
    };

    if let Err(e) = result {
        Output::<()>::error(e.to_string()).print();
        std::process::exit(1);
    }
}
