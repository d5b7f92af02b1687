mod commands;
mod config;
mod remote_http;
mod server;
mod session;

use anyhow::{Result, bail};
use clap::{ArgAction, Parser, Subcommand};
use std::process;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

use crate::commands::helpers::{print_banner, report_writes};
use crate::commands::{
    ListKind, cmd_feel, cmd_journal, cmd_list, cmd_login, cmd_logout, cmd_progress, cmd_reflect,
    cmd_remote_clear, cmd_remote_set, cmd_remote_show, cmd_status, cmd_whoami, connect,
};
use crate::config::Config;
use crate::server::{DEFAULT_WATCH_WINDOW, ServeOptions};
use soulful_core::db::Database;
use soulful_core::docstore::DocumentStore;
use soulful_core::models::{Collection, ReflectionPrompts};
use soulful_core::sync::SyncCoordinator;

#[derive(Parser)]
#[command(
    name = "soulful",
    version,
    about = "A gentle, offline-first mood journal",
    long_about = "\n  soulful space\n  notice how you feel. it all stays with you, online or not.\n"
)]
struct Cli {
    /// Work from the local cache only, without contacting the cloud
    #[arg(long, global = true)]
    offline: bool,
    /// Log more to stderr (-v info, -vv debug)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(flatten)]
    Intent(Intent),
    /// Interactive session with live sync
    Session,
    /// Host the cloud document store
    Serve {
        /// Port to listen on
        #[arg(short, long, default_value = "8080")]
        port: u16,
        /// Address to bind to (default: 127.0.0.1, use 0.0.0.0 to expose to network)
        #[arg(short, long, default_value = "127.0.0.1")]
        bind: String,
        /// Disable API key authentication (for development/testing)
        #[arg(long)]
        no_auth: bool,
        /// Serve a collection without its query index (queries fail until provisioned)
        #[arg(long, value_name = "COLLECTION")]
        without_index: Vec<String>,
        /// Seconds a watch request waits for changes
        #[arg(long, default_value_t = DEFAULT_WATCH_WINDOW.as_secs())]
        watch_window: u64,
        /// Document store file (default: documents.db in the data directory)
        #[arg(long, value_name = "PATH")]
        store: Option<std::path::PathBuf>,
    },
    /// Configure the cloud store to sync with
    Remote {
        #[command(subcommand)]
        command: RemoteCommands,
    },
    /// Sign in as a user id
    Login {
        user: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Sign out and go back to the anonymous id
    Logout {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show the id your data is stored under
    Whoami {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

/// One-shot commands run against a freshly loaded coordinator.
#[derive(Subcommand)]
enum Intent {
    /// Record how you feel right now
    Feel {
        /// Emotion name (e.g. joyful, sad, anxious)
        emotion: String,
        /// Intensity from 1 to 10
        #[arg(short, long, default_value = "5")]
        intensity: i64,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Write a journal entry tied to an emotion
    Journal {
        /// What's on your mind
        text: String,
        /// Emotion to attach (default: the most recent one)
        #[arg(short, long)]
        emotion: Option<String>,
        /// Intensity from 1 to 10
        #[arg(short, long)]
        intensity: Option<i64>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Write the daily reflection
    Reflect {
        /// What are you grateful for?
        #[arg(long)]
        gratitude: Option<String>,
        /// What challenged you?
        #[arg(long)]
        challenge: Option<String>,
        /// How did you grow?
        #[arg(long)]
        growth: Option<String>,
        /// What will you focus on tomorrow?
        #[arg(long)]
        tomorrow: Option<String>,
        /// Overall mood from 1 to 10
        #[arg(short, long)]
        mood: i64,
        /// Day to reflect on (YYYY-MM-DD or today/yesterday, default: today)
        #[arg(long)]
        date: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show recorded emotions, journal entries or reflections
    List {
        #[arg(value_enum, default_value = "emotions")]
        what: ListKind,
        /// Show at most this many
        #[arg(short, long)]
        limit: Option<usize>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show sync status
    Status {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show statistics and insights
    Progress {
        /// Chart window in days: 7 or 30
        #[arg(short, long, default_value = "7")]
        days: u32,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
enum RemoteCommands {
    /// Point at a store started with `soulful serve`
    Set {
        url: String,
        /// API key printed by the server on first start
        #[arg(long)]
        api_key: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show the configured store
    Show {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Stop syncing; keep data on this device only
    Clear {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

fn init_logging(verbose: u8, serving: bool) {
    let default = match (verbose, serving) {
        (0, false) => "warn",
        (0, true) | (1, _) => "info",
        _ => "debug",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn parse_collections(names: &[String]) -> Result<Vec<Collection>> {
    names
        .iter()
        .map(|n| match Collection::from_name(n) {
            Some(c) => Ok(c),
            None => bail!(
                "Unknown collection '{n}'. Use emotions, journalEntries, reflections or progressLogs"
            ),
        })
        .collect()
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose, matches!(cli.command, Commands::Serve { .. }));

    if let Err(e) = run(cli).await {
        eprintln!("Error: {e:#}");
        process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = Config::load()?;

    match cli.command {
        Commands::Serve {
            port,
            bind,
            no_auth,
            without_index,
            watch_window,
            store,
        } => {
            let api_key = if no_auth {
                None
            } else {
                Some(config.load_or_create_api_key()?.0)
            };
            let store = DocumentStore::open(store.as_deref().unwrap_or(config.store_path.as_path()))?;
            let options = ServeOptions {
                port,
                bind,
                api_key,
                without_index: parse_collections(&without_index)?,
                watch_window: Duration::from_secs(watch_window),
            };
            server::start_server(store, options).await
        }
        Commands::Remote { command } => {
            let db = Database::open(&config.db_path)?;
            match command {
                RemoteCommands::Set { url, api_key, json } => {
                    cmd_remote_set(&db, &url, api_key.as_deref(), json)
                }
                RemoteCommands::Show { json } => cmd_remote_show(&db, json),
                RemoteCommands::Clear { json } => cmd_remote_clear(&db, json),
            }
        }
        Commands::Login { user, json } => cmd_login(&Database::open(&config.db_path)?, &user, json),
        Commands::Logout { json } => cmd_logout(&Database::open(&config.db_path)?, json),
        Commands::Whoami { json } => cmd_whoami(&Database::open(&config.db_path)?, json),
        Commands::Session => session::run_session(connect(&config, cli.offline)?).await,
        Commands::Intent(intent) => {
            let coordinator = connect(&config, cli.offline)?;
            coordinator.load_all().await;
            print_banner(&coordinator.state());

            let result = run_intent(&coordinator, intent).await;
            report_writes(&coordinator.shutdown().await);
            result
        }
    }
}

async fn run_intent(coordinator: &SyncCoordinator, intent: Intent) -> Result<()> {
    match intent {
        Intent::Feel {
            emotion,
            intensity,
            json,
        } => cmd_feel(coordinator, &emotion, intensity, json),
        Intent::Journal {
            text,
            emotion,
            intensity,
            json,
        } => cmd_journal(coordinator, &text, emotion.as_deref(), intensity, json),
        Intent::Reflect {
            gratitude,
            challenge,
            growth,
            tomorrow,
            mood,
            date,
            json,
        } => {
            let prompts = ReflectionPrompts {
                gratitude,
                challenge,
                growth,
                tomorrow,
            };
            cmd_reflect(coordinator, date, &prompts, mood, json)
        }
        Intent::List { what, limit, json } => cmd_list(coordinator, what, limit, json),
        Intent::Status { json } => cmd_status(coordinator, json),
        Intent::Progress { days, json } => cmd_progress(coordinator, days, json).await,
    }
}
