//! Tablemirror Admin CLI
//!
//! Administration tool for the connection registry and watch channels.
//!
//! # Usage
//!
//! ```bash
//! tablemirror-admin connections list
//! tablemirror-admin connections remove 1BxiMVs0XRA5nFMdKvBdBZjgmUUqptlbs74OgvE2upms
//! tablemirror-admin subscriptions list
//! tablemirror-admin resubscribe 1BxiMVs0XRA5nFMdKvBdBZjgmUUqptlbs74OgvE2upms
//! ```
//!
//! Uses the same configuration file and `TABLEMIRROR_*` variables as the server.

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;

use tablemirror::db::{init_db, ConnectionRegistry, SqliteRegistry, SubscriptionRepository};
use tablemirror::stores::GoogleClient;
use tablemirror::sync::{ChangeNotifier, NotifierSettings};
use tablemirror::Config;

// ============================================================================
// CLI Structure
// ============================================================================

#[derive(Parser)]
#[command(name = "tablemirror-admin")]
#[command(version)]
#[command(about = "Tablemirror administration tool")]
struct Cli {
    /// Path to config file
    #[arg(long, short, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage connected documents
    Connections(ConnectionsCommand),
    /// Inspect watch channels
    Subscriptions(SubscriptionsCommand),
    /// Make sure a document has a live watch channel
    Resubscribe {
        /// Spreadsheet document id
        sheet: String,
    },
}

#[derive(Args)]
struct ConnectionsCommand {
    #[command(subcommand)]
    command: ConnectionsSubcommand,
}

#[derive(Subcommand)]
enum ConnectionsSubcommand {
    /// List all connections
    List,
    /// Remove a connection and stop its watch channel
    Remove {
        /// Spreadsheet document id
        sheet: String,
    },
}

#[derive(Args)]
struct SubscriptionsCommand {
    #[command(subcommand)]
    command: SubscriptionsSubcommand,
}

#[derive(Subcommand)]
enum SubscriptionsSubcommand {
    /// List recorded watch channels
    List,
}

// ============================================================================
// Context
// ============================================================================

struct Admin {
    registry: SqliteRegistry,
    notifier: ChangeNotifier,
}

impl Admin {
    async fn open(config_path: Option<PathBuf>) -> Result<Self, Box<dyn std::error::Error>> {
        let config = Config::load(config_path)?;
        let pool = init_db(&config.database_path).await?;
        let google = Arc::new(GoogleClient::from_config(&config)?);

        Ok(Self {
            registry: SqliteRegistry::new(pool.clone()),
            notifier: ChangeNotifier::new(
                google,
                SubscriptionRepository::new(pool),
                NotifierSettings::from_config(&config),
            ),
        })
    }
}

// ============================================================================
// Commands
// ============================================================================

async fn list_connections(admin: &Admin) -> Result<(), Box<dyn std::error::Error>> {
    let connections = admin.registry.list().await?;

    if connections.is_empty() {
        println!("No connections registered.");
        return Ok(());
    }

    println!("{:<48} {:<20} {:<20}", "SHEET", "BASE", "TABLE");
    println!("{}", "-".repeat(88));

    for c in &connections {
        println!(
            "{:<48} {:<20} {:<20}",
            c.document_id, c.store_container_id, c.table_id
        );
    }

    println!();
    println!("Total: {} connection(s)", connections.len());

    Ok(())
}

async fn remove_connection(
    admin: &Admin,
    sheet: String,
) -> Result<(), Box<dyn std::error::Error>> {
    if admin.registry.find_by_document(&sheet).await?.is_none() {
        eprintln!("Error: Connection '{}' not found", sheet);
        std::process::exit(1);
    }

    let stopped = admin.notifier.unsubscribe(&sheet).await?;
    admin.registry.remove(&sheet).await?;

    println!("Removed connection: {}", sheet);
    if stopped {
        println!("  Watch channel stopped");
    }

    Ok(())
}

async fn list_subscriptions(admin: &Admin) -> Result<(), Box<dyn std::error::Error>> {
    let subscriptions = admin.notifier.subscriptions().await?;

    if subscriptions.is_empty() {
        println!("No watch channels recorded.");
        return Ok(());
    }

    println!("{:<48} {:<38} {:<25}", "SHEET", "CHANNEL", "EXPIRES");
    println!("{}", "-".repeat(111));

    for s in &subscriptions {
        println!(
            "{:<48} {:<38} {:<25}",
            s.document_id,
            s.channel_id,
            s.expires_at.format("%Y-%m-%d %H:%M:%S UTC")
        );
    }

    println!();
    println!("Total: {} channel(s)", subscriptions.len());

    Ok(())
}

async fn resubscribe(admin: &Admin, sheet: String) -> Result<(), Box<dyn std::error::Error>> {
    if admin.registry.find_by_document(&sheet).await?.is_none() {
        eprintln!("Error: Connection '{}' not found", sheet);
        std::process::exit(1);
    }

    let subscription = admin.notifier.resubscribe(&sheet).await?;

    println!("Watching: {}", sheet);
    println!("  Channel: {}", subscription.channel_id);
    println!("  Expires: {}", subscription.expires_at);

    Ok(())
}

// ============================================================================
// Main
// ============================================================================

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let admin = match Admin::open(cli.config).await {
        Ok(admin) => admin,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };

    let result = match cli.command {
        Commands::Connections(cmd) => match cmd.command {
            ConnectionsSubcommand::List => list_connections(&admin).await,
            ConnectionsSubcommand::Remove { sheet } => remove_connection(&admin, sheet).await,
        },
        Commands::Subscriptions(cmd) => match cmd.command {
            SubscriptionsSubcommand::List => list_subscriptions(&admin).await,
        },
        Commands::Resubscribe { sheet } => resubscribe(&admin, sheet).await,
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
