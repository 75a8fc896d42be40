//! Tablemirror Server
//!
//! Mirrors spreadsheet documents with external record tables and keeps their
//! change-notification channels alive.
//!
//! # Configuration
//!
//! Read from `~/.config/tablemirror/config.yaml` (or `--config`), then
//! overridden by `TABLEMIRROR_*` environment variables:
//! - `TABLEMIRROR_PORT`: Port to listen on (default: 8080)
//! - `TABLEMIRROR_PUBLIC_URL`: Base URL the webhook and refresh calls reach us at
//! - `TABLEMIRROR_GOOGLE_CREDENTIALS_PATH`: Service-account key file for the Google APIs
//!   (falls back to `GOOGLE_APPLICATION_CREDENTIALS`)
//! - `TABLEMIRROR_GOOGLE_ACCESS_TOKEN`: Fixed token, used when no key file is set
//! - `TABLEMIRROR_SERVICE_IDENTITY`: Account email our document writes appear as
//!
//! # Endpoints
//!
//! - `GET /health`
//! - `POST /connect`
//! - `POST /notifications`
//! - `POST /refresh`

use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tablemirror::db::{init_db, SqliteRegistry, SubscriptionRepository};
use tablemirror::server::{router, AppState};
use tablemirror::stores::{AirtableClient, GoogleClient};
use tablemirror::sync::{
    ChangeNotifier, Collaborators, HttpDispatcher, NotifierSettings, SyncEngine,
};
use tablemirror::Config;

#[derive(Parser)]
#[command(name = "tablemirror-server")]
#[command(version)]
#[command(about = "Spreadsheet to external table mirroring service")]
struct Cli {
    /// Path to config file
    #[arg(long, short)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tablemirror=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        tracing::error!("{}", e);
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::load(cli.config)?;

    if config.service_identity.is_empty() {
        tracing::warn!(
            "No service identity configured; loop detection relies on the revision 'me' flag"
        );
    }

    tracing::info!("Registry database: {}", config.database_path.display());
    let pool = init_db(&config.database_path).await?;

    let google = Arc::new(GoogleClient::from_config(&config)?);
    let airtable = Arc::new(AirtableClient::from_config(&config)?);
    let dispatcher = Arc::new(HttpDispatcher::new(
        config.refresh_address(),
        config.request_timeout(),
    )?);
    let notifier = Arc::new(ChangeNotifier::new(
        google.clone(),
        SubscriptionRepository::new(pool.clone()),
        NotifierSettings::from_config(&config),
    ));

    if config.renewal_interval_secs > 0 {
        notifier
            .clone()
            .spawn_renewal(Duration::from_secs(config.renewal_interval_secs));
        tracing::info!(
            "Renewing watch channels every {}s",
            config.renewal_interval_secs
        );
    }

    let engine = SyncEngine::new(
        Collaborators {
            document_store: google,
            record_store: airtable,
            registry: Arc::new(SqliteRegistry::new(pool)),
            notifier,
            dispatcher,
        },
        &config,
    );

    let app = router(AppState::new(Arc::new(engine)));

    // Start server
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!("Starting server on {}", addr);
    tracing::info!("Webhook address: {}", config.callback_address());

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
