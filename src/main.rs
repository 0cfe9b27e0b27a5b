use anyhow::Context;
use axum::{Json, Router, extract::State, routing::get};
use clap::{Parser, Subcommand};
use database::{Client, ClientConfig, Scope};
use migrator::{Dialect, MigrationOutcome, Migrator, MigratorConfig};
use serde::Deserialize;
use serde_json::{Value, json};
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;
use web_server::{AppError, HttpController, HttpServer, ServerConfig};

const HEALTH_TIMEOUT: Duration = Duration::from_secs(2);

/// The main entry point for the bedrock service.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    // Parse command-line arguments
    let cli = Cli::parse();

    // `.env` is loaded here, before anything reads the environment.
    let settings: Settings =
        configuration::load_from_env().context("Failed to load settings from the environment")?;

    // Execute the appropriate command
    match cli.command {
        Commands::Migrate { direction } => handle_migrate(&settings, direction).await,
        Commands::Serve => handle_serve(&settings).await,
    }
}

// ==============================================================================
// CLI Structure
// ==============================================================================

/// A database-backed HTTP service with versioned schema migrations.
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply or revert the schema migrations in MIGRATIONS_DIR.
    Migrate {
        #[command(subcommand)]
        direction: Direction,
    },
    /// Apply pending migrations, then serve HTTP until Ctrl-C.
    Serve,
}

#[derive(Subcommand, Clone, Copy)]
enum Direction {
    /// Apply every pending migration.
    Up,
    /// Revert every applied migration.
    Reset,
}

// ==============================================================================
// Settings
// ==============================================================================

#[derive(Debug, Deserialize)]
struct Settings {
    database_url: String,
    #[serde(default = "default_max_connections")]
    db_max_connections: u32,
    #[serde(default = "default_migrations_dir")]
    migrations_dir: PathBuf,
    #[serde(default)]
    migration_dialect: Dialect,
    #[serde(default = "default_http_host")]
    http_host: String,
    #[serde(default = "default_http_port")]
    http_port: u16,
    #[serde(default = "default_http_prefix")]
    http_prefix: String,
}

fn default_max_connections() -> u32 {
    10
}

fn default_migrations_dir() -> PathBuf {
    PathBuf::from(".")
}

fn default_http_host() -> String {
    "0.0.0.0".to_string()
}

fn default_http_port() -> u16 {
    8080
}

fn default_http_prefix() -> String {
    "/api".to_string()
}

impl Settings {
    fn client_config(&self) -> ClientConfig {
        ClientConfig {
            max_connections: self.db_max_connections,
            ..ClientConfig::new(self.database_url.clone())
        }
    }

    fn migrator(&self) -> Migrator {
        Migrator::new(MigratorConfig {
            dialect: self.migration_dialect,
            path: self.migrations_dir.clone(),
        })
    }
}

// ==============================================================================
// Command Logic
// ==============================================================================

async fn handle_migrate(settings: &Settings, direction: Direction) -> anyhow::Result<()> {
    let client = Client::connect(&settings.client_config())
        .await
        .context("Failed to connect to the database")?;

    let outcome = migrate(&client, &settings.migrator(), direction).await;
    client.close(&Scope::new()).await?;

    match outcome? {
        MigrationOutcome::NothingDefined => {
            tracing::info!(path = %settings.migrations_dir.display(), "No migrations defined.")
        }
        MigrationOutcome::Completed { versions } => match direction {
            Direction::Up => tracing::info!(?versions, "Migrations applied."),
            Direction::Reset => tracing::info!(?versions, "Migrations reverted."),
        },
    }
    Ok(())
}

async fn migrate(
    client: &Client,
    migrator: &Migrator,
    direction: Direction,
) -> anyhow::Result<MigrationOutcome> {
    let scope = Scope::new();
    let mut conn = client.acquire(&scope).await?;
    let outcome = match direction {
        Direction::Up => migrator.up(&scope, &mut conn).await,
        Direction::Reset => migrator.reset(&scope, &mut conn).await,
    };
    outcome.context("Failed to run database migrations")
}

async fn handle_serve(settings: &Settings) -> anyhow::Result<()> {
    let client = Client::connect(&settings.client_config())
        .await
        .context("Failed to connect to the database")?;
    migrate(&client, &settings.migrator(), Direction::Up).await?;

    let health = HealthController {
        client: client.clone(),
    };
    let server = HttpServer::new(ServerConfig {
        prefix: settings.http_prefix.clone(),
        ..ServerConfig::default()
    })?
    .with_controllers(&[&health]);

    let served = server
        .start(&settings.http_host, settings.http_port, shutdown_signal())
        .await;

    client.close(&Scope::new()).await?;
    served?;
    Ok(())
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => tracing::info!("Shutdown signal received."),
        Err(e) => tracing::error!(error = %e, "Failed to listen for Ctrl-C; shutting down."),
    }
}

// ==============================================================================
// Health Controller
// ==============================================================================

/// Serves `GET {prefix}/health`, which pings the database.
struct HealthController {
    client: Client,
}

impl HttpController for HealthController {
    fn apply_http(&self, group: Router) -> Router {
        group.merge(
            Router::new()
                .route("/health", get(health))
                .with_state(self.client.clone()),
        )
    }
}

async fn health(State(client): State<Client>) -> Result<Json<Value>, AppError> {
    client.ping(&Scope::new().with_timeout(HEALTH_TIMEOUT)).await?;
    Ok(Json(json!({ "status": "ok" })))
}
