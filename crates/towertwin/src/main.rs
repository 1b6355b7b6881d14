mod api;
mod config;
mod state;

use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{Context, Result};
use bytes::Bytes;
use clap::{Args, Parser, Subcommand};
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use towertwin_pipeline::{parse_coordinate, UploadRequest, UserSession};
use towertwin_repository::{PostgresSiteRepository, SiteRepository};

use config::AppConfig;
use state::AppState;

#[derive(Parser, Debug)]
#[command(author, version, about = "TowerTwin site ingestion service and CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the HTTP API server
    Serve(ServeArgs),
    /// Run database migrations
    Migrate,
    /// Run the ingestion pipeline for a local IFC file
    Upload(UploadArgs),
    /// Retry a failed or incomplete site from its stored source file
    Retry(RetryArgs),
    /// List persisted sites
    Sites,
}

#[derive(Args, Debug)]
struct ServeArgs {
    /// Bind address for the API server
    #[arg(long, default_value = "0.0.0.0:3000")]
    bind: SocketAddr,
}

#[derive(Args, Debug)]
struct UploadArgs {
    /// Site name shown on the dashboard
    #[arg(long)]
    name: String,
    /// Path to the IFC file
    #[arg(long)]
    file: PathBuf,
    /// Free-text location
    #[arg(long)]
    location: Option<String>,
    /// Latitude in decimal degrees
    #[arg(long)]
    lat: Option<String>,
    /// Longitude in decimal degrees
    #[arg(long)]
    lon: Option<String>,
    #[command(flatten)]
    identity: IdentityArgs,
}

#[derive(Args, Debug)]
struct RetryArgs {
    /// Id of the site to retry
    site_id: Uuid,
    #[command(flatten)]
    identity: IdentityArgs,
}

#[derive(Args, Debug, Default)]
struct IdentityArgs {
    /// Uploading user id (falls back to TOWERTWIN_USER_ID)
    #[arg(long)]
    user_id: Option<Uuid>,
    /// Session bearer token (falls back to TOWERTWIN_ACCESS_TOKEN)
    #[arg(long)]
    access_token: Option<String>,
}

impl IdentityArgs {
    fn resolve(self) -> Result<UserSession> {
        let user_id = match self.user_id {
            Some(id) => id,
            None => std::env::var("TOWERTWIN_USER_ID")
                .context("pass --user-id or set TOWERTWIN_USER_ID")?
                .parse()
                .context("TOWERTWIN_USER_ID is not a valid uuid")?,
        };
        let access_token = match self.access_token {
            Some(token) => token,
            None => std::env::var("TOWERTWIN_ACCESS_TOKEN")
                .context("pass --access-token or set TOWERTWIN_ACCESS_TOKEN")?,
        };
        Ok(UserSession::new(user_id, access_token))
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .json()
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Serve(args) => {
            let config = AppConfig::from_env()?;
            let state = AppState::new(&config).await?;
            let router = api::router(state);

            let listener = TcpListener::bind(args.bind).await?;
            info!("listening on {}", listener.local_addr()?);
            axum::serve(listener, router.into_make_service()).await?;
            Ok(())
        }
        Command::Migrate => {
            let config = AppConfig::from_env()?;
            let repository = PostgresSiteRepository::connect(&config.database_url, 5).await?;
            repository.run_migrations().await?;
            info!("Database migrations applied");
            Ok(())
        }
        Command::Upload(args) => {
            let config = AppConfig::from_env()?;
            let state = AppState::new(&config).await?;
            let session = args.identity.resolve()?;

            let contents = tokio::fs::read(&args.file)
                .await
                .with_context(|| format!("failed to read {}", args.file.display()))?;
            let file_name = args
                .file
                .file_name()
                .and_then(|name| name.to_str())
                .context("file path has no usable filename")?
                .to_string();

            let request = UploadRequest {
                site_name: args.name,
                location: args.location,
                latitude: args.lat.as_deref().and_then(parse_coordinate),
                longitude: args.lon.as_deref().and_then(parse_coordinate),
                file_name,
                contents: Bytes::from(contents),
            };

            let site = state.pipeline.run_upload(&session, request).await?;
            println!("{}", serde_json::to_string_pretty(&site)?);
            Ok(())
        }
        Command::Retry(args) => {
            let config = AppConfig::from_env()?;
            let state = AppState::new(&config).await?;
            let session = args.identity.resolve()?;

            let site = state.pipeline.run_retry(&session, args.site_id).await?;
            println!("{}", serde_json::to_string_pretty(&site)?);
            Ok(())
        }
        Command::Sites => {
            let config = AppConfig::from_env()?;
            let repository = PostgresSiteRepository::connect(&config.database_url, 5).await?;
            let sites = repository.list().await?;
            println!("{}", serde_json::to_string_pretty(&sites)?);
            Ok(())
        }
    }
}
