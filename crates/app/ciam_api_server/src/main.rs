//! diagramastext CIAM server binary.
//!
//! Serves the sign-in routes and `/quotas`. Uses Postgres when a database
//! URL is configured and an in-memory store otherwise.

use std::sync::Arc;

use ciam_api::config::ApiConfig;
use ciam_core::auth::jwt::TokenIssuer;
use ciam_core::auth::keys::resolve_signing_key;
use ciam_core::auth::queries::PgCiamRepository;
use ciam_core::auth::signin::SigninService;
use ciam_core::mail::LogMailer;
use ciam_core::memory::InMemoryRepository;
use ciam_core::ports::CiamRepository;
use clap::Parser;
use sqlx::postgres::PgPoolOptions;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// CLI arguments for the CIAM server.
#[derive(Parser, Debug)]
#[command(name = "ciam_api_server", about = "diagramastext CIAM server")]
struct Args {
    /// Port to listen on; overrides the port of `BIND_ADDR`.
    #[arg(long)]
    port: Option<u16>,

    /// PostgreSQL connection URL. Without it users live in memory.
    #[arg(long, env = "DATABASE_URL")]
    database_url: Option<String>,

    /// Maximum number of database connections in the pool.
    #[arg(long, default_value_t = 5)]
    max_connections: u32,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,ciam_api=debug,ciam_core=info")),
        )
        .init();

    let args = Args::parse();

    let mut config = ApiConfig::from_env();
    if let Some(port) = args.port {
        let host = config
            .bind_addr
            .rsplit_once(':')
            .map_or("127.0.0.1", |(host, _)| host);
        config.bind_addr = format!("{host}:{port}");
    }
    config.database_url = args.database_url.filter(|url| !url.trim().is_empty());

    info!(bind_addr = %config.bind_addr, env = %config.env, "starting ciam_api_server");

    let signing_key = resolve_signing_key(config.is_dev()).inspect_err(|e| {
        error!(error = %e, "cannot load signing key");
    })?;

    let repository: Arc<dyn CiamRepository> = match config.database_url.as_deref() {
        Some(url) => {
            info!(max_connections = args.max_connections, "configuring connection pool");
            let pool = PgPoolOptions::new()
                .max_connections(args.max_connections)
                .acquire_timeout(std::time::Duration::from_secs(30))
                .connect(url)
                .await?;
            info!("running database migrations");
            ciam_core::migrate::migrate(&pool).await?;
            Arc::new(PgCiamRepository::new(pool))
        }
        None => {
            warn!("DATABASE_URL not set, users are kept in memory");
            Arc::new(InMemoryRepository::new())
        }
    };

    let mailer =
        Arc::new(LogMailer::new(config.sender_email.clone()).with_body_logging(config.is_dev()));
    let service = SigninService::new(repository, mailer, TokenIssuer::new(signing_key));

    let shutdown = CancellationToken::new();
    let state = ciam_api::AppState {
        service: Arc::new(service),
        config: config.clone(),
        shutdown: shutdown.clone(),
    };
    let app = ciam_api::router(state);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    info!(addr = %listener.local_addr()?, "CIAM API listening");

    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "cannot listen for shutdown signal");
                return;
            }
            info!("shutdown requested");
            shutdown.cancel();
        }
    });

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await?;

    info!("server stopped");
    Ok(())
}
