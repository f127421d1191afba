//! Account API - signup, login and profile endpoints over HTTP.
//!
//! This binary loads settings, checks the database, and serves the router.

use std::net::SocketAddr;
use std::process::ExitCode;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use account_api::{
    config::{Cli, Settings},
    create_router,
    store::postgres,
    AppState, PasswordHasher, PostgresConnector, SessionPool, TokenSigner,
};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let settings = match Settings::load(&cli.config) {
        Ok(settings) => settings,
        Err(e) => {
            error!("Configuration error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    run_serve(settings).await
}

// =============================================================================
// Serve
// =============================================================================

async fn run_serve(settings: Settings) -> ExitCode {
    info!("Configuration:");
    info!(
        "  Database: {} / {}",
        postgres::server_address(&settings.db_url),
        settings.db_name
    );
    info!("  Token TTL: {}s", settings.token_ttl.as_secs());
    info!("  Request timeout: {}s", settings.request_timeout.as_secs());

    let signer = match TokenSigner::new(&settings.jwt_secret) {
        Ok(signer) => signer,
        Err(e) => {
            error!("Configuration error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let hasher = match PasswordHasher::new(settings.bcrypt_cost) {
        Ok(hasher) => hasher,
        Err(e) => {
            error!("Configuration error: invalid bcrypt cost: {}", e);
            return ExitCode::FAILURE;
        }
    };
    info!("  bcrypt cost: {}", hasher.cost());

    // Probe the database before accepting traffic
    info!("Connecting to database...");
    let connector = match PostgresConnector::connect(&settings.db_url, &settings.db_name).await {
        Ok(connector) => connector,
        Err(e) => {
            error!("Failed to connect to database: {}", e);
            return ExitCode::FAILURE;
        }
    };
    let pool = SessionPool::new(connector, &settings.db_name);

    match pool.acquire().await {
        Ok(session) => match session.db().count_users().await {
            Ok(count) => {
                info!(
                    "  Connected successfully, {} user(s) in {}",
                    count, settings.db_name
                );
            }
            Err(e) => {
                error!("Failed to read user collection: {}", e);
                return ExitCode::FAILURE;
            }
        },
        Err(e) => {
            error!("Failed to connect to database: {}", e);
            return ExitCode::FAILURE;
        }
    }

    let state = AppState::new(pool, signer, hasher)
        .with_token_ttl(settings.token_ttl)
        .with_request_timeout(settings.request_timeout);
    let router = create_router(state);

    let addr = settings.bind_address();
    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("Failed to bind to {}: {}", addr, e);
            return ExitCode::FAILURE;
        }
    };
    info!("Server listening on: http://{}", addr);

    let service = router.into_make_service_with_connect_info::<SocketAddr>();
    if let Err(e) = axum::serve(listener, service)
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        error!("Server error: {}", e);
        return ExitCode::FAILURE;
    }

    info!("Server stopped");
    ExitCode::SUCCESS
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

/// Initialize the tracing subscriber.
fn init_logging(verbose: bool) {
    let env_filter = if verbose {
        "account_api=debug,tower_http=debug"
    } else {
        "account_api=info,tower_http=info"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| env_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}
