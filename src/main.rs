use axum::{routing::get, Router};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tower_http::{cors::CorsLayer, timeout::TimeoutLayer, trace::TraceLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use turnstile::api::middleware::session::AppState;
use turnstile::config::Config;
use turnstile::db;
use turnstile::services::{rate_limit::RateLimiter, webhook};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "turnstile=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Turnstile server...");

    // Load configuration
    let config = Config::from_env()?;
    tracing::info!("Configuration loaded successfully");

    // Create database pool
    let pool = db::create_pool(&config.database_url).await?;
    tracing::info!("Database pool created");

    // Run migrations
    db::run_migrations(&pool).await?;
    tracing::info!("Database migrations completed");

    let notifier = webhook::from_config(&config);

    // 10 station login attempts per (event, code) per minute
    let station_login_limiter = Arc::new(RateLimiter::new(10, Duration::from_secs(60)));

    // Build application state
    let state = AppState {
        pool: pool.clone(),
        config: config.clone(),
        notifier,
        station_login_limiter,
    };

    // Build router
    let app = Router::new()
        .route("/health", get(turnstile::api::health::health_check))
        .merge(turnstile::api::auth::router())
        .merge(turnstile::api::checkin::router())
        .merge(turnstile::api::events::router())
        .merge(turnstile::api::registrations::router())
        .merge(turnstile::api::stations::router())
        .layer(TimeoutLayer::new(Duration::from_secs(10)))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let addr = SocketAddr::new(config.host.parse()?, config.port);
    tracing::info!("Listening on {}", addr);

    // Start server
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("failed to install CTRL+C signal handler");
    tracing::info!("Shutdown signal received, cleaning up...");
}
