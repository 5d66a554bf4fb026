use anyhow::Context;
use axum::{routing::get, Router};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::task;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use cinebooker::{
    cache::CacheService,
    config::Config,
    controllers,
    database::Database,
    redis_client::RedisClient,
    services::{gateway::PaymentGatewayClient, reaper::LockReaper},
    AppState,
};

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let config = Config::from_env();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(&config.app.rust_log))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting CineBooker API");

    // Connect to the database
    let db = Database::new(&config.database.url, config.database.pool_size)
        .await
        .context("Failed to connect to database")?;
    info!("Database connected");

    // Run migrations
    db.run_migrations()
        .await
        .context("Failed to run migrations")?;

    // Connect to Redis
    let redis = RedisClient::new(&config.redis.url)
        .await
        .context("Failed to connect to Redis")?;
    info!("Redis connected");

    // Initialize the cache
    let cache = CacheService::new(redis.clone(), db.clone());
    cache.warmup().await;
    info!("Cache warmed up");

    // Payment gateway client; the circuit breaker lives in shared state so
    // failure counts survive across requests
    let gateway = PaymentGatewayClient::from_config(&config.payment, &config.circuit_breaker);

    // Create the shared application state
    let app_state = Arc::new(AppState {
        db,
        redis,
        cache,
        gateway,
        config: config.clone(),
    });

    // --- Start background tasks ---

    // Periodic reaper reclaiming expired seat locks
    let reaper = LockReaper::new(app_state.clone());
    task::spawn(reaper.run());

    // --- Start the web server ---

    let app = Router::new()
        .route("/", get(|| async { "CineBooker API v1.0" }))
        .route("/health", get(|| async { "OK" }))
        // Mount the routes from the controllers module
        .nest("/api", controllers::routes())
        // Pass the application state to the router
        .with_state(app_state.clone())
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let addr = SocketAddr::from(([0, 0, 0, 0], config.app.port));
    info!("Server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("Failed to bind listener")?;
    axum::serve(listener, app.into_make_service())
        .await
        .context("Server error")?;

    Ok(())
}
