pub mod config;
pub mod database;
pub mod redis_client;
pub mod models;
pub mod errors;
pub mod controllers;
pub mod middleware;
pub mod cache;
pub mod services;

// Shared state for the whole application
#[derive(Clone)]
pub struct AppState {
    pub db: database::Database,
    pub redis: redis_client::RedisClient,
    pub cache: cache::CacheService,
    pub gateway: services::gateway::PaymentGatewayClient,
    pub config: config::Config,
}
