use serde::Deserialize;
use std::env;

// Top-level configuration - container for all settings
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub app: AppConfig,
    pub database: DatabaseConfig,
    pub redis: RedisConfig,
    pub booking: BookingConfig,
    pub payment: PaymentConfig,
    pub circuit_breaker: CircuitBreakerConfig,
}

// Application settings
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub environment: String,
    pub rust_log: String,
}

// Database settings
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub pool_size: u32,
}

// Redis settings
#[derive(Debug, Clone, Deserialize)]
pub struct RedisConfig {
    pub url: String,
}

// Booking policy: how long a seat lock lives and how often the reaper runs
#[derive(Debug, Clone, Deserialize)]
pub struct BookingConfig {
    pub seat_lock_minutes: i64,
    pub reaper_interval_seconds: u64,
}

// Payment gateway settings
#[derive(Debug, Clone, Deserialize)]
pub struct PaymentConfig {
    pub merchant_id: String,
    pub merchant_password: String,
    pub gateway_url: String,
    pub success_url: String,
    pub cancel_url: String,
    pub currency: String,
}

// Circuit breaker settings
#[derive(Debug, Clone, Deserialize)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    pub timeout_seconds: u64,
}

impl Config {
    pub fn from_env() -> Self {
        Config {
            app: AppConfig {
                host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
                port: env::var("PORT")
                    .unwrap_or_else(|_| "8000".to_string())
                    .parse()
                    .expect("PORT must be a valid number"),
                environment: env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string()),
                rust_log: env::var("RUST_LOG")
                    .unwrap_or_else(|_| "cinebooker=debug,tower_http=debug".to_string()),
            },
            database: DatabaseConfig {
                url: env::var("DATABASE_URL").expect("DATABASE_URL must be set"),
                pool_size: env::var("DB_POOL_SIZE")
                    .unwrap_or_else(|_| "20".to_string())
                    .parse()
                    .expect("DB_POOL_SIZE must be a valid number"),
            },
            redis: RedisConfig {
                url: env::var("REDIS_URL").expect("REDIS_URL must be set"),
            },
            booking: BookingConfig {
                seat_lock_minutes: env::var("BOOKING_SEAT_LOCK_MINUTES")
                    .unwrap_or_else(|_| "10".to_string())
                    .parse()
                    .expect("BOOKING_SEAT_LOCK_MINUTES must be a valid number"),
                reaper_interval_seconds: env::var("BOOKING_REAPER_INTERVAL_SECONDS")
                    .unwrap_or_else(|_| "60".to_string())
                    .parse()
                    .expect("BOOKING_REAPER_INTERVAL_SECONDS must be a valid number"),
            },
            payment: PaymentConfig {
                merchant_id: env::var("MERCHANT_ID").expect("MERCHANT_ID must be set"),
                merchant_password: env::var("MERCHANT_PASSWORD").expect("MERCHANT_PASSWORD must be set"),
                gateway_url: env::var("PAYMENT_GATEWAY_URL")
                    .unwrap_or_else(|_| "https://gateway.example.com".to_string()),
                success_url: env::var("PAYMENT_SUCCESS_URL")
                    .unwrap_or_else(|_| "https://your-domain.com/payment/success".to_string()),
                cancel_url: env::var("PAYMENT_CANCEL_URL")
                    .unwrap_or_else(|_| "https://your-domain.com/payment/cancel".to_string()),
                currency: env::var("PAYMENT_CURRENCY").unwrap_or_else(|_| "EGP".to_string()),
            },
            circuit_breaker: CircuitBreakerConfig {
                failure_threshold: env::var("CIRCUIT_BREAKER_FAILURE_THRESHOLD")
                    .unwrap_or_else(|_| "5".to_string())
                    .parse()
                    .expect("CIRCUIT_BREAKER_FAILURE_THRESHOLD must be a valid number"),
                timeout_seconds: env::var("CIRCUIT_BREAKER_TIMEOUT_SECONDS")
                    .unwrap_or_else(|_| "60".to_string())
                    .parse()
                    .expect("CIRCUIT_BREAKER_TIMEOUT_SECONDS must be a valid number"),
            },
        }
    }
}
