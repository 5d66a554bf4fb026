use crate::{database::Database, redis_client::RedisClient};
use tracing::info;

pub mod shows;
pub mod seats;

#[derive(Clone)]
pub struct CacheService {
    redis: RedisClient,
    db: Database,
}

impl CacheService {
    pub fn new(redis: RedisClient, db: Database) -> Self {
        Self { redis, db }
    }

    // Cache warmup on startup
    pub async fn warmup(&self) {
        info!("Starting cache warmup...");

        let shows = self.get_shows().await;
        info!("Loaded {} shows", shows.len());

        for show in &shows {
            let _ = self.get_seat_map(show.id).await;
        }

        info!("Cache warmup done");
    }
}
