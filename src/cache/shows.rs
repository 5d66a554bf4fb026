use redis::AsyncCommands;

use super::CacheService;
use crate::models::Show;

const SHOWS_CACHE_KEY: &str = "shows";
const SHOWS_TTL_SECONDS: u64 = 3600;

impl CacheService {
    // Upcoming shows: cache first, then DB, else empty
    pub async fn get_shows(&self) -> Vec<Show> {
        if let Ok(shows) = self.shows_from_cache().await {
            return shows;
        }

        match self.load_shows_from_db().await {
            Ok(shows) => {
                let _ = self.save_shows_to_cache(&shows).await;
                shows
            }
            Err(e) => {
                tracing::error!("Failed to load shows: {:?}", e);
                vec![]
            }
        }
    }

    async fn load_shows_from_db(&self) -> Result<Vec<Show>, sqlx::Error> {
        sqlx::query_as::<_, Show>(
            r#"
            SELECT s.id, s.movie_title, h.name AS hall_name, h.cinema_name,
                   s.starts_at, s.ends_at
            FROM shows s
            JOIN halls h ON h.id = s.hall_id
            WHERE s.is_active AND s.starts_at > NOW()
            ORDER BY s.starts_at
            "#,
        )
        .fetch_all(&self.db.pool)
        .await
    }

    async fn shows_from_cache(&self) -> Result<Vec<Show>, redis::RedisError> {
        let mut conn = self.redis.conn.clone();
        let data: String = conn.get(SHOWS_CACHE_KEY).await?;
        serde_json::from_str(&data)
            .map_err(|_| redis::RedisError::from((redis::ErrorKind::TypeError, "Parse error")))
    }

    async fn save_shows_to_cache(&self, shows: &[Show]) -> Result<(), redis::RedisError> {
        let data = serde_json::to_string(shows)
            .map_err(|_| redis::RedisError::from((redis::ErrorKind::TypeError, "Serialize error")))?;
        let mut conn = self.redis.conn.clone();
        conn.set_ex(SHOWS_CACHE_KEY, data, SHOWS_TTL_SECONDS).await
    }
}
