use redis::AsyncCommands;
use tracing::info;

use super::CacheService;
use crate::errors::BookingError;
use crate::models::SeatMapItem;
use crate::services::inventory::SeatInventory;

// Short TTL: the map is re-read often and invalidated on every transition,
// the cache only has to absorb bursts on popular shows.
const SEAT_MAP_TTL_SECONDS: u64 = 60;

impl CacheService {
    /// Seat map for display: cached snapshot, DB on miss. Staleness is
    /// bounded by the TTL and by invalidation on every seat transition.
    pub async fn get_seat_map(&self, show_id: i64) -> Result<Vec<SeatMapItem>, BookingError> {
        if let Ok(seats) = self.seat_map_from_cache(show_id).await {
            return Ok(seats);
        }

        let seats = SeatInventory::new(self.db.clone())
            .list_seats(show_id)
            .await?;
        let _ = self.save_seat_map(show_id, &seats).await;
        Ok(seats)
    }

    pub async fn invalidate_seat_map(&self, show_id: i64) {
        let key = format!("seats:{}", show_id);
        let mut conn = self.redis.conn.clone();
        let _: Result<(), _> = conn.del(&key).await;
        info!("Invalidated seat map cache for show {}", show_id);
    }

    async fn seat_map_from_cache(&self, show_id: i64) -> Result<Vec<SeatMapItem>, redis::RedisError> {
        let mut conn = self.redis.conn.clone();
        let data: String = conn.get(format!("seats:{}", show_id)).await?;
        serde_json::from_str(&data)
            .map_err(|_| redis::RedisError::from((redis::ErrorKind::TypeError, "Parse error")))
    }

    async fn save_seat_map(
        &self,
        show_id: i64,
        seats: &[SeatMapItem],
    ) -> Result<(), redis::RedisError> {
        let data = serde_json::to_string(seats)
            .map_err(|_| redis::RedisError::from((redis::ErrorKind::TypeError, "Serialize error")))?;
        let mut conn = self.redis.conn.clone();
        conn.set_ex(format!("seats:{}", show_id), data, SEAT_MAP_TTL_SECONDS)
            .await
    }
}
