use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};

use crate::errors::BookingError;
use crate::AppState;

/// Reclaims seats whose lock outlived its expiration without a completed
/// payment. Runs lazily before seat-map reads and periodically from a
/// background task; both triggers are idempotent and safe to run while
/// lock attempts are in flight, because every update is conditional.
pub struct LockReaper {
    state: Arc<AppState>,
}

#[derive(Debug, Default)]
pub struct SweepStats {
    pub seats_released: u64,
    pub bookings_cancelled: u64,
}

impl SweepStats {
    pub fn reclaimed_anything(&self) -> bool {
        self.seats_released > 0 || self.bookings_cancelled > 0
    }
}

impl LockReaper {
    pub fn new(state: Arc<AppState>) -> Self {
        Self { state }
    }

    /// One sweep pass over the whole inventory.
    pub async fn sweep(&self, now: DateTime<Utc>) -> Result<SweepStats, BookingError> {
        let mut tx = self.state.db.pool.begin().await?;

        // 1) Free every seat whose lock ran out.
        let freed: Vec<(i64, i64)> = sqlx::query_as(
            r#"
            UPDATE show_seats
            SET status = 'AVAILABLE', lock_expiration = NULL
            WHERE status = 'LOCKED' AND lock_expiration < $1
            RETURNING id, show_id
            "#,
        )
        .bind(now)
        .fetch_all(&mut *tx)
        .await?;

        // 2) Cancel pending bookings that no longer hold any live seat.
        let cancelled: Vec<i64> = sqlx::query_scalar(
            r#"
            UPDATE bookings b
            SET status = 'CANCELLED'
            WHERE b.status = 'PENDING'
              AND NOT EXISTS (
                  SELECT 1
                  FROM booking_seats bs
                  JOIN show_seats ss ON ss.id = bs.show_seat_id
                  WHERE bs.booking_id = b.id
                    AND ss.status IN ('LOCKED', 'BOOKED')
              )
            RETURNING b.id
            "#,
        )
        .fetch_all(&mut *tx)
        .await?;

        // 3) Their checkout sessions will never complete.
        if !cancelled.is_empty() {
            sqlx::query(
                "UPDATE payment_sessions SET status = 'expired'
                 WHERE booking_id = ANY($1) AND status = 'pending'",
            )
            .bind(&cancelled)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        let mut shows: Vec<i64> = freed.iter().map(|(_, show_id)| *show_id).collect();
        shows.sort_unstable();
        shows.dedup();
        for show_id in shows {
            self.state.cache.invalidate_seat_map(show_id).await;
        }

        let stats = SweepStats {
            seats_released: freed.len() as u64,
            bookings_cancelled: cancelled.len() as u64,
        };

        // Routine reclamation, not an error condition.
        if stats.reclaimed_anything() {
            info!(
                "reaper: released {} expired seats, cancelled {} bookings",
                stats.seats_released, stats.bookings_cancelled
            );
        } else {
            debug!("reaper: nothing to reclaim");
        }

        Ok(stats)
    }

    /// Periodic loop, spawned from main.
    pub async fn run(self) {
        let interval = Duration::from_secs(self.state.config.booking.reaper_interval_seconds);
        loop {
            if let Err(e) = self.sweep(Utc::now()).await {
                error!("reaper sweep failed: {:?}", e);
            }
            tokio::time::sleep(interval).await;
        }
    }
}
