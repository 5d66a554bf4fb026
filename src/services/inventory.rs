//! Seat inventory: the per-show set of bookable seats.
//!
//! Every status transition here is a conditional update ("set LOCKED where
//! still AVAILABLE") with the affected rows checked, so concurrent claims
//! linearize in the database instead of racing through read-then-write.

use chrono::{DateTime, Utc};
use sqlx::{Postgres, Transaction};
use std::collections::HashSet;
use tracing::debug;

use crate::database::Database;
use crate::errors::BookingError;
use crate::models::seat::{seat_label, SeatMapItem};
use crate::models::SeatStatus;

/// A seat claimed by `lock_seats`, with the price captured at lock time.
#[derive(Debug, Clone)]
pub struct LockedSeat {
    pub id: i64,
    pub price: i64,
}

#[derive(Clone)]
pub struct SeatInventory {
    db: Database,
}

impl SeatInventory {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Seat map for rendering, ordered by row then column. Non-blocking
    /// snapshot; may be briefly stale, correctness is enforced at lock time.
    pub async fn list_seats(&self, show_id: i64) -> Result<Vec<SeatMapItem>, BookingError> {
        let show_exists: bool =
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM shows WHERE id = $1 AND is_active)")
                .bind(show_id)
                .fetch_one(&self.db.pool)
                .await?;
        if !show_exists {
            return Err(BookingError::ShowNotFound);
        }

        let rows: Vec<(i64, i32, i32, i64, String)> = sqlx::query_as(
            r#"
            SELECT ss.id, s.seat_row, s.seat_col, ss.price, ss.status
            FROM show_seats ss
            JOIN seats s ON s.id = ss.seat_id
            WHERE ss.show_id = $1
            ORDER BY s.seat_row, s.seat_col
            "#,
        )
        .bind(show_id)
        .fetch_all(&self.db.pool)
        .await?;

        rows.into_iter()
            .map(|(id, row, col, price, status)| {
                let status: SeatStatus = status
                    .parse()
                    .map_err(BookingError::InvalidTransition)?;
                Ok(SeatMapItem {
                    show_seat_id: id,
                    row,
                    col,
                    seat_name: seat_label(row, col),
                    price,
                    status,
                })
            })
            .collect()
    }

    /// Atomically moves every requested seat AVAILABLE -> LOCKED, or fails
    /// without claiming anything. The caller's transaction is the unit of
    /// atomicity: on `SeatUnavailable` it must be rolled back (dropping it
    /// is enough), which discards the partial update.
    pub async fn lock_seats(
        tx: &mut Transaction<'_, Postgres>,
        show_id: i64,
        seat_ids: &[i64],
        expires_at: DateTime<Utc>,
    ) -> Result<Vec<LockedSeat>, BookingError> {
        if seat_ids.is_empty() {
            return Err(BookingError::EmptySeatSelection);
        }

        let locked: Vec<(i64, i64)> = sqlx::query_as(
            r#"
            UPDATE show_seats
            SET status = 'LOCKED', lock_expiration = $3
            WHERE id = ANY($1) AND show_id = $2 AND status = 'AVAILABLE'
            RETURNING id, price
            "#,
        )
        .bind(seat_ids)
        .bind(show_id)
        .bind(expires_at)
        .fetch_all(&mut **tx)
        .await?;

        if locked.len() != seat_ids.len() {
            let won: HashSet<i64> = locked.iter().map(|(id, _)| *id).collect();
            let conflicting: Vec<i64> = seat_ids
                .iter()
                .copied()
                .filter(|id| !won.contains(id))
                .collect();
            return Err(BookingError::SeatUnavailable(conflicting));
        }

        debug!("locked {} seats of show {} until {}", locked.len(), show_id, expires_at);

        Ok(locked
            .into_iter()
            .map(|(id, price)| LockedSeat { id, price })
            .collect())
    }

    /// LOCKED -> BOOKED for every seat the booking claims, clearing the lock
    /// expiration. Fails `InvalidTransition` (roll the transaction back) if
    /// any claimed seat is no longer locked.
    pub async fn confirm_booked(
        tx: &mut Transaction<'_, Postgres>,
        booking_id: i64,
    ) -> Result<Vec<i64>, BookingError> {
        let claimed: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM booking_seats WHERE booking_id = $1")
                .bind(booking_id)
                .fetch_one(&mut **tx)
                .await?;

        let booked: Vec<i64> = sqlx::query_scalar(
            r#"
            UPDATE show_seats
            SET status = 'BOOKED', lock_expiration = NULL
            WHERE status = 'LOCKED'
              AND id IN (SELECT show_seat_id FROM booking_seats WHERE booking_id = $1)
            RETURNING id
            "#,
        )
        .bind(booking_id)
        .fetch_all(&mut **tx)
        .await?;

        if booked.len() as i64 != claimed {
            return Err(BookingError::InvalidTransition(format!(
                "booking {} claims {} seats but only {} were still {}",
                booking_id,
                claimed,
                booked.len(),
                SeatStatus::Locked.as_str(),
            )));
        }

        Ok(booked)
    }

    /// Releases the given seats back to AVAILABLE, clearing lock expiration.
    /// Seats already available are left alone (no-op, not an error).
    pub async fn release(&self, seat_ids: &[i64]) -> Result<u64, BookingError> {
        if seat_ids.is_empty() {
            return Ok(0);
        }

        let result = sqlx::query(
            r#"
            UPDATE show_seats
            SET status = 'AVAILABLE', lock_expiration = NULL
            WHERE id = ANY($1) AND status IN ('LOCKED', 'BOOKED')
            "#,
        )
        .bind(seat_ids)
        .execute(&self.db.pool)
        .await?;

        Ok(result.rows_affected())
    }

    /// Frees the LOCKED seats of one booking inside the caller's
    /// transaction. Used by cancellation, where booked seats must not be
    /// touched.
    pub async fn release_for_booking(
        tx: &mut Transaction<'_, Postgres>,
        booking_id: i64,
    ) -> Result<Vec<i64>, BookingError> {
        let freed: Vec<i64> = sqlx::query_scalar(
            r#"
            UPDATE show_seats
            SET status = 'AVAILABLE', lock_expiration = NULL
            WHERE status = 'LOCKED'
              AND id IN (SELECT show_seat_id FROM booking_seats WHERE booking_id = $1)
            RETURNING id
            "#,
        )
        .bind(booking_id)
        .fetch_all(&mut **tx)
        .await?;

        Ok(freed)
    }

    /// Uniform price update for a show. Only seats still open for sale are
    /// touched, so a pending booking's amount never changes under it.
    pub async fn reprice_available(
        &self,
        show_id: i64,
        new_price: i64,
    ) -> Result<u64, BookingError> {
        let result = sqlx::query(
            "UPDATE show_seats SET price = $2 WHERE show_id = $1 AND status = 'AVAILABLE'",
        )
        .bind(show_id)
        .bind(new_price)
        .execute(&self.db.pool)
        .await?;

        debug!("repriced {} available seats of show {}", result.rows_affected(), show_id);
        Ok(result.rows_affected())
    }
}
