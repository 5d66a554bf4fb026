//! Reservation/booking lifecycle.
//!
//! State machine per booking:
//!
//! ```text
//! [no booking] --lock seats, create--> PENDING
//! PENDING --payment confirmed--> APPROVED   (terminal)
//! PENDING --cancel | lock expired--> CANCELLED / REJECTED (terminal)
//! ```
//!
//! Writes are single transactions with conditional status updates
//! ("WHERE status = 'PENDING'"), so racing confirms and cancels linearize
//! on the booking row. No seat lock is ever held across a gateway call.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tracing::info;
use uuid::Uuid;

use crate::database::Database;
use crate::errors::BookingError;
use crate::models::seat::seat_label;
use crate::models::{Booking, PaymentStatus};
use crate::services::gateway::PaymentGatewayClient;
use crate::services::inventory::SeatInventory;
use crate::AppState;

#[derive(Debug, Serialize)]
pub struct ReservedBooking {
    pub booking_id: i64,
    pub show_id: i64,
    pub amount: i64,
    pub seat_count: i32,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct PaymentInitiated {
    pub booking_id: i64,
    pub session_id: String,
    pub payment_url: String,
    pub amount: i64,
}

#[derive(Debug, Serialize)]
pub struct PaymentConfirmed {
    pub booking_id: i64,
    pub show_id: i64,
    pub confirmation_code: String,
    pub already_confirmed: bool,
}

#[derive(Debug, Serialize)]
pub struct CancelOutcome {
    pub booking_id: i64,
    pub show_id: i64,
    pub seats_released: usize,
}

#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct BookingSummary {
    pub id: i64,
    pub show_id: i64,
    pub movie_title: String,
    pub amount: i64,
    pub seat_count: i32,
    pub status: String,
    pub booked_at: DateTime<Utc>,
    pub confirmation_code: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct BookingDetails {
    #[serde(flatten)]
    pub booking: Booking,
    pub movie_title: String,
    pub hall_name: String,
    pub cinema_name: String,
    pub starts_at: DateTime<Utc>,
    pub seats: Vec<String>,
}

/// Confirmation code fallback when the gateway returns no payment reference.
fn new_confirmation_code() -> String {
    Uuid::new_v4().simple().to_string()[..8].to_uppercase()
}

#[derive(Clone)]
pub struct BookingLifecycle {
    db: Database,
    gateway: PaymentGatewayClient,
    lock_duration: Duration,
}

impl BookingLifecycle {
    pub fn new(db: Database, gateway: PaymentGatewayClient, lock_minutes: i64) -> Self {
        Self {
            db,
            gateway,
            lock_duration: Duration::minutes(lock_minutes),
        }
    }

    pub fn from_state(state: &AppState) -> Self {
        Self::new(
            state.db.clone(),
            state.gateway.clone(),
            state.config.booking.seat_lock_minutes,
        )
    }

    /// Locks the requested seats and creates a PENDING booking for them, all
    /// in one transaction. The price of each seat is captured here; later
    /// repricing never changes this booking's amount.
    pub async fn reserve(
        &self,
        user_id: i64,
        show_id: i64,
        seat_ids: &[i64],
    ) -> Result<ReservedBooking, BookingError> {
        let mut ids: Vec<i64> = seat_ids.to_vec();
        ids.sort_unstable();
        ids.dedup();
        if ids.is_empty() {
            return Err(BookingError::EmptySeatSelection);
        }

        let show_exists: bool =
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM shows WHERE id = $1 AND is_active)")
                .bind(show_id)
                .fetch_one(&self.db.pool)
                .await?;
        if !show_exists {
            return Err(BookingError::ShowNotFound);
        }

        let expires_at = Utc::now() + self.lock_duration;
        let mut tx = self.db.pool.begin().await?;

        // Whoever executes this first wins all requested seats; the loser
        // gets SeatUnavailable and the dropped transaction rolls back.
        let locked = SeatInventory::lock_seats(&mut tx, show_id, &ids, expires_at).await?;
        let amount: i64 = locked.iter().map(|seat| seat.price).sum();

        let booking_id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO bookings (user_id, show_id, amount, seat_count, status)
            VALUES ($1, $2, $3, $4, 'PENDING')
            RETURNING id
            "#,
        )
        .bind(user_id)
        .bind(show_id)
        .bind(amount)
        .bind(locked.len() as i32)
        .fetch_one(&mut *tx)
        .await?;

        sqlx::query(
            "INSERT INTO booking_seats (booking_id, show_seat_id) SELECT $1, UNNEST($2::BIGINT[])",
        )
        .bind(booking_id)
        .bind(&ids)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        info!(
            "booking {} created for user {}: {} seats, amount {}, locked until {}",
            booking_id,
            user_id,
            locked.len(),
            amount,
            expires_at
        );

        Ok(ReservedBooking {
            booking_id,
            show_id,
            amount,
            seat_count: locked.len() as i32,
            expires_at,
        })
    }

    /// Opens a checkout session for a pending booking. If the seat locks
    /// already expired the booking is cancelled here and the caller gets
    /// `SessionExpired` - the client's opinion about validity is never
    /// trusted.
    pub async fn initiate_payment(
        &self,
        user_id: i64,
        booking_id: i64,
    ) -> Result<PaymentInitiated, BookingError> {
        let booking: Option<(String, i64, i32, i64)> = sqlx::query_as(
            "SELECT status, amount, seat_count, show_id FROM bookings WHERE id = $1 AND user_id = $2",
        )
        .bind(booking_id)
        .bind(user_id)
        .fetch_optional(&self.db.pool)
        .await?;
        let (status, amount, seat_count, show_id) =
            booking.ok_or(BookingError::BookingNotFound)?;

        let status: PaymentStatus = status.parse().map_err(BookingError::InvalidTransition)?;
        if status != PaymentStatus::Pending {
            return Err(BookingError::InvalidTransition(format!(
                "booking {} is {}",
                booking_id,
                status.as_str()
            )));
        }

        let earliest_expiry: Option<DateTime<Utc>> = sqlx::query_scalar(
            r#"
            SELECT MIN(ss.lock_expiration)
            FROM booking_seats bs
            JOIN show_seats ss ON ss.id = bs.show_seat_id
            WHERE bs.booking_id = $1 AND ss.status = 'LOCKED'
            "#,
        )
        .bind(booking_id)
        .fetch_one(&self.db.pool)
        .await?;

        match earliest_expiry {
            Some(expiry) if expiry > Utc::now() => {}
            _ => {
                // Lock gone (expired or reaped): clean up and make the
                // customer start over.
                self.cancel_internal(booking_id).await?;
                return Err(BookingError::SessionExpired);
            }
        }

        let movie_title: String = sqlx::query_scalar("SELECT movie_title FROM shows WHERE id = $1")
            .bind(show_id)
            .fetch_one(&self.db.pool)
            .await?;

        let order_id = format!("booking-{}-{}", booking_id, Utc::now().timestamp());
        let description = format!("{} - {} seat(s)", movie_title, seat_count);

        // No seat lock is held across this call; the lock expiry keeps
        // running while the customer sits on the checkout page.
        let session = self
            .gateway
            .create_session(amount * 100, &order_id, &description)
            .await?;

        sqlx::query(
            "INSERT INTO payment_sessions (booking_id, session_id, amount) VALUES ($1, $2, $3)",
        )
        .bind(booking_id)
        .bind(&session.session_id)
        .bind(amount)
        .execute(&self.db.pool)
        .await?;

        info!(
            "payment session {} created for booking {} (amount {})",
            session.session_id, booking_id, amount
        );

        Ok(PaymentInitiated {
            booking_id,
            session_id: session.session_id,
            payment_url: session.payment_url,
            amount,
        })
    }

    /// Verifies payment with the gateway and finalizes the booking.
    /// Idempotent: a second call after success returns the same confirmation
    /// code and changes nothing.
    pub async fn confirm_payment(
        &self,
        user_id: i64,
        booking_id: i64,
        session_id: &str,
    ) -> Result<PaymentConfirmed, BookingError> {
        let booking: Option<(String, Option<String>, i64)> = sqlx::query_as(
            "SELECT status, confirmation_code, show_id FROM bookings WHERE id = $1 AND user_id = $2",
        )
        .bind(booking_id)
        .bind(user_id)
        .fetch_optional(&self.db.pool)
        .await?;
        let (status, code, show_id) = booking.ok_or(BookingError::BookingNotFound)?;

        let status: PaymentStatus = status.parse().map_err(BookingError::InvalidTransition)?;

        if status == PaymentStatus::Approved {
            // Refreshing the success page must not double-apply anything.
            return Ok(PaymentConfirmed {
                booking_id,
                show_id,
                confirmation_code: code.unwrap_or_default(),
                already_confirmed: true,
            });
        }
        if status.is_terminal() {
            return Err(BookingError::InvalidTransition(format!(
                "booking {} is {}",
                booking_id,
                status.as_str()
            )));
        }

        // The gateway is the sole source of truth for "paid".
        let gateway_status = self.gateway.session_status(session_id).await?;
        if !gateway_status.paid {
            return Err(BookingError::PaymentNotCompleted);
        }

        let confirmation = gateway_status
            .payment_ref
            .unwrap_or_else(new_confirmation_code);

        let mut tx = self.db.pool.begin().await?;

        // Conditional update is the arbiter if two confirms race.
        let approved = sqlx::query(
            "UPDATE bookings SET status = 'APPROVED', confirmation_code = $2
             WHERE id = $1 AND status = 'PENDING'",
        )
        .bind(booking_id)
        .bind(&confirmation)
        .execute(&mut *tx)
        .await?
        .rows_affected()
            > 0;

        if !approved {
            tx.rollback().await?;
            // Someone else finished first; their state stands.
            let row: Option<(String, Option<String>)> =
                sqlx::query_as("SELECT status, confirmation_code FROM bookings WHERE id = $1")
                    .bind(booking_id)
                    .fetch_optional(&self.db.pool)
                    .await?;
            return match row {
                Some((status, Some(code))) if status == "APPROVED" => Ok(PaymentConfirmed {
                    booking_id,
                    show_id,
                    confirmation_code: code,
                    already_confirmed: true,
                }),
                Some((status, _)) => Err(BookingError::InvalidTransition(format!(
                    "booking {} is {}",
                    booking_id, status
                ))),
                None => Err(BookingError::BookingNotFound),
            };
        }

        SeatInventory::confirm_booked(&mut tx, booking_id).await?;

        sqlx::query("UPDATE payment_sessions SET status = 'completed' WHERE session_id = $1")
            .bind(session_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        info!(
            "booking {} approved, confirmation code {}",
            booking_id, confirmation
        );

        Ok(PaymentConfirmed {
            booking_id,
            show_id,
            confirmation_code: confirmation,
            already_confirmed: false,
        })
    }

    /// Explicit cancellation by the owning user. Pending bookings release
    /// their seats immediately; repeated cancels are no-ops; paid bookings
    /// cannot be cancelled here.
    pub async fn cancel(&self, user_id: i64, booking_id: i64) -> Result<CancelOutcome, BookingError> {
        let booking: Option<(String, i64)> =
            sqlx::query_as("SELECT status, show_id FROM bookings WHERE id = $1 AND user_id = $2")
                .bind(booking_id)
                .bind(user_id)
                .fetch_optional(&self.db.pool)
                .await?;
        let (status, show_id) = booking.ok_or(BookingError::BookingNotFound)?;

        let status: PaymentStatus = status.parse().map_err(BookingError::InvalidTransition)?;
        match status {
            PaymentStatus::Pending => {}
            PaymentStatus::Cancelled | PaymentStatus::Rejected => {
                return Ok(CancelOutcome {
                    booking_id,
                    show_id,
                    seats_released: 0,
                });
            }
            PaymentStatus::Approved => {
                return Err(BookingError::InvalidTransition(format!(
                    "booking {} is already paid",
                    booking_id
                )));
            }
        }

        let released = self.cancel_internal(booking_id).await?;
        Ok(CancelOutcome {
            booking_id,
            show_id,
            seats_released: released,
        })
    }

    /// Shared by explicit cancel and the expired-session path. Loses the
    /// race gracefully: if the booking stopped being PENDING in the
    /// meantime, nothing is touched.
    async fn cancel_internal(&self, booking_id: i64) -> Result<usize, BookingError> {
        let mut tx = self.db.pool.begin().await?;

        let cancelled = sqlx::query(
            "UPDATE bookings SET status = 'CANCELLED' WHERE id = $1 AND status = 'PENDING'",
        )
        .bind(booking_id)
        .execute(&mut *tx)
        .await?
        .rows_affected()
            > 0;

        if !cancelled {
            tx.rollback().await?;
            return Ok(0);
        }

        let freed = SeatInventory::release_for_booking(&mut tx, booking_id).await?;

        sqlx::query(
            "UPDATE payment_sessions SET status = 'cancelled'
             WHERE booking_id = $1 AND status = 'pending'",
        )
        .bind(booking_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        info!("booking {} cancelled, {} seats released", booking_id, freed.len());
        Ok(freed.len())
    }

    /// The customer's booking history, newest first.
    pub async fn my_bookings(&self, user_id: i64) -> Result<Vec<BookingSummary>, BookingError> {
        let bookings = sqlx::query_as::<_, BookingSummary>(
            r#"
            SELECT b.id, b.show_id, s.movie_title, b.amount, b.seat_count,
                   b.status, b.booked_at, b.confirmation_code
            FROM bookings b
            JOIN shows s ON s.id = b.show_id
            WHERE b.user_id = $1
            ORDER BY b.booked_at DESC
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.db.pool)
        .await?;

        Ok(bookings)
    }

    /// One booking with venue info and seat labels.
    pub async fn booking_details(
        &self,
        user_id: i64,
        booking_id: i64,
    ) -> Result<BookingDetails, BookingError> {
        let booking: Option<Booking> = sqlx::query_as(
            r#"
            SELECT id, user_id, show_id, amount, seat_count, status,
                   booked_at, confirmation_code
            FROM bookings
            WHERE id = $1 AND user_id = $2
            "#,
        )
        .bind(booking_id)
        .bind(user_id)
        .fetch_optional(&self.db.pool)
        .await?;
        let booking = booking.ok_or(BookingError::BookingNotFound)?;

        let (movie_title, hall_name, cinema_name, starts_at): (String, String, String, DateTime<Utc>) =
            sqlx::query_as(
                r#"
                SELECT s.movie_title, h.name, h.cinema_name, s.starts_at
                FROM shows s
                JOIN halls h ON h.id = s.hall_id
                WHERE s.id = $1
                "#,
            )
            .bind(booking.show_id)
            .fetch_one(&self.db.pool)
            .await?;

        let seat_rows: Vec<(i32, i32)> = sqlx::query_as(
            r#"
            SELECT st.seat_row, st.seat_col
            FROM booking_seats bs
            JOIN show_seats ss ON ss.id = bs.show_seat_id
            JOIN seats st ON st.id = ss.seat_id
            WHERE bs.booking_id = $1
            ORDER BY st.seat_row, st.seat_col
            "#,
        )
        .bind(booking_id)
        .fetch_all(&self.db.pool)
        .await?;

        Ok(BookingDetails {
            booking,
            movie_title,
            hall_name,
            cinema_name,
            starts_at,
            seats: seat_rows
                .into_iter()
                .map(|(row, col)| seat_label(row, col))
                .collect(),
        })
    }
}
