use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, patch, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use validator::Validate;

use crate::{
    errors::BookingError, middleware::AuthUser, services::lifecycle::BookingLifecycle, AppState,
};

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/bookings", post(create_booking))
        .route("/bookings", get(my_bookings))
        .route("/bookings/initiatePayment", patch(initiate_payment))
        .route("/bookings/cancel", patch(cancel_booking))
        .route("/bookings/{booking_id}", get(booking_details))
        .route("/bookings/{booking_id}/confirm", get(confirm_payment))
}

/* ---------- BOOKINGS ---------- */

// POST /api/bookings
#[derive(Debug, Deserialize, Validate)]
struct CreateBookingRequest {
    show_id: i64,
    #[validate(length(min = 1))]
    seat_ids: Vec<i64>,
}

async fn create_booking(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Json(req): Json<CreateBookingRequest>,
) -> Result<impl IntoResponse, BookingError> {
    if req.validate().is_err() {
        return Err(BookingError::EmptySeatSelection);
    }
    if req.show_id <= 0 {
        return Err(BookingError::ShowNotFound);
    }

    let booking = BookingLifecycle::from_state(&state)
        .reserve(user.user_id, req.show_id, &req.seat_ids)
        .await?;

    state.cache.invalidate_seat_map(req.show_id).await;

    Ok((
        StatusCode::CREATED,
        Json(json!({ "success": true, "booking": booking })),
    ))
}

// GET /api/bookings
async fn my_bookings(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
) -> Result<impl IntoResponse, BookingError> {
    let bookings = BookingLifecycle::from_state(&state)
        .my_bookings(user.user_id)
        .await?;

    Ok((
        StatusCode::OK,
        Json(json!({ "success": true, "bookings": bookings })),
    ))
}

// GET /api/bookings/{booking_id}
async fn booking_details(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(booking_id): Path<i64>,
) -> Result<impl IntoResponse, BookingError> {
    let details = BookingLifecycle::from_state(&state)
        .booking_details(user.user_id, booking_id)
        .await?;

    Ok((
        StatusCode::OK,
        Json(json!({ "success": true, "booking": details })),
    ))
}

// PATCH /api/bookings/initiatePayment
#[derive(Debug, Deserialize)]
struct InitiatePaymentRequest {
    booking_id: i64,
}

async fn initiate_payment(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Json(req): Json<InitiatePaymentRequest>,
) -> Result<impl IntoResponse, BookingError> {
    if req.booking_id <= 0 {
        return Err(BookingError::BookingNotFound);
    }

    let payment = BookingLifecycle::from_state(&state)
        .initiate_payment(user.user_id, req.booking_id)
        .await;

    // An expired session cancels the booking and frees its seats; the map
    // for that show changed even though the call failed.
    if let Err(BookingError::SessionExpired) = &payment {
        if let Ok(Some(show_id)) =
            sqlx::query_scalar::<_, i64>("SELECT show_id FROM bookings WHERE id = $1")
                .bind(req.booking_id)
                .fetch_optional(&state.db.pool)
                .await
        {
            state.cache.invalidate_seat_map(show_id).await;
        }
    }

    let payment = payment?;

    Ok((
        StatusCode::OK,
        Json(json!({ "success": true, "payment": payment })),
    ))
}

// GET /api/bookings/{booking_id}/confirm?session_id=...
#[derive(Debug, Deserialize)]
struct ConfirmQuery {
    session_id: String,
}

async fn confirm_payment(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(booking_id): Path<i64>,
    Query(query): Query<ConfirmQuery>,
) -> Result<impl IntoResponse, BookingError> {
    let confirmed = BookingLifecycle::from_state(&state)
        .confirm_payment(user.user_id, booking_id, &query.session_id)
        .await?;

    if !confirmed.already_confirmed {
        state.cache.invalidate_seat_map(confirmed.show_id).await;
    }

    Ok((
        StatusCode::OK,
        Json(json!({
            "success": true,
            "booking_id": confirmed.booking_id,
            "confirmation_code": confirmed.confirmation_code,
            "already_confirmed": confirmed.already_confirmed,
        })),
    ))
}

// PATCH /api/bookings/cancel
#[derive(Debug, Deserialize)]
struct CancelBookingRequest {
    booking_id: i64,
}

async fn cancel_booking(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Json(req): Json<CancelBookingRequest>,
) -> Result<impl IntoResponse, BookingError> {
    if req.booking_id <= 0 {
        return Err(BookingError::BookingNotFound);
    }

    let outcome = BookingLifecycle::from_state(&state)
        .cancel(user.user_id, req.booking_id)
        .await?;

    if outcome.seats_released > 0 {
        state.cache.invalidate_seat_map(outcome.show_id).await;
    }

    Ok((
        StatusCode::OK,
        Json(json!({
            "success": true,
            "message": "Booking cancelled",
            "seats_released": outcome.seats_released,
        })),
    ))
}
