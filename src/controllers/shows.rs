use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use chrono::Utc;
use serde_json::json;
use std::sync::Arc;

use crate::{errors::BookingError, services::reaper::LockReaper, AppState};

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/shows", get(list_shows))
        .route("/shows/{show_id}/seats", get(seat_map))
}

/* ---------- SHOWS ---------- */

// GET /api/shows
async fn list_shows(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let shows = state.cache.get_shows().await;

    (
        StatusCode::OK,
        Json(json!({
            "success": true,
            "count": shows.len(),
            "shows": shows,
        })),
    )
}

// GET /api/shows/{show_id}/seats
async fn seat_map(
    State(state): State<Arc<AppState>>,
    Path(show_id): Path<i64>,
) -> Result<impl IntoResponse, BookingError> {
    // Lazy sweep so an expired lock never renders as taken. A sweep failure
    // must not block the read path.
    if let Err(e) = LockReaper::new(state.clone()).sweep(Utc::now()).await {
        tracing::warn!("lazy sweep before seat map failed: {:?}", e);
    }

    let seats = state.cache.get_seat_map(show_id).await?;

    Ok((
        StatusCode::OK,
        Json(json!({
            "success": true,
            "show_id": show_id,
            "seats": seats,
        })),
    ))
}
