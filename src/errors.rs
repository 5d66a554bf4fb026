use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::services::gateway::GatewayError;

/// Failures of the booking core. Conflicts and state-machine violations
/// propagate as typed variants; they are never swallowed.
#[derive(Debug, Error)]
pub enum BookingError {
    #[error("seats no longer available: {0:?}")]
    SeatUnavailable(Vec<i64>),

    #[error("show not found")]
    ShowNotFound,

    #[error("booking not found")]
    BookingNotFound,

    #[error("reservation session expired")]
    SessionExpired,

    #[error("payment not completed")]
    PaymentNotCompleted,

    #[error("invalid transition: {0}")]
    InvalidTransition(String),

    #[error("no seats selected")]
    EmptySeatSelection,

    #[error(transparent)]
    Gateway(#[from] GatewayError),

    #[error("database error")]
    Database(#[from] sqlx::Error),
}

// Not in the RFC canon; the frontend treats 419 as "start over".
fn status_419() -> StatusCode {
    StatusCode::from_u16(419).unwrap_or(StatusCode::CONFLICT)
}

impl BookingError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            BookingError::SeatUnavailable(_) => StatusCode::CONFLICT,
            BookingError::ShowNotFound | BookingError::BookingNotFound => StatusCode::NOT_FOUND,
            BookingError::SessionExpired => status_419(),
            BookingError::PaymentNotCompleted => StatusCode::PAYMENT_REQUIRED,
            BookingError::InvalidTransition(_) => StatusCode::CONFLICT,
            BookingError::EmptySeatSelection => StatusCode::BAD_REQUEST,
            BookingError::Gateway(_) => StatusCode::BAD_GATEWAY,
            BookingError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for BookingError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        let body = match &self {
            BookingError::SeatUnavailable(ids) => json!({
                "success": false,
                "message": "Some seats were just taken. Please re-select.",
                "conflicting_seats": ids,
            }),
            BookingError::SessionExpired => json!({
                "success": false,
                "message": "Your reservation session expired. Please select seats again.",
            }),
            BookingError::PaymentNotCompleted => json!({
                "success": false,
                "message": "Payment has not been completed yet. Retry after finishing checkout.",
            }),
            BookingError::InvalidTransition(detail) => {
                tracing::error!("invalid booking transition: {}", detail);
                json!({ "success": false, "message": format!("Invalid booking state: {}", detail) })
            }
            BookingError::Gateway(e) => {
                tracing::error!("payment gateway error: {:?}", e);
                json!({
                    "success": false,
                    "message": "Payment gateway error. Please try again later.",
                })
            }
            BookingError::Database(e) => {
                tracing::error!("database error: {:?}", e);
                json!({ "success": false, "message": "Internal error" })
            }
            other => json!({ "success": false, "message": other.to_string() }),
        };

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conflict_class_maps_to_409() {
        assert_eq!(
            BookingError::SeatUnavailable(vec![1, 2]).status_code(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            BookingError::InvalidTransition("x".into()).status_code(),
            StatusCode::CONFLICT
        );
    }

    #[test]
    fn lookup_failures_map_to_404() {
        assert_eq!(BookingError::ShowNotFound.status_code(), StatusCode::NOT_FOUND);
        assert_eq!(BookingError::BookingNotFound.status_code(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn expired_session_uses_419() {
        assert_eq!(BookingError::SessionExpired.status_code().as_u16(), 419);
    }

    #[test]
    fn recoverable_payment_states() {
        assert_eq!(
            BookingError::PaymentNotCompleted.status_code(),
            StatusCode::PAYMENT_REQUIRED
        );
        assert_eq!(
            BookingError::EmptySeatSelection.status_code(),
            StatusCode::BAD_REQUEST
        );
    }
}
