pub mod shows;
pub mod bookings;

use axum::Router;
use std::sync::Arc;

pub fn routes() -> Router<Arc<crate::AppState>> {
    Router::new()
        .merge(shows::routes())
        .merge(bookings::routes())
}
