pub mod show;
pub mod seat;
pub mod booking;

pub use show::Show;
pub use seat::{SeatMapItem, SeatStatus};
pub use booking::{Booking, PaymentStatus};
