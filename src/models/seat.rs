use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Per-show seat state. The status column of `show_seats` is the single
/// source of truth for bookability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SeatStatus {
    Available,
    Locked,
    Booked,
}

impl SeatStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SeatStatus::Available => "AVAILABLE",
            SeatStatus::Locked => "LOCKED",
            SeatStatus::Booked => "BOOKED",
        }
    }

    pub fn is_available(&self) -> bool {
        matches!(self, SeatStatus::Available)
    }
}

impl FromStr for SeatStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "AVAILABLE" => Ok(SeatStatus::Available),
            "LOCKED" => Ok(SeatStatus::Locked),
            "BOOKED" => Ok(SeatStatus::Booked),
            other => Err(format!("unknown seat status '{}'", other)),
        }
    }
}

/// One entry of the rendered seat map.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeatMapItem {
    pub show_seat_id: i64,
    pub row: i32,
    pub col: i32,
    pub seat_name: String,
    pub price: i64,
    pub status: SeatStatus,
}

/// Display name for a seat: row letter + column number ("A1", "C12").
pub fn seat_label(row: i32, col: i32) -> String {
    match u8::try_from(row) {
        Ok(r @ 1..=26) => format!("{}{}", (b'A' + r - 1) as char, col),
        _ => format!("R{}C{}", row, col),
    }
}
