//! JSON shapes exchanged over HTTP and persisted in the store.

use serde::{Deserialize, Serialize};

use crate::point::Point;

/// Optional body of a ticket request: the seat the caller would like.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SeatRequest {
    pub row: u32,
    pub column: u32,
}

impl From<SeatRequest> for Point {
    fn from(request: SeatRequest) -> Self {
        Point::new(request.row, request.column)
    }
}

/// A reserved seat as returned to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SeatView {
    pub row: u32,
    pub column: u32,
    pub distance_to_center: u32,
}

/// Reservation state of one seat.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SeatStatus {
    pub row: u32,
    pub column: u32,
    pub reserved: bool,
    /// Free and not adjacent to a reserved seat.
    pub available: bool,
}

/// Body of a hall creation request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewHall {
    pub id: String,
    pub rows: u32,
    pub cols: u32,
}

/// Read model of a hall.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HallSummary {
    pub id: String,
    pub rows: u32,
    pub cols: u32,
    pub capacity: usize,
    pub reserved: usize,
}

/// Persisted form of a hall: its dimensions and reserved seats.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HallRecord {
    pub rows: u32,
    pub cols: u32,
    #[serde(default)]
    pub reserved: Vec<Point>,
}
