//! Seatline core: cinema hall seat allocation and the wire shapes shared
//! between the server and its clients.

pub mod hall;
pub mod point;
pub mod types;

pub use hall::{CinemaHall, HallError, MAX_DIMENSION};
pub use point::Point;
pub use types::{HallRecord, HallSummary, NewHall, SeatRequest, SeatStatus, SeatView};

