//! Cinema hall seat allocation.
//!
//! A hall is a `rows x cols` grid of seats. Reservations keep one free seat
//! between any two reserved seats: a seat is only available when it and its
//! four orthogonal neighbours are all free. Allocation searches outward from
//! a preferred seat (the hall centre by default) in rings of increasing
//! Manhattan distance and, within a ring, prefers seats closest to the centre.

use crate::point::Point;
use crate::types::HallRecord;

/// Largest accepted value for either hall dimension.
pub const MAX_DIMENSION: u32 = 1000;

/// Errors raised when building a hall or addressing a seat in it.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HallError {
    #[error("hall dimensions must be between 1 and {max}, got {rows}x{cols}")]
    InvalidDimensions { rows: u32, cols: u32, max: u32 },
    #[error("seat {seat} is outside a {rows}x{cols} hall")]
    OutOfBounds { seat: Point, rows: u32, cols: u32 },
}

/// In-memory seat map of a single hall.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CinemaHall {
    rows: u32,
    cols: u32,
    reserved: Vec<bool>,
    reserved_count: usize,
}

impl CinemaHall {
    /// Creates an empty hall.
    ///
    /// # Errors
    ///
    /// Returns [`HallError::InvalidDimensions`] when either dimension is zero
    /// or larger than [`MAX_DIMENSION`].
    pub fn new(rows: u32, cols: u32) -> Result<Self, HallError> {
        if rows == 0 || cols == 0 || rows > MAX_DIMENSION || cols > MAX_DIMENSION {
            return Err(HallError::InvalidDimensions {
                rows,
                cols,
                max: MAX_DIMENSION,
            });
        }
        let capacity = rows as usize * cols as usize;
        Ok(Self {
            rows,
            cols,
            reserved: vec![false; capacity],
            reserved_count: 0,
        })
    }

    /// Creates a hall with the given seats already reserved.
    ///
    /// # Errors
    ///
    /// Fails on invalid dimensions or when a seat lies outside the hall.
    pub fn with_reserved(
        rows: u32,
        cols: u32,
        seats: impl IntoIterator<Item = Point>,
    ) -> Result<Self, HallError> {
        let mut hall = Self::new(rows, cols)?;
        for seat in seats {
            hall.reserve(seat)?;
        }
        Ok(hall)
    }

    /// Rebuilds a hall from its persisted record.
    ///
    /// # Errors
    ///
    /// Same as [`CinemaHall::with_reserved`].
    pub fn from_record(record: &HallRecord) -> Result<Self, HallError> {
        Self::with_reserved(record.rows, record.cols, record.reserved.iter().copied())
    }

    /// Snapshot suitable for persistence.
    #[must_use]
    pub fn to_record(&self) -> HallRecord {
        HallRecord {
            rows: self.rows,
            cols: self.cols,
            reserved: self.reserved_seats(),
        }
    }

    #[must_use]
    pub fn rows(&self) -> u32 {
        self.rows
    }

    #[must_use]
    pub fn cols(&self) -> u32 {
        self.cols
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.reserved.len()
    }

    #[must_use]
    pub fn reserved_count(&self) -> usize {
        self.reserved_count
    }

    /// The centre seat: `(rows / 2, cols / 2)`.
    #[must_use]
    pub fn center(&self) -> Point {
        Point::new(self.rows / 2, self.cols / 2)
    }

    #[must_use]
    pub fn contains(&self, seat: Point) -> bool {
        seat.row < self.rows && seat.column < self.cols
    }

    fn index(&self, seat: Point) -> usize {
        seat.row as usize * self.cols as usize + seat.column as usize
    }

    /// Whether the seat is reserved. Seats outside the hall are never reserved.
    #[must_use]
    pub fn is_reserved(&self, seat: Point) -> bool {
        self.contains(seat) && self.reserved[self.index(seat)]
    }

    /// Whether the seat is free and has no reserved orthogonal neighbour.
    #[must_use]
    pub fn is_available(&self, seat: Point) -> bool {
        self.contains(seat)
            && !self.is_reserved(seat)
            && seat.neighbours().all(|neighbour| !self.is_reserved(neighbour))
    }

    /// Marks a seat as reserved regardless of spacing.
    ///
    /// Returns `false` when the seat was already reserved.
    ///
    /// # Errors
    ///
    /// Returns [`HallError::OutOfBounds`] for seats outside the hall.
    pub fn reserve(&mut self, seat: Point) -> Result<bool, HallError> {
        if !self.contains(seat) {
            return Err(self.out_of_bounds(seat));
        }
        let index = self.index(seat);
        if self.reserved[index] {
            return Ok(false);
        }
        self.reserved[index] = true;
        self.reserved_count += 1;
        Ok(true)
    }

    /// All reserved seats in row-major order.
    #[must_use]
    pub fn reserved_seats(&self) -> Vec<Point> {
        (0..self.rows)
            .flat_map(|row| (0..self.cols).map(move |column| Point::new(row, column)))
            .filter(|seat| self.is_reserved(*seat))
            .collect()
    }

    /// Seats at exactly `distance` (Manhattan) from `origin`, clipped to the
    /// hall, in row-major order.
    #[must_use]
    pub fn all_at_distance(&self, origin: Point, distance: u32) -> Vec<Point> {
        let mut seats = Vec::new();
        let first_row = origin.row.saturating_sub(distance);
        let last_row = origin
            .row
            .saturating_add(distance)
            .min(self.rows.saturating_sub(1));

        for row in first_row..=last_row {
            let Some(rest) = distance.checked_sub(row.abs_diff(origin.row)) else {
                continue;
            };
            if let Some(column) = origin.column.checked_sub(rest) {
                if column < self.cols {
                    seats.push(Point::new(row, column));
                }
            }
            if rest != 0 {
                if let Some(column) = origin.column.checked_add(rest) {
                    if column < self.cols {
                        seats.push(Point::new(row, column));
                    }
                }
            }
        }
        seats
    }

    /// Reserves the available seat closest to the hall centre.
    pub fn next_available(&mut self) -> Option<Point> {
        let center = self.center();
        self.search_from(center)
    }

    /// Reserves the available seat closest to `preferred`.
    ///
    /// Seats in the same ring around `preferred` are ranked by distance to
    /// the centre, then by how balanced their row and column offsets from the
    /// centre are, then row-major. Returns `Ok(None)` when the hall is full.
    ///
    /// # Errors
    ///
    /// Returns [`HallError::OutOfBounds`] when `preferred` lies outside the hall.
    pub fn next_available_from(&mut self, preferred: Point) -> Result<Option<Point>, HallError> {
        if !self.contains(preferred) {
            return Err(self.out_of_bounds(preferred));
        }
        Ok(self.search_from(preferred))
    }

    fn search_from(&mut self, origin: Point) -> Option<Point> {
        let center = self.center();
        let max_distance = self.rows + self.cols - 2;

        for distance in 0..=max_distance {
            let mut ring = self.all_at_distance(origin, distance);
            ring.sort_by_key(|seat| {
                (
                    seat.distance_to(center),
                    seat.spread_to(center),
                    seat.row,
                    seat.column,
                )
            });
            if let Some(seat) = ring.into_iter().find(|seat| self.is_available(*seat)) {
                let index = self.index(seat);
                self.reserved[index] = true;
                self.reserved_count += 1;
                return Some(seat);
            }
        }
        None
    }

    fn out_of_bounds(&self, seat: Point) -> HallError {
        HallError::OutOfBounds {
            seat,
            rows: self.rows,
            cols: self.cols,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use proptest::prelude::*;

    use super::*;

    fn points(seats: &[(u32, u32)]) -> HashSet<Point> {
        seats.iter().map(|&(r, c)| Point::new(r, c)).collect()
    }

    #[test]
    fn center_of_even_square() {
        let hall = CinemaHall::new(2, 2).unwrap();
        assert_eq!(hall.center(), Point::new(1, 1));
    }

    #[test]
    fn center_of_uneven_square() {
        let hall = CinemaHall::new(3, 3).unwrap();
        assert_eq!(hall.center(), Point::new(1, 1));
    }

    #[test]
    fn center_of_rectangle() {
        let hall = CinemaHall::new(3, 4).unwrap();
        assert_eq!(hall.center(), Point::new(1, 2));
    }

    #[test]
    fn rejects_invalid_dimensions() {
        assert!(matches!(
            CinemaHall::new(0, 5),
            Err(HallError::InvalidDimensions { rows: 0, cols: 5, .. })
        ));
        assert!(CinemaHall::new(MAX_DIMENSION + 1, 1).is_err());
        assert!(CinemaHall::new(MAX_DIMENSION, MAX_DIMENSION).is_ok());
    }

    #[test]
    fn all_at_distance_one_from_center() {
        let hall = CinemaHall::new(4, 4).unwrap();
        let ring: HashSet<Point> = hall.all_at_distance(hall.center(), 1).into_iter().collect();
        assert_eq!(ring, points(&[(2, 1), (1, 2), (2, 3), (3, 2)]));
    }

    #[test]
    fn all_at_distance_clips_to_hall() {
        let hall = CinemaHall::new(4, 4).unwrap();
        let ring: HashSet<Point> = hall.all_at_distance(hall.center(), 2).into_iter().collect();
        assert_eq!(
            ring,
            points(&[(0, 2), (1, 1), (1, 3), (2, 0), (3, 1), (3, 3)])
        );
    }

    #[test]
    fn all_at_distance_beyond_hall_is_empty() {
        let hall = CinemaHall::new(4, 4).unwrap();
        assert!(hall.all_at_distance(hall.center(), 5).is_empty());
    }

    #[test]
    fn next_available_takes_free_center() {
        let mut hall = CinemaHall::new(4, 4).unwrap();
        assert_eq!(hall.next_available(), Some(hall.center()));
        assert!(hall.is_reserved(hall.center()));
        assert_eq!(hall.reserved_count(), 1);
    }

    #[test]
    fn next_available_keeps_spacing_around_reserved_center() {
        let mut hall = CinemaHall::new(4, 4).unwrap();
        let center = hall.center();
        hall.reserve(center).unwrap();

        let taken = hall.next_available().unwrap();
        assert_eq!(taken.distance_to(center), 2);
        assert_eq!(taken, Point::new(1, 1));
    }

    #[test]
    fn next_available_widens_search_when_ring_is_blocked() {
        let mut hall = CinemaHall::new(2, 2).unwrap();
        let center = hall.center();
        hall.reserve(center).unwrap();

        assert_eq!(hall.next_available(), Some(Point::new(0, 0)));
    }

    #[test]
    fn next_available_returns_none_when_nothing_fits() {
        let mut hall = CinemaHall::new(2, 2).unwrap();
        let center = hall.center();
        hall.reserve(center).unwrap();
        hall.reserve(Point::new(0, 0)).unwrap();

        assert_eq!(hall.next_available(), None);
        assert_eq!(hall.reserved_count(), 2);
    }

    #[test]
    fn preferred_seat_is_taken_when_free() {
        let mut hall = CinemaHall::new(4, 4).unwrap();
        assert_eq!(
            hall.next_available_from(Point::new(0, 0)).unwrap(),
            Some(Point::new(0, 0))
        );
    }

    #[test]
    fn preferred_seat_falls_back_towards_center() {
        let mut hall = CinemaHall::new(4, 4).unwrap();
        hall.reserve(Point::new(0, 0)).unwrap();

        assert_eq!(
            hall.next_available_from(Point::new(0, 0)).unwrap(),
            Some(Point::new(1, 1))
        );
    }

    #[test]
    fn preferred_seat_outside_hall_is_rejected() {
        let mut hall = CinemaHall::new(4, 4).unwrap();
        let err = hall.next_available_from(Point::new(4, 0)).unwrap_err();
        assert_eq!(
            err,
            HallError::OutOfBounds {
                seat: Point::new(4, 0),
                rows: 4,
                cols: 4
            }
        );
    }

    #[test]
    fn bigger_hall_finds_seat_outside_reserved_block() {
        let mut hall = CinemaHall::new(300, 200).unwrap();
        for row in 20..=280 {
            for column in 20..=180 {
                hall.reserve(Point::new(row, column)).unwrap();
            }
        }

        let taken = hall.next_available_from(Point::new(190, 100)).unwrap().unwrap();
        assert!(hall.is_reserved(taken));
        // Everything within one seat of the block is blocked by spacing.
        let near_block = (19..=281).contains(&taken.row) && (19..=181).contains(&taken.column);
        assert!(!near_block, "seat {taken} violates spacing");
    }

    #[test]
    fn record_round_trip_preserves_reservations() {
        let hall = CinemaHall::with_reserved(5, 6, [Point::new(0, 0), Point::new(4, 5)]).unwrap();
        let restored = CinemaHall::from_record(&hall.to_record()).unwrap();
        assert_eq!(restored, hall);
        assert_eq!(restored.reserved_seats(), vec![Point::new(0, 0), Point::new(4, 5)]);
    }

    #[test]
    fn reserve_twice_reports_already_reserved() {
        let mut hall = CinemaHall::new(3, 3).unwrap();
        assert!(hall.reserve(Point::new(1, 1)).unwrap());
        assert!(!hall.reserve(Point::new(1, 1)).unwrap());
        assert_eq!(hall.reserved_count(), 1);
    }

    proptest! {
        #[test]
        fn allocations_never_sit_next_to_each_other(rows in 1u32..12, cols in 1u32..12, takes in 0usize..40) {
            let mut hall = CinemaHall::new(rows, cols).unwrap();
            for _ in 0..takes {
                if hall.next_available().is_none() {
                    break;
                }
            }
            for seat in hall.reserved_seats() {
                for neighbour in seat.neighbours() {
                    prop_assert!(!hall.is_reserved(neighbour));
                }
            }
        }
    }
}
