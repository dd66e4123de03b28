//! Grid coordinates inside a cinema hall.

use serde::{Deserialize, Serialize};

/// A seat position: zero-based row and column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Point {
    pub row: u32,
    pub column: u32,
}

impl Point {
    #[must_use]
    pub const fn new(row: u32, column: u32) -> Self {
        Self { row, column }
    }

    /// Manhattan distance between two seats.
    #[must_use]
    pub fn distance_to(self, other: Point) -> u32 {
        self.row.abs_diff(other.row) + self.column.abs_diff(other.column)
    }

    /// Chebyshev distance: the larger of the row and column offsets.
    #[must_use]
    pub fn spread_to(self, other: Point) -> u32 {
        self.row
            .abs_diff(other.row)
            .max(self.column.abs_diff(other.column))
    }

    /// The four orthogonal neighbours that do not underflow.
    ///
    /// Callers clip the upper bound against their own grid size.
    pub fn neighbours(self) -> impl Iterator<Item = Point> {
        let up = self.row.checked_sub(1).map(|row| Point::new(row, self.column));
        let left = self.column.checked_sub(1).map(|column| Point::new(self.row, column));
        let down = self.row.checked_add(1).map(|row| Point::new(row, self.column));
        let right = self.column.checked_add(1).map(|column| Point::new(self.row, column));
        [up, down, left, right].into_iter().flatten()
    }
}

impl std::fmt::Display for Point {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}, {})", self.row, self.column)
    }
}
