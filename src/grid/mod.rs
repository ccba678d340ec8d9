// SPDX-License-Identifier: GPL-3.0-only

//! Room geometry and the floor grid
//!
//! The room is a `width_m` x `depth_m` rectangle with the origin at the
//! camera-side corner; x runs along the width, y into the depth. The grid
//! subdivides it into `rows` x `cols` cells of roughly 1 m x 1 m each —
//! validation keeps the grid from ever outgrowing the room.

pub mod registry;

pub use registry::{CellBounds, CellConfig, CellRegistry, DmxFixture};

use serde::{Deserialize, Serialize};
use std::fmt;

/// One square of the floor grid, addressed by (row, col)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Cell {
    pub row: usize,
    pub col: usize,
}

impl Cell {
    pub fn new(row: usize, col: usize) -> Self {
        Self { row, col }
    }

    /// Document key, matching the configuration store ("r,c")
    pub fn key(&self) -> String {
        format!("{},{}", self.row, self.col)
    }

    /// Parse a document key back into a cell
    pub fn from_key(key: &str) -> Option<Self> {
        let (r, c) = key.split_once(',')?;
        Some(Self {
            row: r.trim().parse().ok()?,
            col: c.trim().parse().ok()?,
        })
    }
}

impl fmt::Display for Cell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({},{})", self.row, self.col)
    }
}

/// A localized position on the floor, in room metres
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Position {
    pub x: f32,
    pub y: f32,
}

impl Position {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }
}

/// Room dimensions plus grid subdivision
///
/// Only values that came through [`validate_room_and_matrix`] are valid here;
/// [`GridModel::new`] re-checks and refuses anything else.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RoomConfig {
    pub width_m: f32,
    pub depth_m: f32,
    pub rows: usize,
    pub cols: usize,
}

impl Default for RoomConfig {
    fn default() -> Self {
        Self {
            width_m: crate::constants::DEFAULT_ROOM_WIDTH_M,
            depth_m: crate::constants::DEFAULT_ROOM_DEPTH_M,
            rows: crate::constants::DEFAULT_ROWS,
            cols: crate::constants::DEFAULT_COLS,
        }
    }
}

impl RoomConfig {
    /// Width of one cell in metres
    pub fn cell_width(&self) -> f32 {
        self.width_m / self.cols as f32
    }

    /// Depth of one cell in metres
    pub fn cell_depth(&self) -> f32 {
        self.depth_m / self.rows as f32
    }

    /// True when the grid cannot outgrow the room and nothing is degenerate
    pub fn is_valid(&self) -> bool {
        self.width_m >= 1.0
            && self.depth_m >= 1.0
            && self.rows >= 1
            && self.cols >= 1
            && self.cols <= self.width_m as usize
            && self.rows <= self.depth_m as usize
    }
}

/// Outcome of room/grid validation
#[derive(Debug, Clone, PartialEq)]
pub struct Validated {
    pub width_m: f32,
    pub depth_m: f32,
    pub cols: usize,
    pub rows: usize,
    /// Short human-readable correction message; empty when nothing changed
    pub message: String,
}

impl Validated {
    pub fn room(&self) -> RoomConfig {
        RoomConfig {
            width_m: self.width_m,
            depth_m: self.depth_m,
            rows: self.rows,
            cols: self.cols,
        }
    }
}

/// Validate requested room dimensions against a requested grid.
///
/// Rules:
/// - width and depth are clamped up to 1.0 m
/// - `cols_max = floor(width)`, `rows_max = floor(depth)`; any excess is
///   clamped and the message names the corrected axis
/// - zero rows/cols are brought up to 1
///
/// Idempotent: feeding the corrected tuple back in changes nothing and yields
/// an empty message.
pub fn validate_room_and_matrix(
    width_m: f32,
    depth_m: f32,
    cols_req: usize,
    rows_req: usize,
) -> Validated {
    let mut message = String::new();
    let mut width_m = if width_m.is_finite() { width_m } else { 1.0 };
    let mut depth_m = if depth_m.is_finite() { depth_m } else { 1.0 };

    if width_m < 1.0 {
        width_m = 1.0;
        message.push_str("Width too small. Reset to 1.0.");
    }
    if depth_m < 1.0 {
        depth_m = 1.0;
        if !message.is_empty() {
            message.push(' ');
        }
        message.push_str("Depth too small. Reset to 1.0.");
    }

    let cols_max = width_m.floor() as usize;
    let rows_max = depth_m.floor() as usize;

    let mut cols = cols_req.max(1);
    let mut rows = rows_req.max(1);

    if cols > cols_max {
        cols = cols_max;
        message = format!(
            "Width overflow ({}). Value clamped to {}.",
            cols_req, cols_max
        );
    }

    if rows > rows_max {
        rows = rows_max;
        let rows_msg = format!("Room is {:.1} m deep. Value clamped to {}.", depth_m, rows_max);
        if message.is_empty() {
            message = rows_msg;
        } else {
            message.push(' ');
            message.push_str(&rows_msg);
        }
    }

    Validated {
        width_m,
        depth_m,
        cols,
        rows,
        message,
    }
}

/// Maps room positions to grid cells
#[derive(Debug, Clone)]
pub struct GridModel {
    room: RoomConfig,
}

impl GridModel {
    /// Build a grid model; refuses geometry that did not pass validation
    pub fn new(room: RoomConfig) -> Result<Self, crate::errors::ConfigError> {
        if !room.is_valid() {
            return Err(crate::errors::ConfigError::Invalid(format!(
                "grid {}x{} does not fit a {:.1}x{:.1} m room",
                room.rows, room.cols, room.width_m, room.depth_m
            )));
        }
        Ok(Self { room })
    }

    pub fn room(&self) -> &RoomConfig {
        &self.room
    }

    /// Map a position to its cell; None outside [0, width) x [0, depth)
    ///
    /// Bounds are half-open: standing at exactly `width_m` is outside the
    /// room, not in the last column.
    pub fn position_to_cell(&self, pos: Position) -> Option<Cell> {
        if !pos.is_finite() {
            return None;
        }
        if pos.x < 0.0 || pos.x >= self.room.width_m || pos.y < 0.0 || pos.y >= self.room.depth_m
        {
            return None;
        }

        let col = (pos.x / self.room.cell_width()) as usize;
        let row = (pos.y / self.room.cell_depth()) as usize;

        Some(Cell {
            row: row.min(self.room.rows - 1),
            col: col.min(self.room.cols - 1),
        })
    }

    /// World-space center of a cell
    pub fn cell_center(&self, cell: Cell) -> Position {
        Position {
            x: (cell.col as f32 + 0.5) * self.room.cell_width(),
            y: (cell.row as f32 + 0.5) * self.room.cell_depth(),
        }
    }

    /// Stereo pan for a cell: 0.0 at the left wall, 1.0 at the right
    pub fn pan_for(&self, cell: Cell) -> f32 {
        if self.room.cols <= 1 {
            return 0.5;
        }
        (cell.col as f32 + 0.5) / self.room.cols as f32
    }

    /// World-space origin corner of a cell (its low-x, low-y corner)
    pub fn cell_corner(&self, cell: Cell) -> Position {
        Position {
            x: cell.col as f32 * self.room.cell_width(),
            y: cell.row as f32 * self.room.cell_depth(),
        }
    }

    /// Midway spot between two cells' origin corners, used as the
    /// calibration target
    pub fn midpoint_between(&self, a: Cell, b: Cell) -> Position {
        let ca = self.cell_corner(a);
        let cb = self.cell_corner(b);
        Position {
            x: (ca.x + cb.x) / 2.0,
            y: (ca.y + cb.y) / 2.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grid(w: f32, d: f32, rows: usize, cols: usize) -> GridModel {
        GridModel::new(RoomConfig {
            width_m: w,
            depth_m: d,
            rows,
            cols,
        })
        .unwrap()
    }

    #[test]
    fn test_position_to_cell_basic() {
        let g = grid(3.0, 4.0, 4, 3);
        assert_eq!(
            g.position_to_cell(Position::new(0.5, 0.5)),
            Some(Cell::new(0, 0))
        );
        assert_eq!(
            g.position_to_cell(Position::new(2.9, 3.9)),
            Some(Cell::new(3, 2))
        );
    }

    #[test]
    fn test_position_to_cell_half_open_bounds() {
        let g = grid(3.0, 4.0, 4, 3);
        // Exactly on the far walls is outside
        assert_eq!(g.position_to_cell(Position::new(3.0, 1.0)), None);
        assert_eq!(g.position_to_cell(Position::new(1.0, 4.0)), None);
        // The origin corner is inside
        assert_eq!(
            g.position_to_cell(Position::new(0.0, 0.0)),
            Some(Cell::new(0, 0))
        );
        assert_eq!(g.position_to_cell(Position::new(-0.01, 1.0)), None);
    }

    #[test]
    fn test_position_to_cell_non_finite() {
        let g = grid(3.0, 4.0, 4, 3);
        assert_eq!(g.position_to_cell(Position::new(f32::NAN, 1.0)), None);
        assert_eq!(g.position_to_cell(Position::new(1.0, f32::INFINITY)), None);
    }

    #[test]
    fn test_validation_clamps_width_overflow() {
        let v = validate_room_and_matrix(2.5, 3.0, 4, 2);
        assert_eq!(v.width_m, 2.5);
        assert_eq!(v.depth_m, 3.0);
        assert_eq!(v.cols, 2);
        assert_eq!(v.rows, 2);
        assert!(v.message.contains("Width overflow"));
    }

    #[test]
    fn test_validation_idempotent() {
        let first = validate_room_and_matrix(2.5, 3.0, 4, 7);
        let second =
            validate_room_and_matrix(first.width_m, first.depth_m, first.cols, first.rows);
        assert_eq!(second.width_m, first.width_m);
        assert_eq!(second.depth_m, first.depth_m);
        assert_eq!(second.cols, first.cols);
        assert_eq!(second.rows, first.rows);
        assert!(second.message.is_empty());
    }

    #[test]
    fn test_validation_tiny_room() {
        let v = validate_room_and_matrix(0.4, 0.2, 3, 3);
        assert_eq!(v.width_m, 1.0);
        assert_eq!(v.depth_m, 1.0);
        assert_eq!(v.cols, 1);
        assert_eq!(v.rows, 1);
        assert!(!v.message.is_empty());
    }

    #[test]
    fn test_validation_zero_grid() {
        let v = validate_room_and_matrix(4.0, 4.0, 0, 0);
        assert_eq!(v.cols, 1);
        assert_eq!(v.rows, 1);
    }

    #[test]
    fn test_grid_model_rejects_invalid() {
        assert!(
            GridModel::new(RoomConfig {
                width_m: 2.0,
                depth_m: 2.0,
                rows: 5,
                cols: 2,
            })
            .is_err()
        );
    }

    #[test]
    fn test_pan_spans_columns() {
        let g = grid(6.0, 6.0, 6, 6);
        assert!(g.pan_for(Cell::new(0, 0)) < 0.2);
        assert!(g.pan_for(Cell::new(0, 5)) > 0.8);
        let one_col = grid(1.0, 6.0, 6, 1);
        assert_eq!(one_col.pan_for(Cell::new(3, 0)), 0.5);
    }

    #[test]
    fn test_cell_key_round_trip() {
        let cell = Cell::new(2, 5);
        assert_eq!(Cell::from_key(&cell.key()), Some(cell));
        assert_eq!(Cell::from_key("garbage"), None);
    }

    #[test]
    fn test_midpoint_between_adjacent_cells() {
        let g = grid(6.0, 6.0, 6, 6);
        let mid = g.midpoint_between(Cell::new(1, 1), Cell::new(1, 2));
        assert!((mid.x - 1.5).abs() < 1e-6);
        assert!((mid.y - 1.0).abs() < 1e-6);
    }
}
