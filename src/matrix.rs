//! Per-participant availability and its flat `r{row}_c{col}` storage form.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::document::{Fields, Value};
use crate::grid::GridShape;

/// Flat key-value form of a grid: `"r{row}_c{col}" -> bool`.
pub type FlatRecord = BTreeMap<String, bool>;

/// What a participant said about one cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CellState {
    Available,
    Unavailable,
    /// No entry: the participant has not marked this cell.
    Unset,
}

/// Dense boolean grid, rows are time slots and columns are days.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Grid {
    shape: GridShape,
    cells: Vec<bool>,
}

impl Grid {
    pub fn new(rows: usize, cols: usize) -> Self {
        Self {
            shape: GridShape::new(rows, cols),
            cells: vec![false; rows * cols],
        }
    }

    /// Build from row vectors. All rows must have the same length.
    pub fn from_rows(rows: Vec<Vec<bool>>) -> Self {
        let cols = rows.first().map_or(0, Vec::len);
        debug_assert!(rows.iter().all(|r| r.len() == cols), "ragged grid");
        Self {
            shape: GridShape::new(rows.len(), cols),
            cells: rows.into_iter().flatten().collect(),
        }
    }

    pub fn rows(&self) -> usize {
        self.shape.rows
    }

    pub fn cols(&self) -> usize {
        self.shape.cols
    }

    pub fn shape(&self) -> GridShape {
        self.shape
    }

    pub fn get(&self, row: usize, col: usize) -> bool {
        self.shape.contains(row, col) && self.cells[row * self.shape.cols + col]
    }

    /// Out-of-range writes are ignored.
    pub fn set(&mut self, row: usize, col: usize, value: bool) {
        if self.shape.contains(row, col) {
            self.cells[row * self.shape.cols + col] = value;
        }
    }
}

pub fn cell_key(row: usize, col: usize) -> String {
    format!("r{row}_c{col}")
}

/// Parse `r{row}_c{col}`. Anything else is `None`.
pub fn parse_cell_key(key: &str) -> Option<(usize, usize)> {
    let (row, col) = key.strip_prefix('r')?.split_once("_c")?;
    Some((parse_index(row)?, parse_index(col)?))
}

fn parse_index(s: &str) -> Option<usize> {
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    s.parse().ok()
}

/// Every cell of `grid`, explicit `true`/`false`.
pub fn to_flat_record(grid: &Grid) -> FlatRecord {
    grid.shape
        .cells()
        .map(|(r, c)| (cell_key(r, c), grid.get(r, c)))
        .collect()
}

/// Inverse of [`to_flat_record`]. Missing cells are `false`; keys outside
/// `rows x cols` or not in cell-key form are dropped.
pub fn from_flat_record(record: &FlatRecord, rows: usize, cols: usize) -> Grid {
    let mut grid = Grid::new(rows, cols);
    for (key, &value) in record {
        if let Some((r, c)) = parse_cell_key(key) {
            grid.set(r, c, value);
        }
    }
    grid
}

/// Sparse availability of one participant: `(row, col) -> bool`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParticipantAvailability {
    cells: BTreeMap<(usize, usize), bool>,
}

impl ParticipantAvailability {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode stored cells, discarding malformed keys and cells outside `shape`.
    pub fn from_cells<'a, I>(cells: I, shape: GridShape) -> Self
    where
        I: IntoIterator<Item = (&'a str, bool)>,
    {
        let mut out = Self::new();
        for (key, value) in cells {
            match parse_cell_key(key) {
                Some((r, c)) if shape.contains(r, c) => {
                    out.cells.insert((r, c), value);
                }
                _ => tracing::debug!("discarding stored cell {key}"),
            }
        }
        out
    }

    /// Decode the stored field map. Non-boolean values are discarded.
    pub fn from_fields(fields: &Fields, shape: GridShape) -> Self {
        Self::from_cells(
            fields
                .iter()
                .filter_map(|(k, v)| v.as_bool().map(|b| (k.as_str(), b))),
            shape,
        )
    }

    pub fn to_fields(&self) -> Fields {
        self.cells
            .iter()
            .map(|(&(r, c), &v)| (cell_key(r, c), Value::Bool(v)))
            .collect()
    }

    /// Dense view: every cell of `grid` set explicitly.
    pub fn from_grid(grid: &Grid) -> Self {
        Self {
            cells: grid
                .shape()
                .cells()
                .map(|(r, c)| ((r, c), grid.get(r, c)))
                .collect(),
        }
    }

    /// Dense view with unset cells as `false`.
    pub fn to_grid(&self, shape: GridShape) -> Grid {
        let mut grid = Grid::new(shape.rows, shape.cols);
        for (&(r, c), &v) in &self.cells {
            grid.set(r, c, v);
        }
        grid
    }

    pub fn get(&self, row: usize, col: usize) -> Option<bool> {
        self.cells.get(&(row, col)).copied()
    }

    pub fn state(&self, row: usize, col: usize) -> CellState {
        match self.get(row, col) {
            Some(true) => CellState::Available,
            Some(false) => CellState::Unavailable,
            None => CellState::Unset,
        }
    }

    /// Unset counts as not available.
    pub fn is_available(&self, row: usize, col: usize) -> bool {
        self.get(row, col).unwrap_or(false)
    }

    pub fn set(&mut self, row: usize, col: usize, value: bool) {
        self.cells.insert((row, col), value);
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn available_count(&self) -> usize {
        self.cells.values().filter(|v| **v).count()
    }

    pub fn iter(&self) -> impl Iterator<Item = ((usize, usize), bool)> + '_ {
        self.cells.iter().map(|(&k, &v)| (k, v))
    }
}
