use std::collections::BTreeMap;

use serde::Serialize;

use crate::grid::GridShape;
use crate::matrix::{CellState, ParticipantAvailability};
use crate::model::ParticipantKey;

// ── Heatmap buckets ───────────────────────────────────────────────

/// Intensity of a cell from the share of participants available.
///
/// Each range is closed on its upper bound: exactly a quarter is `Low`,
/// exactly half is `Medium`, exactly three quarters is `High`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum HeatBucket {
    /// No participants at all.
    Empty,
    /// Participants exist, none available.
    None,
    Low,
    Medium,
    High,
    VeryHigh,
    /// Everyone available.
    Full,
}

impl HeatBucket {
    /// Integer comparisons only, so boundary ratios land exactly.
    pub fn classify(count: usize, total: usize) -> Self {
        if total == 0 {
            return HeatBucket::Empty;
        }
        debug_assert!(count <= total, "count {count} exceeds total {total}");
        if count == 0 {
            HeatBucket::None
        } else if count >= total {
            HeatBucket::Full
        } else if count * 4 <= total {
            HeatBucket::Low
        } else if count * 2 <= total {
            HeatBucket::Medium
        } else if count * 4 <= total * 3 {
            HeatBucket::High
        } else {
            HeatBucket::VeryHigh
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            HeatBucket::Empty => "empty",
            HeatBucket::None => "none",
            HeatBucket::Low => "low",
            HeatBucket::Medium => "medium",
            HeatBucket::High => "high",
            HeatBucket::VeryHigh => "very_high",
            HeatBucket::Full => "full",
        }
    }
}

// ── Aggregation ──────────────────────────────────────────────────

/// Who can and cannot make one cell.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CellSummary {
    pub available: Vec<ParticipantKey>,
    /// Explicit `false` and unset alike.
    pub unavailable: Vec<ParticipantKey>,
    /// The subset of `unavailable` that never marked this cell.
    pub unset: Vec<ParticipantKey>,
}

impl CellSummary {
    pub fn count(&self) -> usize {
        self.available.len()
    }
}

/// Group view over every cell of an event grid.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Aggregate {
    shape: GridShape,
    total: usize,
    cells: Vec<CellSummary>,
}

/// Count and partition participants per cell. Key lists come out in key order.
pub fn aggregate(
    participants: &BTreeMap<ParticipantKey, ParticipantAvailability>,
    rows: usize,
    cols: usize,
) -> Aggregate {
    let shape = GridShape::new(rows, cols);
    let mut cells = vec![CellSummary::default(); shape.cell_count()];

    for (key, availability) in participants {
        for (r, c) in shape.cells() {
            let cell = &mut cells[r * cols + c];
            match availability.state(r, c) {
                CellState::Available => cell.available.push(key.clone()),
                CellState::Unavailable => cell.unavailable.push(key.clone()),
                CellState::Unset => {
                    cell.unavailable.push(key.clone());
                    cell.unset.push(key.clone());
                }
            }
        }
    }

    Aggregate {
        shape,
        total: participants.len(),
        cells,
    }
}

impl Aggregate {
    pub fn shape(&self) -> GridShape {
        self.shape
    }

    /// Number of participants, available or not.
    pub fn total(&self) -> usize {
        self.total
    }

    /// Panics if `(row, col)` is outside the grid.
    pub fn cell(&self, row: usize, col: usize) -> &CellSummary {
        assert!(self.shape.contains(row, col), "cell ({row}, {col}) out of range");
        &self.cells[row * self.shape.cols + col]
    }

    pub fn count(&self, row: usize, col: usize) -> usize {
        self.cell(row, col).count()
    }

    /// `None` when there are no participants.
    pub fn ratio(&self, row: usize, col: usize) -> Option<f64> {
        (self.total > 0).then(|| self.count(row, col) as f64 / self.total as f64)
    }

    pub fn bucket(&self, row: usize, col: usize) -> HeatBucket {
        HeatBucket::classify(self.count(row, col), self.total)
    }

    /// The count matrix, `[row][col]`.
    pub fn counts(&self) -> Vec<Vec<usize>> {
        (0..self.shape.rows)
            .map(|r| (0..self.shape.cols).map(|c| self.count(r, c)).collect())
            .collect()
    }

    pub fn buckets(&self) -> Vec<Vec<HeatBucket>> {
        (0..self.shape.rows)
            .map(|r| (0..self.shape.cols).map(|c| self.bucket(r, c)).collect())
            .collect()
    }

    /// Cells sharing the highest non-zero count, row-major.
    pub fn best_cells(&self) -> Vec<(usize, usize)> {
        let best = self.cells.iter().map(CellSummary::count).max().unwrap_or(0);
        if best == 0 {
            return Vec::new();
        }
        self.shape
            .cells()
            .filter(|&(r, c)| self.count(r, c) == best)
            .collect()
    }
}
