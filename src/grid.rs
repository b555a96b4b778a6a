use chrono::{Duration, NaiveDate, NaiveTime};
use serde::Serialize;

use crate::model::EventMetadata;

/// Fixed slot granularity.
pub const SLOT_MINUTES: i64 = 15;

/// One row of the grid. `index` is the canonical identity; `label` is display only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TimeSlot {
    pub index: usize,
    pub time: NaiveTime,
    pub label: String,
}

/// One column of the grid.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DayColumn {
    pub index: usize,
    pub date: NaiveDate,
    pub iso_date: String,
    pub display_label: String,
    pub weekday_label: String,
}

/// Grid dimensions: `rows` time slots by `cols` days.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct GridShape {
    pub rows: usize,
    pub cols: usize,
}

impl GridShape {
    pub fn new(rows: usize, cols: usize) -> Self {
        Self { rows, cols }
    }

    pub fn of(metadata: &EventMetadata) -> Self {
        Self {
            rows: slot_count(metadata.start_time(), metadata.end_time()),
            cols: day_count(metadata.start_date(), metadata.end_date()),
        }
    }

    pub fn contains(&self, row: usize, col: usize) -> bool {
        row < self.rows && col < self.cols
    }

    pub fn cell_count(&self) -> usize {
        self.rows * self.cols
    }

    /// All cells in row-major order.
    pub fn cells(&self) -> impl Iterator<Item = (usize, usize)> + use<> {
        let cols = self.cols;
        (0..self.rows).flat_map(move |r| (0..cols).map(move |c| (r, c)))
    }
}

/// Number of slots in the closed window `[start, end]`. Zero when `start > end`.
pub fn slot_count(start: NaiveTime, end: NaiveTime) -> usize {
    if start > end {
        return 0;
    }
    ((end - start).num_minutes() / SLOT_MINUTES) as usize + 1
}

/// Number of days in the closed range `[start, end]`. Zero when `start > end`.
pub fn day_count(start: NaiveDate, end: NaiveDate) -> usize {
    if start > end {
        return 0;
    }
    ((end - start).num_days() + 1) as usize
}

/// Slots from `start` to `end` inclusive, 15 minutes apart. The last slot is
/// the largest one not after `end`.
///
/// Callers validate `start <= end` first; an inverted window yields no slots.
pub fn build_slots(start: NaiveTime, end: NaiveTime) -> Vec<TimeSlot> {
    debug_assert!(start <= end, "slot window start {start} after end {end}");
    (0..slot_count(start, end))
        .map(|index| {
            let time = start + Duration::minutes(SLOT_MINUTES * index as i64);
            TimeSlot {
                index,
                time,
                label: time.format("%H:%M").to_string(),
            }
        })
        .collect()
}

/// One column per calendar date from `start` to `end` inclusive.
///
/// Callers validate `start <= end` first; an inverted range yields no days.
pub fn build_days(start: NaiveDate, end: NaiveDate) -> Vec<DayColumn> {
    debug_assert!(start <= end, "day window start {start} after end {end}");
    start
        .iter_days()
        .take(day_count(start, end))
        .enumerate()
        .map(|(index, date)| DayColumn {
            index,
            date,
            iso_date: date.format("%Y-%m-%d").to_string(),
            display_label: date.format("%b %-d").to_string(),
            weekday_label: date.format("%a").to_string(),
        })
        .collect()
}
