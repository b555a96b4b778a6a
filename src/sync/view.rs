//! Local mirror of an event and the pure transitions applied to it.
//! Nothing here touches the store.

use std::collections::BTreeSet;

use crate::aggregate::Aggregate;
use crate::grid::{DayColumn, GridShape, TimeSlot, build_days, build_slots};
use crate::matrix::CellState;
use crate::model::{EventMetadata, EventState, ParticipantKey};

/// What a remote snapshot changed, by participant.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SnapshotDiff {
    pub joined: Vec<ParticipantKey>,
    pub left: Vec<ParticipantKey>,
    pub changed: Vec<ParticipantKey>,
}

impl SnapshotDiff {
    pub fn is_empty(&self) -> bool {
        self.joined.is_empty() && self.left.is_empty() && self.changed.is_empty()
    }
}

/// Event state plus everything derived from it for display.
#[derive(Debug, Clone)]
pub struct LocalView {
    state: EventState,
    slots: Vec<TimeSlot>,
    days: Vec<DayColumn>,
    aggregate: Aggregate,
}

impl LocalView {
    pub fn from_state(state: EventState) -> Self {
        let meta = &state.metadata;
        let slots = build_slots(meta.start_time(), meta.end_time());
        let days = build_days(meta.start_date(), meta.end_date());
        let aggregate = state.aggregate();
        Self {
            state,
            slots,
            days,
            aggregate,
        }
    }

    /// Replace the mirror with a remote snapshot. The snapshot is the whole
    /// truth: local echoes it does not contain are dropped.
    pub fn apply_snapshot(&mut self, state: EventState) -> SnapshotDiff {
        let old = &self.state.participants;
        let new = &state.participants;
        let diff = SnapshotDiff {
            joined: new.keys().filter(|k| !old.contains_key(*k)).cloned().collect(),
            left: old.keys().filter(|k| !new.contains_key(*k)).cloned().collect(),
            changed: new
                .iter()
                .filter(|(k, p)| old.get(*k).is_some_and(|o| o != *p))
                .map(|(k, _)| k.clone())
                .collect(),
        };

        if state.metadata != self.state.metadata {
            *self = Self::from_state(state);
        } else {
            self.state = state;
            self.aggregate = self.state.aggregate();
        }
        diff
    }

    /// Record a participant locally with no cells, keeping any it already has.
    pub fn apply_join(&mut self, key: &ParticipantKey) {
        if !self.state.participants.contains_key(key) {
            self.state.participants.insert(key.clone(), Default::default());
            self.aggregate = self.state.aggregate();
        }
    }

    /// Echo a successful cell write. Cells outside the grid are ignored.
    pub fn apply_local(&mut self, key: &ParticipantKey, row: usize, col: usize, value: bool) {
        if !self.shape().contains(row, col) {
            return;
        }
        self.state
            .participants
            .entry(key.clone())
            .or_default()
            .set(row, col, value);
        self.aggregate = self.state.aggregate();
    }

    /// Returns whether the participant was present.
    pub fn remove_local(&mut self, key: &ParticipantKey) -> bool {
        let removed = self.state.participants.remove(key).is_some();
        if removed {
            self.aggregate = self.state.aggregate();
        }
        removed
    }

    pub fn cell_state(&self, key: &ParticipantKey, row: usize, col: usize) -> CellState {
        self.state
            .participant(key)
            .map_or(CellState::Unset, |p| p.state(row, col))
    }

    pub fn state(&self) -> &EventState {
        &self.state
    }

    pub fn metadata(&self) -> &EventMetadata {
        &self.state.metadata
    }

    pub fn shape(&self) -> GridShape {
        GridShape::new(self.slots.len(), self.days.len())
    }

    pub fn slots(&self) -> &[TimeSlot] {
        &self.slots
    }

    pub fn days(&self) -> &[DayColumn] {
        &self.days
    }

    pub fn aggregate(&self) -> &Aggregate {
        &self.aggregate
    }

    pub fn participants(&self) -> impl Iterator<Item = &ParticipantKey> {
        self.state.participants.keys()
    }
}

/// Value a tap on `(row, col)` should write: available cells become
/// unavailable, anything else becomes available.
pub fn toggle_target(view: &LocalView, key: &ParticipantKey, row: usize, col: usize) -> bool {
    !matches!(view.cell_state(key, row, col), CellState::Available)
}

/// A press-and-drag run. The target value is fixed by the first cell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DragPaint {
    value: bool,
    seen: BTreeSet<(usize, usize)>,
    order: Vec<(usize, usize)>,
}

impl DragPaint {
    pub fn begin(view: &LocalView, key: &ParticipantKey, row: usize, col: usize) -> Self {
        Self {
            value: toggle_target(view, key, row, col),
            seen: BTreeSet::from([(row, col)]),
            order: vec![(row, col)],
        }
    }

    pub fn is_touched(&self, row: usize, col: usize) -> bool {
        self.seen.contains(&(row, col))
    }

    /// `Some` the first time a cell is touched, `None` on every revisit.
    pub fn touch(&mut self, row: usize, col: usize) -> Option<(usize, usize)> {
        if self.seen.insert((row, col)) {
            self.order.push((row, col));
            Some((row, col))
        } else {
            None
        }
    }

    pub fn value(&self) -> bool {
        self.value
    }

    /// Touched cells in touch order.
    pub fn cells(&self) -> &[(usize, usize)] {
        &self.order
    }
}
