// SPDX-License-Identifier: GPL-3.0-only

//! Activation hysteresis
//!
//! Raw per-tick cell decisions flap at cell boundaries. Two saturating
//! counters per grid position debounce them: a cell activates after
//! `activate_n` consecutive sightings and the active cell retires after
//! `deactivate_n` consecutive absences. Only transitions reach the
//! actuators.

use crate::grid::Cell;

/// Change of the stable active cell produced by one update
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// None -> Some
    Activated(Cell),
    /// Some -> None
    Deactivated(Cell),
    /// Some -> Some'; the outgoing cell's note-off precedes the incoming
    /// note-on
    Handover { from: Cell, to: Cell },
}

/// Per-tick raw cell -> stable active cell
#[derive(Debug)]
pub struct ActivationFilter {
    rows: usize,
    cols: usize,
    activate_n: u8,
    deactivate_n: u8,
    on_count: Vec<u8>,
    off_count: Vec<u8>,
    active: Option<Cell>,
}

impl ActivationFilter {
    pub fn new(rows: usize, cols: usize, activate_n: u8, deactivate_n: u8) -> Self {
        Self {
            rows,
            cols,
            activate_n: activate_n.max(1),
            deactivate_n: deactivate_n.max(1),
            on_count: vec![0; rows * cols],
            off_count: vec![0; rows * cols],
            active: None,
        }
    }

    pub fn active_cell(&self) -> Option<Cell> {
        self.active
    }

    /// Clear all counters and the active cell (no transition is emitted;
    /// callers handle the outgoing cell themselves)
    pub fn reset(&mut self) {
        self.on_count.fill(0);
        self.off_count.fill(0);
        self.active = None;
    }

    /// Resize for a new grid; all state resets
    pub fn reconfigure(&mut self, rows: usize, cols: usize, activate_n: u8, deactivate_n: u8) {
        self.rows = rows;
        self.cols = cols;
        self.activate_n = activate_n.max(1);
        self.deactivate_n = deactivate_n.max(1);
        self.on_count = vec![0; rows * cols];
        self.off_count = vec![0; rows * cols];
        self.active = None;
    }

    fn index(&self, cell: Cell) -> Option<usize> {
        (cell.row < self.rows && cell.col < self.cols).then(|| cell.row * self.cols + cell.col)
    }

    /// Advance one tick with the raw detection
    pub fn update(&mut self, raw: Option<Cell>) -> Option<Transition> {
        let raw_index = raw.and_then(|cell| self.index(cell));

        // Count: the raw cell accumulates on, every other cell accumulates off
        for i in 0..self.on_count.len() {
            if Some(i) == raw_index {
                self.on_count[i] = self.on_count[i].saturating_add(1);
                self.off_count[i] = 0;
            } else {
                self.off_count[i] = self.off_count[i].saturating_add(1);
                self.on_count[i] = 0;
            }
        }

        let previous = self.active;

        // Retire the active cell after enough consecutive absences
        if let Some(cell) = self.active {
            if let Some(i) = self.index(cell) {
                if self.off_count[i] >= self.deactivate_n {
                    self.active = None;
                }
            } else {
                // Grid shrank under us; drop the orphan
                self.active = None;
            }
        }

        // Promote the raw cell once the slot is free and its streak is long
        // enough; the counting loop just zeroed every other cell's streak,
        // so no other candidate can exist
        if self.active.is_none() {
            if let (Some(cell), Some(i)) = (raw, raw_index) {
                if self.on_count[i] >= self.activate_n {
                    self.active = Some(cell);
                }
            }
        }

        match (previous, self.active) {
            (None, Some(to)) => Some(Transition::Activated(to)),
            (Some(from), None) => Some(Transition::Deactivated(from)),
            (Some(from), Some(to)) if from != to => Some(Transition::Handover { from, to }),
            _ => None,
        }
    }

    /// Force the active cell directly, bypassing the counters (test-cell
    /// command). Counters reset so the forced cell retires after the normal
    /// `deactivate_n` absences.
    pub fn force(&mut self, cell: Option<Cell>) -> Option<Transition> {
        let previous = self.active;
        self.on_count.fill(0);
        self.off_count.fill(0);
        self.active = cell.filter(|c| self.index(*c).is_some());

        match (previous, self.active) {
            (None, Some(to)) => Some(Transition::Activated(to)),
            (Some(from), None) => Some(Transition::Deactivated(from)),
            (Some(from), Some(to)) if from != to => Some(Transition::Handover { from, to }),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filter() -> ActivationFilter {
        ActivationFilter::new(3, 3, 3, 6)
    }

    #[test]
    fn test_straight_activation_then_timeout_deactivation() {
        let mut f = filter();
        let cell = Cell::new(1, 1);

        // Ticks 1..2: below threshold
        assert_eq!(f.update(Some(cell)), None);
        assert_eq!(f.update(Some(cell)), None);
        // Tick 3: activation fires
        assert_eq!(f.update(Some(cell)), Some(Transition::Activated(cell)));
        assert_eq!(f.active_cell(), Some(cell));

        // Ticks 4..8: absences below threshold hold the cell
        for _ in 0..5 {
            assert_eq!(f.update(None), None);
            assert_eq!(f.active_cell(), Some(cell));
        }
        // Tick 9 (= 3 + 6): deactivation
        assert_eq!(f.update(None), Some(Transition::Deactivated(cell)));
        assert_eq!(f.active_cell(), None);
    }

    #[test]
    fn test_boundary_jitter_never_activates() {
        let mut f = filter();
        let a = Cell::new(1, 1);
        let b = Cell::new(1, 2);

        for raw in [a, b, a, b, a, b] {
            assert_eq!(f.update(Some(raw)), None);
        }
        assert_eq!(f.active_cell(), None);
    }

    #[test]
    fn test_handover_note_off_before_note_on() {
        let mut f = filter();
        let old = Cell::new(1, 1);
        let new = Cell::new(2, 1);

        for _ in 0..3 {
            f.update(Some(old));
        }
        assert_eq!(f.active_cell(), Some(old));

        // The person moves to the neighbouring cell
        let mut transitions = Vec::new();
        for tick in 0..6 {
            if let Some(t) = f.update(Some(new)) {
                transitions.push((tick, t));
            }
        }

        // Exactly one transition: a handover once the old cell's absence
        // counter saturates, well within the allowed gap
        assert_eq!(transitions.len(), 1);
        let (tick, transition) = transitions[0];
        assert_eq!(transition, Transition::Handover { from: old, to: new });
        // New cell hit its threshold at relative tick 2; the gap stays <= 3
        assert!(tick as i32 - 2 <= 3);
    }

    #[test]
    fn test_activation_needs_consecutive_hits() {
        let mut f = filter();
        let cell = Cell::new(0, 0);

        f.update(Some(cell));
        f.update(Some(cell));
        f.update(None); // streak broken
        f.update(Some(cell));
        assert_eq!(f.update(Some(cell)), None);
        // The third consecutive hit fires
        assert_eq!(f.update(Some(cell)), Some(Transition::Activated(cell)));
    }

    #[test]
    fn test_at_most_one_active_cell() {
        let mut f = filter();
        let a = Cell::new(0, 0);
        let b = Cell::new(2, 2);

        for _ in 0..3 {
            f.update(Some(a));
        }
        assert_eq!(f.active_cell(), Some(a));

        // b becomes dominant; there is never a moment with two active cells
        for _ in 0..12 {
            f.update(Some(b));
            assert!(f.active_cell() == Some(a) || f.active_cell() == Some(b));
        }
        assert_eq!(f.active_cell(), Some(b));
    }

    #[test]
    fn test_counters_saturate() {
        let mut f = filter();
        let cell = Cell::new(0, 0);
        // 300 absences must not wrap the u8 counters back below threshold
        for _ in 0..300 {
            f.update(None);
        }
        for _ in 0..2 {
            f.update(Some(cell));
        }
        assert_eq!(f.update(Some(cell)), Some(Transition::Activated(cell)));
    }

    #[test]
    fn test_force_and_natural_retirement() {
        let mut f = filter();
        let cell = Cell::new(2, 0);

        assert_eq!(f.force(Some(cell)), Some(Transition::Activated(cell)));
        assert_eq!(f.active_cell(), Some(cell));

        // The forced cell retires like any other
        for _ in 0..5 {
            assert_eq!(f.update(None), None);
        }
        assert_eq!(f.update(None), Some(Transition::Deactivated(cell)));
    }

    #[test]
    fn test_force_outside_grid_ignored() {
        let mut f = filter();
        assert_eq!(f.force(Some(Cell::new(9, 9))), None);
        assert_eq!(f.active_cell(), None);
    }

    #[test]
    fn test_threshold_one_activates_immediately() {
        let mut f = ActivationFilter::new(3, 3, 1, 6);
        let cell = Cell::new(2, 2);
        assert_eq!(f.update(Some(cell)), Some(Transition::Activated(cell)));
    }
}
