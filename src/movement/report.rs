use serde::Serialize;

use crate::crisis::{Coords, CrisisId, DivisionId};

/// What a tick did to one routed division.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum StepStatus {
    /// Entered at least one cell and still has route left.
    Moving,
    /// Not enough budget banked for the next cell yet.
    Waiting,
    /// Reached the destination; the route is cleared.
    Arrived,
    /// Stopped short of an impassable cell; the route is cleared.
    Halted,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DivisionStep {
    pub division_id: DivisionId,
    pub crisis_id: CrisisId,
    pub from: Coords,
    pub to: Coords,
    pub remaining_steps: usize,
    pub status: StepStatus,
}

/// Outcome of one committed movement tick.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TickReport {
    pub tick: u64,
    pub steps: Vec<DivisionStep>,
    pub duration_ms: f32,
}

impl TickReport {
    fn count(&self, status: StepStatus) -> usize {
        self.steps.iter().filter(|s| s.status == status).count()
    }

    /// Divisions whose position changed this tick.
    pub fn moved(&self) -> usize {
        self.steps.iter().filter(|s| s.from != s.to).count()
    }

    pub fn arrived(&self) -> usize {
        self.count(StepStatus::Arrived)
    }

    pub fn halted(&self) -> usize {
        self.count(StepStatus::Halted)
    }

    /// Divisions still routed after this tick.
    pub fn still_routed(&self) -> usize {
        self.count(StepStatus::Moving) + self.count(StepStatus::Waiting)
    }
}
