use serde::{Deserialize, Serialize};

use crate::crisis::{
    Coords, Crisis, CrisisId, Division, DivisionId, FactionId, RouteState, Unit, UnitType,
};
use crate::movement::{DivisionStep, PlanOutcome, RejectionKind, StepStatus, TickReport};
use crate::store::StoreError;

/// A request sent by a client over the WebSocket, tagged by `op`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum ClientRequest {
    /// Full state of one crisis.
    Crisis { crisis_id: CrisisId },
    /// Plan a route for a division through the given destinations.
    DivisionRoute {
        division_id: DivisionId,
        route: Vec<Coords>,
    },
}

/// Why a request could not be served.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    InvalidInput,
    Infeasible,
    NotFound,
    StorageUnavailable,
}

impl From<RejectionKind> for FailureKind {
    fn from(kind: RejectionKind) -> Self {
        match kind {
            RejectionKind::InvalidInput => FailureKind::InvalidInput,
            RejectionKind::Infeasible => FailureKind::Infeasible,
        }
    }
}

impl From<&StoreError> for FailureKind {
    fn from(e: &StoreError) -> Self {
        match e {
            StoreError::Unavailable(_) => FailureKind::StorageUnavailable,
            StoreError::CrisisNotFound(_) | StoreError::DivisionNotFound(_) => {
                FailureKind::NotFound
            }
        }
    }
}

/// A division as shown to clients.
#[derive(Debug, Clone, Serialize)]
pub struct DivisionView {
    pub id: DivisionId,
    pub crisis_id: CrisisId,
    pub faction_id: FactionId,
    pub name: String,
    pub coords: Coords,
    pub units: Vec<Unit>,
    pub state: RouteState,
    /// Cells still ahead, excluding the current position.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub route: Option<Vec<Coords>>,
}

impl DivisionView {
    pub fn from_division(div: &Division) -> Self {
        DivisionView {
            id: div.id,
            crisis_id: div.crisis_id,
            faction_id: div.faction_id,
            name: div.name.clone(),
            coords: div.coords,
            units: div.units.clone(),
            state: div.route_state(),
            route: div.route.as_ref().map(|r| r.cells()[1..].to_vec()),
        }
    }
}

/// Reply to `{"op":"crisis"}`.
#[derive(Debug, Clone, Serialize)]
pub struct CrisisView {
    pub message_type: &'static str,
    pub crisis_id: CrisisId,
    pub name: String,
    pub active: bool,
    pub width: u32,
    pub height: u32,
    /// Entry costs, one row per y. Negative cells are impassable.
    pub costs: Vec<Vec<i32>>,
    pub factions: Vec<FactionView>,
    pub unit_types: Vec<UnitType>,
    pub divisions: Vec<DivisionView>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FactionView {
    pub id: FactionId,
    pub name: String,
}

impl CrisisView {
    pub fn from_crisis(crisis: &Crisis, divisions: &[Division]) -> Self {
        let bounds = crisis.bounds();
        CrisisView {
            message_type: "CrisisView",
            crisis_id: crisis.id,
            name: crisis.name.clone(),
            active: crisis.active,
            width: bounds.width,
            height: bounds.height,
            costs: crisis.costs.rows(),
            factions: crisis
                .factions
                .iter()
                .map(|f| FactionView {
                    id: f.id,
                    name: f.name.clone(),
                })
                .collect(),
            unit_types: crisis.unit_types.clone(),
            divisions: divisions.iter().map(DivisionView::from_division).collect(),
        }
    }
}

/// Reply to `{"op":"division_route"}`.
#[derive(Debug, Clone, Serialize)]
pub struct RouteResult {
    pub message_type: &'static str,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<FailureKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cost: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub division: Option<DivisionView>,
}

impl RouteResult {
    pub fn from_outcome(outcome: &PlanOutcome) -> Self {
        RouteResult {
            message_type: "RouteResult",
            success: outcome.accepted,
            reason: outcome.rejection.as_ref().map(|e| e.to_string()),
            kind: outcome.rejection.as_ref().map(|e| e.kind().into()),
            cost: outcome.cost,
            division: Some(DivisionView::from_division(&outcome.division)),
        }
    }

    pub fn from_store_error(e: &StoreError) -> Self {
        RouteResult {
            message_type: "RouteResult",
            success: false,
            reason: Some(e.to_string()),
            kind: Some(e.into()),
            cost: None,
            division: None,
        }
    }
}

/// Reply to a request that could not be parsed or served.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorMessage {
    pub message_type: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<FailureKind>,
    pub message: String,
}

impl ErrorMessage {
    pub fn new(kind: Option<FailureKind>, message: impl Into<String>) -> Self {
        ErrorMessage {
            message_type: "Error",
            kind,
            message: message.into(),
        }
    }
}

/// Per-division change included in a tick diff.
#[derive(Debug, Clone, Serialize)]
pub struct DivisionChange {
    pub id: DivisionId,
    pub crisis_id: CrisisId,
    pub from: Coords,
    pub to: Coords,
    pub remaining_steps: usize,
    pub status: StepStatus,
}

impl DivisionChange {
    fn from_step(step: &DivisionStep) -> Self {
        DivisionChange {
            id: step.division_id,
            crisis_id: step.crisis_id,
            from: step.from,
            to: step.to,
            remaining_steps: step.remaining_steps,
            status: step.status,
        }
    }
}

/// Pushed to every client after each committed tick.
#[derive(Debug, Clone, Serialize)]
pub struct TickDiff {
    pub message_type: &'static str,
    pub tick: u64,
    pub changed_divisions: Vec<DivisionChange>,
    pub arrived: usize,
    pub halted: usize,
    pub tick_duration_ms: f32,
}

impl TickDiff {
    /// Only divisions that moved or whose route ended are included; a
    /// division still saving up budget has nothing new to show.
    pub fn from_report(report: &TickReport) -> Self {
        TickDiff {
            message_type: "TickDiff",
            tick: report.tick,
            changed_divisions: report
                .steps
                .iter()
                .filter(|s| {
                    s.from != s.to || matches!(s.status, StepStatus::Arrived | StepStatus::Halted)
                })
                .map(DivisionChange::from_step)
                .collect(),
            arrived: report.arrived(),
            halted: report.halted(),
            tick_duration_ms: report.duration_ms,
        }
    }
}

/// Health endpoint response.
#[derive(Debug, Clone, Serialize)]
pub struct HealthStatus {
    pub tick: u64,
    pub failed_ticks: u64,
    pub routed_divisions: usize,
    pub last_tick_ms: f32,
    pub last_snapshot_tick: u64,
}
