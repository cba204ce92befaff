pub mod planner;
pub mod report;
pub mod scheduler;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::crisis::{Coords, CostGrid, Division, DivisionId, Route};
use crate::store::{Store, StoreError};
pub use planner::{compute_full_path, FullPath, Neighborhood, PlanError, RejectionKind};
pub use report::{DivisionStep, StepStatus, TickReport};
pub use scheduler::{MovementScheduler, SchedulerHandle, TickEvent};

/// How a tick's movement allowance is measured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BudgetMode {
    /// Enter a fixed number of cells per tick regardless of terrain.
    #[default]
    Cells,
    /// Earn a fixed number of cost points per tick and spend them on the
    /// entry cost of the cells ahead. Unspent points carry over, so a tick
    /// may leave a division in place while it saves up for a costly cell.
    Cost,
}

/// What a tick does when a cell on a route has become impassable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockedRoutePolicy {
    /// Keep moving up to the last passable cell before the block, then drop
    /// the rest of the route.
    #[default]
    StopAtBlock,
    /// Do not move at all once any remaining cell is blocked; drop the route.
    Halt,
}

/// Fixed movement rules shared by planning and every tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MovementRules {
    pub budget_mode: BudgetMode,
    pub budget: u32,
    pub blocked_policy: BlockedRoutePolicy,
    pub neighborhood: Neighborhood,
}

impl Default for MovementRules {
    fn default() -> Self {
        MovementRules {
            budget_mode: BudgetMode::Cells,
            budget: 1,
            blocked_policy: BlockedRoutePolicy::StopAtBlock,
            neighborhood: Neighborhood::Four,
        }
    }
}

/// Result of asking for a new route.
#[derive(Debug, Clone, PartialEq)]
pub struct PlanOutcome {
    /// Division state after the request: the new route when accepted, the
    /// untouched prior state when rejected.
    pub division: Division,
    pub accepted: bool,
    pub rejection: Option<PlanError>,
    pub cost: Option<u64>,
}

/// Plan a route for a division from where it stands through `destinations`,
/// and store it in place of any route it already had.
///
/// Invalid input and infeasible routes come back as a rejected outcome and
/// leave the division unchanged. Only storage problems are errors.
pub fn plan_route<S: Store>(
    store: &S,
    division_id: DivisionId,
    destinations: &[Coords],
    hood: Neighborhood,
) -> Result<PlanOutcome, StoreError> {
    store.run_in_transaction(|tx| {
        let mut division = tx.read_division(division_id)?;
        let grid = tx.read_cost_grid(division.crisis_id)?;

        let mut waypoints = Vec::with_capacity(destinations.len() + 1);
        waypoints.push(division.coords);
        waypoints.extend_from_slice(destinations);

        match compute_full_path(&waypoints, &grid, hood) {
            Ok(path) => {
                let route = Route::new(path.cells);
                tx.persist_division_route(division_id, route.clone())?;
                info!(
                    division = division_id,
                    crisis = division.crisis_id,
                    steps = route.as_ref().map(|r| r.remaining_steps()).unwrap_or(0),
                    cost = path.cost,
                    "Route planned"
                );
                division.route = route;
                Ok(PlanOutcome {
                    division,
                    accepted: true,
                    rejection: None,
                    cost: Some(path.cost),
                })
            }
            Err(e) => {
                info!(division = division_id, reason = %e, "Route rejected");
                Ok(PlanOutcome {
                    division,
                    accepted: false,
                    rejection: Some(e),
                    cost: None,
                })
            }
        }
    })
}

/// Where one tick leaves a routed division.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Advance {
    pub to: Coords,
    pub remaining: Option<Route>,
    pub status: StepStatus,
}

/// Spend one tick's budget along `route` under a fresh `grid`.
///
/// Cells are consumed from the front of the route. A cell that is no longer
/// passable is never entered; the blocked-route policy decides how far the
/// division gets before its route is dropped.
pub fn advance_route(route: &Route, grid: &CostGrid, rules: &MovementRules) -> Advance {
    let cells = route.cells();
    let last = cells.len() - 1;

    if rules.blocked_policy == BlockedRoutePolicy::Halt
        && cells[1..].iter().any(|c| !grid.is_passable(*c))
    {
        return Advance {
            to: cells[0],
            remaining: None,
            status: StepStatus::Halted,
        };
    }

    let mut at = 0usize;
    let mut blocked = false;
    let mut bank = match rules.budget_mode {
        BudgetMode::Cells => 0,
        BudgetMode::Cost => route.progress().saturating_add(rules.budget),
    };

    while at < last {
        if rules.budget_mode == BudgetMode::Cells && at as u32 >= rules.budget {
            break;
        }
        let Some(cost) = grid.entry_cost(cells[at + 1]) else {
            blocked = true;
            break;
        };
        if rules.budget_mode == BudgetMode::Cost {
            if bank < cost {
                break;
            }
            bank -= cost;
        }
        at += 1;
    }

    let to = cells[at];
    if blocked {
        debug!(at = %to, blocked = %cells[at + 1], "Route blocked, stopping");
        return Advance {
            to,
            remaining: None,
            status: StepStatus::Halted,
        };
    }
    if at == last {
        return Advance {
            to,
            remaining: None,
            status: StepStatus::Arrived,
        };
    }

    Advance {
        to,
        remaining: Route::with_progress(cells[at..].to_vec(), bank),
        status: if at == 0 {
            StepStatus::Waiting
        } else {
            StepStatus::Moving
        },
    }
}
