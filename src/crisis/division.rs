use serde::{Deserialize, Serialize};

use crate::crisis::grid::Coords;
use crate::crisis::{CrisisId, DivisionId, FactionId, UnitTypeId};

/// A quantity of one unit type inside a division.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Unit {
    pub type_id: UnitTypeId,
    pub amount: u32,
}

/// A validated path a division is executing.
///
/// `cells[0]` is always the division's current position and the last cell is
/// the destination, so a live route holds at least two cells. `progress` is
/// movement budget banked toward entering `cells[1]` under the cost budget
/// model; it stays zero under the cell budget model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Route {
    cells: Vec<Coords>,
    #[serde(default)]
    progress: u32,
}

impl Route {
    /// Wrap a planned path. Paths with fewer than two cells need no movement
    /// and produce no route.
    pub fn new(cells: Vec<Coords>) -> Option<Self> {
        if cells.len() < 2 {
            return None;
        }
        Some(Route { cells, progress: 0 })
    }

    pub(crate) fn with_progress(cells: Vec<Coords>, progress: u32) -> Option<Self> {
        Self::new(cells).map(|mut r| {
            r.progress = progress;
            r
        })
    }

    pub fn cells(&self) -> &[Coords] {
        &self.cells
    }

    pub fn start(&self) -> Coords {
        self.cells[0]
    }

    pub fn destination(&self) -> Coords {
        self.cells[self.cells.len() - 1]
    }

    /// Cells still to be entered.
    pub fn remaining_steps(&self) -> usize {
        self.cells.len() - 1
    }

    pub fn progress(&self) -> u32 {
        self.progress
    }
}

/// Whether a division is standing still or executing a route.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RouteState {
    Idle,
    Routed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Division {
    pub id: DivisionId,
    pub crisis_id: CrisisId,
    pub faction_id: FactionId,
    pub name: String,
    pub coords: Coords,
    pub units: Vec<Unit>,
    pub route: Option<Route>,
}

impl Division {
    pub fn route_state(&self) -> RouteState {
        if self.route.is_some() {
            RouteState::Routed
        } else {
            RouteState::Idle
        }
    }

    pub fn strength(&self) -> u32 {
        self.units.iter().map(|u| u.amount).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line(n: i32) -> Vec<Coords> {
        (0..n).map(|x| Coords::new(x, 0)).collect()
    }

    #[test]
    fn short_paths_produce_no_route() {
        assert!(Route::new(vec![]).is_none());
        assert!(Route::new(line(1)).is_none());
    }

    #[test]
    fn route_endpoints() {
        let route = Route::new(line(4)).unwrap();
        assert_eq!(route.start(), Coords::new(0, 0));
        assert_eq!(route.destination(), Coords::new(3, 0));
        assert_eq!(route.remaining_steps(), 3);
        assert_eq!(route.progress(), 0);
    }

    #[test]
    fn route_state_follows_route() {
        let mut div = Division {
            id: 1,
            crisis_id: 1,
            faction_id: 1,
            name: "1st Rifles".to_string(),
            coords: Coords::new(0, 0),
            units: vec![
                Unit { type_id: 1, amount: 300 },
                Unit { type_id: 2, amount: 40 },
            ],
            route: None,
        };
        assert_eq!(div.route_state(), RouteState::Idle);
        assert_eq!(div.strength(), 340);
        div.route = Route::new(line(2));
        assert_eq!(div.route_state(), RouteState::Routed);
    }

    #[test]
    fn route_without_progress_field_deserializes() {
        let json = r#"{"cells":[{"x":0,"y":0},{"x":1,"y":0}]}"#;
        let route: Route = serde_json::from_str(json).unwrap();
        assert_eq!(route.progress(), 0);
        assert_eq!(route.remaining_steps(), 1);
    }
}
