pub mod division;
pub mod generation;
pub mod grid;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub use division::{Division, Route, RouteState, Unit};
pub use grid::{Bounds, Coords, CostGrid, IMPASSABLE};

pub type CrisisId = u32;
pub type FactionId = u32;
pub type UnitTypeId = u32;
pub type DivisionId = u32;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Faction {
    pub id: FactionId,
    pub crisis_id: CrisisId,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitType {
    pub id: UnitTypeId,
    pub name: String,
}

/// One scenario: a map, the factions playing on it and their unit types.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Crisis {
    pub id: CrisisId,
    pub name: String,
    pub active: bool,
    pub costs: CostGrid,
    pub factions: Vec<Faction>,
    pub unit_types: Vec<UnitType>,
}

impl Crisis {
    pub fn bounds(&self) -> Bounds {
        self.costs.bounds()
    }

    pub fn faction(&self, id: FactionId) -> Option<&Faction> {
        self.factions.iter().find(|f| f.id == id)
    }
}

/// Everything the movement service stores: all crises and all divisions.
/// This is the unit written to and restored from snapshots.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dataset {
    pub id: Uuid,
    pub name: String,
    pub created_at: String,
    pub tick_count: u64,
    pub crises: BTreeMap<CrisisId, Crisis>,
    pub divisions: BTreeMap<DivisionId, Division>,
}

impl Dataset {
    pub fn new(name: impl Into<String>) -> Self {
        Dataset {
            id: Uuid::new_v4(),
            name: name.into(),
            created_at: String::new(),
            tick_count: 0,
            crises: BTreeMap::new(),
            divisions: BTreeMap::new(),
        }
    }

    pub fn divisions_in(&self, crisis_id: CrisisId) -> impl Iterator<Item = &Division> {
        self.divisions
            .values()
            .filter(move |d| d.crisis_id == crisis_id)
    }

    pub fn routed_division_count(&self) -> usize {
        self.divisions.values().filter(|d| d.route.is_some()).count()
    }

    /// Check referential and spatial consistency. Returns every problem found.
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        for (key, crisis) in &self.crises {
            if *key != crisis.id {
                errors.push(format!("crisis stored under {} has id {}", key, crisis.id));
            }
            for faction in crisis.factions.iter().filter(|f| f.crisis_id != crisis.id) {
                errors.push(format!(
                    "faction {} in crisis {} claims crisis {}",
                    faction.id, crisis.id, faction.crisis_id
                ));
            }
        }

        for (key, div) in &self.divisions {
            if *key != div.id {
                errors.push(format!("division stored under {} has id {}", key, div.id));
            }
            let Some(crisis) = self.crises.get(&div.crisis_id) else {
                errors.push(format!(
                    "division {} references missing crisis {}",
                    div.id, div.crisis_id
                ));
                continue;
            };
            if crisis.faction(div.faction_id).is_none() {
                errors.push(format!(
                    "division {} references missing faction {}",
                    div.id, div.faction_id
                ));
            }
            if !crisis.bounds().contains(div.coords) {
                errors.push(format!(
                    "division {} at {} is outside crisis {} bounds",
                    div.id, div.coords, crisis.id
                ));
            }
            if let Some(route) = &div.route {
                if route.cells().len() < 2 {
                    errors.push(format!("division {} has a degenerate route", div.id));
                } else if route.start() != div.coords {
                    errors.push(format!(
                        "division {} route starts at {} but division is at {}",
                        div.id,
                        route.start(),
                        div.coords
                    ));
                }
                if let Some(c) = route.cells().iter().find(|c| !crisis.bounds().contains(**c)) {
                    errors.push(format!(
                        "division {} route leaves the map at {}",
                        div.id, c
                    ));
                }
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}
