use std::cmp::Ordering;
use std::collections::BinaryHeap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::crisis::grid::{Coords, CostGrid};

/// Which cells count as adjacent during search.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Neighborhood {
    #[default]
    #[serde(alias = "4")]
    Four,
    #[serde(alias = "8")]
    Eight,
}

// Fixed order keeps tie-breaking stable: N, E, S, W, then NE, SE, SW, NW.
const ORTHOGONAL: [(i32, i32); 4] = [(0, -1), (1, 0), (0, 1), (-1, 0)];
const DIAGONAL: [(i32, i32); 4] = [(1, -1), (1, 1), (-1, 1), (-1, -1)];

/// Why a plan was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlanError {
    #[error("route has no waypoints")]
    NoWaypoints,
    #[error("crisis map has no cells")]
    EmptyMap,
    #[error("waypoint {index} at {at} is outside the {width}x{height} map")]
    OutOfBounds {
        index: usize,
        at: Coords,
        width: u32,
        height: u32,
    },
    #[error("no path from {from} to {to}")]
    Infeasible { from: Coords, to: Coords },
}

/// Coarse classification of a rejection, as reported to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectionKind {
    InvalidInput,
    Infeasible,
}

impl PlanError {
    pub fn kind(&self) -> RejectionKind {
        match self {
            PlanError::Infeasible { .. } => RejectionKind::Infeasible,
            _ => RejectionKind::InvalidInput,
        }
    }
}

/// A continuous path through all waypoints.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FullPath {
    /// Starts at the first waypoint; empty when there was nowhere to go.
    pub cells: Vec<Coords>,
    /// Total cost of entering every cell after the first.
    pub cost: u64,
}

#[derive(Debug, PartialEq, Eq)]
struct OpenNode {
    cost: u64,
    tie: u64,
    idx: usize,
}

impl Ord for OpenNode {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reversed so BinaryHeap pops the cheapest, oldest entry first.
        (other.cost, other.tie).cmp(&(self.cost, self.tie))
    }
}

impl PartialOrd for OpenNode {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

fn neighbors(grid: &CostGrid, c: Coords, hood: Neighborhood) -> Vec<Coords> {
    let mut out = Vec::with_capacity(8);
    for (dx, dy) in ORTHOGONAL {
        out.push(Coords::new(c.x + dx, c.y + dy));
    }
    if hood == Neighborhood::Eight {
        for (dx, dy) in DIAGONAL {
            // No squeezing between two cells when either side is blocked.
            let side_a = Coords::new(c.x + dx, c.y);
            let side_b = Coords::new(c.x, c.y + dy);
            if grid.is_passable(side_a) && grid.is_passable(side_b) {
                out.push(Coords::new(c.x + dx, c.y + dy));
            }
        }
    }
    out
}

/// Uniform-cost search between two in-bounds cells.
///
/// The cost of a step is the entry cost of the cell stepped into; the start
/// cell is never charged and may itself be impassable. Returns the path
/// (including both ends) and its cost, or `None` when `to` cannot be reached.
pub fn least_cost_path(
    grid: &CostGrid,
    from: Coords,
    to: Coords,
    hood: Neighborhood,
) -> Option<(Vec<Coords>, u64)> {
    let start = grid.index(from)?;
    let goal = grid.index(to)?;
    if start == goal {
        return Some((vec![from], 0));
    }
    if !grid.is_passable(to) {
        return None;
    }

    let len = grid.bounds().area();
    let mut dist = vec![u64::MAX; len];
    let mut came_from: Vec<Option<usize>> = vec![None; len];
    let mut open = BinaryHeap::new();
    let mut tie = 0u64;

    dist[start] = 0;
    open.push(OpenNode { cost: 0, tie, idx: start });

    while let Some(node) = open.pop() {
        if node.idx == goal {
            let mut path = vec![to];
            let mut cur = goal;
            while let Some(prev) = came_from[cur] {
                cur = prev;
                path.push(grid.coords_of(cur));
            }
            path.reverse();
            return Some((path, node.cost));
        }
        if node.cost != dist[node.idx] {
            continue;
        }

        let here = grid.coords_of(node.idx);
        for next in neighbors(grid, here, hood) {
            let Some(step) = grid.entry_cost(next) else {
                continue;
            };
            let Some(n_idx) = grid.index(next) else {
                continue;
            };
            let candidate = node.cost + step as u64;
            if candidate < dist[n_idx] {
                dist[n_idx] = candidate;
                came_from[n_idx] = Some(node.idx);
                tie += 1;
                open.push(OpenNode {
                    cost: candidate,
                    tie,
                    idx: n_idx,
                });
            }
        }
    }

    None
}

/// Plan one continuous path visiting `waypoints` in order.
///
/// `waypoints[0]` is where the walker stands. Every waypoint is checked
/// against the map before any search runs. If any leg has no path the whole
/// plan fails; a partial path is never returned. Junction cells between legs
/// appear once. A single waypoint yields an empty path.
pub fn compute_full_path(
    waypoints: &[Coords],
    grid: &CostGrid,
    hood: Neighborhood,
) -> Result<FullPath, PlanError> {
    if waypoints.is_empty() {
        return Err(PlanError::NoWaypoints);
    }
    let bounds = grid.bounds();
    if bounds.is_empty() {
        return Err(PlanError::EmptyMap);
    }
    if let Some((index, &at)) = waypoints
        .iter()
        .enumerate()
        .find(|(_, c)| !bounds.contains(**c))
    {
        return Err(PlanError::OutOfBounds {
            index,
            at,
            width: bounds.width,
            height: bounds.height,
        });
    }

    if waypoints.len() == 1 {
        return Ok(FullPath {
            cells: Vec::new(),
            cost: 0,
        });
    }

    let mut cells = vec![waypoints[0]];
    let mut cost = 0u64;
    for pair in waypoints.windows(2) {
        let (from, to) = (pair[0], pair[1]);
        let (leg, leg_cost) =
            least_cost_path(grid, from, to, hood).ok_or(PlanError::Infeasible { from, to })?;
        cells.extend_from_slice(&leg[1..]);
        cost += leg_cost;
    }

    Ok(FullPath { cells, cost })
}
