use serde::{Deserialize, Serialize};

/// Cost value marking a cell that cannot be entered.
pub const IMPASSABLE: i32 = -1;

/// An integer position on a crisis map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Coords {
    pub x: i32,
    pub y: i32,
}

impl Coords {
    pub const fn new(x: i32, y: i32) -> Self {
        Coords { x, y }
    }

    pub fn manhattan(self, other: Coords) -> u32 {
        self.x.abs_diff(other.x) + self.y.abs_diff(other.y)
    }
}

impl std::fmt::Display for Coords {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}, {})", self.x, self.y)
    }
}

/// Playable area of a crisis map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bounds {
    pub width: u32,
    pub height: u32,
}

impl Bounds {
    pub const fn new(width: u32, height: u32) -> Self {
        Bounds { width, height }
    }

    pub fn contains(&self, c: Coords) -> bool {
        c.x >= 0 && c.y >= 0 && (c.x as u32) < self.width && (c.y as u32) < self.height
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    pub fn area(&self) -> usize {
        self.width as usize * self.height as usize
    }
}

/// Per-cell traversal cost over a bounded map, stored row-major.
///
/// A cell's value is the cost of *entering* it. Negative values are
/// impassable. A grid handed to the planner or the scheduler is a snapshot
/// and is never written to by either.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawCostGrid")]
pub struct CostGrid {
    bounds: Bounds,
    costs: Vec<i32>,
}

/// Decoded form of a [`CostGrid`] before the cell count is checked.
#[derive(Deserialize)]
struct RawCostGrid {
    bounds: Bounds,
    costs: Vec<i32>,
}

impl TryFrom<RawCostGrid> for CostGrid {
    type Error = String;

    fn try_from(raw: RawCostGrid) -> Result<Self, String> {
        CostGrid::from_costs(raw.bounds, raw.costs)
    }
}

impl CostGrid {
    /// A grid where every cell has the same cost.
    pub fn uniform(bounds: Bounds, cost: i32) -> Self {
        CostGrid {
            bounds,
            costs: vec![cost; bounds.area()],
        }
    }

    /// Build a grid from row-major costs. Fails if the cell count does not
    /// match the bounds.
    pub fn from_costs(bounds: Bounds, costs: Vec<i32>) -> Result<Self, String> {
        if costs.len() != bounds.area() {
            return Err(format!(
                "cost grid has {} cells, expected {}x{} = {}",
                costs.len(),
                bounds.width,
                bounds.height,
                bounds.area()
            ));
        }
        Ok(CostGrid { bounds, costs })
    }

    /// Skips the cell count check so tests can write malformed grids to disk.
    #[cfg(test)]
    pub(crate) fn unchecked(bounds: Bounds, costs: Vec<i32>) -> Self {
        CostGrid { bounds, costs }
    }

    /// Build a grid from rows (`rows[y][x]`). All rows must share one width.
    pub fn from_rows(rows: &[Vec<i32>]) -> Result<Self, String> {
        let height = rows.len() as u32;
        let width = rows.first().map(|r| r.len()).unwrap_or(0) as u32;
        if let Some((y, row)) = rows
            .iter()
            .enumerate()
            .find(|(_, r)| r.len() as u32 != width)
        {
            return Err(format!(
                "row {} has {} cells, expected {}",
                y,
                row.len(),
                width
            ));
        }
        let costs = rows.iter().flatten().copied().collect();
        Self::from_costs(Bounds::new(width, height), costs)
    }

    pub fn bounds(&self) -> Bounds {
        self.bounds
    }

    pub fn width(&self) -> u32 {
        self.bounds.width
    }

    pub fn height(&self) -> u32 {
        self.bounds.height
    }

    pub fn contains(&self, c: Coords) -> bool {
        self.bounds.contains(c)
    }

    pub(crate) fn index(&self, c: Coords) -> Option<usize> {
        if !self.contains(c) {
            return None;
        }
        Some(c.y as usize * self.bounds.width as usize + c.x as usize)
    }

    pub(crate) fn coords_of(&self, idx: usize) -> Coords {
        let w = self.bounds.width as usize;
        Coords::new((idx % w) as i32, (idx / w) as i32)
    }

    /// Raw cost of a cell, `None` outside the bounds.
    pub fn cost(&self, c: Coords) -> Option<i32> {
        self.index(c).map(|i| self.costs[i])
    }

    /// Cost of entering a cell, `None` when it is impassable or out of bounds.
    pub fn entry_cost(&self, c: Coords) -> Option<u32> {
        match self.cost(c) {
            Some(v) if v >= 0 => Some(v as u32),
            _ => None,
        }
    }

    pub fn is_passable(&self, c: Coords) -> bool {
        self.entry_cost(c).is_some()
    }

    /// Change a cell's cost. Out-of-bounds writes are ignored.
    pub fn set_cost(&mut self, c: Coords, cost: i32) {
        if let Some(i) = self.index(c) {
            self.costs[i] = cost;
        }
    }

    pub fn passable_count(&self) -> usize {
        self.costs.iter().filter(|&&v| v >= 0).count()
    }

    /// Rows of costs (`rows[y][x]`), the layout map clients render.
    pub fn rows(&self) -> Vec<Vec<i32>> {
        if self.bounds.width == 0 {
            return Vec::new();
        }
        self.costs
            .chunks(self.bounds.width as usize)
            .map(|r| r.to_vec())
            .collect()
    }

    /// Sum of entry costs over `path[1..]`; the first cell is where the walker
    /// already stands. `None` if any entered cell is not passable.
    pub fn path_cost(&self, path: &[Coords]) -> Option<u64> {
        path.iter()
            .skip(1)
            .try_fold(0u64, |acc, &c| self.entry_cost(c).map(|v| acc + v as u64))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bounds_contains_edges() {
        let b = Bounds::new(10, 5);
        assert!(b.contains(Coords::new(0, 0)));
        assert!(b.contains(Coords::new(9, 4)));
        assert!(!b.contains(Coords::new(10, 0)));
        assert!(!b.contains(Coords::new(0, 5)));
        assert!(!b.contains(Coords::new(-1, 2)));
    }

    #[test]
    fn empty_bounds_contain_nothing() {
        let b = Bounds::new(0, 7);
        assert!(b.is_empty());
        assert!(!b.contains(Coords::new(0, 0)));
    }

    #[test]
    fn from_costs_rejects_wrong_length() {
        let err = CostGrid::from_costs(Bounds::new(3, 3), vec![1; 8]).unwrap_err();
        assert!(err.contains("expected 3x3"));
    }

    #[test]
    fn decoding_checks_cell_count() {
        let short = r#"{"bounds":{"width":10,"height":10},"costs":[1,1,1]}"#;
        let err = serde_json::from_str::<CostGrid>(short).unwrap_err();
        assert!(err.to_string().contains("expected 10x10 = 100"));

        let grid = CostGrid::from_rows(&[vec![1, 2], vec![-1, 4]]).unwrap();
        let json = serde_json::to_string(&grid).unwrap();
        assert_eq!(serde_json::from_str::<CostGrid>(&json).unwrap(), grid);

        let bytes = bincode::serialize(&CostGrid::unchecked(Bounds::new(4, 4), vec![1; 5])).unwrap();
        assert!(bincode::deserialize::<CostGrid>(&bytes).is_err());
    }

    #[test]
    fn from_rows_rejects_ragged_rows() {
        let err = CostGrid::from_rows(&[vec![1, 1], vec![1]]).unwrap_err();
        assert!(err.contains("row 1"));
    }

    #[test]
    fn rows_layout_matches_coords() {
        let grid = CostGrid::from_rows(&[vec![1, 2, 3], vec![4, 5, IMPASSABLE]]).unwrap();
        assert_eq!(grid.width(), 3);
        assert_eq!(grid.height(), 2);
        assert_eq!(grid.cost(Coords::new(2, 0)), Some(3));
        assert_eq!(grid.cost(Coords::new(0, 1)), Some(4));
        assert!(!grid.is_passable(Coords::new(2, 1)));
        assert_eq!(grid.rows(), vec![vec![1, 2, 3], vec![4, 5, IMPASSABLE]]);
    }

    #[test]
    fn entry_cost_out_of_bounds_is_none() {
        let grid = CostGrid::uniform(Bounds::new(2, 2), 1);
        assert_eq!(grid.entry_cost(Coords::new(2, 0)), None);
        assert_eq!(grid.entry_cost(Coords::new(1, 1)), Some(1));
    }

    #[test]
    fn path_cost_skips_starting_cell() {
        let grid = CostGrid::from_rows(&[vec![9, 2, 3]]).unwrap();
        let path = [Coords::new(0, 0), Coords::new(1, 0), Coords::new(2, 0)];
        assert_eq!(grid.path_cost(&path), Some(5));
        assert_eq!(grid.path_cost(&path[..1]), Some(0));
    }

    #[test]
    fn zero_cost_cells_are_passable() {
        let mut grid = CostGrid::uniform(Bounds::new(2, 1), 1);
        grid.set_cost(Coords::new(1, 0), 0);
        assert_eq!(grid.entry_cost(Coords::new(1, 0)), Some(0));
        assert_eq!(grid.passable_count(), 2);
    }
}
