pub mod memory;

use thiserror::Error;

use crate::crisis::{Coords, CostGrid, Crisis, CrisisId, Division, DivisionId, Route};

pub use memory::MemoryStore;

/// Errors raised by a storage backend.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("storage unavailable: {0}")]
    Unavailable(String),
    #[error("crisis {0} not found")]
    CrisisNotFound(CrisisId),
    #[error("division {0} not found")]
    DivisionNotFound(DivisionId),
}

/// Reads and writes available inside one atomic unit of work.
///
/// Writes become visible to other units of work only when the surrounding
/// [`Store::run_in_transaction`] call commits.
pub trait Transaction {
    fn active_crisis_ids(&self) -> Result<Vec<CrisisId>, StoreError>;

    fn read_crisis(&self, crisis_id: CrisisId) -> Result<Crisis, StoreError>;

    /// Fresh copy of a crisis map's costs.
    fn read_cost_grid(&self, crisis_id: CrisisId) -> Result<CostGrid, StoreError>;

    fn read_division(&self, division_id: DivisionId) -> Result<Division, StoreError>;

    fn read_divisions(&self, crisis_id: CrisisId) -> Result<Vec<Division>, StoreError>;

    fn read_divisions_with_pending_routes(
        &self,
        crisis_id: CrisisId,
    ) -> Result<Vec<Division>, StoreError>;

    /// Replace a division's whole route. `None` leaves it idle.
    fn persist_division_route(
        &mut self,
        division_id: DivisionId,
        route: Option<Route>,
    ) -> Result<(), StoreError>;

    /// Move a division and store what is left of its route.
    fn persist_division_position(
        &mut self,
        division_id: DivisionId,
        coords: Coords,
        remaining: Option<Route>,
    ) -> Result<(), StoreError>;

    /// Bump the global tick counter, returning the new value.
    fn record_tick(&mut self) -> Result<u64, StoreError>;
}

/// A backend that can run a closure as one atomic unit of work.
pub trait Store: Send + Sync + 'static {
    /// Run `f` inside a transaction. An `Ok` result commits every write made
    /// through the transaction; an `Err` discards all of them.
    fn run_in_transaction<T, E, F>(&self, f: F) -> Result<T, E>
    where
        F: FnOnce(&mut dyn Transaction) -> Result<T, E>,
        E: From<StoreError>;
}
