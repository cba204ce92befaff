use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use crate::crisis::{Coords, CostGrid, Crisis, CrisisId, Dataset, Division, DivisionId, Route};
use crate::store::{Store, StoreError, Transaction};

/// In-process store over a [`Dataset`].
///
/// Transactions run one at a time under a mutex and stage their writes;
/// staged writes land in the dataset only on commit.
pub struct MemoryStore {
    data: Mutex<Dataset>,
}

impl MemoryStore {
    pub fn new(data: Dataset) -> Self {
        MemoryStore {
            data: Mutex::new(data),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, Dataset>, StoreError> {
        self.data
            .lock()
            .map_err(|_| StoreError::Unavailable("store lock poisoned".to_string()))
    }

    /// Copy of the committed dataset, for snapshots and views.
    pub fn snapshot(&self) -> Result<Dataset, StoreError> {
        Ok(self.lock()?.clone())
    }

    pub fn tick_count(&self) -> Result<u64, StoreError> {
        Ok(self.lock()?.tick_count)
    }
}

impl Store for MemoryStore {
    fn run_in_transaction<T, E, F>(&self, f: F) -> Result<T, E>
    where
        F: FnOnce(&mut dyn Transaction) -> Result<T, E>,
        E: From<StoreError>,
    {
        let mut guard = self.lock()?;
        let mut tx = MemoryTransaction {
            base: &guard,
            staged: BTreeMap::new(),
            tick_count: None,
        };
        let value = f(&mut tx)?;

        let MemoryTransaction {
            staged, tick_count, ..
        } = tx;
        for (id, division) in staged {
            guard.divisions.insert(id, division);
        }
        if let Some(tick) = tick_count {
            guard.tick_count = tick;
        }
        Ok(value)
    }
}

struct MemoryTransaction<'a> {
    base: &'a Dataset,
    staged: BTreeMap<DivisionId, Division>,
    tick_count: Option<u64>,
}

impl MemoryTransaction<'_> {
    fn crisis(&self, crisis_id: CrisisId) -> Result<&Crisis, StoreError> {
        self.base
            .crises
            .get(&crisis_id)
            .ok_or(StoreError::CrisisNotFound(crisis_id))
    }

    fn current(&self, division_id: DivisionId) -> Option<&Division> {
        self.staged
            .get(&division_id)
            .or_else(|| self.base.divisions.get(&division_id))
    }

    fn staged_mut(&mut self, division_id: DivisionId) -> Result<&mut Division, StoreError> {
        if !self.staged.contains_key(&division_id) {
            let division = self
                .base
                .divisions
                .get(&division_id)
                .cloned()
                .ok_or(StoreError::DivisionNotFound(division_id))?;
            self.staged.insert(division_id, division);
        }
        self.staged
            .get_mut(&division_id)
            .ok_or(StoreError::DivisionNotFound(division_id))
    }
}

impl Transaction for MemoryTransaction<'_> {
    fn active_crisis_ids(&self) -> Result<Vec<CrisisId>, StoreError> {
        Ok(self
            .base
            .crises
            .values()
            .filter(|c| c.active)
            .map(|c| c.id)
            .collect())
    }

    fn read_crisis(&self, crisis_id: CrisisId) -> Result<Crisis, StoreError> {
        self.crisis(crisis_id).cloned()
    }

    fn read_cost_grid(&self, crisis_id: CrisisId) -> Result<CostGrid, StoreError> {
        Ok(self.crisis(crisis_id)?.costs.clone())
    }

    fn read_division(&self, division_id: DivisionId) -> Result<Division, StoreError> {
        self.current(division_id)
            .cloned()
            .ok_or(StoreError::DivisionNotFound(division_id))
    }

    fn read_divisions(&self, crisis_id: CrisisId) -> Result<Vec<Division>, StoreError> {
        self.crisis(crisis_id)?;
        Ok(self
            .base
            .divisions
            .keys()
            .filter_map(|id| self.current(*id))
            .filter(|d| d.crisis_id == crisis_id)
            .cloned()
            .collect())
    }

    fn read_divisions_with_pending_routes(
        &self,
        crisis_id: CrisisId,
    ) -> Result<Vec<Division>, StoreError> {
        let mut divisions = self.read_divisions(crisis_id)?;
        divisions.retain(|d| d.route.is_some());
        Ok(divisions)
    }

    fn persist_division_route(
        &mut self,
        division_id: DivisionId,
        route: Option<Route>,
    ) -> Result<(), StoreError> {
        self.staged_mut(division_id)?.route = route;
        Ok(())
    }

    fn persist_division_position(
        &mut self,
        division_id: DivisionId,
        coords: Coords,
        remaining: Option<Route>,
    ) -> Result<(), StoreError> {
        let division = self.staged_mut(division_id)?;
        division.coords = coords;
        division.route = remaining;
        Ok(())
    }

    fn record_tick(&mut self) -> Result<u64, StoreError> {
        let next = self.tick_count.unwrap_or(self.base.tick_count) + 1;
        self.tick_count = Some(next);
        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crisis::fixtures::small_dataset;

    fn route(cells: &[(i32, i32)]) -> Option<Route> {
        Route::new(cells.iter().map(|&(x, y)| Coords::new(x, y)).collect())
    }

    #[test]
    fn committed_writes_are_visible() {
        let store = MemoryStore::new(small_dataset());
        store
            .run_in_transaction(|tx| {
                tx.persist_division_route(1, route(&[(0, 0), (1, 0)]))?;
                tx.record_tick()
            })
            .unwrap();

        let data = store.snapshot().unwrap();
        assert!(data.divisions[&1].route.is_some());
        assert_eq!(data.tick_count, 1);
    }

    #[test]
    fn failed_transaction_rolls_back_everything() {
        let store = MemoryStore::new(small_dataset());
        let result: Result<(), StoreError> = store.run_in_transaction(|tx| {
            tx.persist_division_position(1, Coords::new(4, 4), None)?;
            tx.record_tick()?;
            tx.persist_division_position(42, Coords::new(0, 0), None)
        });
        assert_eq!(result, Err(StoreError::DivisionNotFound(42)));

        let data = store.snapshot().unwrap();
        assert_eq!(data.divisions[&1].coords, Coords::new(0, 0));
        assert_eq!(data.tick_count, 0);
    }

    #[test]
    fn reads_see_own_staged_writes() {
        let store = MemoryStore::new(small_dataset());
        store
            .run_in_transaction(|tx| {
                assert!(tx.read_divisions_with_pending_routes(1)?.is_empty());
                tx.persist_division_route(2, route(&[(9, 9), (9, 8)]))?;
                let pending = tx.read_divisions_with_pending_routes(1)?;
                assert_eq!(pending.len(), 1);
                assert_eq!(pending[0].id, 2);
                assert!(tx.read_division(2)?.route.is_some());
                Ok::<_, StoreError>(())
            })
            .unwrap();
    }

    #[test]
    fn position_write_replaces_remaining_route() {
        let store = MemoryStore::new(small_dataset());
        store
            .run_in_transaction(|tx| {
                tx.persist_division_route(1, route(&[(0, 0), (1, 0), (2, 0)]))?;
                tx.persist_division_position(1, Coords::new(1, 0), route(&[(1, 0), (2, 0)]))
            })
            .unwrap();
        let div = store.snapshot().unwrap().divisions[&1].clone();
        assert_eq!(div.coords, Coords::new(1, 0));
        assert_eq!(div.route.unwrap().remaining_steps(), 1);
    }

    #[test]
    fn unknown_crisis_reported() {
        let store = MemoryStore::new(small_dataset());
        let err = store
            .run_in_transaction(|tx| tx.read_cost_grid(9))
            .unwrap_err();
        assert_eq!(err, StoreError::CrisisNotFound(9));
    }

    #[test]
    fn inactive_crises_are_skipped() {
        let mut data = small_dataset();
        data.crises.get_mut(&1).unwrap().active = false;
        let store = MemoryStore::new(data);
        let ids = store.run_in_transaction(|tx| tx.active_crisis_ids()).unwrap();
        assert!(ids.is_empty());
    }
}
