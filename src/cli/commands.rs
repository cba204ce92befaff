use std::future::Future;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::config::ServiceConfig;
use crate::crisis::{Coords, Dataset, DivisionId};
use crate::movement::{plan_route, MovementScheduler, TickEvent};
use crate::persistence::{self, SnapshotDir};
use crate::server::{self, HealthData, ServerState};
use crate::store::MemoryStore;

/// Parse a `x,y` pair as given on the command line.
pub fn parse_coords(s: &str) -> Result<Coords, String> {
    let (x, y) = s
        .split_once(',')
        .ok_or_else(|| format!("expected x,y but got '{}'", s))?;
    let x = x
        .trim()
        .parse::<i32>()
        .map_err(|e| format!("bad x in '{}': {}", s, e))?;
    let y = y
        .trim()
        .parse::<i32>()
        .map_err(|e| format!("bad y in '{}': {}", s, e))?;
    Ok(Coords::new(x, y))
}

fn load_dataset(config: &ServiceConfig, snapshot_path: Option<&str>) -> Result<Dataset, String> {
    match snapshot_path {
        Some(path) => {
            info!(path, "Loading snapshot");
            persistence::load_snapshot(Path::new(path))
                .map_err(|e| format!("Failed to load snapshot: {}", e))
        }
        None => {
            let snapshots = SnapshotDir::from_config(config);
            info!(dir = %snapshots.root().display(), "Loading latest snapshot");
            let (data, used) = snapshots
                .load_latest()
                .map_err(|e| format!("Failed to load snapshot: {}", e))?;
            info!(path = %used.path.display(), "Snapshot loaded");
            Ok(data)
        }
    }
}

/// Write the store's committed state to disk. Returns the tick the snapshot
/// was taken at.
fn save_store_snapshot(store: &MemoryStore, snapshots: &SnapshotDir) -> Result<u64, String> {
    let data = store
        .snapshot()
        .map_err(|e| format!("Cannot read store: {}", e))?;
    let saved = snapshots
        .save(&data)
        .map_err(|e| format!("Snapshot save failed: {}", e))?;
    info!(path = %saved.path.display(), tick = data.tick_count, "Snapshot saved");
    Ok(data.tick_count)
}

/// Counts committed ticks between periodic snapshots.
#[derive(Debug)]
struct SnapshotCadence {
    every: u32,
    since_last: u32,
}

impl SnapshotCadence {
    fn new(every: u32) -> Self {
        SnapshotCadence {
            every: every.max(1),
            since_last: 0,
        }
    }

    /// Record one committed tick. True once a snapshot is due; stays true
    /// until [`SnapshotCadence::saved`] so a failed save is retried next tick.
    fn committed(&mut self) -> bool {
        self.since_last = self.since_last.saturating_add(1);
        self.since_last >= self.every
    }

    fn saved(&mut self) {
        self.since_last = 0;
    }
}

/// Feed scheduler events to the server state and snapshot the store every
/// `snapshot_interval` committed ticks. Returns when the event stream ends
/// or `shutdown` resolves.
async fn follow_ticks(
    events: &mut mpsc::UnboundedReceiver<TickEvent>,
    shutdown: impl Future<Output = ()>,
    store: &MemoryStore,
    state: &ServerState<MemoryStore>,
    snapshots: &SnapshotDir,
    snapshot_interval: u32,
) {
    tokio::pin!(shutdown);
    let mut cadence = SnapshotCadence::new(snapshot_interval);

    loop {
        tokio::select! {
            event = events.recv() => {
                match event {
                    Some(TickEvent::Committed(report)) => {
                        state.on_tick(&report).await;
                        if cadence.committed() {
                            match save_store_snapshot(store, snapshots) {
                                Ok(tick) => {
                                    state.on_snapshot(tick).await;
                                    cadence.saved();
                                }
                                Err(e) => warn!(error = %e, "Periodic snapshot failed"),
                            }
                        }
                    }
                    Some(TickEvent::Failed { failed_ticks, .. }) => {
                        state.on_tick_failed(failed_ticks).await;
                    }
                    None => break,
                }
            }
            _ = &mut shutdown => {
                info!("Shutdown signal received");
                break;
            }
        }
    }
}

/// Run the movement service: load a dataset, serve clients, tick until Ctrl-C.
pub async fn run_service(config: &ServiceConfig, snapshot_path: Option<&str>) -> Result<(), String> {
    // 1. Load dataset
    let data = load_dataset(config, snapshot_path)?;
    info!(
        name = %data.name,
        tick = data.tick_count,
        crises = data.crises.len(),
        divisions = data.divisions.len(),
        routed = data.routed_division_count(),
        "Dataset loaded"
    );
    let start_tick = data.tick_count;
    let store = Arc::new(MemoryStore::new(data));
    let rules = config.movement_rules();

    // 2. Shared server state
    let state = Arc::new(ServerState::new(
        Arc::clone(&store),
        rules.neighborhood,
        HealthData {
            tick: start_tick,
            last_snapshot_tick: start_tick,
            ..HealthData::default()
        },
    ));

    // 3. WebSocket server in background
    let addr: SocketAddr = format!("{}:{}", config.websocket_bind, config.websocket_port)
        .parse()
        .map_err(|e| format!("Invalid bind address: {}", e))?;

    let server_state = Arc::clone(&state);
    let server_task = tokio::spawn(async move {
        if let Err(e) = server::start_server(server_state, addr).await {
            tracing::error!(error = %e, "Server error");
        }
    });

    // 4. Movement scheduler
    let scheduler = MovementScheduler::new(Arc::clone(&store), rules);
    let (handle, mut events) = scheduler.spawn(config.tick_interval());
    info!(
        tick_interval_ms = config.tick_interval_ms,
        budget = rules.budget,
        budget_mode = ?rules.budget_mode,
        blocked_policy = ?rules.blocked_policy,
        snapshot_interval = config.snapshot_interval,
        "Movement service running"
    );

    let snapshots = SnapshotDir::from_config(config);
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Cannot listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };
    follow_ticks(
        &mut events,
        ctrl_c,
        &store,
        &state,
        &snapshots,
        config.snapshot_interval,
    )
    .await;

    let committed = handle.stop().await;
    server_task.abort();

    match save_store_snapshot(&store, &snapshots) {
        Ok(tick) => info!(tick, committed, "Movement service stopped"),
        Err(e) => warn!(error = %e, "Final snapshot failed"),
    }
    Ok(())
}

/// Plan a route offline against the latest snapshot and save the result as a
/// new snapshot when accepted.
pub fn plan(
    config: &ServiceConfig,
    division_id: DivisionId,
    destinations: &[Coords],
) -> Result<(), String> {
    let data = load_dataset(config, None)?;
    let store = MemoryStore::new(data);
    let rules = config.movement_rules();

    let outcome = plan_route(&store, division_id, destinations, rules.neighborhood)
        .map_err(|e| format!("Planning failed: {}", e))?;

    if !outcome.accepted {
        let reason = outcome
            .rejection
            .map(|e| format!("{:?}: {}", e.kind(), e))
            .unwrap_or_default();
        return Err(format!("Route rejected ({})", reason));
    }

    let div = &outcome.division;
    match &div.route {
        Some(route) => {
            println!(
                "Division {} \"{}\" routed from {} to {}: {} steps, cost {}",
                div.id,
                div.name,
                route.start(),
                route.destination(),
                route.remaining_steps(),
                outcome.cost.unwrap_or(0)
            );
            let cells: Vec<String> = route.cells().iter().map(|c| c.to_string()).collect();
            println!("  {}", cells.join(" -> "));
        }
        None => println!("Division {} is already there; route cleared", div.id),
    }

    save_store_snapshot(&store, &SnapshotDir::from_config(config))?;
    Ok(())
}

/// Inspect a division or a crisis from the latest snapshot.
pub fn inspect(
    config: &ServiceConfig,
    division_id: Option<DivisionId>,
    crisis_id: Option<u32>,
) -> Result<(), String> {
    let data = load_dataset(config, None)?;

    if let Some(id) = division_id {
        inspect_division(&data, id)
    } else if let Some(id) = crisis_id {
        inspect_crisis(&data, id)
    } else {
        Err("Specify --division <ID> or --crisis <ID>".to_string())
    }
}

fn inspect_division(data: &Dataset, division_id: DivisionId) -> Result<(), String> {
    let div = data
        .divisions
        .get(&division_id)
        .ok_or_else(|| format!("Division {} not found ({} divisions)", division_id, data.divisions.len()))?;
    let crisis = data.crises.get(&div.crisis_id);

    println!("=== Division {} ===", div.id);
    println!("Name: {}", div.name);
    println!(
        "Crisis: {} ({})",
        div.crisis_id,
        crisis.map(|c| c.name.as_str()).unwrap_or("?")
    );
    println!(
        "Faction: {} ({})",
        div.faction_id,
        crisis
            .and_then(|c| c.faction(div.faction_id))
            .map(|f| f.name.as_str())
            .unwrap_or("?")
    );
    println!("Position: {}", div.coords);
    println!("State: {:?}", div.route_state());
    println!();
    println!("--- Units ---");
    for unit in &div.units {
        let type_name = crisis
            .and_then(|c| c.unit_types.iter().find(|t| t.id == unit.type_id))
            .map(|t| t.name.as_str())
            .unwrap_or("?");
        println!("  {:<12} {:>6}", type_name, unit.amount);
    }
    println!("  {:<12} {:>6}", "Total", div.strength());

    if let Some(route) = &div.route {
        println!();
        println!("--- Route ---");
        println!("  Destination: {}", route.destination());
        println!("  Steps left: {}", route.remaining_steps());
        println!("  Banked budget: {}", route.progress());
        let ahead: Vec<String> = route.cells()[1..].iter().map(|c| c.to_string()).collect();
        println!("  {}", ahead.join(" -> "));
    }
    Ok(())
}

fn inspect_crisis(data: &Dataset, crisis_id: u32) -> Result<(), String> {
    let crisis = data
        .crises
        .get(&crisis_id)
        .ok_or_else(|| format!("Crisis {} not found", crisis_id))?;

    println!("=== Crisis {}: {} ===", crisis.id, crisis.name);
    println!("Active: {}", crisis.active);
    println!("Map: {}x{}", crisis.costs.width(), crisis.costs.height());
    println!();

    // Cost map: '#' impassable, digits are entry costs, '+' for 10 or more,
    // letters mark divisions by faction
    let mut rows: Vec<Vec<char>> = crisis
        .costs
        .rows()
        .iter()
        .map(|row| {
            row.iter()
                .map(|&c| match c {
                    c if c < 0 => '#',
                    c if c < 10 => char::from_digit(c as u32, 10).unwrap_or('?'),
                    _ => '+',
                })
                .collect()
        })
        .collect();
    for div in data.divisions_in(crisis_id) {
        let mark = (b'A' + ((div.faction_id.saturating_sub(1)) % 26) as u8) as char;
        if let Some(cell) = rows
            .get_mut(div.coords.y as usize)
            .and_then(|r| r.get_mut(div.coords.x as usize))
        {
            *cell = mark;
        }
    }
    for row in rows {
        println!("  {}", row.into_iter().collect::<String>());
    }
    println!();

    println!("--- Divisions ---");
    for div in data.divisions_in(crisis_id) {
        let target = div
            .route
            .as_ref()
            .map(|r| format!("-> {} ({} steps)", r.destination(), r.remaining_steps()))
            .unwrap_or_else(|| "idle".to_string());
        println!(
            "  {:>4} {:<32} {:<10} {}",
            div.id,
            div.name,
            div.coords.to_string(),
            target
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crisis::fixtures::small_dataset;
    use crate::crisis::Route;
    use crate::movement::{MovementRules, Neighborhood};
    use tempfile::TempDir;

    fn config_in(dir: &TempDir) -> ServiceConfig {
        ServiceConfig {
            snapshot_directory: dir.path().to_string_lossy().into_owned(),
            ..ServiceConfig::default()
        }
    }

    fn seed(dir: &TempDir) {
        SnapshotDir::new(dir.path(), 10).save(&small_dataset()).unwrap();
    }

    fn marching_store() -> Arc<MemoryStore> {
        let mut data = small_dataset();
        data.divisions.get_mut(&1).unwrap().route =
            Route::new((0..10).map(|x| Coords::new(x, 0)).collect());
        Arc::new(MemoryStore::new(data))
    }

    #[test]
    fn cadence_fires_every_interval_and_retries_until_saved() {
        let mut cadence = SnapshotCadence::new(3);
        assert!(!cadence.committed());
        assert!(!cadence.committed());
        assert!(cadence.committed());
        // Save failed: still due on the next tick
        assert!(cadence.committed());
        cadence.saved();
        assert!(!cadence.committed());

        let mut every_tick = SnapshotCadence::new(0);
        assert!(every_tick.committed());
    }

    #[tokio::test]
    async fn service_loop_snapshots_on_interval() {
        let dir = TempDir::new().unwrap();
        let snapshots = SnapshotDir::new(dir.path(), 10);
        let store = marching_store();
        let state = ServerState::new(Arc::clone(&store), Neighborhood::Four, HealthData::default());
        let mut scheduler = MovementScheduler::new(Arc::clone(&store), MovementRules::default());

        let (tx, mut events) = mpsc::unbounded_channel();
        for _ in 0..5 {
            tx.send(TickEvent::Committed(scheduler.run_movement_tick().unwrap()))
                .unwrap();
        }
        drop(tx);

        follow_ticks(
            &mut events,
            std::future::pending(),
            &store,
            &state,
            &snapshots,
            2,
        )
        .await;

        // Ticks are already committed when events arrive, so each periodic
        // snapshot holds the store as of the fifth tick.
        let saved = snapshots.list().unwrap();
        assert_eq!(saved.len(), 2);
        assert!(saved.iter().all(|s| s.name.tick == 5));
        let health = state.health.read().await;
        assert_eq!(health.tick, 5);
        assert_eq!(health.last_snapshot_tick, 5);

        let (restored, _) = snapshots.load_latest().unwrap();
        assert_eq!(restored.divisions[&1].coords, Coords::new(5, 0));
        assert_eq!(restored.divisions[&1].route.as_ref().unwrap().remaining_steps(), 4);
    }

    #[tokio::test]
    async fn shutdown_stops_the_loop_and_final_snapshot_resumes_ticking() {
        let dir = TempDir::new().unwrap();
        let snapshots = SnapshotDir::new(dir.path(), 10);
        let store = marching_store();
        let state = ServerState::new(Arc::clone(&store), Neighborhood::Four, HealthData::default());
        let mut scheduler = MovementScheduler::new(Arc::clone(&store), MovementRules::default());

        let (tx, mut events) = mpsc::unbounded_channel();
        tx.send(TickEvent::Committed(scheduler.run_movement_tick().unwrap()))
            .unwrap();
        follow_ticks(&mut events, async {}, &store, &state, &snapshots, 30).await;
        assert!(snapshots.list().unwrap().is_empty());

        assert_eq!(save_store_snapshot(&store, &snapshots).unwrap(), 1);
        let (restored, _) = snapshots.load_latest().unwrap();
        assert_eq!(restored.tick_count, 1);

        let resumed = Arc::new(MemoryStore::new(restored));
        let mut scheduler = MovementScheduler::new(Arc::clone(&resumed), MovementRules::default());
        scheduler.run_movement_tick().unwrap();
        let data = resumed.snapshot().unwrap();
        assert_eq!(data.tick_count, 2);
        assert_eq!(data.divisions[&1].coords, Coords::new(2, 0));
    }

    #[test]
    fn parse_coords_accepts_pairs() {
        assert_eq!(parse_coords("3,4").unwrap(), Coords::new(3, 4));
        assert_eq!(parse_coords(" 0 , 9 ").unwrap(), Coords::new(0, 9));
        assert_eq!(parse_coords("-1,2").unwrap(), Coords::new(-1, 2));
    }

    #[test]
    fn parse_coords_rejects_garbage() {
        assert!(parse_coords("3").is_err());
        assert!(parse_coords("a,1").is_err());
        assert!(parse_coords("1,b").is_err());
    }

    #[test]
    fn plan_saves_accepted_route() {
        let dir = TempDir::new().unwrap();
        let config = config_in(&dir);
        seed(&dir);

        plan(&config, 1, &[Coords::new(0, 3), Coords::new(2, 3)]).unwrap();

        let (data, _) = SnapshotDir::new(dir.path(), 10).load_latest().unwrap();
        let route = data.divisions[&1].route.as_ref().unwrap();
        assert_eq!(route.destination(), Coords::new(2, 3));
        assert_eq!(route.remaining_steps(), 5);
    }

    #[test]
    fn plan_reports_rejection() {
        let dir = TempDir::new().unwrap();
        let config = config_in(&dir);
        seed(&dir);

        let err = plan(&config, 1, &[Coords::new(20, 0)]).unwrap_err();
        assert!(err.contains("InvalidInput"));
    }

    #[test]
    fn inspect_requires_a_target() {
        let dir = TempDir::new().unwrap();
        let config = config_in(&dir);
        seed(&dir);

        assert!(inspect(&config, Some(1), None).is_ok());
        assert!(inspect(&config, None, Some(1)).is_ok());
        assert!(inspect(&config, Some(99), None).is_err());
        assert!(inspect(&config, None, None).is_err());
    }
}
