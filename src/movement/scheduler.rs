use std::sync::Arc;
use std::time::{Duration, Instant};

use rayon::prelude::*;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, error, info};

use crate::movement::report::{DivisionStep, TickReport};
use crate::movement::{advance_route, MovementRules};
use crate::store::{Store, StoreError};

/// Emitted after every scheduled tick.
#[derive(Debug, Clone)]
pub enum TickEvent {
    Committed(TickReport),
    Failed { error: StoreError, failed_ticks: u64 },
}

/// Advances every routed division on a fixed period.
///
/// Owned by whoever hosts the service loop; there is no global instance.
pub struct MovementScheduler<S: Store> {
    store: Arc<S>,
    rules: MovementRules,
    failed_ticks: u64,
}

impl<S: Store> MovementScheduler<S> {
    pub fn new(store: Arc<S>, rules: MovementRules) -> Self {
        MovementScheduler {
            store,
            rules,
            failed_ticks: 0,
        }
    }

    pub fn rules(&self) -> &MovementRules {
        &self.rules
    }

    pub fn failed_ticks(&self) -> u64 {
        self.failed_ticks
    }

    /// Advance all routed divisions of all active crises by one tick.
    ///
    /// Runs as a single unit of work: either every division's move is
    /// committed or none is. A failure is logged and returned; it never
    /// leaves the scheduler unusable.
    pub fn run_movement_tick(&mut self) -> Result<TickReport, StoreError> {
        let start = Instant::now();
        let rules = self.rules;

        let result: Result<TickReport, StoreError> = self.store.run_in_transaction(|tx| {
            let mut steps = Vec::new();
            for crisis_id in tx.active_crisis_ids()? {
                let grid = tx.read_cost_grid(crisis_id)?;
                let divisions = tx.read_divisions_with_pending_routes(crisis_id)?;

                let advanced: Vec<_> = divisions
                    .par_iter()
                    .filter_map(|d| {
                        let route = d.route.as_ref()?;
                        let advance = advance_route(route, &grid, &rules);
                        let step = DivisionStep {
                            division_id: d.id,
                            crisis_id,
                            from: d.coords,
                            to: advance.to,
                            remaining_steps: advance
                                .remaining
                                .as_ref()
                                .map(|r| r.remaining_steps())
                                .unwrap_or(0),
                            status: advance.status,
                        };
                        Some((step, advance.remaining))
                    })
                    .collect();

                for (step, remaining) in advanced {
                    tx.persist_division_position(step.division_id, step.to, remaining)?;
                    steps.push(step);
                }
            }
            let tick = tx.record_tick()?;
            Ok(TickReport {
                tick,
                steps,
                duration_ms: 0.0,
            })
        });

        match result {
            Ok(mut report) => {
                report.duration_ms = start.elapsed().as_secs_f32() * 1000.0;
                if report.steps.is_empty() {
                    debug!(tick = report.tick, "Movement tick: nothing routed");
                } else {
                    info!(
                        tick = report.tick,
                        routed = report.steps.len(),
                        moved = report.moved(),
                        arrived = report.arrived(),
                        halted = report.halted(),
                        duration_ms = report.duration_ms,
                        "Movement tick committed"
                    );
                }
                Ok(report)
            }
            Err(e) => {
                self.failed_ticks += 1;
                error!(
                    error = %e,
                    failed_ticks = self.failed_ticks,
                    "Movement tick rolled back"
                );
                Err(e)
            }
        }
    }

    /// Tick every `period` until `shutdown` changes or its sender is dropped.
    ///
    /// Ticks never overlap. A late tick pushes the schedule back instead of
    /// firing a burst of catch-up ticks. Returns the number of committed ticks.
    pub async fn run(
        mut self,
        period: Duration,
        mut shutdown: watch::Receiver<bool>,
        events: mpsc::UnboundedSender<TickEvent>,
    ) -> u64 {
        let mut interval = time::interval_at(time::Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut committed = 0u64;

        info!(period_ms = period.as_millis() as u64, "Movement scheduler started");
        loop {
            tokio::select! {
                _ = interval.tick() => {}
                _ = shutdown.changed() => break,
            }

            let event = match self.run_movement_tick() {
                Ok(report) => {
                    committed += 1;
                    TickEvent::Committed(report)
                }
                Err(error) => TickEvent::Failed {
                    error,
                    failed_ticks: self.failed_ticks,
                },
            };
            // Nobody listening is fine.
            let _ = events.send(event);
        }

        info!(
            committed,
            failed = self.failed_ticks,
            "Movement scheduler stopped"
        );
        committed
    }

    /// Start [`run`](Self::run) on the tokio runtime.
    pub fn spawn(self, period: Duration) -> (SchedulerHandle, mpsc::UnboundedReceiver<TickEvent>) {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(self.run(period, shutdown_rx, events_tx));
        (
            SchedulerHandle {
                shutdown: shutdown_tx,
                task,
            },
            events_rx,
        )
    }
}

/// Stops a spawned scheduler. Dropping the handle stops it as well.
pub struct SchedulerHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<u64>,
}

impl SchedulerHandle {
    /// Signal shutdown and wait for the in-flight tick, if any, to finish.
    pub async fn stop(self) -> u64 {
        let _ = self.shutdown.send(true);
        match self.task.await {
            Ok(committed) => committed,
            Err(e) => {
                error!(error = %e, "Movement scheduler task failed");
                0
            }
        }
    }
}
