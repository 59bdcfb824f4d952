//! Batch admission and allocation scheduler.
//!
//! One cycle:
//!
//! 1. Snapshot the inventory and build the capacity pool.
//! 2. Announce unseen targets (`init`) and flag stalled ones (`recompute`).
//! 3. Split the rest into *ready* (batching and stable) and *pending*.
//! 4. Serve pending targets, cheapest first, with one splittable corrective stage.
//! 5. Serve ready targets, highest revenue rate first, with a whole batch of
//!    four non-splittable stages whose completions are phased into their slots.
//!
//! A launch is recorded (capacity reserved, `running` notice written) only
//! when the dispatcher accepts it.

use std::path::PathBuf;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use batch_core::config::{BatchConfig, SchedulerConfig};
use batch_core::{
    Millis, SlotClock, StageKind, Stages, TargetId, TargetState, epoch_millis,
    slot_aligned_delays,
};
use batchgrid_state::{ChannelError, Message, PortWriter, TargetStateStore};

use crate::analysis::{CorrectiveAction, corrective_action};
use crate::dispatch::{LaunchRequest, StageDispatcher};
use crate::error::SchedulerResult;
use crate::inventory::{Inventory, TargetSnapshot};
use crate::pool::CapacityPool;

/// Diagnostic attached to one target for one cycle.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Note {
    pub target: TargetId,
    pub message: String,
}

/// What one scheduling cycle did.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CycleReport {
    pub initialized: Vec<TargetId>,
    pub recomputed: Vec<TargetId>,
    pub ready: usize,
    pub pending: usize,
    pub launches: Vec<LaunchRequest>,
    pub notes: Vec<Note>,
    pub threads_available: u32,
    pub threads_remaining: u32,
}

impl CycleReport {
    pub fn threads_launched(&self) -> u32 {
        self.launches.iter().map(|l| l.threads).sum()
    }

    fn note(&mut self, target: &str, message: impl Into<String>) {
        let message = message.into();
        debug!(target_name = %target, %message, "scheduler note");
        self.notes.push(Note {
            target: target.to_string(),
            message,
        });
    }
}

pub struct BatchScheduler {
    inventory: Box<dyn Inventory>,
    dispatcher: Box<dyn StageDispatcher>,
    port: PortWriter,
    clock: SlotClock,
    config: SchedulerConfig,
    slot: u32,
}

impl BatchScheduler {
    pub fn new(
        config: &BatchConfig,
        inventory: Box<dyn Inventory>,
        dispatcher: Box<dyn StageDispatcher>,
        port: PortWriter,
    ) -> Self {
        Self {
            inventory,
            dispatcher,
            port,
            clock: SlotClock::from_config(&config.timing),
            config: config.scheduler.clone(),
            slot: config.timing.scheduler_slot,
        }
    }

    /// Run one allocation pass against the given state snapshot.
    pub fn run_cycle(
        &mut self,
        states: &TargetStateStore,
        now: Millis,
    ) -> SchedulerResult<CycleReport> {
        let snapshot = self.inventory.snapshot()?;
        let mut pool = CapacityPool::from_inventory(&snapshot.nodes, &self.config);
        let mut report = CycleReport {
            threads_available: pool.total_available(),
            ..CycleReport::default()
        };

        let mut ready: Vec<(&TargetSnapshot, &TargetState)> = Vec::new();
        let mut pending: Vec<(&TargetSnapshot, CorrectiveAction)> = Vec::new();

        for target in snapshot.targets.iter().filter(|t| t.is_eligible()) {
            let Some(state) = states.get(&target.name) else {
                if self.notify(&Message::Init {
                    target: target.name.clone(),
                })? {
                    report.initialized.push(target.name.clone());
                }
                continue;
            };

            if self.is_stalled(target, state, now) {
                warn!(
                    target_name = %target.name,
                    running_jobs = state.running_jobs,
                    idle_ms = now - state.last_activity,
                    "target stalled, requesting recompute"
                );
                if self.notify(&Message::Recompute {
                    target: target.name.clone(),
                })? {
                    report.recomputed.push(target.name.clone());
                }
                report.note(&target.name, "stalled, recompute requested");
                continue;
            }

            if state.is_batching()
                && target.is_stable()
                && state.running_jobs < self.config.max_running_jobs
            {
                ready.push((target, state));
            } else if state.running_jobs > 0 {
                report.note(
                    &target.name,
                    format!("awaiting {} running job(s)", state.running_jobs),
                );
            } else {
                let action = corrective_action(target, state, self.config.steal_fraction);
                pending.push((target, action));
            }
        }
        report.ready = ready.len();
        report.pending = pending.len();

        pending.sort_by_key(|(_, action)| action.cost());
        for (target, action) in pending {
            if pool.total_available() == 0 {
                report.note(&target.name, "no capacity left this cycle");
                continue;
            }
            self.correct(&mut pool, &mut report, target, &action)?;
        }

        ready.sort_by(|(_, a), (_, b)| {
            b.expected_revenue_per_ms
                .total_cmp(&a.expected_revenue_per_ms)
        });
        for (target, state) in ready {
            self.admit_batch(&mut pool, &mut report, target, state, now)?;
        }

        report.threads_remaining = pool.total_available();
        info!(
            launches = report.launches.len(),
            threads = report.threads_launched(),
            ready = report.ready,
            pending = report.pending,
            remaining = report.threads_remaining,
            "scheduling cycle complete"
        );
        Ok(report)
    }

    /// Scheduling loop: one cycle per wake of the scheduler slot, reading the
    /// latest durable state snapshot each time.
    pub async fn run(&mut self, states_path: PathBuf, mut shutdown: watch::Receiver<bool>) {
        info!(slot = self.slot, path = ?states_path, "batch scheduler started");

        loop {
            let wake = self
                .clock
                .next_slot_wake(self.slot, self.clock.cycle_length(), epoch_millis());
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_millis(wake.max(0) as u64)) => {
                    let states = TargetStateStore::load(&states_path);
                    if let Err(e) = self.run_cycle(&states, epoch_millis()) {
                        error!(error = %e, "scheduling cycle failed");
                    }
                }
                _ = shutdown.changed() => {
                    info!("batch scheduler shutting down");
                    break;
                }
            }
        }
    }

    /// Stalled: jobs in flight but no message for twice the longest stage
    /// duration plus the grace period.
    fn is_stalled(&self, target: &TargetSnapshot, state: &TargetState, now: Millis) -> bool {
        if state.running_jobs == 0 {
            return false;
        }
        let longest = StageKind::ALL
            .iter()
            .map(|&kind| state.stages.get(kind).duration.max(target.duration_of(kind)))
            .max()
            .unwrap_or(0);
        now - state.last_activity > 2 * longest + self.config.stall_grace_ms
    }

    /// Dispatch one splittable corrective stage.
    fn correct(
        &self,
        pool: &mut CapacityPool,
        report: &mut CycleReport,
        target: &TargetSnapshot,
        action: &CorrectiveAction,
    ) -> SchedulerResult<()> {
        if let CorrectiveAction::Replenish(grow) = action {
            debug!(
                target_name = %target.name,
                threads = grow.threads,
                defense_cost = grow.defense_cost,
                "replenish planned"
            );
        }

        let wanted = action.threads();
        let mut launched = 0;
        for (node, threads) in pool.split_plan(wanted) {
            let request = LaunchRequest {
                node,
                stage: action.stage(),
                threads,
                target: target.name.clone(),
                delay: 0,
                expected_amount: action.expected_amount(),
                expected_duration: action.duration(),
            };
            if self.launch(pool, report, request)? {
                launched += threads;
            }
        }

        if launched == 0 {
            report.note(
                &target.name,
                format!("{} needs {wanted} thread(s), none launched", action.stage()),
            );
        } else if launched < wanted {
            report.note(
                &target.name,
                format!("{} launched {launched} of {wanted} thread(s)", action.stage()),
            );
        }
        Ok(())
    }

    /// Dispatch a whole batch, or nothing.
    fn admit_batch(
        &self,
        pool: &mut CapacityPool,
        report: &mut CycleReport,
        target: &TargetSnapshot,
        state: &TargetState,
        now: Millis,
    ) -> SchedulerResult<()> {
        let total = state.total_threads;
        if total > pool.total_capacity() {
            report.note(
                &target.name,
                format!("batch needs {total} threads, fleet has {}", pool.total_capacity()),
            );
            return Ok(());
        }
        if total > pool.total_available() {
            report.note(
                &target.name,
                format!("batch needs {total} threads, {} left", pool.total_available()),
            );
            return Ok(());
        }

        let threads: Vec<u32> = state.stages.iter().map(|(_, s)| s.threads).collect();
        if !pool.can_place_all(&threads) {
            report.note(&target.name, "batch does not fit on whole nodes, parked");
            return Ok(());
        }

        let delays: Stages<Millis> = state.stages.map(|_, s| s.delay);
        let durations: Stages<Millis> = state.stages.map(|_, s| s.duration);
        let aligned = slot_aligned_delays(&self.clock, &delays, &durations, now);

        for (stage, spec) in state.stages.iter() {
            if spec.threads == 0 {
                continue;
            }
            let Some(node) = pool.first_fit(spec.threads).map(str::to_string) else {
                report.note(&target.name, format!("{stage} lost its node mid-batch"));
                continue;
            };
            let request = LaunchRequest {
                node,
                stage,
                threads: spec.threads,
                target: target.name.clone(),
                delay: *aligned.get(stage),
                expected_amount: spec.effect_amount,
                expected_duration: spec.duration,
            };
            if !self.launch(pool, report, request)? {
                report.note(&target.name, format!("{stage} launch rejected"));
            }
        }
        Ok(())
    }

    /// Capacity-check, launch, and on acceptance reserve and announce.
    fn launch(
        &self,
        pool: &mut CapacityPool,
        report: &mut CycleReport,
        request: LaunchRequest,
    ) -> SchedulerResult<bool> {
        if pool.available(&request.node) < request.threads {
            return Ok(false);
        }
        if !self.dispatcher.launch(&request) {
            debug!(
                target_name = %request.target,
                node = %request.node,
                stage = %request.stage,
                "launch rejected"
            );
            return Ok(false);
        }

        pool.reserve(&request.node, request.threads);
        self.notify(&Message::Running {
            target: request.target.clone(),
            stage: request.stage,
        })?;
        debug!(
            target_name = %request.target,
            node = %request.node,
            stage = %request.stage,
            threads = request.threads,
            delay = request.delay,
            "stage launched"
        );
        report.launches.push(request);
        Ok(true)
    }

    /// Write to the state port. A full port is logged and skipped; a closed
    /// one means the state loop is gone and aborts the cycle.
    fn notify(&self, message: &Message) -> SchedulerResult<bool> {
        match self.port.send(message) {
            Ok(()) => Ok(true),
            Err(ChannelError::Full) => {
                warn!(target_name = %message.target(), "state port full, notice dropped");
                Ok(false)
            }
            Err(e) => Err(e.into()),
        }
    }
}
