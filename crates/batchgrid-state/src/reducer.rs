//! Lifecycle reducer: applies one decoded [`Message`] to the store.
//!
//! ```text
//!  Uninitialized ──running(hack)──► Stabilizing ──full pipeline measured──► Batching
//!                                        ▲                                     │
//!                                        └──── infeasible timing / recompute ──┘
//! ```
//!
//! While Stabilizing, completion reports are matched against the pipeline
//! order (hack, weakenHack, grow, weakenGrow). Reports for the stage already
//! in progress are parts of one split stage and are aggregated. When the
//! weakenGrow stage has been measured and no job is still in flight, the
//! four specs are turned into a batch and the target is promoted.

use tracing::{debug, info, warn};

use batch_core::{
    Lifecycle, Millis, StageKind, Stages, TargetState, batch_length, compute_batch_timing,
};

use crate::message::{Message, StageReport};
use crate::store::TargetStateStore;

/// Outcome of applying one message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    /// A new record was created.
    Created,
    /// An existing record changed without a lifecycle transition.
    Updated,
    /// The record changed lifecycle state.
    Transitioned { from: Lifecycle, to: Lifecycle },
    /// Nothing to do for this message.
    Ignored,
}

/// Pure message + state → state transition logic.
#[derive(Debug, Clone, Copy)]
pub struct Reducer {
    stagger: Millis,
}

impl Reducer {
    /// `stagger` is the gap between consecutive stage completions of a batch.
    pub fn new(stagger: Millis) -> Self {
        Self { stagger }
    }

    pub fn apply(&self, store: &mut TargetStateStore, message: Message, now: Millis) -> Applied {
        match message {
            Message::Init { target } => Self::init(store, target, now),
            Message::Running { target, stage } => Self::running(store, target, stage, now),
            Message::Recompute { target } => Self::recompute(store, &target, now),
            Message::JobReport(report) => self.report(store, report, now),
        }
    }

    fn init(store: &mut TargetStateStore, target: String, now: Millis) -> Applied {
        match store.get(&target) {
            Some(existing) if existing.lifecycle != Lifecycle::Uninitialized => {
                debug!(target_name = %target, lifecycle = %existing.lifecycle, "init for known target ignored");
                Applied::Ignored
            }
            existing => {
                let created = existing.is_none();
                let mut state = TargetState::new(target);
                state.last_activity = now;
                debug!(target_name = %state.target, "target state initialized");
                store.put(state);
                if created {
                    Applied::Created
                } else {
                    Applied::Updated
                }
            }
        }
    }

    fn running(
        store: &mut TargetStateStore,
        target: String,
        stage: StageKind,
        now: Millis,
    ) -> Applied {
        let created = !store.contains(&target);
        if created {
            store.put(TargetState::new(target.clone()));
        }
        let Some(state) = store.get_mut(&target) else {
            return Applied::Ignored;
        };

        state.running_jobs = state.running_jobs.saturating_add(1);
        state.last_activity = now;

        if state.lifecycle == Lifecycle::Uninitialized && stage == StageKind::Extract {
            state.transition(Lifecycle::Stabilizing);
            state.progress = None;
            info!(target_name = %target, "first extract dispatched, target stabilizing");
            return Applied::Transitioned {
                from: Lifecycle::Uninitialized,
                to: Lifecycle::Stabilizing,
            };
        }

        if created {
            Applied::Created
        } else {
            Applied::Updated
        }
    }

    fn recompute(store: &mut TargetStateStore, target: &str, now: Millis) -> Applied {
        let Some(state) = store.get_mut(target) else {
            debug!(target_name = %target, "recompute for unknown target ignored");
            return Applied::Ignored;
        };

        state.running_jobs = 0;
        state.progress = None;
        state.last_activity = now;

        if state.is_batching() {
            state.transition(Lifecycle::Stabilizing);
            warn!(target_name = %target, "target recomputed, demoted to stabilizing");
            return Applied::Transitioned {
                from: Lifecycle::Batching,
                to: Lifecycle::Stabilizing,
            };
        }
        Applied::Updated
    }

    fn report(&self, store: &mut TargetStateStore, report: StageReport, now: Millis) -> Applied {
        let Some(state) = store.get_mut(&report.target) else {
            warn!(target_name = %report.target, stage = %report.stage, "report for unknown target dropped");
            return Applied::Ignored;
        };

        state.running_jobs = state.running_jobs.saturating_sub(1);
        state.last_activity = now;

        match state.lifecycle {
            Lifecycle::Uninitialized => Applied::Updated,
            Lifecycle::Stabilizing => self.measure(state, &report),
            Lifecycle::Batching => self.refresh(state, &report),
        }
    }

    /// Track pipeline progress of a stabilizing target, promoting it once a
    /// whole pipeline has been measured.
    fn measure(&self, state: &mut TargetState, report: &StageReport) -> Applied {
        let stage = report.stage;
        let expected = match state.progress {
            Some(current) => current.next(),
            None => Some(StageKind::Extract),
        };

        if state.progress == Some(stage) {
            let spec = state.stages.get_mut(stage);
            spec.threads = spec.threads.saturating_add(report.threads);
            spec.effect_amount += report.amount;
            spec.duration = spec.duration.max(report.duration);
        } else if expected == Some(stage) || stage == StageKind::Extract {
            let spec = state.stages.get_mut(stage);
            spec.threads = report.threads;
            spec.effect_amount = report.amount;
            spec.duration = report.duration;
            state.progress = Some(stage);
        } else {
            debug!(
                target_name = %state.target,
                %stage,
                progress = ?state.progress,
                "out-of-order report, pipeline measurement restarted"
            );
            state.progress = None;
            return Applied::Updated;
        }

        if state.progress != Some(StageKind::CounterReplenish) || state.running_jobs > 0 {
            return Applied::Updated;
        }

        match self.retime(state) {
            Ok(()) => {
                state.transition(Lifecycle::Batching);
                info!(
                    target_name = %state.target,
                    total_threads = state.total_threads,
                    revenue_per_ms = state.expected_revenue_per_ms,
                    "pipeline measured, target batching"
                );
                Applied::Transitioned {
                    from: Lifecycle::Stabilizing,
                    to: Lifecycle::Batching,
                }
            }
            Err(e) => {
                warn!(target_name = %state.target, error = %e, "batch timing infeasible, still stabilizing");
                state.progress = None;
                Applied::Updated
            }
        }
    }

    /// Fold a live measurement into a batching target's specs.
    fn refresh(&self, state: &mut TargetState, report: &StageReport) -> Applied {
        let spec = state.stages.get_mut(report.stage);
        spec.duration = report.duration;
        spec.effect_amount = report.amount;

        match self.retime(state) {
            Ok(()) => Applied::Updated,
            Err(e) => {
                state.transition(Lifecycle::Stabilizing);
                state.progress = None;
                warn!(target_name = %state.target, error = %e, "batch timing drifted infeasible, demoted");
                Applied::Transitioned {
                    from: Lifecycle::Batching,
                    to: Lifecycle::Stabilizing,
                }
            }
        }
    }

    /// Recompute delays, thread total and revenue rate from the current specs.
    fn retime(&self, state: &mut TargetState) -> batch_core::CoreResult<()> {
        let durations: Stages<Millis> = state.stages.map(|_, spec| spec.duration);
        let timing = compute_batch_timing(&durations, self.stagger)?;

        for (kind, t) in timing.iter() {
            state.stages.get_mut(kind).delay = t.delay;
        }
        state.refresh_total_threads();

        let length = batch_length(&timing);
        state.expected_revenue_per_ms = if length > 0 {
            state.stages.extract.effect_amount / length as f64
        } else {
            0.0
        };
        Ok(())
    }
}

impl Default for Reducer {
    fn default() -> Self {
        Self::new(250)
    }
}
