//! Batch timing engine.
//!
//! Computes per-stage launch delays so the four stages of a batch finish in
//! a fixed order, `offset` ms apart:
//!
//! ```text
//! finish[CounterReplenish] = counter_replenish duration
//! finish[Replenish]        = finish[CounterReplenish] - offset
//! finish[CounterExtract]   = finish[CounterReplenish] - 2·offset
//! finish[Extract]          = finish[CounterReplenish] - 3·offset
//! delay[stage]             = finish[stage] - duration[stage]
//! ```
//!
//! All delays are then shifted so the earliest is exactly zero.

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};
use crate::slots::SlotClock;
use crate::types::{Millis, StageKind, Stages};

/// Launch delay and finish instant of one stage, relative to batch launch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StageTiming {
    pub delay: Millis,
    pub finish: Millis,
}

/// Number of `offset` steps between a stage's finish and the batch's last finish.
fn finish_rank(kind: StageKind) -> Millis {
    match kind {
        StageKind::CounterReplenish => 0,
        StageKind::Replenish => 1,
        StageKind::CounterExtract => 2,
        StageKind::Extract => 3,
    }
}

/// Compute the delays for one batch.
///
/// Fails when a duration is negative, or when the stagger window
/// (`3 · offset`) does not fit inside the CounterReplenish duration.
pub fn compute_batch_timing(
    durations: &Stages<Millis>,
    offset: Millis,
) -> CoreResult<Stages<StageTiming>> {
    for (stage, &duration) in durations.iter() {
        if duration < 0 {
            return Err(CoreError::NegativeDuration { stage, duration });
        }
    }

    let anchor = durations.counter_replenish;
    let raw = durations.map(|kind, &duration| {
        let finish = anchor - finish_rank(kind) * offset;
        StageTiming {
            delay: finish - duration,
            finish,
        }
    });

    if let Some((stage, timing)) = raw.iter().find(|(_, t)| t.finish < 0) {
        return Err(CoreError::InfeasibleBatch {
            stage,
            finish: timing.finish,
        });
    }

    let min_delay = raw.iter().map(|(_, t)| t.delay).min().unwrap_or(0);
    Ok(raw.map(|_, t| StageTiming {
        delay: t.delay - min_delay,
        finish: t.finish - min_delay,
    }))
}

/// Total length of a batch: the latest finish instant.
pub fn batch_length(timing: &Stages<StageTiming>) -> Millis {
    timing.iter().map(|(_, t)| t.finish).max().unwrap_or(0)
}

/// Re-phase each stage's delay so its completion lands in the stage's slot.
///
/// Each stage's finish is pulled onto the start of slot `kind.slot_id()` via
/// [`SlotClock::next_slot_wake`]. If that leaves a negative delay, every
/// delay is moved forward by whole cycles, which keeps each slot phase.
pub fn slot_aligned_delays(
    clock: &SlotClock,
    delays: &Stages<Millis>,
    durations: &Stages<Millis>,
    now: Millis,
) -> Stages<Millis> {
    let aligned = delays.map(|kind, &delay| {
        let duration = *durations.get(kind);
        clock.next_slot_wake(kind.slot_id(), delay + duration, now) - duration
    });

    let min = aligned.iter().map(|(_, &d)| d).min().unwrap_or(0);
    if min >= 0 {
        return aligned;
    }
    let cycle = clock.cycle_length();
    let cycles = (-min + cycle - 1) / cycle;
    aligned.map(|_, &d| d + cycles * cycle)
}
