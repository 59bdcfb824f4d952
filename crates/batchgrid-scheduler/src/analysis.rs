//! Thread analysis for targets that are not yet batch-ready.
//!
//! A pending target gets exactly one corrective action per cycle, picked in
//! priority order: lower an elevated defense, then replenish a depleted
//! amount, and only once both are at their bounds, extract.

use batch_core::{Millis, StageKind, TargetState};

use crate::inventory::TargetSnapshot;

/// Threads needed to lower defense back to its floor.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LowerDefense {
    /// Counter stage the report will be attributed to.
    pub stage: StageKind,
    pub threads: u32,
    pub excess: f64,
    pub duration: Millis,
}

/// Threads needed to grow the amount back to its ceiling.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Replenish {
    pub threads: u32,
    /// Growth multiplier to reach the ceiling.
    pub ratio: f64,
    /// Defense these threads will add.
    pub defense_cost: f64,
    pub duration: Millis,
}

/// Threads for one extraction at the configured steal fraction.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Extract {
    pub threads: u32,
    pub amount: f64,
    pub duration: Millis,
}

/// The single stage a pending target needs next.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CorrectiveAction {
    LowerDefense(LowerDefense),
    Replenish(Replenish),
    Extract(Extract),
}

impl CorrectiveAction {
    pub fn stage(&self) -> StageKind {
        match self {
            CorrectiveAction::LowerDefense(a) => a.stage,
            CorrectiveAction::Replenish(_) => StageKind::Replenish,
            CorrectiveAction::Extract(_) => StageKind::Extract,
        }
    }

    pub fn threads(&self) -> u32 {
        match self {
            CorrectiveAction::LowerDefense(a) => a.threads,
            CorrectiveAction::Replenish(a) => a.threads,
            CorrectiveAction::Extract(a) => a.threads,
        }
    }

    pub fn duration(&self) -> Millis {
        match self {
            CorrectiveAction::LowerDefense(a) => a.duration,
            CorrectiveAction::Replenish(a) => a.duration,
            CorrectiveAction::Extract(a) => a.duration,
        }
    }

    /// Effect the worker is expected to report.
    pub fn expected_amount(&self) -> f64 {
        match self {
            CorrectiveAction::LowerDefense(a) => a.excess,
            CorrectiveAction::Replenish(a) => a.ratio,
            CorrectiveAction::Extract(a) => a.amount,
        }
    }

    /// Thread-milliseconds the action occupies; cheaper actions go first.
    pub fn cost(&self) -> u64 {
        u64::from(self.threads()) * self.duration().max(0) as u64
    }
}

/// Pick the corrective action for `target`.
///
/// `state.progress` is the pipeline stage last measured for the target; a
/// defense correction right after an extraction is attributed to
/// CounterExtract so the measurement can continue, otherwise to
/// CounterReplenish. Right after a measured Replenish, the CounterReplenish
/// must cover at least the defense those Replenish threads add, even when
/// the inventory has not caught up with the rise yet.
pub fn corrective_action(
    target: &TargetSnapshot,
    state: &TargetState,
    steal_fraction: f64,
) -> CorrectiveAction {
    let progress = state.progress;
    let replenish_cost = match progress {
        Some(StageKind::Replenish) => replenish_defense_cost(
            state.stages.replenish.threads,
            target.replenish_defense_per_thread,
        ),
        _ => 0.0,
    };
    let excess = (target.current_defense - target.min_defense).max(replenish_cost);

    if excess > 0.0 {
        let stage = match progress {
            Some(StageKind::Extract) | Some(StageKind::CounterExtract) => StageKind::CounterExtract,
            _ => StageKind::CounterReplenish,
        };
        return CorrectiveAction::LowerDefense(LowerDefense {
            stage,
            threads: counter_threads(excess, target.counter_defense_per_thread),
            excess,
            duration: target.duration_of(stage),
        });
    }

    if target.current_amount < target.max_amount {
        let ratio = target.max_amount / target.current_amount.max(1.0);
        let threads = replenish_threads(ratio, target.replenish_growth_per_thread);
        return CorrectiveAction::Replenish(Replenish {
            threads,
            ratio,
            defense_cost: replenish_defense_cost(threads, target.replenish_defense_per_thread),
            duration: target.replenish_duration,
        });
    }

    CorrectiveAction::Extract(Extract {
        threads: extract_threads(steal_fraction, target.extract_fraction_per_thread),
        amount: target.max_amount * steal_fraction,
        duration: target.extract_duration,
    })
}

/// `ceil(excess / per_thread)`, at least one thread.
pub fn counter_threads(excess: f64, per_thread: f64) -> u32 {
    if per_thread <= 0.0 {
        return 1;
    }
    ((excess / per_thread).ceil() as u32).max(1)
}

/// `ceil(ln(ratio) / ln(growth_per_thread))`, at least one thread.
pub fn replenish_threads(ratio: f64, growth_per_thread: f64) -> u32 {
    if ratio <= 1.0 || growth_per_thread <= 1.0 {
        return 1;
    }
    ((ratio.ln() / growth_per_thread.ln()).ceil() as u32).max(1)
}

/// `max(1, floor(steal_fraction / fraction_per_thread))`.
pub fn extract_threads(steal_fraction: f64, fraction_per_thread: f64) -> u32 {
    if fraction_per_thread <= 0.0 {
        return 1;
    }
    ((steal_fraction / fraction_per_thread).floor() as u32).max(1)
}

/// Defense added by `threads` Replenish threads.
pub fn replenish_defense_cost(threads: u32, defense_per_thread: f64) -> f64 {
    f64::from(threads) * defense_per_thread
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fresh() -> TargetState {
        TargetState::new("n00dles")
    }

    fn after(stage: StageKind) -> TargetState {
        let mut state = fresh();
        state.progress = Some(stage);
        state
    }

    fn target() -> TargetSnapshot {
        TargetSnapshot {
            name: "n00dles".to_string(),
            accessible: true,
            max_amount: 70_000.0,
            current_amount: 70_000.0,
            min_defense: 1.0,
            current_defense: 1.0,
            extract_duration: 4000,
            replenish_duration: 6000,
            counter_duration: 8000,
            extract_fraction_per_thread: 0.04,
            replenish_growth_per_thread: 1.05,
            counter_defense_per_thread: 0.05,
            replenish_defense_per_thread: 0.004,
        }
    }

    #[test]
    fn defense_is_lowered_first() {
        let mut t = target();
        t.current_defense = 1.12;
        t.current_amount = 10.0;

        let action = corrective_action(&t, &fresh(), 0.5);
        let CorrectiveAction::LowerDefense(lower) = action else {
            panic!("expected a defense correction, got {action:?}");
        };
        assert_eq!(lower.threads, 3);
        assert_eq!(lower.stage, StageKind::CounterReplenish);
        assert_eq!(action.duration(), 8000);
    }

    #[test]
    fn counter_stage_follows_pipeline_progress() {
        let mut t = target();
        t.current_defense = 2.0;
        for (state, stage) in [
            (after(StageKind::Extract), StageKind::CounterExtract),
            (after(StageKind::CounterExtract), StageKind::CounterExtract),
            (after(StageKind::Replenish), StageKind::CounterReplenish),
            (fresh(), StageKind::CounterReplenish),
        ] {
            assert_eq!(corrective_action(&t, &state, 0.5).stage(), stage);
        }
    }

    #[test]
    fn depleted_amount_is_replenished() {
        let mut t = target();
        t.current_amount = 35_000.0;

        let CorrectiveAction::Replenish(grow) = corrective_action(&t, &fresh(), 0.5) else {
            panic!("expected a replenish");
        };
        // ln(2) / ln(1.05) = 14.2
        assert_eq!(grow.threads, 15);
        assert!((grow.ratio - 2.0).abs() < 1e-12);
        assert!((grow.defense_cost - 0.06).abs() < 1e-12);
    }

    #[test]
    fn counter_replenish_covers_measured_replenish_cost() {
        // 20 Replenish threads add 20 * 0.004 = 0.08 defense: two counter threads.
        let mut state = after(StageKind::Replenish);
        state.stages.replenish.threads = 20;

        // The inventory still shows defense at its floor.
        let action = corrective_action(&target(), &state, 0.5);
        let CorrectiveAction::LowerDefense(lower) = action else {
            panic!("expected a defense correction, got {action:?}");
        };
        assert_eq!(lower.stage, StageKind::CounterReplenish);
        assert!((lower.excess - 0.08).abs() < 1e-12);
        assert_eq!(lower.threads, 2);
        assert!((action.expected_amount() - 0.08).abs() < 1e-12);

        // An observed rise larger than the cost wins.
        let mut t = target();
        t.current_defense = 1.27;
        let action = corrective_action(&t, &state, 0.5);
        assert_eq!(action.threads(), 6);
        assert!((action.expected_amount() - 0.27).abs() < 1e-9);

        // Without a measured Replenish the cost plays no part.
        assert_eq!(corrective_action(&target(), &fresh(), 0.5).stage(), StageKind::Extract);
    }

    #[test]
    fn empty_target_uses_unit_floor() {
        let mut t = target();
        t.current_amount = 0.0;
        let CorrectiveAction::Replenish(grow) = corrective_action(&t, &fresh(), 0.5) else {
            panic!("expected a replenish");
        };
        assert_eq!(grow.ratio, 70_000.0);
    }

    #[test]
    fn stable_target_is_extracted() {
        let action = corrective_action(&target(), &fresh(), 0.5);
        assert_eq!(action.stage(), StageKind::Extract);
        // 0.5 / 0.04 = 12.5
        assert_eq!(action.threads(), 12);
        assert_eq!(action.expected_amount(), 35_000.0);
        assert_eq!(action.cost(), 12 * 4000);
    }

    #[test]
    fn degenerate_rates_still_yield_one_thread() {
        assert_eq!(counter_threads(3.0, 0.0), 1);
        assert_eq!(replenish_threads(2.0, 1.0), 1);
        assert_eq!(extract_threads(0.5, 0.0), 1);
        assert_eq!(extract_threads(0.01, 0.5), 1);
    }
}
