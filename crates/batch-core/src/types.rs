//! Domain types shared by the batchgrid crates.
//!
//! A batch is four stages fired against one target. The stage kinds are a
//! closed set, so per-stage data lives in [`Stages<T>`] (one required field
//! per kind) rather than in maps keyed by strings.

use std::fmt;
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Milliseconds. Signed so that intermediate delay arithmetic can dip below zero.
pub type Millis = i64;

/// Identifier of a target (its name in the inventory).
pub type TargetId = String;

/// Identifier of a compute node.
pub type NodeId = String;

// ── Stages ────────────────────────────────────────────────────────

/// The four pipeline stage kinds, declared in firing order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum StageKind {
    /// Extract effect from the target ("hack").
    #[serde(rename = "hack")]
    Extract,
    /// Cancels the defense raised by Extract ("weakenHack").
    #[serde(rename = "weakenHack")]
    CounterExtract,
    /// Replenish the target's amount ("grow").
    #[serde(rename = "grow")]
    Replenish,
    /// Cancels the defense raised by Replenish ("weakenGrow").
    #[serde(rename = "weakenGrow")]
    CounterReplenish,
}

impl StageKind {
    /// All kinds in firing order.
    pub const ALL: [StageKind; 4] = [
        StageKind::Extract,
        StageKind::CounterExtract,
        StageKind::Replenish,
        StageKind::CounterReplenish,
    ];

    /// Wire name of the stage.
    pub fn as_str(&self) -> &'static str {
        match self {
            StageKind::Extract => "hack",
            StageKind::CounterExtract => "weakenHack",
            StageKind::Replenish => "grow",
            StageKind::CounterReplenish => "weakenGrow",
        }
    }

    /// The stage that follows this one in a pipeline, if any.
    pub fn next(&self) -> Option<StageKind> {
        match self {
            StageKind::Extract => Some(StageKind::CounterExtract),
            StageKind::CounterExtract => Some(StageKind::Replenish),
            StageKind::Replenish => Some(StageKind::CounterReplenish),
            StageKind::CounterReplenish => None,
        }
    }

    /// Whether this stage lowers the target's defense level.
    pub fn is_counter(&self) -> bool {
        matches!(self, StageKind::CounterExtract | StageKind::CounterReplenish)
    }

    /// Slot id used to phase-align this stage's completion (1..=4).
    pub fn slot_id(&self) -> u32 {
        match self {
            StageKind::Extract => 1,
            StageKind::CounterExtract => 2,
            StageKind::Replenish => 3,
            StageKind::CounterReplenish => 4,
        }
    }
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StageKind {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "hack" => Ok(StageKind::Extract),
            "weakenHack" => Ok(StageKind::CounterExtract),
            "grow" => Ok(StageKind::Replenish),
            "weakenGrow" => Ok(StageKind::CounterReplenish),
            other => Err(CoreError::UnknownStage(other.to_string())),
        }
    }
}

/// One value per stage kind.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Stages<T> {
    #[serde(rename = "hack")]
    pub extract: T,
    #[serde(rename = "weakenHack")]
    pub counter_extract: T,
    #[serde(rename = "grow")]
    pub replenish: T,
    #[serde(rename = "weakenGrow")]
    pub counter_replenish: T,
}

impl<T> Stages<T> {
    /// Build by evaluating `f` once per kind, in firing order.
    pub fn from_fn(mut f: impl FnMut(StageKind) -> T) -> Self {
        Self {
            extract: f(StageKind::Extract),
            counter_extract: f(StageKind::CounterExtract),
            replenish: f(StageKind::Replenish),
            counter_replenish: f(StageKind::CounterReplenish),
        }
    }

    pub fn get(&self, kind: StageKind) -> &T {
        match kind {
            StageKind::Extract => &self.extract,
            StageKind::CounterExtract => &self.counter_extract,
            StageKind::Replenish => &self.replenish,
            StageKind::CounterReplenish => &self.counter_replenish,
        }
    }

    pub fn get_mut(&mut self, kind: StageKind) -> &mut T {
        match kind {
            StageKind::Extract => &mut self.extract,
            StageKind::CounterExtract => &mut self.counter_extract,
            StageKind::Replenish => &mut self.replenish,
            StageKind::CounterReplenish => &mut self.counter_replenish,
        }
    }

    /// Iterate `(kind, value)` pairs in firing order.
    pub fn iter(&self) -> impl Iterator<Item = (StageKind, &T)> {
        StageKind::ALL.into_iter().map(move |kind| (kind, self.get(kind)))
    }

    pub fn map<U>(&self, mut f: impl FnMut(StageKind, &T) -> U) -> Stages<U> {
        Stages::from_fn(|kind| f(kind, self.get(kind)))
    }
}

/// Parameters of one stage of a target's batch.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StageSpec {
    pub threads: u32,
    /// Measured effect of the whole stage (amount extracted, growth ratio, defense change).
    pub effect_amount: f64,
    /// Measured wall-clock duration.
    pub duration: Millis,
    /// Launch offset from the batch launch instant.
    pub delay: Millis,
}

// ── Target lifecycle ──────────────────────────────────────────────

/// Lifecycle of a target's durable state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Lifecycle {
    #[default]
    Uninitialized,
    Stabilizing,
    Batching,
}

impl Lifecycle {
    pub fn as_str(&self) -> &'static str {
        match self {
            Lifecycle::Uninitialized => "uninitialized",
            Lifecycle::Stabilizing => "stabilizing",
            Lifecycle::Batching => "batching",
        }
    }

    /// Whether moving from `self` to `next` is a permitted transition.
    ///
    /// Forward progression, demotion `Batching -> Stabilizing`, and staying put
    /// are allowed. Nothing ever returns to `Uninitialized`.
    pub fn can_transition_to(&self, next: Lifecycle) -> bool {
        match (self, next) {
            (a, b) if *a == b => true,
            (Lifecycle::Uninitialized, _) => true,
            (Lifecycle::Stabilizing, Lifecycle::Batching) => true,
            (Lifecycle::Batching, Lifecycle::Stabilizing) => true,
            _ => false,
        }
    }
}

impl fmt::Display for Lifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Durable per-target record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetState {
    pub target: TargetId,
    pub lifecycle: Lifecycle,
    pub stages: Stages<StageSpec>,
    pub total_threads: u32,
    pub expected_revenue_per_ms: f64,
    pub running_jobs: u32,
    /// Last stage completed, in order, in the pipeline currently being measured.
    #[serde(default)]
    pub progress: Option<StageKind>,
    /// Epoch millis of the last message that touched this record.
    #[serde(default)]
    pub last_activity: Millis,
}

impl TargetState {
    /// A freshly observed target.
    pub fn new(target: impl Into<TargetId>) -> Self {
        Self {
            target: target.into(),
            lifecycle: Lifecycle::Uninitialized,
            stages: Stages::default(),
            total_threads: 0,
            expected_revenue_per_ms: 0.0,
            running_jobs: 0,
            progress: None,
            last_activity: 0,
        }
    }

    pub fn is_batching(&self) -> bool {
        self.lifecycle == Lifecycle::Batching
    }

    /// Recompute `total_threads` from the four stage specs.
    pub fn refresh_total_threads(&mut self) {
        self.total_threads = self.stages.iter().map(|(_, s)| s.threads).sum();
    }

    /// Apply a lifecycle transition, refusing forbidden ones.
    ///
    /// Returns `true` if the state now equals `next`.
    pub fn transition(&mut self, next: Lifecycle) -> bool {
        if self.lifecycle.can_transition_to(next) {
            self.lifecycle = next;
            true
        } else {
            false
        }
    }
}

/// Current Unix epoch in milliseconds.
pub fn epoch_millis() -> Millis {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as Millis
}
