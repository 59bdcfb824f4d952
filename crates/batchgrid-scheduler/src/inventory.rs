//! Inventory snapshot contract.
//!
//! The scheduler treats the inventory as authoritative for one cycle and
//! never caches it beyond that. [`FileInventory`] reads a JSON document:
//!
//! ```json
//! {
//!   "nodes":   [{ "name": "home", "maxCapacity": 64, "usedCapacity": 8 }],
//!   "targets": [{ "name": "n00dles", "maxAmount": 70000, "currentAmount": 70000,
//!                 "minDefense": 1, "currentDefense": 1, ... }]
//! }
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use batch_core::{Millis, NodeId, StageKind, TargetId};

use crate::error::{SchedulerError, SchedulerResult};

fn default_utilization() -> f64 {
    1.0
}

fn default_true() -> bool {
    true
}

fn default_replenish_defense() -> f64 {
    0.004
}

/// Live attributes of one compute node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeSnapshot {
    pub name: NodeId,
    pub max_capacity: f64,
    #[serde(default)]
    pub used_capacity: f64,
    /// Share of `max_capacity` the scheduler may use.
    #[serde(default = "default_utilization")]
    pub utilization_fraction: f64,
    /// Whether the node can run worker processes at all.
    #[serde(default = "default_true")]
    pub scripting: bool,
}

/// Live attributes of one target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetSnapshot {
    pub name: TargetId,
    #[serde(default = "default_true")]
    pub accessible: bool,
    pub max_amount: f64,
    pub current_amount: f64,
    pub min_defense: f64,
    pub current_defense: f64,
    pub extract_duration: Millis,
    pub replenish_duration: Millis,
    /// Duration of either counter stage.
    pub counter_duration: Millis,
    /// Fraction of the current amount one Extract thread takes.
    pub extract_fraction_per_thread: f64,
    /// Multiplicative growth applied by one Replenish thread.
    pub replenish_growth_per_thread: f64,
    /// Defense removed by one counter thread.
    pub counter_defense_per_thread: f64,
    /// Defense added by one Replenish thread.
    #[serde(default = "default_replenish_defense")]
    pub replenish_defense_per_thread: f64,
}

impl TargetSnapshot {
    /// Targets the scheduler may act on at all.
    pub fn is_eligible(&self) -> bool {
        self.accessible && self.max_amount > 0.0
    }

    /// Amount at its ceiling and defense at its floor.
    pub fn is_stable(&self) -> bool {
        self.current_amount >= self.max_amount && self.current_defense <= self.min_defense
    }

    /// Estimated duration of `stage` from the live attributes.
    pub fn duration_of(&self, stage: StageKind) -> Millis {
        match stage {
            StageKind::Extract => self.extract_duration,
            StageKind::Replenish => self.replenish_duration,
            StageKind::CounterExtract | StageKind::CounterReplenish => self.counter_duration,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InventorySnapshot {
    #[serde(default)]
    pub nodes: Vec<NodeSnapshot>,
    #[serde(default)]
    pub targets: Vec<TargetSnapshot>,
}

/// Supplier of the per-cycle inventory snapshot.
pub trait Inventory: Send + Sync {
    fn snapshot(&self) -> SchedulerResult<InventorySnapshot>;
}

/// A fixed snapshot, returned as-is every cycle.
impl Inventory for InventorySnapshot {
    fn snapshot(&self) -> SchedulerResult<InventorySnapshot> {
        Ok(self.clone())
    }
}

/// Inventory re-read from a JSON file every cycle.
#[derive(Debug, Clone)]
pub struct FileInventory {
    path: PathBuf,
}

impl FileInventory {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Inventory for FileInventory {
    fn snapshot(&self) -> SchedulerResult<InventorySnapshot> {
        let content = std::fs::read_to_string(&self.path).map_err(|e| {
            SchedulerError::InventoryRead(format!("{}: {e}", self.path.display()))
        })?;
        serde_json::from_str(&content).map_err(|e| {
            SchedulerError::InventoryParse(format!("{}: {e}", self.path.display()))
        })
    }
}
