//! batchgrid.toml configuration parser.
//!
//! Every table and field has a default, so an empty file is a valid config.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{CoreError, CoreResult};
use crate::types::Millis;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    pub timing: TimingConfig,
    pub scheduler: SchedulerConfig,
    pub state: StateConfig,
    pub inventory: InventoryConfig,
    pub worker: WorkerConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    /// Length of the repeating slot cycle.
    pub cycle_length_ms: Millis,
    pub slot_count: u32,
    /// Floor for any requested wake, avoids busy-looping.
    pub min_wake_ms: Millis,
    /// Gap between two consecutive stage completions of a batch.
    pub stagger_ms: Millis,
    /// Slot the scheduler loop wakes in.
    pub scheduler_slot: u32,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            cycle_length_ms: 1000,
            slot_count: 5,
            min_wake_ms: 20,
            stagger_ms: 250,
            scheduler_slot: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Fraction of a target's max amount one Extract stage takes.
    pub steal_fraction: f64,
    /// Capacity units consumed by one worker thread.
    pub worker_cost: f64,
    /// Batching targets with this many in-flight jobs are not admitted.
    pub max_running_jobs: u32,
    /// Extra grace before a silent target is declared stalled.
    pub stall_grace_ms: Millis,
    /// Nodes never used as workers.
    pub excluded_nodes: Vec<String>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            steal_fraction: 0.5,
            worker_cost: 2.0,
            max_running_jobs: 1024,
            stall_grace_ms: 60_000,
            excluded_nodes: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StateConfig {
    /// Durable target-state snapshot.
    pub path: PathBuf,
    pub poll_interval_ms: u64,
    pub port_capacity: usize,
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("data/target-states.json"),
            poll_interval_ms: 20,
            port_capacity: 4096,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InventoryConfig {
    pub path: PathBuf,
}

impl Default for InventoryConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("data/inventory.json"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Program that performs one stage and prints its outcome.
    pub command: String,
    /// Arguments placed before the stage arguments.
    pub args: Vec<String>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            command: "batch-worker".to_string(),
            args: Vec::new(),
        }
    }
}

impl BatchConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: BatchConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the slot clock and the timing engine cannot work with.
    pub fn validate(&self) -> CoreResult<()> {
        let timing = &self.timing;
        if timing.cycle_length_ms <= 0 {
            return Err(CoreError::InvalidConfig(format!(
                "timing.cycle_length_ms must be positive, got {}",
                timing.cycle_length_ms
            )));
        }
        if timing.slot_count == 0 {
            return Err(CoreError::InvalidConfig(
                "timing.slot_count must be at least 1".to_string(),
            ));
        }
        // Completions one stagger apart must not share a tick.
        if timing.stagger_ms <= 0 {
            return Err(CoreError::InvalidConfig(format!(
                "timing.stagger_ms must be positive, got {}",
                timing.stagger_ms
            )));
        }
        Ok(())
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }
}
