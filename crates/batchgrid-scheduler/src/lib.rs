//! batchgrid-scheduler: batch admission and worker allocation.
//!
//! Each cycle the scheduler reads the inventory and the latest durable
//! target states, then hands out the fleet's worker threads:
//!
//! - Targets not yet batch-ready get one corrective stage (lower defense,
//!   replenish, or extract), split across nodes as needed
//! - Batch-ready targets get four timed stages, each placed whole on a node
//!
//! # Architecture
//!
//! ```text
//! BatchScheduler
//!   ├── Inventory (nodes + targets, read every cycle)
//!   ├── CapacityPool (per-node threads, rebuilt every cycle)
//!   ├── analysis (corrective action thread counts)
//!   ├── SlotClock + timing (slot-aligned stage delays)
//!   ├── StageDispatcher (launch accept/reject)
//!   └── PortWriter (init / recompute / running notices)
//! ```

pub mod analysis;
pub mod dispatch;
pub mod error;
pub mod inventory;
pub mod pool;
pub mod scheduler;

pub use analysis::{CorrectiveAction, corrective_action};
pub use dispatch::{LaunchRequest, StageDispatcher};
pub use error::{SchedulerError, SchedulerResult};
pub use inventory::{FileInventory, Inventory, InventorySnapshot, NodeSnapshot, TargetSnapshot};
pub use pool::{CapacityPool, ComputeNode};
pub use scheduler::{BatchScheduler, CycleReport, Note};
