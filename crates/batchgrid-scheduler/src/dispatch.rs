//! Stage dispatch contract.

use serde::Serialize;

use batch_core::{Millis, NodeId, StageKind, TargetId};

/// One stage job to start on one node.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LaunchRequest {
    pub node: NodeId,
    pub stage: StageKind,
    pub threads: u32,
    pub target: TargetId,
    /// Wait before performing the stage.
    pub delay: Millis,
    pub expected_amount: f64,
    pub expected_duration: Millis,
}

/// Starts stage jobs on remote workers.
///
/// `launch` only accepts or rejects the job. The job's completion is
/// reported later, out of band, as a job report on the state port.
pub trait StageDispatcher: Send + Sync {
    fn launch(&self, request: &LaunchRequest) -> bool;
}
