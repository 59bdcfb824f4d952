//! Worker capacity pool.
//!
//! Rebuilt from the inventory at the start of every cycle and mutated only
//! inside that cycle's allocation pass. Reservations are capacity-checked:
//! a request larger than what a node has left reserves nothing.

use tracing::debug;

use batch_core::NodeId;
use batch_core::config::SchedulerConfig;

use crate::inventory::NodeSnapshot;

/// Thread capacity of one node for the current cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComputeNode {
    pub id: NodeId,
    pub capacity: u32,
    reserved: u32,
}

impl ComputeNode {
    pub fn new(id: impl Into<NodeId>, capacity: u32) -> Self {
        Self {
            id: id.into(),
            capacity,
            reserved: 0,
        }
    }

    /// Threads this node could run from its snapshot attributes.
    ///
    /// `floor((max · utilization − used) / worker_cost)`, never negative.
    pub fn from_snapshot(node: &NodeSnapshot, worker_cost: f64) -> Self {
        let free = node.max_capacity * node.utilization_fraction - node.used_capacity;
        let capacity = if worker_cost > 0.0 && free > 0.0 {
            (free / worker_cost).floor() as u32
        } else {
            0
        };
        Self::new(node.name.clone(), capacity)
    }

    pub fn reserved(&self) -> u32 {
        self.reserved
    }

    pub fn available(&self) -> u32 {
        self.capacity - self.reserved
    }
}

#[derive(Debug, Clone, Default)]
pub struct CapacityPool {
    /// Sorted by available capacity, largest first.
    nodes: Vec<ComputeNode>,
}

impl CapacityPool {
    pub fn new(mut nodes: Vec<ComputeNode>) -> Self {
        nodes.sort_by(|a, b| b.available().cmp(&a.available()).then_with(|| a.id.cmp(&b.id)));
        Self { nodes }
    }

    /// Build the pool from the inventory, skipping excluded and non-scripting nodes.
    pub fn from_inventory(nodes: &[NodeSnapshot], config: &SchedulerConfig) -> Self {
        let usable = nodes
            .iter()
            .filter(|n| n.scripting && !config.excluded_nodes.contains(&n.name))
            .map(|n| ComputeNode::from_snapshot(n, config.worker_cost))
            .filter(|n| n.capacity > 0)
            .collect();
        let pool = Self::new(usable);
        debug!(
            nodes = pool.nodes.len(),
            threads = pool.total_available(),
            "capacity pool built"
        );
        pool
    }

    pub fn nodes(&self) -> &[ComputeNode] {
        &self.nodes
    }

    pub fn available(&self, node: &str) -> u32 {
        self.nodes
            .iter()
            .find(|n| n.id == node)
            .map_or(0, ComputeNode::available)
    }

    /// Reserve `threads` on `node`. Returns the threads reserved: all of them,
    /// or `0` (leaving the pool untouched) if the node cannot hold them.
    pub fn reserve(&mut self, node: &str, threads: u32) -> u32 {
        match self.nodes.iter_mut().find(|n| n.id == node) {
            Some(n) if threads <= n.available() => {
                n.reserved += threads;
                threads
            }
            _ => 0,
        }
    }

    pub fn total_available(&self) -> u32 {
        self.nodes.iter().map(ComputeNode::available).sum()
    }

    pub fn total_capacity(&self) -> u32 {
        self.nodes.iter().map(|n| n.capacity).sum()
    }

    pub fn total_reserved(&self) -> u32 {
        self.nodes.iter().map(ComputeNode::reserved).sum()
    }

    /// First node, in pool order, able to hold `threads` whole.
    pub fn first_fit(&self, threads: u32) -> Option<&str> {
        self.nodes
            .iter()
            .find(|n| n.available() >= threads)
            .map(|n| n.id.as_str())
    }

    /// Greedy split of `threads` across nodes in pool order.
    ///
    /// The plan may cover fewer threads than requested when the pool runs dry.
    pub fn split_plan(&self, threads: u32) -> Vec<(NodeId, u32)> {
        let mut remaining = threads;
        let mut plan = Vec::new();
        for node in &self.nodes {
            if remaining == 0 {
                break;
            }
            let take = remaining.min(node.available());
            if take > 0 {
                plan.push((node.id.clone(), take));
                remaining -= take;
            }
        }
        plan
    }

    /// Check that every request fits whole on some node, consuming a copy
    /// of the pool as it goes.
    pub fn can_place_all(&self, requests: &[u32]) -> bool {
        let mut scratch = self.clone();
        requests.iter().filter(|&&t| t > 0).all(|&threads| {
            match scratch.first_fit(threads).map(str::to_string) {
                Some(node) => scratch.reserve(&node, threads) == threads,
                None => false,
            }
        })
    }
}
