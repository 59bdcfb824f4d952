//! End-to-end lifecycle tests.
//!
//! Drives a simulated target from first sight to batching through the real
//! port, reducer, updater and scheduler. The fake dispatcher holds launched
//! jobs until the test completes them, then posts their reports the way a
//! worker would.

use std::sync::{Arc, Mutex};

use batch_core::{BatchConfig, Lifecycle, SlotClock, StageKind};
use batchgrid_scheduler::{
    BatchScheduler, Inventory, InventorySnapshot, LaunchRequest, NodeSnapshot, SchedulerResult,
    StageDispatcher, TargetSnapshot,
};
use batchgrid_state::{
    Message, PortWriter, Reducer, StageReport, StateUpdater, TargetStateStore, port,
};

struct World {
    target: TargetSnapshot,
    queued: Vec<LaunchRequest>,
}

#[derive(Clone)]
struct Sim {
    world: Arc<Mutex<World>>,
    port: PortWriter,
}

impl Sim {
    fn new(port: PortWriter) -> Self {
        let target = TargetSnapshot {
            name: "n00dles".to_string(),
            accessible: true,
            max_amount: 70_000.0,
            current_amount: 20_000.0,
            min_defense: 1.0,
            current_defense: 1.5,
            extract_duration: 4000,
            replenish_duration: 6000,
            counter_duration: 8000,
            extract_fraction_per_thread: 0.05,
            replenish_growth_per_thread: 1.06,
            counter_defense_per_thread: 0.05,
            replenish_defense_per_thread: 0.004,
        };
        Self {
            world: Arc::new(Mutex::new(World {
                target,
                queued: Vec::new(),
            })),
            port,
        }
    }

    /// Perform every queued job against the target and report it.
    fn complete_all(&self) -> usize {
        let mut world = self.world.lock().unwrap();
        let jobs = std::mem::take(&mut world.queued);
        for job in &jobs {
            let t = &mut world.target;
            let threads = f64::from(job.threads);
            let amount = match job.stage {
                StageKind::Extract => {
                    let taken = t.current_amount * (t.extract_fraction_per_thread * threads).min(1.0);
                    t.current_amount -= taken;
                    t.current_defense += 0.002 * threads;
                    taken
                }
                StageKind::Replenish => {
                    let before = t.current_amount.max(1.0);
                    t.current_amount = (before * t.replenish_growth_per_thread.powf(threads))
                        .min(t.max_amount);
                    t.current_defense += t.replenish_defense_per_thread * threads;
                    t.current_amount / before
                }
                StageKind::CounterExtract | StageKind::CounterReplenish => {
                    let before = t.current_defense;
                    t.current_defense =
                        (before - t.counter_defense_per_thread * threads).max(t.min_defense);
                    before - t.current_defense
                }
            };
            let report = StageReport {
                target: job.target.clone(),
                stage: job.stage,
                threads: job.threads,
                delay: job.delay,
                expected_amount: job.expected_amount,
                amount,
                expected_duration: job.expected_duration,
                duration: t.duration_of(job.stage),
            };
            self.port.send(&Message::JobReport(report)).unwrap();
        }
        jobs.len()
    }
}

impl Inventory for Sim {
    fn snapshot(&self) -> SchedulerResult<InventorySnapshot> {
        let world = self.world.lock().unwrap();
        Ok(InventorySnapshot {
            nodes: vec![NodeSnapshot {
                name: "home".to_string(),
                max_capacity: 128.0,
                used_capacity: 0.0,
                utilization_fraction: 1.0,
                scripting: true,
            }],
            targets: vec![world.target.clone()],
        })
    }
}

impl StageDispatcher for Sim {
    fn launch(&self, request: &LaunchRequest) -> bool {
        self.world.lock().unwrap().queued.push(request.clone());
        true
    }
}

#[test]
fn target_walks_from_first_sight_to_batching() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("target-states.json");
    let config = BatchConfig::default();

    let (tx, rx) = port(config.state.port_capacity);
    let sim = Sim::new(tx.clone());
    let mut updater = StateUpdater::new(
        TargetStateStore::load(&path),
        rx,
        Reducer::new(config.timing.stagger_ms),
    );
    let mut scheduler =
        BatchScheduler::new(&config, Box::new(sim.clone()), Box::new(sim.clone()), tx);

    let mut now = 1_000_000;
    let mut seen = Vec::new();
    for _ in 0..16 {
        scheduler.run_cycle(updater.store(), now).unwrap();
        updater.tick(now).unwrap();
        sim.complete_all();
        updater.tick(now + 10).unwrap();
        now += 20_000;

        let state = updater.store().get("n00dles").unwrap();
        seen.push(state.lifecycle);
        if state.is_batching() {
            break;
        }
    }

    assert_eq!(seen.first(), Some(&Lifecycle::Uninitialized));
    assert_eq!(seen.last(), Some(&Lifecycle::Batching));
    let first_stabilizing = seen
        .iter()
        .position(|l| *l == Lifecycle::Stabilizing)
        .unwrap();
    assert!(
        seen[first_stabilizing..]
            .iter()
            .all(|l| *l != Lifecycle::Uninitialized)
    );

    // The durable snapshot agrees with the in-memory store.
    let persisted = TargetStateStore::load(&path);
    let state = persisted.get("n00dles").unwrap();
    assert!(state.is_batching());
    assert_eq!(state.running_jobs, 0);
    assert_eq!(state.stages.extract.threads, 10);
    assert_eq!(state.stages.extract.delay, 3750);
    assert_eq!(state.stages.counter_replenish.delay, 500);
    assert!(state.expected_revenue_per_ms > 0.0);

    // The next cycle launches a whole batch with slot-phased completions.
    let report = scheduler.run_cycle(updater.store(), now).unwrap();
    assert_eq!(report.ready, 1);
    assert_eq!(report.launches.len(), 4);
    let clock = SlotClock::from_config(&config.timing);
    for launch in &report.launches {
        let finish = now + launch.delay + launch.expected_duration;
        assert_eq!(clock.slot_of(finish), launch.stage.slot_id());
    }
    let stages: Vec<StageKind> = report.launches.iter().map(|l| l.stage).collect();
    assert_eq!(stages, StageKind::ALL.to_vec());
}

#[test]
fn lost_jobs_are_recomputed_and_remeasured() {
    let config = BatchConfig::default();
    let (tx, rx) = port(64);
    let sim = Sim::new(tx.clone());
    let mut updater = StateUpdater::new(
        TargetStateStore::open_in_memory(),
        rx,
        Reducer::new(config.timing.stagger_ms),
    );
    let mut scheduler =
        BatchScheduler::new(&config, Box::new(sim.clone()), Box::new(sim.clone()), tx);

    let now = 5_000_000;
    scheduler.run_cycle(updater.store(), now).unwrap();
    updater.tick(now).unwrap();

    // A corrective job launches, then its worker dies without reporting.
    scheduler.run_cycle(updater.store(), now + 100).unwrap();
    updater.tick(now + 100).unwrap();
    sim.world.lock().unwrap().queued.clear();
    assert_eq!(updater.store().get("n00dles").unwrap().running_jobs, 1);

    let waiting = scheduler.run_cycle(updater.store(), now + 1_000).unwrap();
    assert!(waiting.launches.is_empty());
    assert!(waiting.notes[0].message.starts_with("awaiting"));

    let later = now + 100 + 2 * 8000 + config.scheduler.stall_grace_ms + 1;
    let stalled = scheduler.run_cycle(updater.store(), later).unwrap();
    assert_eq!(stalled.recomputed, vec!["n00dles".to_string()]);
    updater.tick(later).unwrap();
    assert_eq!(updater.store().get("n00dles").unwrap().running_jobs, 0);

    // With the counter cleared the target is served again.
    let resumed = scheduler.run_cycle(updater.store(), later + 100).unwrap();
    assert_eq!(resumed.launches.len(), 1);
}
