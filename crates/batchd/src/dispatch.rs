//! Process-backed stage dispatch.
//!
//! Each accepted launch spawns the configured worker command:
//!
//! ```text
//! <command> <args..> --node <n> --target <t> --action <stage> --threads <k>
//!           --delay <ms> --expected-amount <x> --expected-duration <ms>
//! ```
//!
//! The worker waits out the delay, performs the stage, and prints one JSON
//! line `{"amount": <f64>, "duration": <ms>}` (`duration` optional). A
//! supervising task turns that line into a job report on the state port.
//! A worker that exits non-zero or prints nothing usable never reports.
//!
//! Supervising tasks are tracked in [`Workers`] so a single-shot run can wait
//! for every report before it exits.

use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use serde::Deserialize;
use tokio::process::Command;
use tokio::task::JoinSet;
use tracing::{debug, warn};

use batch_core::Millis;
use batch_core::config::WorkerConfig;
use batchgrid_scheduler::{LaunchRequest, StageDispatcher};
use batchgrid_state::{Message, PortWriter, StageReport};

/// Outcome line printed by a worker.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct WorkerOutcome {
    pub amount: f64,
    #[serde(default)]
    pub duration: Option<Millis>,
}

/// Shared handle on the supervising tasks of launched workers.
#[derive(Clone, Default)]
pub struct Workers {
    tasks: Arc<Mutex<JoinSet<()>>>,
}

impl Workers {
    fn spawn<F>(&self, task: F)
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let mut tasks = self.tasks.lock().unwrap_or_else(|e| e.into_inner());
        // Reap finished supervisors so the set only holds live ones.
        while tasks.try_join_next().is_some() {}
        tasks.spawn(task);
    }

    /// Supervisors still running.
    pub fn in_flight(&self) -> usize {
        self.tasks.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Wait until every supervisor spawned so far has finished.
    ///
    /// Returns how many were awaited.
    pub async fn wait_all(&self) -> usize {
        let mut tasks = std::mem::take(&mut *self.tasks.lock().unwrap_or_else(|e| e.into_inner()));
        let mut finished = 0;
        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                warn!(error = %e, "worker supervisor failed");
            }
            finished += 1;
        }
        finished
    }
}

pub struct ProcessDispatcher {
    command: String,
    args: Vec<String>,
    port: PortWriter,
    workers: Workers,
}

impl ProcessDispatcher {
    pub fn new(worker: &WorkerConfig, port: PortWriter) -> Self {
        Self {
            command: worker.command.clone(),
            args: worker.args.clone(),
            port,
            workers: Workers::default(),
        }
    }

    pub fn workers(&self) -> Workers {
        self.workers.clone()
    }

    fn command_for(&self, request: &LaunchRequest) -> Command {
        let mut cmd = Command::new(&self.command);
        cmd.args(&self.args)
            .arg("--node")
            .arg(&request.node)
            .arg("--target")
            .arg(&request.target)
            .arg("--action")
            .arg(request.stage.as_str())
            .arg("--threads")
            .arg(request.threads.to_string())
            .arg("--delay")
            .arg(request.delay.to_string())
            .arg("--expected-amount")
            .arg(request.expected_amount.to_string())
            .arg("--expected-duration")
            .arg(request.expected_duration.to_string())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit());
        cmd
    }
}

impl StageDispatcher for ProcessDispatcher {
    fn launch(&self, request: &LaunchRequest) -> bool {
        let started = Instant::now();
        let child = match self.command_for(request).spawn() {
            Ok(child) => child,
            Err(e) => {
                warn!(command = %self.command, error = %e, "worker spawn failed");
                return false;
            }
        };

        let port = self.port.clone();
        let request = request.clone();
        self.workers.spawn(async move {
            let output = match child.wait_with_output().await {
                Ok(output) => output,
                Err(e) => {
                    warn!(target_name = %request.target, stage = %request.stage, error = %e, "worker wait failed");
                    return;
                }
            };
            if !output.status.success() {
                warn!(
                    target_name = %request.target,
                    stage = %request.stage,
                    status = %output.status,
                    "worker exited unsuccessfully"
                );
                return;
            }

            let stdout = String::from_utf8_lossy(&output.stdout);
            let Some(outcome) = parse_outcome(&stdout) else {
                warn!(target_name = %request.target, stage = %request.stage, "worker printed no outcome");
                return;
            };
            let elapsed = started.elapsed().as_millis() as Millis;
            let report = to_report(&request, &outcome, elapsed);
            debug!(
                target_name = %report.target,
                stage = %report.stage,
                amount = report.amount,
                duration = report.duration,
                "worker finished"
            );
            port.send_or_log(&Message::JobReport(report));
        });
        true
    }
}

/// The last line of `stdout` that parses as an outcome.
pub fn parse_outcome(stdout: &str) -> Option<WorkerOutcome> {
    stdout
        .lines()
        .rev()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .find_map(|line| serde_json::from_str(line).ok())
}

/// Build the job report. Without a worker-measured duration, the wall time
/// minus the launch delay stands in.
pub fn to_report(request: &LaunchRequest, outcome: &WorkerOutcome, elapsed: Millis) -> StageReport {
    StageReport {
        target: request.target.clone(),
        stage: request.stage,
        threads: request.threads,
        delay: request.delay,
        expected_amount: request.expected_amount,
        amount: outcome.amount,
        expected_duration: request.expected_duration,
        duration: outcome
            .duration
            .unwrap_or_else(|| (elapsed - request.delay).max(0)),
    }
}
