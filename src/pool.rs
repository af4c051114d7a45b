//! The bounded dispatcher.
//!
//! A fixed-size pool of worker tasks executes node jobs in parallel. Jobs
//! are handed over a rendezvous channel, so `submit` blocks the caller while
//! every worker is busy (back-pressure, not rejection). `wait(n)` is the
//! barrier: it collects exactly `n` completions and returns the aggregated
//! per-node outcomes. Completion, not success, satisfies the barrier.

use std::fmt::Debug;
use std::process::ExitStatus;
use std::sync::Arc;

use futures::future::join_all;

use crate::error::MusterError;
use crate::session::{run_cmd, Transport};

/// One unit of work: run `command` on a node as `user`, keyed by the node's
/// alias for identity tracking.
pub struct Job {
    pub alias: String,
    pub transport: Arc<dyn Transport>,
    pub command: String,
    pub user: String,
    pub silent: bool,
}

impl Job {
    pub fn new(transport: Arc<dyn Transport>, command: String, user: String) -> Self {
        Self {
            alias: transport.alias().to_string(),
            transport,
            command,
            user,
            silent: true,
        }
    }
}

/// How one job ended: the remote exit status, or the transport fault that
/// kept it from completing.
pub struct JobOutcome {
    pub alias: String,
    pub result: Result<ExitStatus, MusterError>,
}

impl JobOutcome {
    pub fn succeeded(&self) -> bool {
        matches!(&self.result, Ok(status) if status.success())
    }
}

impl Debug for JobOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.result {
            Ok(status) => write!(f, "{}: {}", self.alias, status),
            Err(error) => write!(f, "{}: {}", self.alias, error),
        }
    }
}

/// Per-node outcomes of one fleet operation, in completion order.
#[derive(Debug)]
pub struct FleetReport {
    outcomes: Vec<JobOutcome>,
}

impl FleetReport {
    pub fn outcomes(&self) -> &[JobOutcome] {
        &self.outcomes
    }

    pub fn failures(&self) -> Vec<&JobOutcome> {
        self.outcomes.iter().filter(|o| !o.succeeded()).collect()
    }

    pub fn all_succeeded(&self) -> bool {
        self.outcomes.iter().all(JobOutcome::succeeded)
    }

    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }
}

/// Fixed-capacity concurrent worker pool.
pub struct Dispatcher {
    job_tx: flume::Sender<Job>,
    done_rx: flume::Receiver<JobOutcome>,
    workers: Vec<tokio::task::JoinHandle<()>>,
}

impl Dispatcher {
    /// Spawns `size` worker tasks. One dispatcher is shared by all node
    /// operations of the running process.
    pub fn new(size: usize) -> Self {
        // Rendezvous channel: a send completes only when a worker is free to
        // take the job.
        let (job_tx, job_rx) = flume::bounded::<Job>(0);
        let (done_tx, done_rx) = flume::unbounded();
        let mut workers = Vec::with_capacity(size);
        for _ in 0..size {
            let job_rx = job_rx.clone();
            let done_tx = done_tx.clone();
            workers.push(tokio::spawn(async move {
                while let Ok(job) = job_rx.recv_async().await {
                    let result =
                        run_cmd(job.transport.as_ref(), &job.command, &job.user, job.silent).await;
                    let outcome = JobOutcome {
                        alias: job.alias,
                        result,
                    };
                    if done_tx.send_async(outcome).await.is_err() {
                        break;
                    }
                }
            }));
        }
        Self {
            job_tx,
            done_rx,
            workers,
        }
    }

    /// Enqueues a job. Blocks while all workers are busy.
    pub async fn submit(&self, job: Job) {
        self.job_tx
            .send_async(job)
            .await
            .expect("Dispatcher workers are gone.");
    }

    /// Blocks until `count` submitted jobs have completed, successfully or
    /// not, and returns their outcomes.
    pub async fn wait(&self, count: usize) -> FleetReport {
        let mut outcomes = Vec::with_capacity(count);
        for _ in 0..count {
            outcomes.push(
                self.done_rx
                    .recv_async()
                    .await
                    .expect("Dispatcher workers are gone."),
            );
        }
        FleetReport { outcomes }
    }

    /// Stops accepting jobs and joins the workers.
    pub async fn shutdown(self) {
        drop(self.job_tx);
        join_all(self.workers).await;
    }
}
