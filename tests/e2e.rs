//! End-to-end tests for fleet orchestration, driven through a mock transport.

use std::os::unix::process::ExitStatusExt;
use std::process::ExitStatus;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use tokio::sync::Mutex;

use muster_ssh::{
    Dispatcher, Fleet, FleetNode, MusterError, NodeRef, StartWorkers, StopWorkers, Transport,
    WorkerConfig,
};

/// Record of an executed command for assertions.
#[derive(Debug, Clone)]
struct ExecutedCommand {
    user: String,
    command: String,
    silent: bool,
    timestamp: Instant,
}

/// Mock transport that records commands instead of touching SSH.
struct MockTransport {
    alias: String,
    executed: Arc<Mutex<Vec<ExecutedCommand>>>,
    active_user: Mutex<String>,
    exit_code: i32,
    fail: bool,
    delay_ms: u64,
}

impl MockTransport {
    fn new(alias: &str) -> Self {
        Self {
            alias: alias.to_string(),
            executed: Arc::new(Mutex::new(Vec::new())),
            active_user: Mutex::new("root".to_string()),
            exit_code: 0,
            fail: false,
            delay_ms: 0,
        }
    }

    fn executed(&self) -> Arc<Mutex<Vec<ExecutedCommand>>> {
        Arc::clone(&self.executed)
    }
}

#[async_trait]
impl Transport for MockTransport {
    fn alias(&self) -> &str {
        &self.alias
    }

    async fn switch_user(&self, user: &str) -> Result<(), MusterError> {
        *self.active_user.lock().await = user.to_string();
        Ok(())
    }

    async fn execute(&self, cmd: &str, silent: bool) -> Result<ExitStatus, MusterError> {
        if self.delay_ms > 0 {
            tokio::time::sleep(tokio::time::Duration::from_millis(self.delay_ms)).await;
        }
        let user = self.active_user.lock().await.clone();
        self.executed.lock().await.push(ExecutedCommand {
            user,
            command: cmd.to_string(),
            silent,
            timestamp: Instant::now(),
        });
        if self.fail {
            Err(MusterError::LocalCommandError(std::io::Error::new(
                std::io::ErrorKind::ConnectionReset,
                "transport dropped",
            )))
        } else {
            Ok(ExitStatus::from_raw(self.exit_code << 8))
        }
    }
}

type CommandLog = Arc<Mutex<Vec<ExecutedCommand>>>;

fn fleet_node(transport: MockTransport) -> (FleetNode, CommandLog) {
    let log = transport.executed();
    let node = FleetNode {
        node: NodeRef::new(transport.alias.clone(), transport.alias.clone()),
        transport: Arc::new(transport),
    };
    (node, log)
}

fn two_node_fleet() -> (Fleet, CommandLog, CommandLog) {
    let (n1, log1) = fleet_node(MockTransport::new("n1"));
    let (n2, log2) = fleet_node(MockTransport::new("n2"));
    (Fleet::new(vec![n1, n2], 0), log1, log2)
}

#[tokio::test]
async fn start_dispatches_to_every_node() {
    let mut config = WorkerConfig::default();
    config.app = "myapp".to_string();
    config.concurrency = "4".to_string();
    config.ofair = "True".to_string();
    let (fleet, log1, log2) = two_node_fleet();

    let dispatcher = Dispatcher::new(20);
    let operation = StartWorkers::new(&config).unwrap();
    let report = operation.run(&fleet, &dispatcher).await.unwrap();
    dispatcher.shutdown().await;

    assert_eq!(report.len(), 2);
    assert!(report.all_succeeded());
    for log in [log1, log2] {
        let commands = log.lock().await;
        assert_eq!(commands.len(), 1);
        let executed = &commands[0];
        assert!(executed.command.contains("tmux new-session"));
        assert!(executed.command.contains("--queues celery"));
        assert!(executed.command.contains("--concurrency 4"));
        assert!(executed.command.contains("-Ofair"));
        assert_eq!(executed.user, "ubuntu");
        assert!(executed.silent);
    }
}

#[tokio::test]
async fn stop_kills_the_session_everywhere() {
    let config = WorkerConfig::default();
    let (fleet, log1, log2) = two_node_fleet();

    let dispatcher = Dispatcher::new(20);
    let report = StopWorkers::new(&config).run(&fleet, &dispatcher).await;
    dispatcher.shutdown().await;

    assert_eq!(report.len(), 2);
    assert!(report.all_succeeded());
    for log in [log1, log2] {
        let commands = log.lock().await;
        assert_eq!(commands.len(), 1);
        assert_eq!(commands[0].command, "tmux kill-session -t celery-celery");
    }
}

#[tokio::test]
async fn sync_runs_on_master_before_any_start() {
    let mut config = WorkerConfig::default();
    config.git_sync_dir = "~/src/app".to_string();
    let (fleet, master_log, worker_log) = two_node_fleet();

    let dispatcher = Dispatcher::new(20);
    let operation = StartWorkers::new(&config).unwrap();
    let report = operation.run(&fleet, &dispatcher).await.unwrap();
    dispatcher.shutdown().await;
    assert_eq!(report.len(), 2);

    // The master ran the sync first (streaming, not silent), then its own
    // start job through the pool.
    let master_commands = master_log.lock().await;
    assert_eq!(master_commands.len(), 2);
    let sync = &master_commands[0];
    assert!(sync.command.contains("git pull"));
    assert!(sync.command.contains("cd \"$HOME/src/app\""));
    assert!(!sync.silent);

    // Every start job began strictly after the sync completed.
    assert!(master_commands[1].timestamp >= sync.timestamp);
    let worker_commands = worker_log.lock().await;
    assert_eq!(worker_commands.len(), 1);
    assert!(worker_commands[0].timestamp >= sync.timestamp);
    assert!(worker_commands[0].command.contains("tmux new-session"));
}

#[tokio::test]
async fn no_sync_dir_skips_the_master_phase() {
    let config = WorkerConfig::default();
    let (fleet, master_log, _worker_log) = two_node_fleet();

    let dispatcher = Dispatcher::new(20);
    let operation = StartWorkers::new(&config).unwrap();
    operation.run(&fleet, &dispatcher).await.unwrap();
    dispatcher.shutdown().await;

    // Only the dispatched start job; no synchronous master execution.
    let master_commands = master_log.lock().await;
    assert_eq!(master_commands.len(), 1);
    assert!(master_commands[0].command.contains("tmux new-session"));
}

#[tokio::test]
async fn sync_fault_aborts_with_nothing_dispatched() {
    let mut config = WorkerConfig::default();
    config.git_sync_dir = "/srv/src".to_string();
    let mut master = MockTransport::new("n1");
    master.fail = true;
    let (master_node, master_log) = fleet_node(master);
    let (worker_node, worker_log) = fleet_node(MockTransport::new("n2"));
    let fleet = Fleet::new(vec![master_node, worker_node], 0);

    let dispatcher = Dispatcher::new(20);
    let operation = StartWorkers::new(&config).unwrap();
    let result = operation.run(&fleet, &dispatcher).await;
    dispatcher.shutdown().await;

    assert!(matches!(result, Err(MusterError::LocalCommandError(_))));
    assert_eq!(master_log.lock().await.len(), 1);
    assert!(worker_log.lock().await.is_empty());
}

#[tokio::test]
async fn sync_nonzero_exit_aborts_with_nothing_dispatched() {
    let mut config = WorkerConfig::default();
    config.git_sync_dir = "/srv/src".to_string();
    let mut master = MockTransport::new("n1");
    master.exit_code = 1;
    let (master_node, master_log) = fleet_node(master);
    let (worker_node, worker_log) = fleet_node(MockTransport::new("n2"));
    let fleet = Fleet::new(vec![master_node, worker_node], 0);

    let dispatcher = Dispatcher::new(20);
    let operation = StartWorkers::new(&config).unwrap();
    let result = operation.run(&fleet, &dispatcher).await;
    dispatcher.shutdown().await;

    match result {
        Err(MusterError::SyncFailed { alias, .. }) => assert_eq!(alias, "n1"),
        other => panic!("expected SyncFailed, got {:?}", other.map(|r| r.len())),
    }
    assert_eq!(master_log.lock().await.len(), 1);
    assert!(worker_log.lock().await.is_empty());
}

#[tokio::test]
async fn node_join_runs_one_command_directly() {
    let mut config = WorkerConfig::default();
    // A configured sync dir must not trigger a sync re-run on join.
    config.git_sync_dir = "/srv/src".to_string();
    let (fleet, master_log, joined_log) = two_node_fleet();

    let operation = StartWorkers::new(&config).unwrap();
    let status = operation
        .on_node_join(fleet.find("n2").unwrap())
        .await
        .unwrap();

    assert!(status.success());
    assert!(master_log.lock().await.is_empty());
    let commands = joined_log.lock().await;
    assert_eq!(commands.len(), 1);
    assert!(commands[0].command.contains("tmux new-session"));
    assert!(!commands[0].command.contains("git pull"));
}

#[tokio::test]
async fn per_node_failures_surface_after_the_barrier() {
    let config = WorkerConfig::default();
    let (good1, _log1) = fleet_node(MockTransport::new("n1"));
    let mut failing = MockTransport::new("n2");
    failing.fail = true;
    failing.delay_ms = 20;
    let (bad, _log2) = fleet_node(failing);
    let (good2, _log3) = fleet_node(MockTransport::new("n3"));
    let fleet = Fleet::new(vec![good1, bad, good2], 0);

    let dispatcher = Dispatcher::new(20);
    let operation = StartWorkers::new(&config).unwrap();
    let report = operation.run(&fleet, &dispatcher).await.unwrap();
    dispatcher.shutdown().await;

    // The failing node does not keep its siblings from completing, and the
    // barrier still covers all three.
    assert_eq!(report.len(), 3);
    let failures = report.failures();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].alias, "n2");
}
