//! Fleet start/stop orchestration.
//!
//! `StartWorkers` runs the one-time sync on the master, then fans the start
//! command out to every node through the dispatcher and blocks on the
//! completion barrier. `StopWorkers` skips sync and fans out the kill.
//! Commands are built once, at operation construction; configuration errors
//! surface there, before anything touches a node.

use std::process::ExitStatus;
use std::sync::Arc;

use crate::command::{stop_command, ComposedCommand, WorkerCommands};
use crate::config::WorkerConfig;
use crate::error::MusterError;
use crate::host::NodeRef;
use crate::pool::{Dispatcher, FleetReport, Job};
use crate::session::{run_cmd, Transport};

/// One fleet node with its connected transport.
pub struct FleetNode {
    pub node: NodeRef,
    pub transport: Arc<dyn Transport>,
}

/// The nodes targeted by one operation, plus the distinguished master.
/// The master takes a start job like any other node iff it is in the list.
pub struct Fleet {
    nodes: Vec<FleetNode>,
    master: usize,
}

impl Fleet {
    pub fn new(nodes: Vec<FleetNode>, master: usize) -> Self {
        assert!(master < nodes.len(), "master index out of range");
        Self { nodes, master }
    }

    pub fn nodes(&self) -> &[FleetNode] {
        &self.nodes
    }

    pub fn master(&self) -> &FleetNode {
        &self.nodes[self.master]
    }

    pub fn find(&self, alias: &str) -> Option<&FleetNode> {
        self.nodes.iter().find(|n| n.node.alias == alias)
    }
}

/// The Start operation: sync once on the master, then start a worker
/// session on every node.
pub struct StartWorkers {
    commands: WorkerCommands,
    user: String,
}

impl StartWorkers {
    pub fn new(config: &WorkerConfig) -> Result<Self, MusterError> {
        Ok(Self {
            commands: WorkerCommands::build(config)?,
            user: config.user.trim().to_string(),
        })
    }

    /// Starts workers on the whole fleet.
    ///
    /// The sync command, when configured, runs to completion on the master
    /// before any job is submitted; code pulled there must be visible to
    /// workers that may share the filesystem. A transport fault or non-zero
    /// exit during sync aborts the operation with nothing dispatched.
    pub async fn run(
        &self,
        fleet: &Fleet,
        dispatcher: &Dispatcher,
    ) -> Result<FleetReport, MusterError> {
        if let Some(sync) = &self.commands.sync {
            let master = fleet.master();
            let status =
                run_cmd(master.transport.as_ref(), sync.as_str(), &self.user, false).await?;
            if !status.success() {
                return Err(MusterError::SyncFailed {
                    alias: master.node.alias.clone(),
                    status,
                });
            }
        }
        for node in fleet.nodes() {
            dispatcher
                .submit(Job::new(
                    Arc::clone(&node.transport),
                    self.commands.start.as_str().to_string(),
                    self.user.clone(),
                ))
                .await;
        }
        Ok(dispatcher.wait(fleet.nodes().len()).await)
    }

    /// Starts a worker on a single node joining an already-running fleet.
    /// No sync re-run, no dispatcher; runs directly and synchronously.
    pub async fn on_node_join(&self, node: &FleetNode) -> Result<ExitStatus, MusterError> {
        run_cmd(
            node.transport.as_ref(),
            self.commands.start.as_str(),
            &self.user,
            true,
        )
        .await
    }
}

/// The Stop operation: kill the worker session on every node.
pub struct StopWorkers {
    stop: ComposedCommand,
    user: String,
}

impl StopWorkers {
    pub fn new(config: &WorkerConfig) -> Self {
        Self {
            stop: stop_command(&config.queue),
            user: config.user.trim().to_string(),
        }
    }

    pub async fn run(&self, fleet: &Fleet, dispatcher: &Dispatcher) -> FleetReport {
        for node in fleet.nodes() {
            dispatcher
                .submit(Job::new(
                    Arc::clone(&node.transport),
                    self.stop.as_str().to_string(),
                    self.user.clone(),
                ))
                .await;
        }
        dispatcher.wait(fleet.nodes().len()).await
    }
}
