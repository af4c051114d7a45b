//! Configuration for Muster.
//!
//! Holds the clap structs for command line arguments and flags, plus the
//! `WorkerConfig` record read from the worker YAML file. `WorkerConfig`
//! deliberately keeps every field as a string: validation (strict booleans,
//! integer parsing) happens once, when commands are built from it.

use std::fs::File;

use clap::{Parser, ValueEnum};
use serde::Deserialize;

use crate::error::MusterError;

#[derive(Parser)]
#[command(version, author)]
pub struct Config {
    /// Start (s), Stop (k), and single-node Add (a) mode
    #[arg(value_enum)]
    pub mode: Mode,

    /// (Add mode) Alias of the node to start a worker on
    #[arg(long)]
    pub node: Option<String>,

    /// Alias of the master node. Defaults to the first node in the hosts file
    #[arg(long)]
    pub master: Option<String>,

    /// Number of concurrent node dispatches
    #[arg(long, default_value = "20")]
    pub pool_size: usize,

    /// Hosts file to use. Defaults to `hosts.yaml`
    #[arg(long, default_value = "hosts.yaml")]
    pub hosts_file: String,

    /// Worker config file to use. Defaults to `worker.yaml`
    #[arg(long, default_value = "worker.yaml")]
    pub worker_file: String,
}

#[derive(PartialEq, Clone, ValueEnum)]
pub enum Mode {
    #[value(name = "s")]
    Start,
    #[value(name = "k")]
    Stop,
    #[value(name = "a")]
    Add,
}

/// Tunables for the Celery worker fleet, read from the worker YAML file.
///
/// Boolean-like fields accept exactly `"True"` or `"False"`. Numeric fields
/// must parse as integers when non-empty; empty means "use the consumer
/// binary's own default" and the flag is omitted from the built command.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WorkerConfig {
    /// Queue (and routing key) the workers consume from.
    pub queue: String,
    /// Celery binary. Empty skips the worker invocation inside the session.
    pub celery_cmd: String,
    /// Celery application module (`--app`).
    pub app: String,
    /// Broker URL (`--broker`).
    pub broker: String,
    /// Worker concurrency (`--concurrency`).
    pub concurrency: String,
    /// Tasks per child process before recycling (`--maxtasksperchild`).
    pub maxtasksperchild: String,
    /// Broker heartbeat in seconds (`--heartbeat-interval`).
    pub heartbeat_interval: String,
    /// Worker log level (`--loglevel`).
    pub loglevel: String,
    /// Emit the bare `-Ofair` scheduling flag.
    pub ofair: String,
    /// Directory the worker runs in.
    pub worker_dir: String,
    /// Prepended to LD_LIBRARY_PATH inside the session.
    pub ld_library_path: String,
    /// Filesystem path to remount before starting. Empty disables.
    pub remount_dir: String,
    /// Git checkout to sync on the master before dispatch. Empty disables
    /// the whole sync phase.
    pub git_sync_dir: String,
    /// Delete stale .pyc files under worker_dir during sync.
    pub delete_pyc_files: String,
    /// tmux scrollback limit for the worker session.
    pub tmux_history_limit: String,
    /// OS user the remote commands run as.
    pub user: String,
    /// Raw hook run inside the session before the worker starts.
    pub worker_setup_cmd: String,
    /// Raw hook run on the master during sync, before the git steps.
    pub master_setup_cmd: String,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            queue: "celery".to_string(),
            celery_cmd: "celery".to_string(),
            app: String::new(),
            broker: String::new(),
            concurrency: String::new(),
            maxtasksperchild: "1024".to_string(),
            heartbeat_interval: "5".to_string(),
            loglevel: "info".to_string(),
            ofair: "True".to_string(),
            worker_dir: String::new(),
            ld_library_path: "/usr/local/lib".to_string(),
            remount_dir: String::new(),
            git_sync_dir: String::new(),
            delete_pyc_files: "True".to_string(),
            tmux_history_limit: "8000".to_string(),
            user: "ubuntu".to_string(),
            worker_setup_cmd: String::new(),
            master_setup_cmd: String::new(),
        }
    }
}

impl WorkerConfig {
    pub fn from_file(path: &str) -> Result<Self, MusterError> {
        let file = File::open(path)?;
        Ok(serde_yaml::from_reader(file)?)
    }
}
