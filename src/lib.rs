//! Muster: start and stop Celery worker fleets over SSH.

// Serde helper module.
mod serde;
// Command line arguments and worker configuration.
pub mod config;
// How to parse and represent fleet nodes.
pub mod host;
// Shell quoting for configuration values.
pub mod quote;
// Composing the sync/start/stop command pipelines.
pub mod command;
// Bounded dispatch of node jobs.
pub mod pool;
// Fleet start/stop orchestration.
pub mod ops;
// SSH transport and the node executor.
pub mod session;
// Error handling.
pub mod error;

pub use command::{stop_command, CmdKind, ComposedCommand, WorkerCommands, SESSION_PREFIX};
pub use config::{Config, Mode, WorkerConfig};
pub use error::MusterError;
pub use host::{get_nodes, NodeRef};
pub use ops::{Fleet, FleetNode, StartWorkers, StopWorkers};
pub use pool::{Dispatcher, FleetReport, Job, JobOutcome};
pub use quote::{quote_dir, quote_str};
pub use session::{run_cmd, SshTransport, Transport, SUPERUSER};
