//! Composing the sync, start, and stop command pipelines.
//!
//! Everything here is pure: a `WorkerConfig` goes in, fully-escaped shell
//! strings come out. The same config always yields byte-identical commands.
//! No further interpolation happens after build; the tmux session name
//! (`celery-<queue>`) alone disambiguates workers across nodes.

use crate::config::WorkerConfig;
use crate::error::MusterError;
use crate::quote::{quote_dir, quote_str};

/// Fixed prefix of the tmux session name. The full name is `celery-<queue>`.
pub const SESSION_PREFIX: &str = "celery-";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmdKind {
    Sync,
    Start,
    Stop,
}

/// A fully-escaped shell command string, safe to execute unmodified on any
/// node of the fleet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComposedCommand {
    kind: CmdKind,
    text: String,
}

impl ComposedCommand {
    fn new(kind: CmdKind, parts: Vec<String>) -> Self {
        Self {
            kind,
            text: parts.join("; "),
        }
    }

    pub fn kind(&self) -> CmdKind {
        self.kind
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }
}

impl std::fmt::Display for ComposedCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.write_str(&self.text)
    }
}

/// The three commands one `WorkerConfig` can yield. `sync` exists only when
/// a git sync directory is configured.
#[derive(Debug, Clone)]
pub struct WorkerCommands {
    pub sync: Option<ComposedCommand>,
    pub start: ComposedCommand,
    pub stop: ComposedCommand,
}

impl WorkerCommands {
    pub fn build(config: &WorkerConfig) -> Result<Self, MusterError> {
        let ofair = parse_bool("ofair", &config.ofair)?;
        let delete_pyc = parse_bool("delete_pyc_files", &config.delete_pyc_files)?;
        let concurrency = parse_int("concurrency", &config.concurrency)?;
        let maxtasksperchild = parse_int("maxtasksperchild", &config.maxtasksperchild)?;
        let heartbeat_interval = parse_int("heartbeat_interval", &config.heartbeat_interval)?;
        let history_limit = parse_int("tmux_history_limit", &config.tmux_history_limit)?
            .ok_or_else(|| {
                MusterError::config("tmux_history_limit", "an integer", &config.tmux_history_limit)
            })?;

        let queue = config.queue.trim();
        let worker_dir = config.worker_dir.trim();
        let remount_dir = config.remount_dir.trim();
        let git_sync_dir = config.git_sync_dir.trim();
        let session = format!("{}{}", SESSION_PREFIX, queue);

        // Master sync: fetch the latest source before any worker starts.
        let sync = if git_sync_dir.is_empty() {
            None
        } else {
            let mut parts = vec![];
            if !remount_dir.is_empty() {
                parts.push(format!("sudo mount -o remount {}", quote_dir(remount_dir)));
            }
            let hook = config.master_setup_cmd.trim();
            if !hook.is_empty() {
                parts.push(hook.to_string());
            }
            parts.push(format!("cd {}", quote_dir(git_sync_dir)));
            parts.push("git pull".to_string());
            parts.push("git submodule init".to_string());
            parts.push("git submodule update".to_string());
            if delete_pyc && !worker_dir.is_empty() {
                parts.push(format!(
                    "find {} -name '*.pyc' -delete",
                    quote_dir(worker_dir)
                ));
            }
            Some(ComposedCommand::new(CmdKind::Sync, parts))
        };

        // Command that runs inside the tmux session.
        let mut session_parts = vec![
            // Double quotes so the remote shell expands $LD_LIBRARY_PATH.
            format!(
                "export LD_LIBRARY_PATH=\"{}:$LD_LIBRARY_PATH\"",
                config.ld_library_path.trim()
            ),
        ];
        if !worker_dir.is_empty() {
            session_parts.push(format!("cd {}", quote_dir(worker_dir)));
        }
        let hook = config.worker_setup_cmd.trim();
        if !hook.is_empty() {
            session_parts.push(hook.to_string());
        }

        // An empty celery_cmd skips the worker invocation entirely.
        let celery_cmd = config.celery_cmd.trim();
        if !celery_cmd.is_empty() {
            let mut args = vec![
                quote_str(celery_cmd),
                "worker".to_string(),
                "--hostname".to_string(),
                quote_str(&format!("%h-{}", queue)),
                "--queues".to_string(),
                quote_str(queue),
            ];
            let app = config.app.trim();
            if !app.is_empty() {
                args.push("--app".to_string());
                args.push(quote_str(app));
            }
            let broker = config.broker.trim();
            if !broker.is_empty() {
                args.push("--broker".to_string());
                args.push(quote_str(broker));
            }
            if let Some(n) = concurrency {
                args.push("--concurrency".to_string());
                args.push(n.to_string());
            }
            if let Some(n) = maxtasksperchild {
                args.push("--maxtasksperchild".to_string());
                args.push(n.to_string());
            }
            if let Some(n) = heartbeat_interval {
                args.push("--heartbeat-interval".to_string());
                args.push(n.to_string());
            }
            let loglevel = config.loglevel.trim();
            if !loglevel.is_empty() {
                args.push("--loglevel".to_string());
                args.push(quote_str(loglevel));
            }
            if ofair {
                args.push("-Ofair".to_string());
            }
            session_parts.push(args.join(" "));
        }

        // Keep the session around for inspection after the worker exits.
        session_parts.push("read".to_string());
        // Some of the above needs bash, not sh.
        let session_cmd = format!("bash -c {}", quote_str(&session_parts.join("; ")));

        // Kill before remount so the stale worker doesn't hold the mount;
        // create after remount so the new session sees the fresh one.
        let mut start_parts = vec![format!("tmux kill-session -t {}", quote_str(&session))];
        if !remount_dir.is_empty() {
            start_parts.push(format!("sudo mount -o remount {}", quote_dir(remount_dir)));
        }
        start_parts.push(format!(
            "tmux new-session -s {} -d {}",
            quote_str(&session),
            quote_str(&session_cmd)
        ));
        start_parts.push(format!(
            "tmux set-option -t {} history-limit {}",
            quote_str(&session),
            history_limit
        ));
        let start = ComposedCommand::new(CmdKind::Start, start_parts);

        Ok(Self {
            sync,
            start,
            stop: stop_command(queue),
        })
    }
}

/// Builds the stop command alone. Stopping needs nothing but the queue name,
/// so it skips the rest of the config validation.
pub fn stop_command(queue: &str) -> ComposedCommand {
    let session = format!("{}{}", SESSION_PREFIX, queue.trim());
    ComposedCommand::new(
        CmdKind::Stop,
        vec![format!("tmux kill-session -t {}", quote_str(&session))],
    )
}

/// Strict two-valued vocabulary: exactly `True` or `False` after trimming.
/// An empty (or all-whitespace) value counts as `False`.
fn parse_bool(field: &'static str, value: &str) -> Result<bool, MusterError> {
    match value.trim() {
        "" | "False" => Ok(false),
        "True" => Ok(true),
        other => Err(MusterError::config(field, "'True' or 'False'", other)),
    }
}

/// Empty means "omit the flag"; anything else must parse as an integer.
fn parse_int(field: &'static str, value: &str) -> Result<Option<u64>, MusterError> {
    let value = value.trim();
    if value.is_empty() {
        return Ok(None);
    }
    value
        .parse::<u64>()
        .map(Some)
        .map_err(|_| MusterError::config(field, "an integer", value))
}
