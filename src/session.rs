//! SSH transport and the per-node command executor.
//!
//! `Transport` is the narrow seam the engine runs commands through; the real
//! implementation is `SshTransport` over an `openssh` multiplexed session.
//! `run_cmd` is the executor: it logs the command, switches the active
//! identity when needed, and propagates transport faults to the caller
//! unchanged.

use std::io::Write;
use std::process::ExitStatus;

use async_trait::async_trait;
use colored::ColoredString;
use colourado::Color;
use futures::future::join;
use openssh::{KnownHosts, Session as SshSession, Stdio};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::sync::Mutex;

use crate::error::MusterError;
use crate::host::NodeRef;

/// The account commands run as by default, and the one `run_cmd` switches
/// back to after running as anyone else.
pub const SUPERUSER: &str = "root";

/// What the orchestration engine needs from a remote node: identity
/// switching and blocking command execution.
#[async_trait]
pub trait Transport: Send + Sync {
    /// The node's alias, used to key dispatcher jobs.
    fn alias(&self) -> &str;

    /// Changes the identity subsequent `execute` calls run as.
    async fn switch_user(&self, user: &str) -> Result<(), MusterError>;

    /// Runs `cmd` on the node. `silent` discards remote output instead of
    /// streaming it.
    async fn execute(&self, cmd: &str, silent: bool) -> Result<ExitStatus, MusterError>;
}

/// Executes one composed command on one node as `user`.
///
/// Faults propagate unchanged: no retry, no interpretation. A failure here
/// must not affect commands running on sibling nodes, which is why nothing
/// is shared with them.
pub async fn run_cmd(
    transport: &dyn Transport,
    cmd: &str,
    user: &str,
    silent: bool,
) -> Result<ExitStatus, MusterError> {
    eprintln!("[muster] {}@{}: {}", user, transport.alias(), cmd);
    if user != SUPERUSER {
        transport.switch_user(user).await?;
    }
    let status = transport.execute(cmd, silent).await?;
    if user != SUPERUSER {
        transport.switch_user(SUPERUSER).await?;
    }
    Ok(status)
}

/// One multiplexed SSH connection to one fleet node.
pub struct SshTransport {
    node: NodeRef,
    colorhost: ColoredString,
    session: SshSession,
    active_user: Mutex<String>,
}

impl SshTransport {
    pub async fn connect(node: NodeRef, color: Color) -> Result<Self, MusterError> {
        let colorhost = node.prettify(color);
        let session = match SshSession::connect_mux(&node.addr, KnownHosts::Add).await {
            Ok(session) => session,
            Err(e) => {
                eprintln!("{} Failed to connect to node: {:?}", colorhost, e);
                return Err(e.into());
            }
        };
        eprintln!("{} Connected to node.", colorhost);
        Ok(Self {
            node,
            colorhost,
            session,
            active_user: Mutex::new(SUPERUSER.to_string()),
        })
    }

    pub async fn close(self) {
        eprintln!("{} Terminating connection.", self.colorhost);
        if let Err(e) = self.session.close().await {
            eprintln!("{} Error while terminating: {}", self.colorhost, e);
        }
    }

    async fn stream<B: AsyncRead + Unpin>(&self, stream: B) {
        let mut reader = BufReader::new(stream);
        let mut buf = Vec::new();
        loop {
            read_chunk(&mut reader, &mut buf)
                .await
                .expect("Failed to read from stream.");
            // An empty buffer means that EOF was reached.
            if buf.is_empty() {
                break;
            }
            // Drop the delimiter and decode lossily; worker output is not
            // guaranteed to be valid UTF-8.
            let line = String::from_utf8_lossy(&buf[..buf.len() - 1]).into_owned();
            // Without the lock, lines from concurrently running nodes get mixed.
            let stdout = std::io::stdout();
            let mut guard = stdout.lock();
            writeln!(guard, "{} {}", self.colorhost, line).unwrap();
            buf.clear();
        }
    }
}

#[async_trait]
impl Transport for SshTransport {
    fn alias(&self) -> &str {
        &self.node.alias
    }

    async fn switch_user(&self, user: &str) -> Result<(), MusterError> {
        *self.active_user.lock().await = user.to_string();
        Ok(())
    }

    async fn execute(&self, cmd: &str, silent: bool) -> Result<ExitStatus, MusterError> {
        let user = self.active_user.lock().await.clone();
        // Commands run through `sh -c` as the active user. `arg` escapes the
        // command string for the remote shell, so the composed command
        // arrives exactly as built.
        let mut command = if user == SUPERUSER {
            let mut command = self.session.command("sh");
            command.arg("-c").arg(cmd);
            command
        } else {
            let mut command = self.session.command("sudo");
            command.arg("-u").arg(&user).arg("sh").arg("-c").arg(cmd);
            command
        };
        if silent {
            command.stdout(Stdio::null()).stderr(Stdio::null());
        } else {
            command.stdout(Stdio::piped()).stderr(Stdio::piped());
        }
        let mut process = command.spawn().await?;
        if !silent {
            join(
                self.stream(process.stdout().take().unwrap()),
                self.stream(process.stderr().take().unwrap()),
            )
            .await;
        }
        let status = process.wait().await?;
        println!("{} === done ({}) ===", self.colorhost, status);
        Ok(status)
    }
}

/// Reads into `buf` until either `\r` or `\n` is met, delimiter included.
/// Leaves `buf` empty at EOF.
async fn read_chunk<B: AsyncRead + Unpin>(
    reader: &mut BufReader<B>,
    buf: &mut Vec<u8>,
) -> std::io::Result<()> {
    loop {
        let (done, used) = {
            let available = reader.fill_buf().await?;
            match memchr::memchr2(b'\r', b'\n', available) {
                Some(i) => {
                    buf.extend_from_slice(&available[..=i]);
                    (true, i + 1)
                }
                None => {
                    buf.extend_from_slice(available);
                    (false, available.len())
                }
            }
        };
        reader.consume(used);
        if done || used == 0 {
            return Ok(());
        }
    }
}
