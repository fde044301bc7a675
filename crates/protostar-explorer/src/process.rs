//! Process spawning for the test runner
//!
//! The engine never touches `tokio::process` directly: it asks a
//! [`ProcessSpawner`] for a [`RunningProcess`] whose output streams and exit
//! can be awaited. [`TokioSpawner`] is the real implementation; tests script
//! their own.

use futures_util::future::{BoxFuture, FutureExt};
use std::fmt;
use std::io;
use std::path::PathBuf;
use std::pin::Pin;
use std::process::Stdio;
use tokio::io::AsyncRead;
use tokio::process::Command;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Byte stream of a child process pipe
pub type BoxedReader = Pin<Box<dyn AsyncRead + Send>>;

/// A command line to execute in a working directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: PathBuf,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>, args: Vec<String>, cwd: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args,
            cwd: cwd.into(),
        }
    }
}

/// Renders as `(<cwd>) > <program> <args>`
impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}) > {}", self.cwd.display(), self.program)?;
        if !self.args.is_empty() {
            write!(f, " {}", self.args.join(" "))?;
        }
        Ok(())
    }
}

/// A spawned child process
pub struct RunningProcess {
    pub pid: Option<u32>,
    pub stdout: BoxedReader,
    pub stderr: BoxedReader,
    /// Resolves with the exit code once the process is gone; `None` when it
    /// was ended by a signal
    pub exit: BoxFuture<'static, io::Result<Option<i32>>>,
}

impl fmt::Debug for RunningProcess {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunningProcess")
            .field("pid", &self.pid)
            .finish_non_exhaustive()
    }
}

/// Starts child processes
pub trait ProcessSpawner: Send + Sync {
    /// Spawn `command`; cancelling `kill` must terminate the process without
    /// waiting for anyone to poll the returned exit future
    fn spawn(&self, command: &CommandSpec, kill: CancellationToken) -> io::Result<RunningProcess>;
}

/// Spawner backed by `tokio::process`
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSpawner;

impl ProcessSpawner for TokioSpawner {
    fn spawn(&self, command: &CommandSpec, kill: CancellationToken) -> io::Result<RunningProcess> {
        let mut child = Command::new(&command.program)
            .args(&command.args)
            .current_dir(&command.cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let pid = child.id();
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| io::Error::new(io::ErrorKind::BrokenPipe, "stdout not captured"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| io::Error::new(io::ErrorKind::BrokenPipe, "stderr not captured"))?;

        debug!(program = %command.program, pid = ?pid, cwd = %command.cwd.display(), "spawned runner");

        // Owned by its own task: a kill must land even while `exit` is not polled
        let (status_tx, status_rx) = oneshot::channel();
        tokio::spawn(async move {
            let status = tokio::select! {
                status = child.wait() => status,
                () = kill.cancelled() => {
                    info!(pid = ?pid, "cancellation requested; killing runner");
                    if let Err(err) = child.kill().await {
                        warn!(pid = ?pid, error = %err, "failed to kill runner");
                    }
                    child.wait().await
                }
            };
            let _ = status_tx.send(status.map(|s| s.code()));
        });

        let exit = async move {
            status_rx
                .await
                .map_err(|_| io::Error::other("runner task ended without a status"))?
        }
        .boxed();

        Ok(RunningProcess {
            pid,
            stdout: Box::pin(stdout),
            stderr: Box::pin(stderr),
            exit,
        })
    }
}
