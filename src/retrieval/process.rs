//! One invocation of the retrieval tool as a cancellable, time-bounded subprocess

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::artifact::list_files;
use crate::error::{DownloadError, Error, Result};

/// Longest stderr excerpt kept in [`DownloadError::ProcessFailed`]
const MAX_STDERR_BYTES: usize = 4096;

/// Program, arguments and working directory of one tool run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    program: PathBuf,
    args: Vec<OsString>,
    working_dir: PathBuf,
    list_outputs: bool,
}

impl Invocation {
    /// Start an invocation of `program` running in `working_dir`
    pub fn new(program: impl Into<PathBuf>, working_dir: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            working_dir: working_dir.into(),
            list_outputs: true,
        }
    }

    /// Do not report the working directory's files (metadata-only runs)
    pub fn without_outputs(mut self) -> Self {
        self.list_outputs = false;
        self
    }

    /// Append one argument
    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Append several arguments
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Executable
    pub fn program(&self) -> &Path {
        &self.program
    }

    /// Arguments, in order
    pub fn arguments(&self) -> &[OsString] {
        &self.args
    }

    /// Directory the process runs in and whose files are reported
    pub fn working_dir(&self) -> &Path {
        &self.working_dir
    }
}

/// What a successful tool run left behind
#[derive(Debug, Clone, Default)]
pub struct RetrievalOutcome {
    /// Exit code (0 for a successful run)
    pub exit_code: Option<i32>,
    /// Captured standard output
    pub stdout: String,
    /// Captured standard error
    pub stderr: String,
    /// Regular files in the working directory after the run, sorted by name
    pub files: Vec<PathBuf>,
    /// Earlier outputs the tool reported as already present instead of fetching again
    pub reused: Vec<PathBuf>,
}

enum Waited {
    Exited(std::io::Result<std::process::ExitStatus>),
    TimedOut,
    Cancelled,
}

/// Runs the retrieval tool
///
/// The wait is fully asynchronous, so up to `timeout` of tool runtime never ties up a
/// runtime worker.
pub struct RetrievalProcess;

impl RetrievalProcess {
    /// Run `invocation` to completion, for at most `timeout`
    ///
    /// # Errors
    ///
    /// - [`DownloadError::Timeout`] when the budget is exceeded; the process is killed first
    /// - [`DownloadError::Cancelled`] when `cancel` fires; the process is killed first
    /// - [`DownloadError::ProcessFailed`] on a non-zero exit
    /// - [`Error::ExternalTool`] when the program cannot be started
    pub async fn run(
        invocation: &Invocation,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<RetrievalOutcome> {
        let mut command = Command::new(invocation.program());
        command
            .args(invocation.arguments())
            .current_dir(invocation.working_dir())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        // Own process group, so helpers the tool spawns (ffmpeg) die with it
        #[cfg(unix)]
        command.process_group(0);

        let mut child = command.spawn().map_err(|e| {
            Error::ExternalTool(format!(
                "Failed to execute {}: {}",
                invocation.program().display(),
                e
            ))
        })?;
        let mut group = GroupGuard::new(&child);
        debug!(
            pid = child.id(),
            program = ?invocation.program(),
            "retrieval tool started"
        );

        // Drain both pipes concurrently; a full pipe would otherwise stall the child
        let stdout = child.stdout.take().map(|s| tokio::spawn(drain(s)));
        let stderr = child.stderr.take().map(|s| tokio::spawn(drain(s)));

        let waited = tokio::select! {
            status = child.wait() => Waited::Exited(status),
            _ = tokio::time::sleep(timeout) => Waited::TimedOut,
            _ = cancel.cancelled() => Waited::Cancelled,
        };

        match waited {
            Waited::Exited(status) => {
                // Reaped: the pid may be reused from here on
                group.disarm();
                let status = status?;
                let stdout = collect(stdout).await;
                let stderr = collect(stderr).await;

                if !status.success() {
                    return Err(DownloadError::ProcessFailed {
                        exit_code: status.code(),
                        stderr: tail(stderr.trim(), MAX_STDERR_BYTES).to_string(),
                    }
                    .into());
                }

                let files = if invocation.list_outputs {
                    list_files(invocation.working_dir()).await?
                } else {
                    Vec::new()
                };
                Ok(RetrievalOutcome {
                    exit_code: status.code(),
                    stdout,
                    stderr,
                    files,
                    reused: Vec::new(),
                })
            }
            Waited::TimedOut => {
                warn!(
                    timeout_secs = timeout.as_secs(),
                    "retrieval tool timed out, killing it"
                );
                terminate(&mut child, &mut group).await;
                abort(stdout);
                abort(stderr);
                Err(DownloadError::Timeout { timeout }.into())
            }
            Waited::Cancelled => {
                debug!("retrieval cancelled, killing tool");
                terminate(&mut child, &mut group).await;
                abort(stdout);
                abort(stderr);
                Err(DownloadError::Cancelled.into())
            }
        }
    }
}

async fn drain<R: AsyncRead + Unpin>(mut reader: R) -> Vec<u8> {
    let mut buf = Vec::new();
    if let Err(e) = reader.read_to_end(&mut buf).await {
        debug!(error = %e, "failed to read tool output");
    }
    buf
}

async fn collect(handle: Option<JoinHandle<Vec<u8>>>) -> String {
    match handle {
        Some(h) => h
            .await
            .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
            .unwrap_or_default(),
        None => String::new(),
    }
}

fn abort(handle: Option<JoinHandle<Vec<u8>>>) {
    if let Some(h) = handle {
        h.abort();
    }
}

/// Kills the tool's process group when dropped
///
/// `kill_on_drop` only reaches the direct child; this also takes down the helpers it
/// spawned when the future running the tool is dropped halfway.
struct GroupGuard {
    pgid: Option<u32>,
}

impl GroupGuard {
    fn new(child: &Child) -> Self {
        Self { pgid: child.id() }
    }

    /// Signal the whole group, at most once
    fn kill(&mut self) {
        let Some(pgid) = self.pgid.take() else {
            return;
        };
        #[cfg(unix)]
        {
            debug!(pgid, "killing retrieval tool process group");
            // SAFETY: killpg only sends a signal; the group id is the child we spawned
            // with process_group(0), which has not been reaped yet
            unsafe {
                libc::killpg(pgid as libc::pid_t, libc::SIGKILL);
            }
        }
        #[cfg(not(unix))]
        let _ = pgid;
    }

    fn disarm(&mut self) {
        self.pgid = None;
    }
}

impl Drop for GroupGuard {
    fn drop(&mut self) {
        self.kill();
    }
}

/// Kill the child and its process group, then reap it
async fn terminate(child: &mut Child, group: &mut GroupGuard) {
    group.kill();

    if let Err(e) = child.kill().await {
        debug!(error = %e, "kill after group signal failed");
        // Still reap it so no zombie is left behind
        child.wait().await.ok();
    }
}

/// Last `max` bytes of `s`, cut at a char boundary
fn tail(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut start = s.len() - max;
    while !s.is_char_boundary(start) {
        start += 1;
    }
    &s[start..]
}
