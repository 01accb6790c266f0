//! Child process execution with live passthrough
//!
//! The wrapped tool's stdout and stderr are each read by their own task so a
//! full pipe on one stream never blocks the other. Bytes go to the console as
//! they arrive; complete lines go to a [`LineObserver`] in arrival order per
//! stream. There is no ordering guarantee between the two streams.

pub mod stream;

use chrono::{DateTime, Utc};
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tokio::process::Command;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};

/// Exit code reported when the run was interrupted
pub const INTERRUPTED_EXIT_CODE: i32 = 130;

/// How long to wait for the readers once the child is gone
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Which output stream a line came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stream {
    Stdout,
    Stderr,
}

/// Receives each complete output line
///
/// Called from both reader tasks concurrently; calls for one stream are
/// sequential and in the order the tool emitted the lines.
pub trait LineObserver: Send + Sync {
    fn observe(&self, stream: Stream, line: &str);
}

/// Observer that ignores every line
pub struct NullObserver;

impl LineObserver for NullObserver {
    fn observe(&self, _stream: Stream, _line: &str) {}
}

/// A command line to run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    pub env: Vec<(String, String)>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: None,
            env: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Shell-like rendering for logs
    pub fn display(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Outcome of one process run
#[derive(Debug, Clone)]
pub struct ExecutionResult {
    pub stdout_text: String,
    pub stderr_text: String,
    pub exit_code: i32,
    pub duration: Duration,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    /// Killed because of Ctrl-C or an explicit cancel
    pub interrupted: bool,
}

impl ExecutionResult {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Kills the run that is in progress when [`cancel`](CancelHandle::cancel) is called
///
/// Each run arms its own token, so a cancel issued while nothing is running
/// is dropped instead of being held for the next run.
#[derive(Debug, Clone, Default)]
pub struct CancelHandle {
    active: Arc<Mutex<Option<Arc<Notify>>>>,
}

impl CancelHandle {
    /// Returns false when no run was in progress
    pub fn cancel(&self) -> bool {
        match &*lock(&self.active) {
            Some(token) => {
                token.notify_one();
                true
            }
            None => false,
        }
    }

    pub fn is_running(&self) -> bool {
        lock(&self.active).is_some()
    }

    fn arm(&self) -> ArmedRun {
        let token = Arc::new(Notify::new());
        *lock(&self.active) = Some(token.clone());
        ArmedRun {
            handle: self.clone(),
            token,
        }
    }
}

/// Token of one run; disarms the handle when dropped
struct ArmedRun {
    handle: CancelHandle,
    token: Arc<Notify>,
}

impl Drop for ArmedRun {
    fn drop(&mut self) {
        let mut active = lock(&self.handle.active);
        if active.as_ref().is_some_and(|t| Arc::ptr_eq(t, &self.token)) {
            *active = None;
        }
    }
}

/// Spawns build tools and streams their output
pub struct ProcessExecutor {
    echo: bool,
    cancel: CancelHandle,
}

impl ProcessExecutor {
    /// `echo` forwards the child's output to this process's stdout/stderr
    pub fn new(echo: bool) -> Self {
        Self {
            echo,
            cancel: CancelHandle::default(),
        }
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    /// Run `spec` to completion
    ///
    /// Fails only when the program cannot be spawned. A non-zero exit or an
    /// interrupt is reported in the result.
    pub async fn execute(
        &self,
        spec: &CommandSpec,
        observer: Arc<dyn LineObserver>,
    ) -> Result<ExecutionResult> {
        let mut cmd = Command::new(&spec.program);
        cmd.args(&spec.args)
            .stdin(Stdio::inherit())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &spec.cwd {
            cmd.current_dir(dir);
        }
        for (key, value) in &spec.env {
            cmd.env(key, value);
        }

        let run = self.cancel.arm();
        let started_at = Utc::now();
        let start = Instant::now();

        let mut child = cmd.spawn().map_err(|source| Error::ToolNotFound {
            program: spec.program.clone(),
            source,
        })?;

        debug!(command = %spec.display(), pid = ?child.id(), "Spawned process");

        let stdout_buf = Arc::new(Mutex::new(Vec::new()));
        let stderr_buf = Arc::new(Mutex::new(Vec::new()));

        let mut readers: Vec<JoinHandle<std::io::Result<()>>> = Vec::with_capacity(2);
        if let Some(out) = child.stdout.take() {
            readers.push(tokio::spawn(stream::pump(
                out,
                self.echo.then(tokio::io::stdout),
                Stream::Stdout,
                stdout_buf.clone(),
                observer.clone(),
            )));
        }
        if let Some(err) = child.stderr.take() {
            readers.push(tokio::spawn(stream::pump(
                err,
                self.echo.then(tokio::io::stderr),
                Stream::Stderr,
                stderr_buf.clone(),
                observer.clone(),
            )));
        }

        let (exit_code, interrupted) = tokio::select! {
            status = child.wait() => (exit_code_of(status?), false),
            _ = run.token.notified() => (INTERRUPTED_EXIT_CODE, true),
            _ = interrupt_signal() => (INTERRUPTED_EXIT_CODE, true),
        };

        if interrupted {
            warn!(command = %spec.display(), "Interrupted, killing child process");
            if let Err(e) = child.kill().await {
                warn!("Failed to kill child process: {}", e);
            }
        }
        drop(run);

        let duration = start.elapsed();
        let ended_at = Utc::now();

        for mut reader in readers {
            match tokio::time::timeout(DRAIN_TIMEOUT, &mut reader).await {
                Ok(Ok(Ok(()))) => {}
                Ok(Ok(Err(e))) => warn!("Output reader failed: {}", e),
                Ok(Err(e)) => warn!("Output reader panicked: {}", e),
                Err(_) => {
                    warn!("Output stream still open after exit, abandoning reader");
                    reader.abort();
                }
            }
        }

        info!(
            command = %spec.display(),
            exit_code,
            interrupted,
            duration_secs = duration.as_secs_f64(),
            "Process finished"
        );

        Ok(ExecutionResult {
            stdout_text: take_text(&stdout_buf),
            stderr_text: take_text(&stderr_buf),
            exit_code,
            duration,
            started_at,
            ended_at,
            interrupted,
        })
    }
}

impl Default for ProcessExecutor {
    fn default() -> Self {
        Self::new(true)
    }
}

/// Resolves on Ctrl-C; never resolves if the handler cannot be installed
async fn interrupt_signal() {
    if tokio::signal::ctrl_c().await.is_err() {
        std::future::pending::<()>().await;
    }
}

fn exit_code_of(status: ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }
    -1
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn take_text(buf: &Arc<Mutex<Vec<u8>>>) -> String {
    let bytes = std::mem::take(&mut *lock(buf));
    String::from_utf8_lossy(&bytes).into_owned()
}
