//! Subprocess execution with timeout.
//!
//! Shared by the shell extension and the CLI backends. Stdout and stderr
//! are drained concurrently; a process that outlives its timeout receives
//! SIGTERM, then SIGKILL if it is still alive after [`TERM_GRACE`], and the
//! result is flagged `timed_out`.
//!
//! Extensions are synchronous, so [`run_blocking`] bridges into tokio: it
//! reuses the ambient runtime when called from a blocking thread of one
//! (e.g. inside `spawn_blocking`) and otherwise builds a throwaway
//! current-thread runtime.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tracing::{debug, warn};

/// How long a timed-out child gets to exit after SIGTERM before SIGKILL.
pub const TERM_GRACE: Duration = Duration::from_millis(500);

/// A command line to spawn.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    /// Written to the child's stdin, which is then closed.
    pub stdin: Option<String>,
    pub cwd: Option<PathBuf>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            ..Self::default()
        }
    }

    /// `sh -c <script>`.
    pub fn shell(script: impl Into<String>) -> Self {
        Self::new("sh").arg("-c").arg(script)
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

    pub fn stdin(mut self, input: impl Into<String>) -> Self {
        self.stdin = Some(input.into());
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }
}

/// Captured result of a finished (or killed) process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessOutput {
    pub stdout: String,
    pub stderr: String,
    /// `None` when the process was killed by a signal.
    pub exit_code: Option<i32>,
    pub timed_out: bool,
}

impl ProcessOutput {
    /// Exit code 0 and no timeout.
    pub fn success(&self) -> bool {
        self.exit_code == Some(0) && !self.timed_out
    }

    /// Stdout followed by stderr.
    pub fn combined(&self) -> String {
        let mut out = self.stdout.clone();
        out.push_str(&self.stderr);
        out
    }
}

/// Spawns `spec` and waits for it, bounded by `timeout` when given.
///
/// Output captured before a timeout is discarded.
pub async fn run(spec: &CommandSpec, timeout: Option<Duration>) -> std::io::Result<ProcessOutput> {
    let mut command = Command::new(&spec.program);
    command.args(&spec.args);
    command.stdout(Stdio::piped());
    command.stderr(Stdio::piped());
    command.kill_on_drop(true);

    if let Some(ref cwd) = spec.cwd {
        command.current_dir(cwd);
    }

    if spec.stdin.is_some() {
        command.stdin(Stdio::piped());
    } else {
        command.stdin(Stdio::null());
    }

    debug!(program = %spec.program, args = ?spec.args, cwd = ?spec.cwd, "Spawning process");

    let mut child = command.spawn()?;

    if let Some(ref input) = spec.stdin
        && let Some(mut stdin) = child.stdin.take()
    {
        // A child that exits without reading its input closes the pipe early
        if let Err(e) = stdin.write_all(input.as_bytes()).await
            && e.kind() != std::io::ErrorKind::BrokenPipe
        {
            return Err(e);
        }
        drop(stdin);
    }

    let stdout_handle = child.stdout.take();
    let stderr_handle = child.stderr.take();

    // Drain both pipes together so a full stderr buffer cannot stall stdout
    let streams = async {
        let stdout_future = async {
            let mut buf = Vec::new();
            if let Some(mut stdout) = stdout_handle {
                stdout.read_to_end(&mut buf).await?;
            }
            Ok::<_, std::io::Error>(buf)
        };

        let stderr_future = async {
            let mut buf = Vec::new();
            if let Some(mut stderr) = stderr_handle {
                stderr.read_to_end(&mut buf).await?;
            }
            Ok::<_, std::io::Error>(buf)
        };

        tokio::try_join!(stdout_future, stderr_future)
    };

    let mut timed_out = false;
    let (stdout, stderr) = match timeout {
        Some(duration) => match tokio::time::timeout(duration, streams).await {
            Ok(result) => result?,
            Err(_) => {
                warn!(
                    program = %spec.program,
                    timeout_ms = duration.as_millis() as u64,
                    "Process timeout reached, sending SIGTERM"
                );
                timed_out = true;
                terminate_child(&mut child);
                (Vec::new(), Vec::new())
            }
        },
        None => streams.await?,
    };

    let status = if timed_out {
        reap_after_sigterm(&mut child, &spec.program).await?
    } else {
        child.wait().await?
    };

    Ok(ProcessOutput {
        stdout: String::from_utf8_lossy(&stdout).into_owned(),
        stderr: String::from_utf8_lossy(&stderr).into_owned(),
        exit_code: status.code(),
        timed_out,
    })
}

async fn reap_after_sigterm(
    child: &mut tokio::process::Child,
    program: &str,
) -> std::io::Result<std::process::ExitStatus> {
    if let Ok(status) = tokio::time::timeout(TERM_GRACE, child.wait()).await {
        return status;
    }

    warn!(program = %program, grace_ms = TERM_GRACE.as_millis() as u64, "Process ignored SIGTERM, sending SIGKILL");
    if let Err(e) = child.start_kill() {
        debug!(error = %e, "SIGKILL not delivered");
    }
    child.wait().await
}

/// Synchronous wrapper around [`run`].
///
/// Must not be called from inside an async task; use it from plain threads
/// or from `spawn_blocking`.
pub fn run_blocking(spec: &CommandSpec, timeout: Option<Duration>) -> std::io::Result<ProcessOutput> {
    if let Ok(handle) = tokio::runtime::Handle::try_current() {
        return handle.block_on(run(spec, timeout));
    }

    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?
        .block_on(run(spec, timeout))
}

#[cfg(unix)]
fn terminate_child(child: &mut tokio::process::Child) {
    use nix::sys::signal::{Signal, kill};
    use nix::unistd::Pid;

    if let Some(pid) = child.id() {
        let pid = Pid::from_raw(pid as i32);
        debug!(%pid, "Sending SIGTERM to child process");
        let _ = kill(pid, Signal::SIGTERM);
    }
}

#[cfg(not(unix))]
fn terminate_child(child: &mut tokio::process::Child) {
    let _ = child.start_kill();
}
