use crate::harness::{HARNESS_FILE, SUBJECT_FILE, synthesize};
use anyhow::{Context, Result};
use std::fs;
use std::io::{self, Read};
use std::path::Path;
use std::process::{Command, Stdio};
use std::sync::{Arc, Mutex, mpsc};
use std::thread;
use std::time::Duration;
use tempfile::TempDir;
use thiserror::Error;
use tracing::{debug, warn};
use wait_timeout::ChildExt;

/// How long to keep reading pipes after the runner has exited or been killed.
const DRAIN_GRACE: Duration = Duration::from_secs(2);
/// What `python -m pytest` prints when the interpreter exists but pytest does not.
pub const MISSING_PYTEST_MODULE: &str = "No module named pytest";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutorConfig {
    pub program: String,
    /// Arguments placed before the harness path.
    pub runner_args: Vec<String>,
    pub timeout: Duration,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self::pytest("python3", Duration::from_secs(30))
    }
}

impl ExecutorConfig {
    pub fn pytest(python: &str, timeout: Duration) -> Self {
        Self {
            program: python.to_string(),
            runner_args: vec!["-m".to_string(), "pytest".to_string()],
            timeout,
        }
    }

    /// The launch command as a user would type it, without the harness path.
    pub fn runner_label(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.runner_args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LaunchFailure {
    #[error("test runner `{program}` was not found")]
    RunnerNotFound { program: String },
    #[error("failed to launch test runner: {0}")]
    Spawn(String),
    #[error("failed preparing test workspace: {0}")]
    Setup(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionOutcome {
    Completed {
        stdout: String,
        stderr: String,
        exit_code: Option<i32>,
    },
    /// The runner was killed; output is whatever had been read before that.
    TimedOut {
        stdout: String,
        stderr: String,
        timeout: Duration,
    },
    LaunchFailed(LaunchFailure),
}

#[derive(Debug, Clone, Default)]
pub struct TestExecutor {
    pub config: ExecutorConfig,
}

impl TestExecutor {
    pub fn new(config: ExecutorConfig) -> Self {
        Self { config }
    }

    /// Writes `code` and its harness into a fresh temp dir, runs the harness
    /// once and removes the dir again.
    pub fn execute(&self, code: &str) -> ExecutionOutcome {
        let workspace = match prepare_workspace(code) {
            Ok(dir) => dir,
            Err(err) => {
                warn!("test workspace setup failed: {err:#}");
                return ExecutionOutcome::LaunchFailed(LaunchFailure::Setup(format!("{err:#}")));
            }
        };

        let outcome = self.run_in(workspace.path());
        if let Err(err) = workspace.close() {
            warn!("failed removing test workspace: {err}");
        }
        outcome
    }

    fn run_in(&self, dir: &Path) -> ExecutionOutcome {
        let mut command = Command::new(&self.config.program);
        command
            .args(&self.config.runner_args)
            .arg(HARNESS_FILE)
            .args(["-v", "--tb=short"])
            .current_dir(dir)
            .env("PYTHONDONTWRITEBYTECODE", "1")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        debug!(
            program = %self.config.program,
            dir = %dir.display(),
            "launching test runner"
        );
        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return ExecutionOutcome::LaunchFailed(LaunchFailure::RunnerNotFound {
                    program: self.config.program.clone(),
                });
            }
            Err(err) => {
                return ExecutionOutcome::LaunchFailed(LaunchFailure::Spawn(err.to_string()));
            }
        };

        let stdout = child.stdout.take().map(PipeDrain::spawn);
        let stderr = child.stderr.take().map(PipeDrain::spawn);

        match child.wait_timeout(self.config.timeout) {
            Ok(Some(status)) => {
                let stdout = PipeDrain::collect(stdout);
                let stderr = PipeDrain::collect(stderr);
                if !status.success() && stderr.contains(MISSING_PYTEST_MODULE) {
                    warn!(runner = %self.config.runner_label(), "pytest is not installed");
                    return ExecutionOutcome::LaunchFailed(LaunchFailure::RunnerNotFound {
                        program: self.config.runner_label(),
                    });
                }
                ExecutionOutcome::Completed {
                    stdout,
                    stderr,
                    exit_code: status.code(),
                }
            }
            Ok(None) => {
                warn!(
                    timeout_secs = self.config.timeout.as_secs(),
                    "test runner timed out; killing it"
                );
                let _ = child.kill();
                let _ = child.wait();
                ExecutionOutcome::TimedOut {
                    stdout: PipeDrain::collect(stdout),
                    stderr: PipeDrain::collect(stderr),
                    timeout: self.config.timeout,
                }
            }
            Err(err) => {
                let _ = child.kill();
                let _ = child.wait();
                ExecutionOutcome::LaunchFailed(LaunchFailure::Spawn(format!(
                    "failed waiting for test runner: {err}"
                )))
            }
        }
    }
}

fn prepare_workspace(code: &str) -> Result<TempDir> {
    let dir = tempfile::Builder::new()
        .prefix("sasds-validate-")
        .tempdir()
        .context("failed creating temporary directory")?;

    let subject = dir.path().join(SUBJECT_FILE);
    fs::write(&subject, code)
        .with_context(|| format!("failed writing {}", subject.display()))?;
    let harness = dir.path().join(HARNESS_FILE);
    fs::write(&harness, synthesize(code))
        .with_context(|| format!("failed writing {}", harness.display()))?;

    Ok(dir)
}

/// Reads a child pipe on its own thread so a full pipe never blocks the child.
struct PipeDrain {
    buffer: Arc<Mutex<Vec<u8>>>,
    done: mpsc::Receiver<()>,
}

impl PipeDrain {
    fn spawn<R: Read + Send + 'static>(mut reader: R) -> Self {
        let buffer = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&buffer);
        let (done_tx, done) = mpsc::channel();

        thread::spawn(move || {
            let mut chunk = [0_u8; 8192];
            loop {
                match reader.read(&mut chunk) {
                    Ok(0) => break,
                    Ok(read) => {
                        if let Ok(mut buf) = sink.lock() {
                            buf.extend_from_slice(&chunk[..read]);
                        }
                    }
                    Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                    Err(_) => break,
                }
            }
            let _ = done_tx.send(());
        });

        Self { buffer, done }
    }

    /// Waits briefly for EOF, then returns what has been read so far. A
    /// grandchild holding the pipe open cannot stall the caller.
    fn collect(drain: Option<Self>) -> String {
        let Some(drain) = drain else {
            return String::new();
        };
        let _ = drain.done.recv_timeout(DRAIN_GRACE);
        let bytes = drain
            .buffer
            .lock()
            .map(|buf| buf.clone())
            .unwrap_or_default();
        String::from_utf8_lossy(&bytes).into_owned()
    }
}
