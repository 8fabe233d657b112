//! Child process whose stdout is consumed line by line
//!
//! stderr is drained on a separate task into a small ring so a chatty
//! process never blocks on a full pipe, and the last few diagnostic lines
//! are still available when it exits.

use crate::lines::LineReader;
use netfeed_core::{CaptureError, CaptureExit};
use std::collections::VecDeque;
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::process::{Child, ChildStderr, ChildStdout, Command};
use tokio::task::JoinHandle;
use tokio::time;
use tracing::{debug, warn};

/// Number of stderr lines kept for the exit report
pub const STDERR_TAIL_LINES: usize = 5;

/// Upper bound on waiting for stderr to close after the process exited
const STDERR_JOIN_TIMEOUT: Duration = Duration::from_secs(1);

/// Ring of the most recent stderr lines
#[derive(Debug, Clone)]
struct StderrTail {
    lines: Arc<Mutex<VecDeque<String>>>,
    keep: usize,
}

impl StderrTail {
    fn new(keep: usize) -> Self {
        Self {
            lines: Arc::new(Mutex::new(VecDeque::with_capacity(keep))),
            keep,
        }
    }

    fn push(&self, line: String) {
        let mut lines = self.lines.lock().unwrap_or_else(|e| e.into_inner());
        if lines.len() == self.keep {
            lines.pop_front();
        }
        lines.push_back(line);
    }

    fn snapshot(&self) -> Vec<String> {
        let lines = self.lines.lock().unwrap_or_else(|e| e.into_inner());
        lines.iter().cloned().collect()
    }
}

/// A running child process read as a stream of stdout lines
pub struct ProcessLines {
    program: String,
    child: Child,
    stdout: Option<LineReader<ChildStdout>>,
    stderr_tail: StderrTail,
    stderr_task: Option<JoinHandle<()>>,
}

impl ProcessLines {
    /// Spawn `command` with piped output. `program` names it in errors and logs.
    pub fn spawn(program: &str, mut command: Command) -> Result<Self, CaptureError> {
        command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = command.spawn().map_err(|source| CaptureError::Spawn {
            program: program.to_string(),
            source,
        })?;

        let stdout = child.stdout.take().ok_or_else(|| missing_pipe("stdout"))?;
        let stderr = child.stderr.take().ok_or_else(|| missing_pipe("stderr"))?;

        let stderr_tail = StderrTail::new(STDERR_TAIL_LINES);
        let stderr_task = tokio::spawn(drain_stderr(
            stderr,
            stderr_tail.clone(),
            program.to_string(),
        ));

        debug!("Spawned {} (pid {:?})", program, child.id());

        Ok(Self {
            program: program.to_string(),
            child,
            stdout: Some(LineReader::new(stdout)),
            stderr_tail,
            stderr_task: Some(stderr_task),
        })
    }

    /// OS process id, while the child has not been reaped
    pub fn id(&self) -> Option<u32> {
        self.child.id()
    }

    /// Next stdout line. Cancel-safe.
    pub async fn next_line(&mut self) -> Result<Option<String>, CaptureError> {
        match self.stdout.as_mut() {
            Some(reader) => Ok(reader.next_line().await?),
            None => Ok(None),
        }
    }

    /// Stop reading and wait for the process to exit.
    ///
    /// A process whose output was not read to the end is sent SIGTERM first.
    /// Anything still alive after `grace` is killed.
    pub async fn shutdown(mut self, grace: Duration) -> Result<CaptureExit, CaptureError> {
        let finished = self.stdout.as_ref().map_or(true, LineReader::at_eof);
        drop(self.stdout.take());

        let mut forced = false;
        let status = match self.child.try_wait()? {
            Some(status) => status,
            None => {
                if !finished {
                    request_termination(&mut self.child, &self.program);
                }
                match time::timeout(grace, self.child.wait()).await {
                    Ok(status) => status?,
                    Err(_) => {
                        warn!(
                            "{} did not exit within {:?}, killing it",
                            self.program, grace
                        );
                        forced = true;
                        self.child.kill().await?;
                        self.child.wait().await?
                    }
                }
            }
        };
        debug!("{} exited with {}", self.program, status);

        if let Some(mut task) = self.stderr_task.take() {
            if time::timeout(STDERR_JOIN_TIMEOUT, &mut task).await.is_err() {
                debug!("stderr of {} still open after exit", self.program);
                task.abort();
            }
        }

        Ok(CaptureExit {
            status: Some(status),
            stderr_tail: self.stderr_tail.snapshot(),
            forced,
        })
    }
}

fn missing_pipe(name: &str) -> CaptureError {
    CaptureError::Io(std::io::Error::new(
        std::io::ErrorKind::BrokenPipe,
        format!("{} was not captured", name),
    ))
}

async fn drain_stderr(stderr: ChildStderr, tail: StderrTail, program: String) {
    let mut reader = LineReader::new(stderr);
    loop {
        match reader.next_line().await {
            Ok(Some(line)) => {
                if line.trim().is_empty() {
                    continue;
                }
                debug!("{} stderr: {}", program, line);
                tail.push(line);
            }
            Ok(None) => break,
            Err(e) => {
                debug!("Error reading stderr of {}: {}", program, e);
                break;
            }
        }
    }
}

#[cfg(unix)]
fn request_termination(child: &mut Child, program: &str) {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    let Some(pid) = child.id().and_then(|id| i32::try_from(id).ok()) else {
        return;
    };
    debug!("Sending SIGTERM to {} (pid {})", program, pid);
    if let Err(e) = kill(Pid::from_raw(pid), Signal::SIGTERM) {
        debug!("Failed to signal {}: {}", program, e);
    }
}

#[cfg(not(unix))]
fn request_termination(child: &mut Child, program: &str) {
    if let Err(e) = child.start_kill() {
        debug!("Failed to stop {}: {}", program, e);
    }
}
