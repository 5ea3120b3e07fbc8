//! Running engine processes.
//!
//! [`ProcessExecutor`] is the seam between the orchestrator and the
//! operating system. [`SystemExecutor`] spawns real processes; tests and
//! embedders can plug in a [`ClosureExecutor`] instead.
//!
//! Execution blocks the calling thread until the process exits, its
//! timeout expires, or the [`CancellationToken`] fires. In the last two
//! cases the whole process group is killed: the MALLET launcher is a shell
//! script that forks the JVM, and killing only the script would orphan it.

use crate::invocation::ProcessInvocation;
use crate::sweep::CancellationToken;
use std::fs::File;
use std::io;
use std::process::{Child, Stdio};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// How an engine process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// The process exited on its own. `code` is `None` when it was killed by
    /// a signal we did not send.
    Exited { code: Option<i32> },
    /// The wall-clock limit expired and the process was killed.
    TimedOut,
    /// Cancellation was requested and the process was killed.
    Cancelled,
}

impl ProcessOutcome {
    pub fn success(&self) -> bool {
        matches!(self, Self::Exited { code: Some(0) })
    }
}

/// Result of one [`ProcessExecutor::execute`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Execution {
    pub outcome: ProcessOutcome,
    pub duration: Duration,
}

/// Runs a [`ProcessInvocation`] to completion.
///
/// Implementations must be `Send + Sync`: with parallelism enabled the same
/// executor serves several worker threads at once.
pub trait ProcessExecutor: Send + Sync {
    /// Run `invocation`, killing it after `timeout` or once `cancel` fires.
    ///
    /// An `Err` means the process could not be started or waited on.
    fn execute(
        &self,
        invocation: &ProcessInvocation,
        timeout: Option<Duration>,
        cancel: &CancellationToken,
    ) -> io::Result<Execution>;
}

/// Executor backed by [`std::process::Command`].
#[derive(Debug, Clone)]
pub struct SystemExecutor {
    poll_interval: Duration,
}

impl Default for SystemExecutor {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(100),
        }
    }
}

impl SystemExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// How often the child is polled for exit, timeout and cancellation.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    fn spawn(&self, invocation: &ProcessInvocation) -> io::Result<Child> {
        let mut cmd = invocation.to_command();

        match invocation.log_file() {
            Some(path) => {
                if let Some(parent) = path.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                let log = File::create(path)?;
                cmd.stdout(Stdio::from(log.try_clone()?));
                cmd.stderr(Stdio::from(log));
            }
            None => {
                cmd.stdout(Stdio::inherit()).stderr(Stdio::inherit());
            }
        }

        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            // own process group, so the engine and everything it forks can
            // be killed together
            cmd.process_group(0);
        }

        cmd.spawn()
    }
}

impl ProcessExecutor for SystemExecutor {
    fn execute(
        &self,
        invocation: &ProcessInvocation,
        timeout: Option<Duration>,
        cancel: &CancellationToken,
    ) -> io::Result<Execution> {
        let start = Instant::now();
        let mut child = self.spawn(invocation)?;
        debug!(
            pid = child.id(),
            program = %invocation.program().display(),
            "Engine process started"
        );

        let outcome = loop {
            if let Some(status) = child.try_wait()? {
                break ProcessOutcome::Exited {
                    code: status.code(),
                };
            }
            if cancel.is_cancelled() {
                terminate(&mut child);
                break ProcessOutcome::Cancelled;
            }
            if timeout.is_some_and(|limit| start.elapsed() >= limit) {
                terminate(&mut child);
                break ProcessOutcome::TimedOut;
            }
            thread::sleep(self.poll_interval);
        };

        Ok(Execution {
            outcome,
            duration: start.elapsed(),
        })
    }
}

/// Kill the child's process group and reap the child.
fn terminate(child: &mut Child) {
    #[cfg(unix)]
    {
        // SAFETY: kill(2) has no memory-safety preconditions. The negative
        // pid addresses the group created by `process_group(0)`, whose id
        // equals the child's pid.
        let rc = unsafe { libc::kill(-(child.id() as libc::pid_t), libc::SIGKILL) };
        if rc != 0 {
            let _ = child.kill();
        }
    }
    #[cfg(not(unix))]
    {
        let _ = child.kill();
    }

    if let Err(e) = child.wait() {
        warn!(pid = child.id(), "Failed to reap killed engine process: {}", e);
    }
}

/// Executor that delegates to a closure instead of spawning processes.
///
/// Useful to drive a sweep without the real engine, e.g. to record the
/// invocations it would make.
pub struct ClosureExecutor<F>
where
    F: Fn(&ProcessInvocation) -> io::Result<ProcessOutcome> + Send + Sync,
{
    handler: F,
}

impl<F> ClosureExecutor<F>
where
    F: Fn(&ProcessInvocation) -> io::Result<ProcessOutcome> + Send + Sync,
{
    pub fn new(handler: F) -> Self {
        Self { handler }
    }
}

impl<F> ProcessExecutor for ClosureExecutor<F>
where
    F: Fn(&ProcessInvocation) -> io::Result<ProcessOutcome> + Send + Sync,
{
    fn execute(
        &self,
        invocation: &ProcessInvocation,
        _timeout: Option<Duration>,
        cancel: &CancellationToken,
    ) -> io::Result<Execution> {
        let start = Instant::now();
        let outcome = if cancel.is_cancelled() {
            ProcessOutcome::Cancelled
        } else {
            (self.handler)(invocation)?
        };
        Ok(Execution {
            outcome,
            duration: start.elapsed(),
        })
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn sh(script: &str) -> ProcessInvocation {
        ProcessInvocation::new("/bin/sh").arg("-c").arg(script)
    }

    fn fast() -> SystemExecutor {
        SystemExecutor::new().with_poll_interval(Duration::from_millis(10))
    }

    #[test]
    fn test_exit_codes_are_reported() {
        let token = CancellationToken::new();
        let ok = fast().execute(&sh("exit 0"), None, &token).unwrap();
        assert_eq!(ok.outcome, ProcessOutcome::Exited { code: Some(0) });
        assert!(ok.outcome.success());

        let failed = fast().execute(&sh("exit 3"), None, &token).unwrap();
        assert_eq!(failed.outcome, ProcessOutcome::Exited { code: Some(3) });
        assert!(!failed.outcome.success());
    }

    #[test]
    fn test_timeout_kills_process() {
        let token = CancellationToken::new();
        let exec = fast()
            .execute(&sh("sleep 5"), Some(Duration::from_millis(100)), &token)
            .unwrap();
        assert_eq!(exec.outcome, ProcessOutcome::TimedOut);
        assert!(exec.duration < Duration::from_secs(4));
    }

    #[test]
    fn test_cancellation_kills_process() {
        let token = CancellationToken::new();
        let canceller = token.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(100));
            canceller.cancel();
        });

        let exec = fast().execute(&sh("sleep 5"), None, &token).unwrap();
        handle.join().unwrap();
        assert_eq!(exec.outcome, ProcessOutcome::Cancelled);
        assert!(exec.duration < Duration::from_secs(4));
    }

    #[test]
    fn test_output_goes_to_log_file() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("logs").join("run.log");
        let inv = sh("echo hello; echo oops >&2").log_to(&log);

        let exec = fast()
            .execute(&inv, None, &CancellationToken::new())
            .unwrap();
        assert!(exec.outcome.success());
        let captured = std::fs::read_to_string(&log).unwrap();
        assert!(captured.contains("hello"));
        assert!(captured.contains("oops"));
    }

    #[test]
    fn test_missing_program_is_io_error() {
        let inv = ProcessInvocation::new("/nonexistent/engine").arg("train-topics");
        assert!(fast().execute(&inv, None, &CancellationToken::new()).is_err());
    }

    #[test]
    fn test_closure_executor_honours_cancellation() {
        let exec = ClosureExecutor::new(|_| Ok(ProcessOutcome::Exited { code: Some(0) }));
        let token = CancellationToken::new();
        token.cancel();
        let result = exec.execute(&sh("true"), None, &token).unwrap();
        assert_eq!(result.outcome, ProcessOutcome::Cancelled);
    }
}
