//! Worker process launching and teardown.
//!
//! Workers are the current program re-executed with a different entry point
//! (the hidden `internal-worker` subcommand). They inherit the working
//! directory and environment, plus whatever extra variables the caller
//! passes in.

use super::termination::TerminationReason;
use crate::error::{PoolError, Result};
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use std::collections::BTreeSet;
use std::io::Read;
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::sync::{Condvar, Mutex, PoisonError};
use std::time::{Duration, Instant};

/// How long to wait after SIGTERM before SIGKILL.
const TERM_GRACE: Duration = Duration::from_millis(500);
const REAP_POLL: Duration = Duration::from_millis(10);

/// What to start.
#[derive(Debug, Clone, Default)]
pub struct LaunchSpec {
    /// Executable to run. `None` re-executes the current program.
    pub program: Option<PathBuf>,
    /// Entry point arguments.
    pub args: Vec<String>,
    /// Variables added to the inherited environment.
    pub env: Vec<(String, String)>,
    /// Copy the child's stdout and stderr into our stderr.
    pub redirect_output: bool,
    /// Keep this process from finishing until the child has exited.
    pub block_exit: bool,
}

impl LaunchSpec {
    pub fn new(args: Vec<String>) -> Self {
        Self {
            args,
            ..Self::default()
        }
    }

    pub fn env(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.env.push((key.into(), value.to_string()));
        self
    }
}

/// Children that must exit before this process may finish.
struct ExitBarrier {
    live: Mutex<BTreeSet<u32>>,
    drained: Condvar,
}

static EXIT_BARRIER: ExitBarrier = ExitBarrier {
    live: Mutex::new(BTreeSet::new()),
    drained: Condvar::new(),
};

impl ExitBarrier {
    fn register(&self, pid: u32) {
        self.live
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(pid);
    }

    fn unregister(&self, pid: u32) {
        let mut live = self.live.lock().unwrap_or_else(PoisonError::into_inner);
        live.remove(&pid);
        if live.is_empty() {
            self.drained.notify_all();
        }
    }
}

/// Block until every child launched with `block_exit` has exited, or until
/// `timeout` passes. Returns the number of children still running.
pub fn await_exit_barrier(timeout: Duration) -> usize {
    let deadline = Instant::now() + timeout;
    let mut live = EXIT_BARRIER
        .live
        .lock()
        .unwrap_or_else(PoisonError::into_inner);
    while !live.is_empty() {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            break;
        }
        let (guard, _) = EXIT_BARRIER
            .drained
            .wait_timeout(live, remaining)
            .unwrap_or_else(PoisonError::into_inner);
        live = guard;
    }
    live.len()
}

/// Number of children currently holding the exit barrier.
pub fn barrier_count() -> usize {
    EXIT_BARRIER
        .live
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .len()
}

/// Start a worker process.
pub fn launch(spec: &LaunchSpec) -> Result<WorkerProcess> {
    let program = match &spec.program {
        Some(path) => path.clone(),
        None => std::env::current_exe()
            .map_err(|e| PoolError::Launch(format!("Failed to get current executable: {}", e)))?,
    };

    let mut cmd = Command::new(&program);
    cmd.args(&spec.args);
    cmd.envs(spec.env.iter().map(|(k, v)| (k.as_str(), v.as_str())));
    cmd.stdin(Stdio::null());

    if spec.redirect_output {
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
    } else {
        cmd.stdout(Stdio::null());
        cmd.stderr(Stdio::null());
    }

    let mut child = cmd.spawn().map_err(|e| {
        PoolError::Launch(format!("Failed to spawn {}: {}", program.display(), e))
    })?;
    let pid = child.id();

    if spec.redirect_output {
        if let Some(out) = child.stdout.take() {
            forward_output(pid, "stdout", out);
        }
        if let Some(err) = child.stderr.take() {
            forward_output(pid, "stderr", err);
        }
    }
    if spec.block_exit {
        EXIT_BARRIER.register(pid);
    }

    tracing::debug!(pid, program = %program.display(), args = ?spec.args, "Worker process launched");

    Ok(WorkerProcess {
        child,
        pid,
        started_at: Instant::now(),
        block_exit: spec.block_exit,
        sent: None,
        reason: None,
    })
}

/// Copy one of the child's streams into our stderr until it closes.
fn forward_output<R: Read + Send + 'static>(pid: u32, stream: &'static str, mut source: R) {
    let spawned = std::thread::Builder::new()
        .name(format!("worker-{}-{}", pid, stream))
        .spawn(move || {
            let mut sink = std::io::stderr();
            // Ends when the child closes the pipe.
            let _ = std::io::copy(&mut source, &mut sink);
        });
    if let Err(e) = spawned {
        tracing::warn!(pid, stream, error = %e, "Could not start output forwarder");
    }
}

/// Handle to a launched worker process.
#[derive(Debug)]
pub struct WorkerProcess {
    child: Child,
    pid: u32,
    started_at: Instant,
    block_exit: bool,
    /// Last signal we sent.
    sent: Option<Signal>,
    /// Set once the process has been reaped.
    reason: Option<TerminationReason>,
}

impl WorkerProcess {
    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn started_at(&self) -> Instant {
        self.started_at
    }

    /// Why the process ended, once it has been reaped.
    pub fn termination(&self) -> Option<&TerminationReason> {
        self.reason.as_ref()
    }

    /// Check if the process is still running (non-blocking).
    pub fn is_running(&mut self) -> bool {
        self.poll().is_none()
    }

    /// Reap the process if it has exited.
    fn poll(&mut self) -> Option<&TerminationReason> {
        if self.reason.is_none() {
            match self.child.try_wait() {
                Ok(Some(status)) => self.reaped(TerminationReason::from_status(status, self.sent)),
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(pid = self.pid, error = %e, "try_wait failed");
                    self.reaped(TerminationReason::Unknown);
                }
            }
        }
        self.reason.as_ref()
    }

    fn reaped(&mut self, reason: TerminationReason) {
        if self.block_exit {
            EXIT_BARRIER.unregister(self.pid);
        }
        self.reason = Some(reason);
    }

    fn signal(&mut self, sig: Signal) {
        self.sent = Some(sig);
        if let Err(e) = signal::kill(Pid::from_raw(self.pid as i32), sig) {
            tracing::debug!(pid = self.pid, signal = ?sig, error = %e, "Signal not delivered");
        }
    }

    /// Wait up to `timeout` for the process to exit on its own.
    fn wait_for_exit(&mut self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if self.poll().is_some() {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            std::thread::sleep(REAP_POLL);
        }
    }

    /// Stop the worker: give it `grace` to exit by itself, then SIGTERM,
    /// then SIGKILL. Safe to call more than once and after the process has
    /// already exited.
    pub fn stop(&mut self, grace: Duration) -> TerminationReason {
        if let Some(reason) = &self.reason {
            return reason.clone();
        }

        if !self.wait_for_exit(grace) {
            self.signal(Signal::SIGTERM);
            if !self.wait_for_exit(TERM_GRACE) {
                self.sent = Some(Signal::SIGKILL);
                let _ = self.child.kill();
                match self.child.wait() {
                    Ok(status) => {
                        self.reaped(TerminationReason::from_status(status, self.sent));
                    }
                    Err(e) => {
                        tracing::warn!(pid = self.pid, error = %e, "wait after SIGKILL failed");
                        self.reaped(TerminationReason::Unknown);
                    }
                }
            }
        }

        let reason = self.reason.clone().unwrap_or(TerminationReason::Unknown);
        tracing::debug!(
            pid = self.pid,
            reason = %reason,
            lifetime_ms = self.started_at.elapsed().as_millis(),
            "Worker process stopped"
        );
        reason
    }
}

impl Drop for WorkerProcess {
    fn drop(&mut self) {
        if self.reason.is_none() {
            self.stop(Duration::ZERO);
        }
    }
}
