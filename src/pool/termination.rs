//! Why a worker process ended.

use nix::sys::signal::Signal;
use std::os::unix::process::ExitStatusExt;
use std::process::ExitStatus;

/// Reason why a worker process terminated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TerminationReason {
    /// Normal exit with status code.
    Exited(i32),
    /// Stopped by us (SIGTERM or SIGKILL during shutdown).
    Stopped(Signal),
    /// Killed by a signal we did not send.
    Signaled(Signal),
    /// Likely out of memory: SIGKILL we did not send, or an allocation abort.
    OutOfMemory,
    /// Unknown termination reason.
    Unknown,
}

impl TerminationReason {
    /// Classify an exit status. `signalled_by_us` is the last signal the
    /// launcher sent, if any.
    pub fn from_status(status: ExitStatus, signalled_by_us: Option<Signal>) -> Self {
        if let Some(code) = status.code() {
            return Self::Exited(code);
        }
        let Some(raw) = status.signal() else {
            return Self::Unknown;
        };
        match Signal::try_from(raw) {
            Ok(sig) if Some(sig) == signalled_by_us => Self::Stopped(sig),
            Ok(Signal::SIGKILL) => Self::OutOfMemory,
            Ok(Signal::SIGABRT) => Self::OutOfMemory,
            Ok(sig) => Self::Signaled(sig),
            Err(_) => Self::Unknown,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Exited(0))
    }

    /// Whether the end of the process was requested by the launcher.
    pub fn is_expected(&self) -> bool {
        matches!(self, Self::Exited(0) | Self::Stopped(_))
    }
}

impl std::fmt::Display for TerminationReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Exited(code) => write!(f, "exited with code {}", code),
            Self::Stopped(sig) => write!(f, "stopped with {:?}", sig),
            Self::Signaled(sig) => write!(f, "killed by signal {:?}", sig),
            Self::OutOfMemory => write!(f, "out of memory"),
            Self::Unknown => write!(f, "unknown reason"),
        }
    }
}
