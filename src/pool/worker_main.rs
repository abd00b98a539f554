//! Worker process main entry point.
//!
//! This module runs when `docpool internal-worker` is invoked by a
//! dispatcher. It hosts one default-constructed, local-only component and
//! serves exactly one control channel session.
//!
//! Exit codes: 0 after a served session, 1 on a channel error, 2 when the
//! environment contract is broken, 3 when the parent went away.

use super::channel::serve;
use crate::component::{ComponentKind, standalone};
use crate::error::{PoolError, Result};
use std::io::Read;
use std::net::{TcpListener, TcpStream};

/// Port the worker listens on. Required.
pub const WORKER_PORT_ENV: &str = "DOCPOOL_WORKER_PORT";
/// Parent lifeline port. Optional.
pub const PARENT_PORT_ENV: &str = "DOCPOOL_PARENT_PORT";

pub const EXIT_FAILURE: i32 = 1;
pub const EXIT_BAD_ENVIRONMENT: i32 = 2;
pub const EXIT_ORPHANED: i32 = 3;

/// Workers only ever listen on loopback.
const WORKER_HOST: &str = "127.0.0.1";

fn parse_port(name: &str, raw: Option<String>) -> Result<u16> {
    let raw = raw.ok_or_else(|| {
        PoolError::Config(format!(
            "{} is not set; internal-worker is only started by a dispatcher",
            name
        ))
    })?;
    match raw.trim().parse::<u16>() {
        Ok(port) if port != 0 => Ok(port),
        _ => Err(PoolError::Config(format!(
            "{}='{}' is not a valid port",
            name, raw
        ))),
    }
}

/// Read the listener port from the environment.
pub fn worker_port_from_env() -> Result<u16> {
    parse_port(WORKER_PORT_ENV, std::env::var(WORKER_PORT_ENV).ok())
}

/// Cap the data segment of this process at `mib` MiB.
///
/// The hard limit is left alone; the soft limit never exceeds it.
pub fn apply_memory_ceiling(mib: u64) -> Result<()> {
    use nix::sys::resource::{Resource, getrlimit, setrlimit};

    let (_, hard) = getrlimit(Resource::RLIMIT_DATA)
        .map_err(|e| PoolError::Config(format!("getrlimit(RLIMIT_DATA): {}", e)))?;
    let soft = mib.saturating_mul(1024 * 1024).min(hard);
    setrlimit(Resource::RLIMIT_DATA, soft, hard)
        .map_err(|e| PoolError::Config(format!("setrlimit(RLIMIT_DATA, {}): {}", soft, e)))?;
    tracing::debug!(limit_mib = mib, "Memory ceiling applied");
    Ok(())
}

/// Exit when the parent's lifeline listener goes away.
fn watch_lifeline(port: u16) -> Result<()> {
    let mut stream = match TcpStream::connect((WORKER_HOST, port)) {
        Ok(stream) => stream,
        Err(e) => {
            tracing::warn!(port, error = %e, "Parent lifeline unreachable");
            std::process::exit(EXIT_ORPHANED);
        }
    };

    std::thread::Builder::new()
        .name("parent-lifeline".to_string())
        .spawn(move || {
            let mut buf = [0u8; 64];
            // Nothing is ever sent; any return means the parent closed.
            loop {
                match stream.read(&mut buf) {
                    Ok(0) | Err(_) => break,
                    Ok(_) => continue,
                }
            }
            tracing::warn!(port, "Parent went away, exiting");
            std::process::exit(EXIT_ORPHANED);
        })?;
    Ok(())
}

/// Run the worker and return its exit code.
pub fn run(kind: ComponentKind, max_memory_mib: Option<u64>) -> i32 {
    let port = match worker_port_from_env() {
        Ok(port) => port,
        Err(e) => {
            eprintln!("docpool worker: {}", e);
            return EXIT_BAD_ENVIRONMENT;
        }
    };
    let parent_port = match std::env::var(PARENT_PORT_ENV).ok() {
        None => None,
        Some(raw) => match parse_port(PARENT_PORT_ENV, Some(raw)) {
            Ok(port) => Some(port),
            Err(e) => {
                eprintln!("docpool worker: {}", e);
                return EXIT_BAD_ENVIRONMENT;
            }
        },
    };

    if let Some(mib) = max_memory_mib
        && let Err(e) = apply_memory_ceiling(mib)
    {
        tracing::warn!(error = %e, "Running without a memory ceiling");
    }
    if let Some(parent_port) = parent_port
        && let Err(e) = watch_lifeline(parent_port)
    {
        tracing::warn!(error = %e, "Could not watch parent lifeline");
    }

    let listener = match TcpListener::bind((WORKER_HOST, port)) {
        Ok(listener) => listener,
        Err(e) => {
            eprintln!("docpool worker: cannot listen on {}:{}: {}", WORKER_HOST, port, e);
            return EXIT_FAILURE;
        }
    };

    let component = standalone(kind);
    tracing::debug!(%kind, port, pid = std::process::id(), "Worker listening");

    match serve(&listener, component.as_ref()) {
        Ok(summary) => {
            tracing::debug!(
                probes = summary.probes,
                requests = summary.requests,
                job_served = summary.job_served,
                "Worker session complete"
            );
            0
        }
        Err(e) => {
            eprintln!("docpool worker: channel error: {}", e);
            EXIT_FAILURE
        }
    }
}

/// Run the worker subprocess main function. Never returns.
pub fn run_worker_main(kind: ComponentKind, max_memory_mib: Option<u64>) -> ! {
    std::process::exit(run(kind, max_memory_mib))
}
