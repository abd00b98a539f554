//! Readiness gate: wait for a worker's listener to accept connections.

use super::port::resolve;
use crate::error::{PoolError, Result};
use std::net::TcpStream;
use std::time::{Duration, Instant};

/// Pause between connect attempts.
const RETRY_INTERVAL: Duration = Duration::from_millis(25);

/// Block until a TCP connect to `host:port` succeeds or `timeout` elapses.
///
/// The probe connection is closed immediately without sending anything.
pub fn await_listening(host: &str, port: u16, timeout: Duration) -> Result<()> {
    let start = Instant::now();
    let deadline = start + timeout;
    let mut attempts = 0u32;

    loop {
        attempts += 1;
        if let Some(addr) = resolve(host, port) {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let budget = remaining.clamp(Duration::from_millis(1), Duration::from_millis(250));
            if let Ok(stream) = TcpStream::connect_timeout(&addr, budget) {
                drop(stream);
                tracing::debug!(
                    port,
                    attempts,
                    wait_ms = start.elapsed().as_millis(),
                    "Worker listener is up"
                );
                return Ok(());
            }
        }

        if Instant::now() >= deadline {
            return Err(PoolError::ConnectTimeout {
                host: host.to_string(),
                port,
                timeout,
            });
        }
        std::thread::sleep(RETRY_INTERVAL);
    }
}
