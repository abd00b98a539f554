//! Ephemeral port brokering on the loopback interface.
//!
//! A port counts as free when a connect attempt to it fails. Scanning and
//! using a port are two separate steps, so all scans in the process go
//! through one lock, and ports handed out stay reserved until their
//! [`PortLease`] is dropped. This closes the race between callers in this
//! process; a completely unrelated process can still take a port between the
//! scan and the bind.

use crate::error::{PoolError, Result};
use std::collections::BTreeSet;
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::sync::{Mutex, OnceLock, PoisonError};
use std::time::Duration;

/// Connect timeout for a single probe.
const PROBE_TIMEOUT: Duration = Duration::from_millis(50);

/// Process-wide port broker.
#[derive(Debug, Default)]
pub struct PortBroker {
    reserved: Mutex<BTreeSet<u16>>,
}

impl PortBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// The broker shared by every caller in this process.
    pub fn global() -> &'static PortBroker {
        static BROKER: OnceLock<PortBroker> = OnceLock::new();
        BROKER.get_or_init(PortBroker::new)
    }

    /// Reserve the lowest free port in `low..=high`.
    pub fn reserve(&self, host: &str, low: u16, high: u16) -> Result<PortLease<'_>> {
        let mut reserved = self.reserved.lock().unwrap_or_else(PoisonError::into_inner);
        let port = scan(host, low, high, &reserved).ok_or_else(|| PoolError::NoPortAvailable {
            host: host.to_string(),
            low,
            high,
        })?;
        reserved.insert(port);
        tracing::trace!(port, "Port reserved");
        Ok(PortLease { broker: self, port })
    }

    /// Reserve two distinct ports under a single lock hold.
    pub fn reserve_pair(
        &self,
        host: &str,
        low: u16,
        high: u16,
    ) -> Result<(PortLease<'_>, PortLease<'_>)> {
        let mut reserved = self.reserved.lock().unwrap_or_else(PoisonError::into_inner);
        let exhausted = || PoolError::NoPortAvailable {
            host: host.to_string(),
            low,
            high,
        };

        let first = scan(host, low, high, &reserved).ok_or_else(exhausted)?;
        reserved.insert(first);
        let second = match scan(host, low, high, &reserved) {
            Some(port) => port,
            None => {
                reserved.remove(&first);
                return Err(exhausted());
            }
        };
        reserved.insert(second);
        tracing::trace!(first, second, "Port pair reserved");

        Ok((
            PortLease {
                broker: self,
                port: first,
            },
            PortLease {
                broker: self,
                port: second,
            },
        ))
    }

    fn release(&self, port: u16) {
        self.reserved
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&port);
    }

    /// Ports currently held by leases.
    pub fn reserved_count(&self) -> usize {
        self.reserved
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

/// A reserved port, returned to the broker on drop.
#[derive(Debug)]
pub struct PortLease<'a> {
    broker: &'a PortBroker,
    port: u16,
}

impl PortLease<'_> {
    pub fn port(&self) -> u16 {
        self.port
    }
}

impl Drop for PortLease<'_> {
    fn drop(&mut self) {
        self.broker.release(self.port);
    }
}

/// Find the first port in `low..=high` nothing is listening on.
///
/// Ascending and deterministic: the lowest free port wins. Returns `None`
/// when every port in the range answers.
pub fn find_free_port(host: &str, low: u16, high: u16) -> Option<u16> {
    scan(host, low, high, &BTreeSet::new())
}

fn scan(host: &str, low: u16, high: u16, skip: &BTreeSet<u16>) -> Option<u16> {
    (low..=high)
        .filter(|port| !skip.contains(port))
        .find(|&port| !is_listening(host, port))
}

/// Whether a TCP connect to `host:port` succeeds.
pub fn is_listening(host: &str, port: u16) -> bool {
    resolve(host, port)
        .map(|addr| TcpStream::connect_timeout(&addr, PROBE_TIMEOUT).is_ok())
        .unwrap_or(false)
}

pub(crate) fn resolve(host: &str, port: u16) -> Option<SocketAddr> {
    (host, port).to_socket_addrs().ok()?.next()
}
