//! Free TCP port discovery for the backing node's listeners.
//!
//! Ports are found by probing: a connect attempt that is refused means nothing
//! is listening there. This is a best-effort check, not a reservation; another
//! process may bind the port between the probe and the node's own bind, so
//! callers should treat a later bind failure as retryable.

use crate::config::ControlConfig;
use crate::error::{Result, SimError};
use std::collections::HashSet;
use std::io::ErrorKind;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, TcpStream};
use std::ops::RangeInclusive;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, warn};

/// Hands out ports that nothing is listening on, never the same one twice.
///
/// Each allocator owns its own record of handed-out ports, shared with its
/// clones. The record only grows. Concurrent `allocate()` calls on one
/// allocator are serialized.
#[derive(Debug, Clone)]
pub struct PortAllocator {
    host: IpAddr,
    range: RangeInclusive<u16>,
    probe_timeout: Duration,
    used: Arc<Mutex<HashSet<u16>>>,
}

impl Default for PortAllocator {
    fn default() -> Self {
        Self::new()
    }
}

impl PortAllocator {
    /// Create an allocator that scans the whole port space on loopback.
    pub fn new() -> Self {
        Self::with_range(1..=u16::MAX)
    }

    /// Create an allocator restricted to `range`.
    pub fn with_range(range: RangeInclusive<u16>) -> Self {
        Self {
            host: IpAddr::V4(Ipv4Addr::LOCALHOST),
            range,
            probe_timeout: ControlConfig::PORT_PROBE_TIMEOUT,
            used: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Find the highest port in range that is neither handed out already nor
    /// accepting connections.
    ///
    /// Fails with `PortsExhausted` once every candidate has been tried.
    pub fn allocate(&self) -> Result<u16> {
        let mut used = self
            .used
            .lock()
            .map_err(|_| SimError::Other("port allocator lock poisoned".to_string()))?;

        for port in self.range.clone().rev() {
            if used.contains(&port) {
                continue;
            }

            if self.is_free(port) {
                used.insert(port);
                debug!("Allocated port {}", port);
                return Ok(port);
            }
        }

        warn!(
            "No free port in {}..={}",
            self.range.start(),
            self.range.end()
        );
        Err(SimError::PortsExhausted {
            start: *self.range.start(),
            end: *self.range.end(),
        })
    }

    /// Run `allocate()` on the blocking pool.
    ///
    /// The scan makes one blocking connect per candidate, so async callers use
    /// this instead of calling `allocate()` on a runtime thread.
    pub async fn allocate_async(&self) -> Result<u16> {
        let allocator = self.clone();
        tokio::task::spawn_blocking(move || allocator.allocate())
            .await
            .map_err(|e| SimError::Other(format!("port allocation task failed: {}", e)))?
    }

    /// Ports handed out so far, in ascending order.
    pub fn allocated(&self) -> Vec<u16> {
        let used = match self.used.lock() {
            Ok(used) => used,
            Err(poisoned) => poisoned.into_inner(),
        };
        let mut ports: Vec<u16> = used.iter().copied().collect();
        ports.sort_unstable();
        ports
    }

    /// Only a refused connection counts as free. A successful connect, a
    /// timeout or any other error all mean "not free".
    fn is_free(&self, port: u16) -> bool {
        let addr = SocketAddr::new(self.host, port);
        match TcpStream::connect_timeout(&addr, self.probe_timeout) {
            Ok(_) => false,
            Err(e) => e.kind() == ErrorKind::ConnectionRefused,
        }
    }
}
