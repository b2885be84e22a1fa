use crate::error::{Error, Result};
use std::collections::HashSet;
use std::net::{Ipv4Addr, TcpListener};

/// Hands out ports from a fixed inclusive range.
///
/// A port is free when no persisted record uses it and a loopback TCP
/// socket can be bound to it. The probe socket is closed immediately, so
/// nothing is reserved: another caller or an unrelated process can take the
/// port between allocation and the server's own bind. Callers serialize
/// allocation and persist the record before releasing their lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortAllocator {
    min_port: u16,
    max_port: u16,
}

impl PortAllocator {
    /// Allocator over `[min_port, max_port]`.
    pub fn new(min_port: u16, max_port: u16) -> Self {
        Self { min_port, max_port }
    }

    /// Lowest port of the range.
    pub fn min_port(&self) -> u16 {
        self.min_port
    }

    /// Highest port of the range.
    pub fn max_port(&self) -> u16 {
        self.max_port
    }

    /// First port of the range, in ascending order, that is not in `in_use`
    /// and can be bound on loopback.
    pub fn allocate(&self, in_use: &HashSet<u16>) -> Result<u16> {
        for port in self.min_port..=self.max_port {
            if in_use.contains(&port) {
                continue;
            }
            if is_port_free(port) {
                tracing::debug!(port, "Allocated port");
                return Ok(port);
            }
            tracing::trace!(port, "Port bound by an unmanaged process, skipping");
        }

        Err(Error::NoPortsAvailable {
            min: self.min_port,
            max: self.max_port,
        })
    }

    /// Apply the allocation checks to a caller-chosen port.
    ///
    /// The port does not have to lie inside the allocation range.
    pub fn check(&self, port: u16, in_use: &HashSet<u16>) -> Result<()> {
        if port == 0 {
            return Err(Error::InvalidRequest("port must be greater than 0".to_string()));
        }
        if in_use.contains(&port) || !is_port_free(port) {
            return Err(Error::PortConflict(port));
        }
        Ok(())
    }
}

/// Whether a TCP socket can currently be bound to `127.0.0.1:<port>`.
pub fn is_port_free(port: u16) -> bool {
    TcpListener::bind((Ipv4Addr::LOCALHOST, port)).is_ok()
}
