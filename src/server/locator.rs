//! Finding the server process that owns a port.

use serde::Serialize;
use std::ffi::OsStr;
use std::path::Path;
use sysinfo::{Process, ProcessRefreshKind, ProcessStatus, ProcessesToUpdate, System, UpdateKind};

/// Longest process name the Linux kernel keeps in `comm`.
const COMM_LEN: usize = 15;

/// A running server process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProcessHandle {
    /// OS process id
    pub pid: u32,
    /// Process name as shown in the process table
    pub name: String,
}

/// Capability to find the managed server process bound to a port.
///
/// "Not found" is a normal outcome, never an error. Implementations swallow
/// and log unexpected failures and report `None`.
pub trait ProcessLocator: Send + Sync {
    /// The server process holding `port`, if any.
    fn find_process_on_port(&self, port: u16) -> Option<ProcessHandle>;
}

/// Locator that scans the OS process table.
///
/// Processes are filtered by name first; only those candidates have their
/// sockets inspected. A process matches when its process table name, its
/// executable or its first command line word names the binary. Processes that vanish mid-scan or whose details
/// cannot be read are skipped.
#[derive(Debug, Clone)]
pub struct SystemProcessLocator {
    process_name: String,
}

impl SystemProcessLocator {
    /// Locator for processes named `process_name`.
    pub fn new(process_name: impl Into<String>) -> Self {
        Self {
            process_name: process_name.into(),
        }
    }

    /// Pids and names of live processes whose name matches, by pid.
    fn candidates(&self) -> Vec<(u32, String)> {
        let mut system = System::new();
        system.refresh_processes_specifics(
            ProcessesToUpdate::All,
            true,
            ProcessRefreshKind::nothing()
                .with_exe(UpdateKind::OnlyIfNotSet)
                .with_cmd(UpdateKind::OnlyIfNotSet),
        );

        let mut found: Vec<(u32, String)> = system
            .processes()
            .iter()
            .filter(|(_, process)| process.status() != ProcessStatus::Zombie)
            .filter(|(_, process)| process_matches(process, &self.process_name))
            .map(|(pid, process)| (pid.as_u32(), process.name().to_string_lossy().into_owned()))
            .collect();
        found.sort_unstable();
        found
    }
}

impl ProcessLocator for SystemProcessLocator {
    #[tracing::instrument(level = "debug", skip(self), fields(name = %self.process_name))]
    fn find_process_on_port(&self, port: u16) -> Option<ProcessHandle> {
        let candidates = self.candidates();
        if candidates.is_empty() {
            tracing::trace!("No process with a matching name");
            return None;
        }

        let pids: Vec<u32> = candidates.iter().map(|(pid, _)| *pid).collect();
        let owner = sockets::find_owner(port, &pids)?;
        let (pid, name) = candidates.into_iter().find(|(pid, _)| *pid == owner)?;
        tracing::debug!(pid, "Found server process");
        Some(ProcessHandle { pid, name })
    }
}

fn process_matches(process: &Process, expected: &str) -> bool {
    if name_matches(process.name(), expected) {
        return true;
    }
    let file_name_matches = |path: &Path| {
        path.file_name()
            .is_some_and(|name| name_matches(name, expected))
    };
    process.exe().is_some_and(file_name_matches)
        || process
            .cmd()
            .first()
            .is_some_and(|arg| file_name_matches(Path::new(arg)))
}

/// Name match. `.exe` suffixes are ignored so that configs written for one
/// platform work on another. A name cut to the kernel's `comm` length
/// matches the binary it was cut from.
fn name_matches(actual: &OsStr, expected: &str) -> bool {
    let actual = actual.to_string_lossy();
    let strip = |name: &str| name.strip_suffix(".exe").unwrap_or(name).to_string();
    let (actual, expected) = (strip(&actual), strip(expected));
    if actual == expected {
        return true;
    }
    actual.len() == COMM_LEN
        && expected.len() > COMM_LEN
        && expected.as_bytes().starts_with(actual.as_bytes())
}

#[cfg(target_os = "linux")]
mod sockets {
    use std::collections::HashSet;
    use std::path::Path;

    const TCP_TABLES: [&str; 2] = ["/proc/net/tcp", "/proc/net/tcp6"];

    /// First candidate holding a TCP socket whose local port is `port`.
    pub(super) fn find_owner(port: u16, candidates: &[u32]) -> Option<u32> {
        let inodes = socket_inodes(port);
        if inodes.is_empty() {
            return None;
        }

        candidates
            .iter()
            .copied()
            .find(|pid| owns_any_socket(*pid, &inodes))
    }

    /// Inodes of TCP sockets bound to `port`, from both address families.
    fn socket_inodes(port: u16) -> HashSet<u64> {
        let mut inodes = HashSet::new();
        for table in TCP_TABLES {
            match std::fs::read_to_string(table) {
                Ok(content) => inodes.extend(parse_tcp_table(&content, port)),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => tracing::warn!(table, error = %e, "Failed to read socket table"),
            }
        }
        inodes
    }

    /// Parse a `/proc/net/tcp`-style table.
    ///
    /// Row layout: `sl local_address rem_address st ... uid timeout inode`,
    /// with `local_address` as `HEXADDR:HEXPORT`.
    pub(super) fn parse_tcp_table(content: &str, port: u16) -> Vec<u64> {
        content
            .lines()
            .skip(1)
            .filter_map(|line| {
                let fields: Vec<&str> = line.split_whitespace().collect();
                let local = fields.get(1)?;
                let (_, hex_port) = local.rsplit_once(':')?;
                let local_port = u16::from_str_radix(hex_port, 16).ok()?;
                if local_port != port {
                    return None;
                }
                fields.get(9)?.parse::<u64>().ok().filter(|inode| *inode != 0)
            })
            .collect()
    }

    /// Whether any of the process's file descriptors is one of `inodes`.
    /// Unreadable or vanished processes own nothing.
    fn owns_any_socket(pid: u32, inodes: &HashSet<u64>) -> bool {
        let fd_dir = Path::new("/proc").join(pid.to_string()).join("fd");
        let Ok(entries) = std::fs::read_dir(&fd_dir) else {
            tracing::trace!(pid, "Cannot inspect file descriptors, skipping");
            return false;
        };

        entries
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| std::fs::read_link(entry.path()).ok())
            .filter_map(|target| parse_socket_link(&target.to_string_lossy()))
            .any(|inode| inodes.contains(&inode))
    }

    /// `socket:[12345]` -> `12345`
    pub(super) fn parse_socket_link(target: &str) -> Option<u64> {
        target
            .strip_prefix("socket:[")?
            .strip_suffix(']')?
            .parse()
            .ok()
    }
}

#[cfg(not(target_os = "linux"))]
mod sockets {
    use crate::server::port::is_port_free;

    /// Without a socket-to-pid table, a name-matched process is reported
    /// when something holds the port.
    pub(super) fn find_owner(port: u16, candidates: &[u32]) -> Option<u32> {
        if is_port_free(port) {
            return None;
        }
        candidates.first().copied()
    }
}
