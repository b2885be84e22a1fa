//! Platform-agnostic process control functions.
//!
//! All functions here block; async callers run them on the blocking pool.

use crate::error::{Error, Result};
use std::time::{Duration, Instant};
use sysinfo::{Pid, ProcessStatus, ProcessesToUpdate, System};

const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Grace period granted after a forced kill before giving up on observing
/// the exit.
const KILL_WAIT: Duration = Duration::from_secs(2);

/// How a process went away.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// The process was already gone
    AlreadyExited,
    /// The process exited after the graceful signal
    Graceful,
    /// The process had to be killed
    Forced,
}

/// Check if a process is alive by PID.
///
/// Zombies count as dead: they hold no sockets and only wait to be reaped.
pub fn is_process_alive(pid: u32) -> bool {
    let pid = Pid::from_u32(pid);
    let mut system = System::new();
    system.refresh_processes(ProcessesToUpdate::Some(&[pid]), true);

    system
        .process(pid)
        .is_some_and(|process| process.status() != ProcessStatus::Zombie)
}

/// Send a graceful shutdown signal to a process.
#[cfg(unix)]
fn graceful_signal(pid: u32) -> Result<()> {
    send_signal(pid, nix::sys::signal::Signal::SIGTERM)
}

/// Forcibly kill a process.
#[cfg(unix)]
pub fn force_kill(pid: u32) -> Result<()> {
    send_signal(pid, nix::sys::signal::Signal::SIGKILL)
}

#[cfg(unix)]
fn send_signal(pid: u32, signal: nix::sys::signal::Signal) -> Result<()> {
    use nix::errno::Errno;
    use nix::sys::signal::kill;
    use nix::unistd::Pid as NixPid;

    let raw = i32::try_from(pid).map_err(|_| Error::Other(format!("Invalid pid {}", pid)))?;
    match kill(NixPid::from_raw(raw), signal) {
        // Exited between the liveness check and the signal.
        Ok(()) | Err(Errno::ESRCH) => Ok(()),
        Err(e) => Err(Error::Other(format!(
            "Failed to send {} to PID {}: {}",
            signal, pid, e
        ))),
    }
}

#[cfg(not(unix))]
fn graceful_signal(pid: u32) -> Result<()> {
    signal_with_sysinfo(pid, sysinfo::Signal::Term)
}

#[cfg(not(unix))]
pub fn force_kill(pid: u32) -> Result<()> {
    signal_with_sysinfo(pid, sysinfo::Signal::Kill)
}

#[cfg(not(unix))]
fn signal_with_sysinfo(pid: u32, signal: sysinfo::Signal) -> Result<()> {
    let sys_pid = Pid::from_u32(pid);
    let mut system = System::new();
    system.refresh_processes(ProcessesToUpdate::Some(&[sys_pid]), true);

    let Some(process) = system.process(sys_pid) else {
        return Ok(());
    };
    // Platforms without SIGTERM fall back to a plain kill.
    let delivered = process.kill_with(signal).unwrap_or_else(|| process.kill());
    if delivered {
        Ok(())
    } else {
        Err(Error::Other(format!("Failed to signal PID {}", pid)))
    }
}

/// Wait until the process is gone or the deadline passes.
fn wait_for_exit(pid: u32, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if !is_process_alive(pid) {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        std::thread::sleep(POLL_INTERVAL);
    }
}

/// Ask a process to exit, wait up to `timeout`, then kill it.
///
/// Returns an error only when a signal cannot be delivered or the process
/// survives the forced kill.
pub fn terminate(pid: u32, timeout: Duration) -> Result<Termination> {
    if !is_process_alive(pid) {
        return Ok(Termination::AlreadyExited);
    }

    if let Err(e) = graceful_signal(pid) {
        tracing::warn!(pid, error = %e, "Graceful signal failed, killing immediately");
    } else if wait_for_exit(pid, timeout) {
        return Ok(Termination::Graceful);
    } else {
        tracing::warn!(
            pid,
            timeout_secs = timeout.as_secs_f64(),
            "Process did not exit in time, force killing"
        );
    }

    force_kill(pid)?;
    if wait_for_exit(pid, KILL_WAIT) {
        Ok(Termination::Forced)
    } else {
        Err(Error::Other(format!("PID {} survived SIGKILL", pid)))
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::process::Command;

    #[test]
    fn test_terminate_sleeping_process_gracefully() {
        let mut child = Command::new("sleep").arg("30").spawn().unwrap();
        let pid = child.id();
        assert!(is_process_alive(pid));

        let reaper = std::thread::spawn(move || child.wait());
        let outcome = terminate(pid, Duration::from_secs(5)).unwrap();

        assert_eq!(outcome, Termination::Graceful);
        assert!(reaper.join().unwrap().is_ok());
    }

    #[test]
    fn test_terminate_ignoring_process_is_forced() {
        let mut child = Command::new("sh")
            .args(["-c", "trap '' TERM; sleep 30"])
            .spawn()
            .unwrap();
        let pid = child.id();
        // Give the shell time to install the trap.
        std::thread::sleep(Duration::from_millis(200));

        let reaper = std::thread::spawn(move || child.wait());
        let outcome = terminate(pid, Duration::from_millis(300)).unwrap();

        assert_eq!(outcome, Termination::Forced);
        assert!(reaper.join().unwrap().is_ok());
    }

    #[test]
    fn test_terminate_exited_process() {
        let mut child = Command::new("true").spawn().unwrap();
        let pid = child.id();
        child.wait().unwrap();

        assert_eq!(
            terminate(pid, Duration::from_secs(1)).unwrap(),
            Termination::AlreadyExited
        );
    }
}
