use crate::error::{Error, Result};
use async_process::{Command, Stdio};
use std::fs::OpenOptions;
use std::path::PathBuf;
use std::process::ExitStatus;
use std::time::Duration;
use tokio::sync::watch;

/// How to launch the server binary for one instance.
///
/// The server runs as `<binary> [args...] <config_path> [trailing_args...]`
/// with the instance directory as its working directory. Stdout and stderr are appended to the instance log
/// file so the process keeps running when the manager exits.
#[derive(Debug, Clone)]
pub struct ServerCommand {
    /// Instance id, used in errors and logs
    pub id: String,
    /// Server binary
    pub binary: String,
    /// Arguments placed before the config path
    pub args: Vec<String>,
    /// Instance directory
    pub working_dir: PathBuf,
    /// Config file
    pub config_path: PathBuf,
    /// Arguments placed after the config path
    pub trailing_args: Vec<String>,
    /// Log file receiving the server output
    pub log_path: PathBuf,
}

impl ServerCommand {
    /// Launch the server.
    ///
    /// The process is detached into its own process group on Unix. A
    /// background task reaps it when it exits.
    #[tracing::instrument(skip(self), fields(id = %self.id, binary = %self.binary))]
    pub fn spawn(&self) -> Result<ServerProcess> {
        let start_failed = |message: String| Error::StartFailed {
            id: self.id.clone(),
            message,
        };

        let log = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.log_path)
            .map_err(|e| {
                start_failed(format!("cannot open log {}: {}", self.log_path.display(), e))
            })?;
        let log_err = log
            .try_clone()
            .map_err(|e| start_failed(format!("cannot duplicate log handle: {}", e)))?;

        let mut command = std::process::Command::new(&self.binary);
        command
            .args(&self.args)
            .arg(&self.config_path)
            .args(&self.trailing_args)
            .current_dir(&self.working_dir);
        detach(&mut command);

        let mut child = Command::from(command)
            .stdin(Stdio::null())
            .stdout(Stdio::from(log))
            .stderr(Stdio::from(log_err))
            .spawn()
            .map_err(|e| start_failed(format!("cannot execute '{}': {}", self.binary, e)))?;

        let pid = child.id();
        let (exit_tx, exit_rx) = watch::channel(None);
        let id = self.id.clone();
        tokio::spawn(async move {
            match child.status().await {
                Ok(status) => {
                    tracing::debug!(id = %id, pid, %status, "Server process exited");
                    let _ = exit_tx.send(Some(status));
                }
                Err(e) => tracing::warn!(id = %id, pid, error = %e, "Failed to reap server process"),
            }
        });

        tracing::info!(pid, "Spawned server process");
        Ok(ServerProcess { pid, exit: exit_rx })
    }
}

#[cfg(unix)]
fn detach(command: &mut std::process::Command) {
    use std::os::unix::process::CommandExt;
    command.process_group(0);
}

#[cfg(not(unix))]
fn detach(_command: &mut std::process::Command) {}

/// A server process launched by this manager.
#[derive(Debug, Clone)]
pub struct ServerProcess {
    pid: u32,
    exit: watch::Receiver<Option<ExitStatus>>,
}

impl ServerProcess {
    /// OS process id
    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Exit status, if the process has already exited.
    pub fn exit_status(&self) -> Option<ExitStatus> {
        *self.exit.borrow()
    }

    /// Wait up to `timeout` for the process to exit.
    ///
    /// Returns the exit status, or `None` when the process is still running
    /// at the deadline.
    pub async fn wait_for_exit(&self, timeout: Duration) -> Option<ExitStatus> {
        let mut exit = self.exit.clone();
        let waited = tokio::time::timeout(timeout, exit.wait_for(Option::is_some)).await;
        match waited {
            Ok(Ok(status)) => *status,
            // The reaper is gone without reporting; fall back to whatever it left.
            Ok(Err(_)) => self.exit_status(),
            Err(_) => None,
        }
    }
}
