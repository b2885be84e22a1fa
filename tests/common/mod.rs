//! Shared fixtures for the integration tests.
#![allow(dead_code)]

use kv_runner::server::control::is_process_alive;
use kv_runner::server::{ProcessHandle, ProcessLocator};
use kv_runner::store::MemoryRepository;
use kv_runner::{Config, KvRunner};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

/// Stand-in server: records its pid in `spawns.log` inside the instance
/// directory, then sleeps. `exec` keeps the pid, so the logged pid is the
/// sleeping process.
const SERVER_SCRIPT: &str = "echo $$ >> spawns.log; exec sleep 20";

/// Locator answering from a port -> pid table, reporting only live pids.
#[derive(Default)]
pub struct FakeLocator {
    pids: Mutex<HashMap<u16, u32>>,
}

impl FakeLocator {
    pub fn register(&self, port: u16, pid: u32) {
        self.pids.lock().unwrap().insert(port, pid);
    }
}

impl ProcessLocator for FakeLocator {
    fn find_process_on_port(&self, port: u16) -> Option<ProcessHandle> {
        let pid = *self.pids.lock().unwrap().get(&port)?;
        is_process_alive(pid).then(|| ProcessHandle {
            pid,
            name: "sleep".to_string(),
        })
    }
}

/// A runner over a temporary base directory and a private port range.
pub struct Harness {
    pub tmp: TempDir,
    pub repo: MemoryRepository,
    pub locator: Arc<FakeLocator>,
    pub runner: KvRunner,
}

pub fn test_config(base: &Path, min_port: u16, max_port: u16) -> Config {
    Config {
        base_dir: base.join("instances"),
        binary: "sh".to_string(),
        binary_args: vec![
            "-c".to_string(),
            SERVER_SCRIPT.to_string(),
            "kv-server".to_string(),
        ],
        min_port,
        max_port,
        database_path: base.join("kv-runner.db"),
        settle_delay_ms: 50,
        probe_timeout_ms: 1000,
        stop_timeout_secs: 2,
        ..Config::default()
    }
}

pub fn harness(min_port: u16, max_port: u16) -> Harness {
    let tmp = TempDir::new().unwrap();
    let repo = MemoryRepository::new();
    let locator = Arc::new(FakeLocator::default());
    let runner = KvRunner::with_locator(
        test_config(tmp.path(), min_port, max_port),
        Arc::new(repo.clone()),
        locator.clone(),
    )
    .unwrap();

    Harness {
        tmp,
        repo,
        locator,
        runner,
    }
}

impl Harness {
    /// Pids the stand-in server logged for `id`, in spawn order.
    pub fn spawned_pids(&self, id: &str) -> Vec<u32> {
        let path = self.runner.layout().instance_dir(id).join("spawns.log");
        std::fs::read_to_string(path)
            .unwrap_or_default()
            .lines()
            .filter_map(|line| line.trim().parse().ok())
            .collect()
    }

    /// Make the locator see the most recently spawned process of `id`.
    pub fn register_spawned(&self, id: &str, port: u16) -> u32 {
        let pid = *self.spawned_pids(id).last().expect("nothing spawned");
        self.locator.register(port, pid);
        pid
    }
}

/// Answer `AUTH` with `+OK` and `PING` with `+PONG` on `127.0.0.1:<port>`.
pub async fn fake_kv_server(port: u16) -> JoinHandle<()> {
    let listener = TcpListener::bind(("127.0.0.1", port)).await.unwrap();
    tokio::spawn(async move {
        while let Ok((socket, _)) = listener.accept().await {
            tokio::spawn(async move {
                let mut socket = BufReader::new(socket);
                let mut line = String::new();
                let mut args = Vec::new();
                let mut remaining = 0usize;
                while socket.read_line(&mut line).await.unwrap_or(0) > 0 {
                    let trimmed = line.trim_end().to_string();
                    line.clear();
                    if let Some(count) = trimmed.strip_prefix('*') {
                        remaining = count.parse().unwrap_or(0);
                        args.clear();
                        continue;
                    }
                    if trimmed.starts_with('$') {
                        continue;
                    }
                    args.push(trimmed);
                    remaining = remaining.saturating_sub(1);
                    if remaining > 0 {
                        continue;
                    }
                    let reply: &[u8] = match args.first().map(|a| a.to_ascii_uppercase()) {
                        Some(cmd) if cmd == "AUTH" => b"+OK\r\n",
                        Some(cmd) if cmd == "PING" => b"+PONG\r\n",
                        _ => b"-ERR unknown command\r\n",
                    };
                    if socket.get_mut().write_all(reply).await.is_err() {
                        break;
                    }
                }
            });
        }
    })
}

/// Wait until `pid` is gone, up to `timeout`.
pub async fn wait_until_dead(pid: u32, timeout: Duration) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if !is_process_alive(pid) {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    !is_process_alive(pid)
}
