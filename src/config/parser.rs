use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default lowest port handed out to new instances.
pub const DEFAULT_MIN_PORT: u16 = 5000;
/// Default highest port handed out to new instances.
pub const DEFAULT_MAX_PORT: u16 = 5999;
/// Default number of Actix Web workers for the HTTP boundary.
pub const DEFAULT_WORKERS: usize = 4;
/// Default HTTP listen port.
pub const DEFAULT_HTTP_PORT: u16 = 14911;

/// Configuration of the HTTP boundary.
///
/// # Examples
///
/// ```
/// use kv_runner::config::HttpConfig;
///
/// let http = HttpConfig::default();
/// assert_eq!(http.address, "127.0.0.1");
/// assert_eq!(http.port, 14911);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct HttpConfig {
    /// Address to bind the HTTP server to.
    pub address: String,
    /// Port to bind the HTTP server to.
    pub port: u16,
    /// Number of worker threads; `None` uses [`DEFAULT_WORKERS`].
    pub workers: Option<usize>,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            address: "127.0.0.1".to_string(),
            port: DEFAULT_HTTP_PORT,
            workers: None,
        }
    }
}

/// Main configuration for the KV Runner.
///
/// Replaces global constants (base path, binary, port range) with a single
/// value passed to [`KvRunner::new`](crate::KvRunner::new), so tests can run
/// isolated runners on temporary directories and private port ranges.
///
/// # JSON Schema
///
/// Every field is optional; `{}` yields the defaults.
///
/// ```json
/// {
///   "baseDir": "/var/lib/kv-runner/instances",
///   "binary": "redis-server",
///   "binaryArgs": [],
///   "serverArgs": ["--protected-mode", "yes"],
///   "processName": "redis-server",
///   "minPort": 5000,
///   "maxPort": 5999,
///   "databasePath": "/var/lib/kv-runner/kv-runner.db",
///   "generatePassword": true,
///   "passwordLength": 32,
///   "settleDelayMs": 500,
///   "probeTimeoutMs": 2000,
///   "stopTimeoutSecs": 5,
///   "syncIntervalSecs": 300,
///   "http": { "address": "0.0.0.0", "port": 14911, "workers": 4 }
/// }
/// ```
///
/// # Examples
///
/// ```
/// use kv_runner::config::Config;
///
/// let config = Config::parse_from_str(r#"{ "minPort": 7000, "maxPort": 7010 }"#).unwrap();
/// assert_eq!(config.min_port, 7000);
/// assert_eq!(config.binary, "redis-server");
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    /// Directory holding one subdirectory per instance.
    pub base_dir: PathBuf,

    /// Server binary launched as
    /// `<binary> [binary_args...] <config_path> [server_args...]`.
    /// This can be an absolute path or a command available in the PATH.
    pub binary: String,

    /// Arguments placed before the config path, for wrappers such as
    /// `taskset -c 0 redis-server`.
    pub binary_args: Vec<String>,

    /// Arguments appended after the config path. `redis-server` reads these
    /// as directives overriding the config file.
    pub server_args: Vec<String>,

    /// Process name used to recognise running servers in the process table.
    /// Defaults to the file name of `binary`.
    pub process_name: Option<String>,

    /// Lowest port (inclusive) handed out to new instances.
    pub min_port: u16,

    /// Highest port (inclusive) handed out to new instances.
    pub max_port: u16,

    /// SQLite database file used by the daemon.
    pub database_path: PathBuf,

    /// Write a generated `requirepass` credential into new instance configs.
    pub generate_password: bool,

    /// Length of generated credentials.
    pub password_length: usize,

    /// Time to wait after spawning a server before probing it.
    pub settle_delay_ms: u64,

    /// Upper bound for the whole liveness probe exchange.
    pub probe_timeout_ms: u64,

    /// Time to wait for a graceful exit before killing the server.
    pub stop_timeout_secs: u64,

    /// Run reconciliation periodically when set.
    pub sync_interval_secs: Option<u64>,

    /// HTTP boundary settings.
    pub http: HttpConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            base_dir: PathBuf::from("instances"),
            binary: "redis-server".to_string(),
            binary_args: Vec::new(),
            server_args: Vec::new(),
            process_name: None,
            min_port: DEFAULT_MIN_PORT,
            max_port: DEFAULT_MAX_PORT,
            database_path: PathBuf::from("kv-runner.db"),
            generate_password: true,
            password_length: 32,
            settle_delay_ms: 500,
            probe_timeout_ms: 2000,
            stop_timeout_secs: 5,
            sync_interval_secs: None,
            http: HttpConfig::default(),
        }
    }
}

impl Config {
    /// Loads a configuration from a file path.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// * The file cannot be read
    /// * The file contents are not valid JSON
    /// * The JSON does not conform to the expected schema
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::ConfigParse(format!("Failed to read config file: {}", e)))?;

        Self::parse_from_str(&content)
    }

    /// Parses a configuration from a JSON string.
    pub fn parse_from_str(content: &str) -> Result<Self> {
        serde_json::from_str(content)
            .map_err(|e| Error::ConfigParse(format!("Failed to parse JSON config: {}", e)))
    }

    /// Name the server binary shows up under in the process table.
    pub fn process_name(&self) -> String {
        if let Some(name) = &self.process_name {
            return name.clone();
        }
        Path::new(&self.binary)
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.binary.clone())
    }

    /// Settle delay as a `Duration`.
    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    /// Probe timeout as a `Duration`.
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    /// Stop timeout as a `Duration`.
    pub fn stop_timeout(&self) -> Duration {
        Duration::from_secs(self.stop_timeout_secs)
    }

    /// Reconciliation interval, if periodic reconciliation is enabled.
    pub fn sync_interval(&self) -> Option<Duration> {
        self.sync_interval_secs
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
    }
}
