/*!
 # KV Runner

 A Rust library and daemon for running many key-value store servers
 (for example `redis-server`) side by side on one host.

 ## Overview

 KV Runner provides functionality to:
 - Create instances with their own directory, config file and port
 - Start, stop and delete the server process of each instance
 - Find the process serving an instance in the OS process table
 - Reconcile persisted records with the instance directories on disk
 - Optionally expose all of the above over a small JSON HTTP API

 ## Basic Usage

 ```no_run
 use kv_runner::{Config, KvRunner, Result};
 use kv_runner::store::SqliteRepository;
 use std::sync::Arc;

 #[tokio::main]
 async fn main() -> Result<()> {
     let config = Config::from_file("kv-runner.json")?;
     let repository = Arc::new(SqliteRepository::open(&config.database_path)?);
     let runner = KvRunner::new(config, repository)?;

     // Bring records in line with the instance directories
     runner.reconcile().await?;

     // Create an instance on the first free port and start it
     let created = runner.create("cache").await?;
     println!("cache listens on {}", created.port);
     runner.start("cache").await?;

     // Inspect it
     let status = runner.status("cache").await?;
     println!("running: {}, pid: {:?}", status.running, status.pid);

     runner.stop("cache").await?;
     Ok(())
 }
 ```

 ## Features

 - **Port Allocation**: Ascending scan of a configured range with a bind check
 - **Process Supervision**: Graceful termination with a forced fallback
 - **Liveness Probe**: `AUTH`/`PING` over the server's text protocol
 - **Reconciliation**: The instance directories are the source of truth
 - **Persistence**: SQLite or in-memory record storage
 - **HTTP API**: Actix Web routes with CORS and request logging
*/

pub mod config;
pub mod error;
pub mod http;
pub mod instance;
pub mod reconcile;
pub mod server;
pub mod store;

pub use config::Config;
pub use error::{Error, Result};
pub use instance::{InstanceDescriptor, InstanceStatusReport};
pub use reconcile::{ReconcileReport, ReconcileScheduler, Reconciler};

use futures::future::join_all;
use instance::{InstanceLayout, InstanceRecord, InstanceStatus, generate_password, validate_instance_id};
use serde::Serialize;
use server::{PortAllocator, ProcessHandle, ProcessLocator, ServerCommand, SystemProcessLocator, control, probe};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::Path;
use std::sync::{Arc, Mutex};
use store::{InstanceRepository, SqliteRepository};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// Outcome of [`KvRunner::start_all_desired`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StartAllReport {
    /// Instances that are running after the call
    pub started: Vec<String>,
    /// Instances that could not be started
    pub failed: Vec<StartFailure>,
}

/// An instance that failed to start.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StartFailure {
    /// Instance id
    pub id: String,
    /// Error message
    pub error: String,
}

type InstanceLocks = Arc<Mutex<HashMap<String, Arc<AsyncMutex<()>>>>>;

/// Held lock of one instance. Dropping it removes the map entry unless
/// another caller is waiting on the same id.
struct InstanceGuard {
    id: String,
    locks: InstanceLocks,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for InstanceGuard {
    fn drop(&mut self) {
        self.guard.take();
        if let Ok(mut locks) = self.locks.lock() {
            if locks.get(&self.id).is_some_and(|lock| Arc::strong_count(lock) == 1) {
                locks.remove(&self.id);
            }
        }
    }
}

/// Create, run and reconcile key-value server instances
///
/// This struct is the main entry point for managing instance lifecycles.
/// It is cheap to clone; clones share the store, the locator and the locks.
/// Operations on the same instance are serialized, and creation additionally
/// serializes port allocation so two new instances never get the same port.
/// All public methods are instrumented with `tracing` spans.
#[derive(Clone)]
pub struct KvRunner {
    /// Configuration
    config: Arc<Config>,
    /// Instance directory layout
    layout: InstanceLayout,
    /// Port allocator for new instances
    ports: PortAllocator,
    /// Record storage
    repository: Arc<dyn InstanceRepository>,
    /// Port to process lookup
    locator: Arc<dyn ProcessLocator>,
    /// Per-instance operation locks
    locks: InstanceLocks,
    /// Serializes port allocation and reconciliation. Taken after the
    /// instance locks.
    create_lock: Arc<AsyncMutex<()>>,
}

impl KvRunner {
    /// Create a runner from a configuration file path, storing records in
    /// the configured SQLite database
    ///
    /// This method is instrumented with `tracing`.
    #[tracing::instrument(skip(path), fields(config_path = ?path.as_ref()))]
    pub fn from_config_file(path: impl AsRef<Path>) -> Result<Self> {
        tracing::info!("Loading configuration from file");
        let config = Config::from_file(path)?;
        let repository = Arc::new(SqliteRepository::open(&config.database_path)?);
        Self::new(config, repository)
    }

    /// Create a runner that finds server processes in the OS process table
    ///
    /// This method is instrumented with `tracing`.
    #[tracing::instrument(skip_all, fields(base_dir = %config.base_dir.display()))]
    pub fn new(config: Config, repository: Arc<dyn InstanceRepository>) -> Result<Self> {
        let locator = Arc::new(SystemProcessLocator::new(config.process_name()));
        Self::with_locator(config, repository, locator)
    }

    /// Create a runner with a custom process locator
    pub fn with_locator(
        config: Config,
        repository: Arc<dyn InstanceRepository>,
        locator: Arc<dyn ProcessLocator>,
    ) -> Result<Self> {
        config::validate_config(&config)?;
        tracing::info!(
            min_port = config.min_port,
            max_port = config.max_port,
            binary = %config.binary,
            "Creating new KvRunner"
        );

        Ok(Self {
            layout: InstanceLayout::new(config.base_dir.clone()),
            ports: PortAllocator::new(config.min_port, config.max_port),
            config: Arc::new(config),
            repository,
            locator,
            locks: Arc::new(Mutex::new(HashMap::new())),
            create_lock: Arc::new(AsyncMutex::new(())),
        })
    }

    /// The configuration this runner was built with
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The instance directory layout
    pub fn layout(&self) -> &InstanceLayout {
        &self.layout
    }

    /// Create an instance on the first free port of the configured range
    pub async fn create(&self, id: &str) -> Result<InstanceDescriptor> {
        self.create_with_port(id, None).await
    }

    /// Create an instance, optionally on a caller-chosen port
    ///
    /// The returned descriptor includes the generated credential. On failure
    /// nothing is left behind: partially written instance files are removed
    /// and no record is stored.
    ///
    /// This method is instrumented with `tracing`.
    #[tracing::instrument(skip(self, id), fields(id = %id))]
    pub async fn create_with_port(&self, id: &str, port: Option<u16>) -> Result<InstanceDescriptor> {
        validate_instance_id(id)?;
        let _guard = self.lock_instance(id).await?;
        let _allocation = self.create_lock.lock().await;

        if self.repository.find_by_id(id).await?.is_some() || self.layout.exists(id) {
            tracing::warn!("Instance already exists");
            return Err(Error::AlreadyExists(id.to_string()));
        }

        let in_use: HashSet<u16> = self
            .repository
            .find_all()
            .await?
            .into_iter()
            .map(|record| record.port)
            .collect();
        let port = match port {
            Some(port) => {
                self.ports.check(port, &in_use)?;
                port
            }
            None => self.ports.allocate(&in_use)?,
        };

        let password = self
            .config
            .generate_password
            .then(|| generate_password(self.config.password_length));

        if let Err(e) = self.layout.materialize(id, port, password.clone()) {
            tracing::error!(error = %e, "Failed to write instance files");
            // An existing directory belongs to somebody else.
            if !matches!(e, Error::AlreadyExists(_)) {
                self.remove_partial(id);
            }
            return Err(e);
        }

        let record = InstanceRecord::new(id, port, password);
        if let Err(e) = self.repository.save(&record).await {
            tracing::error!(error = %e, "Failed to store instance record");
            self.remove_partial(id);
            return Err(e);
        }

        tracing::info!(port, "Created instance");
        Ok(InstanceDescriptor::new(&record, &self.layout).with_password(&record))
    }

    /// Start the server of an instance
    ///
    /// Starting an instance whose server is already running spawns nothing
    /// and only refreshes the record. A freshly spawned server must pass the
    /// liveness probe; otherwise it is terminated, the record is left as it
    /// was and [`Error::StartFailed`] is returned.
    ///
    /// This method is instrumented with `tracing`.
    #[tracing::instrument(skip(self, id), fields(id = %id))]
    pub async fn start(&self, id: &str) -> Result<InstanceDescriptor> {
        let _guard = self.lock_instance(id).await?;
        let mut record = self.require(id).await?;

        if let Some(process) = self.locate(record.port).await? {
            tracing::info!(pid = process.pid, "Instance already running");
            if record.status != InstanceStatus::Running || !record.is_desired() {
                record.mark_running();
                self.repository.save(&record).await?;
            }
            return Ok(self.describe(&record));
        }

        let start_failed = |message: String| Error::StartFailed {
            id: id.to_string(),
            message,
        };

        let command = ServerCommand {
            id: id.to_string(),
            binary: self.config.binary.clone(),
            args: self.config.binary_args.clone(),
            working_dir: self.layout.instance_dir(id),
            config_path: self.layout.config_path(id),
            trailing_args: self.config.server_args.clone(),
            log_path: self.layout.log_path(id),
        };
        if !command.config_path.is_file() {
            return Err(start_failed(format!(
                "config file {} is missing",
                command.config_path.display()
            )));
        }

        let process = command.spawn()?;
        tokio::time::sleep(self.config.settle_delay()).await;

        if let Some(status) = process.exit_status() {
            tracing::error!(%status, "Server exited during startup");
            return Err(start_failed(format!(
                "server exited with {} (see {})",
                status,
                command.log_path.display()
            )));
        }

        if let Err(e) = probe::ping(record.port, record.credential(), self.config.probe_timeout()).await {
            tracing::error!(error = %e, port = record.port, "Liveness probe failed");
            self.terminate_quietly(process.pid()).await;
            return Err(start_failed(format!("liveness probe failed: {}", e)));
        }

        record.mark_running();
        self.repository.save(&record).await?;
        tracing::info!(pid = process.pid(), port = record.port, "Started instance");
        Ok(self.describe(&record))
    }

    /// Stop the server of an instance
    ///
    /// The server is asked to exit and killed after the stop timeout. The
    /// record is marked stopped and not wanted even when no server was
    /// running.
    ///
    /// This method is instrumented with `tracing`.
    #[tracing::instrument(skip(self, id), fields(id = %id))]
    pub async fn stop(&self, id: &str) -> Result<InstanceDescriptor> {
        let _guard = self.lock_instance(id).await?;
        let mut record = self.require(id).await?;

        match self.locate(record.port).await? {
            Some(process) => {
                let outcome = self.terminate(process.pid).await.map_err(|e| {
                    tracing::error!(pid = process.pid, error = %e, "Failed to stop server");
                    Error::StopFailed {
                        id: id.to_string(),
                        message: e.to_string(),
                    }
                })?;
                tracing::info!(pid = process.pid, ?outcome, "Stopped server process");
            }
            None => tracing::debug!("No server process running"),
        }

        record.mark_stopped();
        self.repository.save(&record).await?;
        Ok(self.describe(&record))
    }

    /// Delete an instance: stop its server, remove its directory, then its
    /// record
    ///
    /// When the directory cannot be removed the record is kept so the
    /// deletion can be retried.
    ///
    /// This method is instrumented with `tracing`.
    #[tracing::instrument(skip(self, id), fields(id = %id))]
    pub async fn delete(&self, id: &str) -> Result<()> {
        let _guard = self.lock_instance(id).await?;
        let record = self.require(id).await?;

        if let Some(process) = self.locate(record.port).await? {
            match self.terminate(process.pid).await {
                Ok(outcome) => tracing::info!(pid = process.pid, ?outcome, "Stopped server process"),
                Err(e) => tracing::warn!(pid = process.pid, error = %e, "Failed to stop server, deleting anyway"),
            }
        }

        let layout = self.layout.clone();
        let dir_id = id.to_string();
        tokio::task::spawn_blocking(move || layout.remove(&dir_id))
            .await
            .map_err(|e| Error::Other(format!("Directory removal task failed: {}", e)))?
            .map_err(|e| {
                tracing::error!(error = %e, "Failed to remove instance directory");
                Error::Io(format!(
                    "Failed to remove {}: {}",
                    self.layout.instance_dir(id).display(),
                    e
                ))
            })?;

        self.repository.delete(id).await?;

        tracing::info!("Deleted instance");
        Ok(())
    }

    /// Live status of an instance
    ///
    /// Combines the record with a fresh process lookup and filesystem check.
    /// The stored status is not updated.
    ///
    /// This method is instrumented with `tracing`.
    #[tracing::instrument(skip(self, id), fields(id = %id))]
    pub async fn status(&self, id: &str) -> Result<InstanceStatusReport> {
        let record = self.require(id).await?;
        let process = self.locate(record.port).await?;

        Ok(InstanceStatusReport {
            running: process.is_some(),
            pid: process.map(|p| p.pid),
            config_exists: self.layout.config_path(id).is_file(),
            data_dir_exists: self.layout.data_dir(id).is_dir(),
            instance: self.describe(&record),
        })
    }

    /// Descriptor of one instance
    #[tracing::instrument(skip(self, id), fields(id = %id))]
    pub async fn get(&self, id: &str) -> Result<InstanceDescriptor> {
        let record = self.require(id).await?;
        Ok(self.describe(&record))
    }

    /// Descriptors of all instances, ordered by id
    #[tracing::instrument(skip(self))]
    pub async fn list(&self) -> Result<Vec<InstanceDescriptor>> {
        let records = self.repository.find_all().await?;
        Ok(records.iter().map(|record| self.describe(record)).collect())
    }

    /// Start every instance that is wanted running
    ///
    /// Starts run concurrently. Failures are logged and reported without
    /// affecting the other instances.
    ///
    /// This method is instrumented with `tracing`.
    #[tracing::instrument(skip(self))]
    pub async fn start_all_desired(&self) -> Result<StartAllReport> {
        let desired: Vec<InstanceRecord> = self
            .repository
            .find_all()
            .await?
            .into_iter()
            .filter(InstanceRecord::is_desired)
            .collect();
        tracing::info!(count = desired.len(), "Starting desired instances");

        let results = join_all(desired.iter().map(|record| async move {
            (record.id.clone(), self.start(&record.id).await)
        }))
        .await;

        let mut report = StartAllReport::default();
        for (id, result) in results {
            match result {
                Ok(_) => report.started.push(id),
                Err(e) => {
                    tracing::error!(id = %id, error = %e, "Failed to start desired instance");
                    report.failed.push(StartFailure {
                        id,
                        error: e.to_string(),
                    });
                }
            }
        }
        Ok(report)
    }

    /// Bring the records in line with the instance directories
    ///
    /// Waits for running operations on every known instance and holds their
    /// locks for the whole pass.
    ///
    /// This method is instrumented with `tracing`.
    #[tracing::instrument(skip(self))]
    pub async fn reconcile(&self) -> Result<ReconcileReport> {
        let mut ids: BTreeSet<String> = self
            .repository
            .find_all()
            .await?
            .into_iter()
            .map(|record| record.id)
            .collect();
        let layout = self.layout.clone();
        ids.extend(
            tokio::task::spawn_blocking(move || layout.list_ids())
                .await
                .map_err(|e| Error::Other(format!("Directory scan task failed: {}", e)))?
                .map_err(|e| {
                    Error::Io(format!(
                        "Failed to scan {}: {}",
                        self.layout.base_dir().display(),
                        e
                    ))
                })?,
        );

        // Ascending order, so concurrent passes cannot deadlock.
        let mut guards = Vec::with_capacity(ids.len());
        for id in &ids {
            guards.push(self.lock_instance(id).await?);
        }
        let _allocation = self.create_lock.lock().await;
        Reconciler::new(self.layout.clone(), Arc::clone(&self.repository))
            .run()
            .await
    }

    fn describe(&self, record: &InstanceRecord) -> InstanceDescriptor {
        InstanceDescriptor::new(record, &self.layout)
    }

    async fn require(&self, id: &str) -> Result<InstanceRecord> {
        self.repository
            .find_by_id(id)
            .await?
            .ok_or_else(|| Error::NotFound(id.to_string()))
    }

    async fn lock_instance(&self, id: &str) -> Result<InstanceGuard> {
        let mut guard = InstanceGuard {
            id: id.to_string(),
            locks: Arc::clone(&self.locks),
            guard: None,
        };
        let lock = {
            let mut locks = self
                .locks
                .lock()
                .map_err(|_| Error::Other("Failed to lock instance locks".to_string()))?;
            Arc::clone(locks.entry(id.to_string()).or_default())
        };
        guard.guard = Some(lock.lock_owned().await);
        Ok(guard)
    }

    async fn locate(&self, port: u16) -> Result<Option<ProcessHandle>> {
        let locator = Arc::clone(&self.locator);
        tokio::task::spawn_blocking(move || locator.find_process_on_port(port))
            .await
            .map_err(|e| Error::Other(format!("Process lookup task failed: {}", e)))
    }

    async fn terminate(&self, pid: u32) -> Result<control::Termination> {
        let timeout = self.config.stop_timeout();
        tokio::task::spawn_blocking(move || control::terminate(pid, timeout))
            .await
            .map_err(|e| Error::Other(format!("Termination task failed: {}", e)))?
    }

    async fn terminate_quietly(&self, pid: u32) {
        if let Err(e) = self.terminate(pid).await {
            tracing::warn!(pid, error = %e, "Failed to terminate spawned server");
        }
    }

    fn remove_partial(&self, id: &str) {
        if let Err(e) = self.layout.remove(id) {
            tracing::warn!(error = %e, "Failed to remove partially created instance");
        }
    }
}
