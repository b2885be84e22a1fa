//! Synchronisation between persisted records and instance directories.
//!
//! The filesystem is authoritative: records without a directory are dropped,
//! directories without a record are adopted from their config file, and
//! records whose config file says otherwise are realigned to it. Processes
//! are never started or stopped here.

use crate::KvRunner;
use crate::error::{Error, Result};
use crate::instance::{InstanceConf, InstanceLayout, InstanceRecord};
use crate::store::InstanceRepository;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time;

/// What a reconciliation pass changed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    /// Records deleted because their directory is gone
    pub removed: Vec<String>,
    /// Directories adopted as new records
    pub adopted: Vec<String>,
    /// Records updated to match their config file
    pub realigned: Vec<String>,
    /// Directories left alone because their config is unusable or conflicts
    pub skipped: Vec<String>,
}

impl ReconcileReport {
    /// Whether the pass mutated the store.
    pub fn has_changes(&self) -> bool {
        !(self.removed.is_empty() && self.adopted.is_empty() && self.realigned.is_empty())
    }
}

/// One-shot reconciliation between a layout and a repository.
#[derive(Clone)]
pub struct Reconciler {
    layout: InstanceLayout,
    repository: Arc<dyn InstanceRepository>,
}

impl Reconciler {
    /// Reconciler over `layout` and `repository`.
    pub fn new(layout: InstanceLayout, repository: Arc<dyn InstanceRepository>) -> Self {
        Self { layout, repository }
    }

    /// Run one pass.
    ///
    /// Fails only when the base directory or the store cannot be read; per
    /// instance problems are logged and reported as skipped.
    #[tracing::instrument(skip(self), fields(base = %self.layout.base_dir().display()))]
    pub async fn run(&self) -> Result<ReconcileReport> {
        let layout = self.layout.clone();
        let on_disk: BTreeSet<String> = tokio::task::spawn_blocking(move || layout.list_ids())
            .await
            .map_err(|e| Error::Other(format!("Directory scan task failed: {}", e)))?
            .map_err(|e| {
                Error::Io(format!(
                    "Failed to scan {}: {}",
                    self.layout.base_dir().display(),
                    e
                ))
            })?
            .into_iter()
            .collect();

        let mut records: HashMap<String, InstanceRecord> = self
            .repository
            .find_all()
            .await?
            .into_iter()
            .map(|record| (record.id.clone(), record))
            .collect();
        let mut report = ReconcileReport::default();

        let vanished: Vec<String> = records
            .keys()
            .filter(|id| !on_disk.contains(*id))
            .cloned()
            .collect();
        for id in vanished {
            self.repository.delete(&id).await?;
            records.remove(&id);
            tracing::info!(id = %id, "Removed record without instance directory");
            report.removed.push(id);
        }

        let mut port_owners: HashMap<u16, String> = records
            .values()
            .map(|record| (record.port, record.id.clone()))
            .collect();

        for id in &on_disk {
            let config_path = self.layout.config_path(id);
            let conf = match InstanceConf::read(&config_path) {
                Ok(conf) => conf,
                Err(e) => {
                    tracing::warn!(id = %id, error = %e, "Skipping instance with unusable config");
                    report.skipped.push(id.clone());
                    continue;
                }
            };
            let file_password = conf.requirepass.clone().filter(|p| !p.is_empty());

            if let Some(owner) = port_owners.get(&conf.port).filter(|owner| *owner != id) {
                tracing::warn!(
                    id = %id,
                    port = conf.port,
                    owner = %owner,
                    "Config port belongs to another instance, leaving it alone"
                );
                report.skipped.push(id.clone());
                continue;
            }

            match records.get_mut(id) {
                None => {
                    let mut record = InstanceRecord::new(id.clone(), conf.port, file_password);
                    record.created_at = modified_at(&config_path).unwrap_or_else(Utc::now);

                    match self.repository.save(&record).await {
                        Ok(()) => {}
                        Err(Error::PortConflict(port)) => {
                            tracing::warn!(id = %id, port, "Port taken in store, skipping adoption");
                            report.skipped.push(id.clone());
                            continue;
                        }
                        Err(e) => return Err(e),
                    }
                    tracing::info!(id = %id, port = conf.port, "Adopted instance directory");
                    port_owners.insert(conf.port, id.clone());
                    records.insert(id.clone(), record);
                    report.adopted.push(id.clone());
                }
                Some(record) => {
                    if record.port == conf.port && record.credential() == file_password.as_deref() {
                        continue;
                    }

                    let previous_port = record.port;
                    let mut updated = record.clone();
                    updated.port = conf.port;
                    updated.password = file_password;
                    match self.repository.save(&updated).await {
                        Ok(()) => {}
                        Err(Error::PortConflict(port)) => {
                            tracing::warn!(id = %id, port, "Port taken in store, skipping realignment");
                            report.skipped.push(id.clone());
                            continue;
                        }
                        Err(e) => return Err(e),
                    }
                    tracing::info!(
                        id = %id,
                        from = previous_port,
                        to = conf.port,
                        "Realigned record to config file"
                    );
                    port_owners.remove(&previous_port);
                    port_owners.insert(conf.port, id.clone());
                    *record = updated;
                    report.realigned.push(id.clone());
                }
            }
        }

        if report.has_changes() {
            tracing::info!(
                removed = report.removed.len(),
                adopted = report.adopted.len(),
                realigned = report.realigned.len(),
                "Reconciliation changed records"
            );
        } else {
            tracing::debug!("Records already match instance directories");
        }
        Ok(report)
    }
}

fn modified_at(path: &Path) -> Option<DateTime<Utc>> {
    let modified = std::fs::metadata(path).and_then(|m| m.modified()).ok()?;
    Some(DateTime::<Utc>::from(modified))
}

/// Periodic reconciliation on a tokio interval.
pub struct ReconcileScheduler {
    runner: KvRunner,
    period: Duration,
    task: Option<JoinHandle<()>>,
    running: Arc<Mutex<bool>>,
}

impl ReconcileScheduler {
    /// Scheduler running `runner.reconcile()` every `period`.
    pub fn new(runner: KvRunner, period: Duration) -> Self {
        Self {
            runner,
            period,
            task: None,
            running: Arc::new(Mutex::new(false)),
        }
    }

    /// Start the scheduler. The first pass runs one period from now.
    pub fn start(&mut self) -> Result<()> {
        {
            let mut running = self
                .running
                .lock()
                .map_err(|_| Error::Other("Failed to lock running flag".to_string()))?;

            if *running {
                return Ok(());
            }

            *running = true;
        }

        let runner = self.runner.clone();
        let running = Arc::clone(&self.running);
        let period = self.period;

        let task = tokio::spawn(async move {
            let mut interval = time::interval_at(time::Instant::now() + period, period);

            loop {
                interval.tick().await;

                if !running.lock().map(|guard| *guard).unwrap_or(false) {
                    break;
                }

                if let Err(e) = runner.reconcile().await {
                    tracing::error!(error = %e, "Periodic reconciliation failed");
                }
            }
        });

        tracing::info!(period_secs = period.as_secs(), "Started periodic reconciliation");
        self.task = Some(task);

        Ok(())
    }

    /// Stop the scheduler. A pass in progress is aborted.
    pub fn stop(&mut self) -> Result<()> {
        {
            let mut running = self
                .running
                .lock()
                .map_err(|_| Error::Other("Failed to lock running flag".to_string()))?;

            if !*running {
                return Ok(());
            }

            *running = false;
        }

        if let Some(task) = self.task.take() {
            task.abort();
        }

        Ok(())
    }

    /// Whether the scheduler is active.
    pub fn is_running(&self) -> bool {
        self.running.lock().map(|guard| *guard).unwrap_or(false)
    }
}

impl Drop for ReconcileScheduler {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}
