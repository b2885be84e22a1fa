use super::InstanceRepository;
use crate::error::{Error, Result};
use crate::instance::InstanceRecord;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

/// In-memory record storage.
///
/// Cloning shares the underlying map.
#[derive(Debug, Clone, Default)]
pub struct MemoryRepository {
    records: Arc<Mutex<BTreeMap<String, InstanceRecord>>>,
}

impl MemoryRepository {
    /// Create an empty repository
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, BTreeMap<String, InstanceRecord>>> {
        self.records
            .lock()
            .map_err(|_| Error::Storage("Failed to lock instance records".to_string()))
    }
}

#[async_trait]
impl InstanceRepository for MemoryRepository {
    async fn save(&self, record: &InstanceRecord) -> Result<()> {
        let mut records = self.lock()?;

        if records
            .values()
            .any(|other| other.port == record.port && other.id != record.id)
        {
            return Err(Error::PortConflict(record.port));
        }

        records.insert(record.id.clone(), record.clone());
        Ok(())
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<InstanceRecord>> {
        Ok(self.lock()?.get(id).cloned())
    }

    async fn find_by_port(&self, port: u16) -> Result<Option<InstanceRecord>> {
        Ok(self.lock()?.values().find(|r| r.port == port).cloned())
    }

    async fn find_all(&self) -> Result<Vec<InstanceRecord>> {
        Ok(self.lock()?.values().cloned().collect())
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        Ok(self.lock()?.remove(id).is_some())
    }
}
