//! Persistence of instance records.
//!
//! The orchestrator and the reconciler only talk to the [`InstanceRepository`]
//! trait. Two implementations are provided:
//!
//! * [`SqliteRepository`] - durable storage used by the daemon
//! * [`MemoryRepository`] - process-local storage for tests and embedding
//!
//! # Examples
//!
//! ```
//! use kv_runner::instance::InstanceRecord;
//! use kv_runner::store::{InstanceRepository, MemoryRepository};
//!
//! # #[tokio::main]
//! # async fn main() -> kv_runner::Result<()> {
//! let repo = MemoryRepository::new();
//! repo.save(&InstanceRecord::new("cache", 5000, None)).await?;
//!
//! assert!(repo.find_by_port(5000).await?.is_some());
//! # Ok(())
//! # }
//! ```

mod memory;
mod sqlite;

pub use memory::MemoryRepository;
pub use sqlite::SqliteRepository;

use crate::error::Result;
use crate::instance::InstanceRecord;
use async_trait::async_trait;

/// Storage for instance records.
///
/// `save` has insert-or-replace semantics keyed by `id`. Ports are unique:
/// saving a record whose port belongs to a different id fails with
/// [`Error::PortConflict`](crate::Error::PortConflict).
#[async_trait]
pub trait InstanceRepository: Send + Sync {
    /// Insert or replace a record.
    async fn save(&self, record: &InstanceRecord) -> Result<()>;

    /// Look up a record by id.
    async fn find_by_id(&self, id: &str) -> Result<Option<InstanceRecord>>;

    /// Look up the record owning `port`.
    async fn find_by_port(&self, port: u16) -> Result<Option<InstanceRecord>>;

    /// All records, ordered by id.
    async fn find_all(&self) -> Result<Vec<InstanceRecord>>;

    /// Delete a record. Returns whether a record was removed.
    async fn delete(&self, id: &str) -> Result<bool>;
}
