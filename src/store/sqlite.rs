//! SQLite-backed record storage.

use super::InstanceRepository;
use crate::error::{Error, Result};
use crate::instance::{InstanceRecord, InstanceStatus, ServiceStatus};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use rusqlite::{Connection, ErrorCode, OptionalExtension, Row, params};
use std::path::Path;
use std::sync::{Arc, Mutex};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS instances (
    id             TEXT PRIMARY KEY,
    port           INTEGER NOT NULL UNIQUE,
    created_at     TEXT NOT NULL,
    status         TEXT NOT NULL,
    service_status INTEGER NOT NULL DEFAULT 0,
    password       TEXT
);
";

const SELECT_COLUMNS: &str =
    "SELECT id, port, created_at, status, service_status, password FROM instances";

/// SQLite-backed record storage.
///
/// The connection is guarded by a mutex and every query runs on the blocking
/// thread pool. `SqliteRepository` is `Clone` and can be shared across tasks.
#[derive(Clone)]
pub struct SqliteRepository {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteRepository {
    /// Opens or creates a database at the given path.
    ///
    /// Creates parent directories if needed and applies the schema.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                Error::Storage(format!(
                    "Failed to create database directory {}: {}",
                    parent.display(),
                    e
                ))
            })?;
        }

        let conn = Connection::open(path).map_err(|e| {
            Error::Storage(format!("Failed to open database {}: {}", path.display(), e))
        })?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "busy_timeout", 5000)?;

        tracing::debug!(path = %path.display(), "Opened instance database");
        Self::with_schema(conn)
    }

    /// Opens a private in-memory database.
    pub fn open_in_memory() -> Result<Self> {
        Self::with_schema(Connection::open_in_memory()?)
    }

    fn with_schema(conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let conn = conn
                .lock()
                .map_err(|_| Error::Storage("Failed to acquire database lock".to_string()))?;
            f(&conn)
        })
        .await
        .map_err(|e| Error::Storage(format!("Database task failed: {}", e)))?
    }
}

/// Columns as stored, before conversion into a record.
struct StoredRow {
    id: String,
    port: i64,
    created_at: String,
    status: String,
    service_status: i64,
    password: Option<String>,
}

impl StoredRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            port: row.get(1)?,
            created_at: row.get(2)?,
            status: row.get(3)?,
            service_status: row.get(4)?,
            password: row.get(5)?,
        })
    }

    fn into_record(self) -> Result<InstanceRecord> {
        let port = u16::try_from(self.port)
            .map_err(|_| Error::Storage(format!("Invalid port {} for '{}'", self.port, self.id)))?;
        let service_status = u8::try_from(self.service_status)
            .ok()
            .and_then(|v| ServiceStatus::try_from(v).ok())
            .ok_or_else(|| {
                Error::Storage(format!(
                    "Invalid service_status {} for '{}'",
                    self.service_status, self.id
                ))
            })?;

        Ok(InstanceRecord {
            port,
            created_at: parse_timestamp(&self.created_at)?,
            status: self.status.parse::<InstanceStatus>()?,
            service_status,
            password: self.password.filter(|p| !p.is_empty()),
            id: self.id,
        })
    }
}

/// Accepts RFC 3339 and the naive ISO form older databases contain.
fn parse_timestamp(value: &str) -> Result<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(value) {
        return Ok(ts.with_timezone(&Utc));
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(value, fmt).ok())
        .map(|naive| naive.and_utc())
        .ok_or_else(|| Error::Storage(format!("Invalid timestamp '{}'", value)))
}

fn is_constraint_violation(e: &rusqlite::Error) -> bool {
    matches!(e, rusqlite::Error::SqliteFailure(err, _) if err.code == ErrorCode::ConstraintViolation)
}

#[async_trait]
impl InstanceRepository for SqliteRepository {
    async fn save(&self, record: &InstanceRecord) -> Result<()> {
        let record = record.clone();
        self.with_conn(move |conn| {
            let result = conn.execute(
                "INSERT INTO instances (id, port, created_at, status, service_status, password)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT(id) DO UPDATE SET
                    port = excluded.port,
                    created_at = excluded.created_at,
                    status = excluded.status,
                    service_status = excluded.service_status,
                    password = excluded.password",
                params![
                    record.id,
                    record.port,
                    record.created_at.to_rfc3339(),
                    record.status.as_str(),
                    u8::from(record.service_status),
                    record.password,
                ],
            );
            match result {
                Ok(_) => Ok(()),
                Err(e) if is_constraint_violation(&e) => Err(Error::PortConflict(record.port)),
                Err(e) => Err(e.into()),
            }
        })
        .await
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<InstanceRecord>> {
        let id = id.to_string();
        self.with_conn(move |conn| {
            conn.query_row(
                &format!("{} WHERE id = ?1", SELECT_COLUMNS),
                params![id],
                StoredRow::from_row,
            )
            .optional()?
            .map(StoredRow::into_record)
            .transpose()
        })
        .await
    }

    async fn find_by_port(&self, port: u16) -> Result<Option<InstanceRecord>> {
        self.with_conn(move |conn| {
            conn.query_row(
                &format!("{} WHERE port = ?1", SELECT_COLUMNS),
                params![port],
                StoredRow::from_row,
            )
            .optional()?
            .map(StoredRow::into_record)
            .transpose()
        })
        .await
    }

    async fn find_all(&self) -> Result<Vec<InstanceRecord>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!("{} ORDER BY id", SELECT_COLUMNS))?;
            let rows = stmt
                .query_map([], StoredRow::from_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            rows.into_iter().map(StoredRow::into_record).collect()
        })
        .await
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        let id = id.to_string();
        self.with_conn(move |conn| {
            let removed = conn.execute("DELETE FROM instances WHERE id = ?1", params![id])?;
            Ok(removed > 0)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_round_trip_through_file() -> Result<()> {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("state").join("kv.db");

        let mut record = InstanceRecord::new("a", 5000, Some("pw".to_string()));
        record.mark_running();
        SqliteRepository::open(&path)?.save(&record).await?;

        let reopened = SqliteRepository::open(&path)?;
        let loaded = reopened.find_by_id("a").await?.expect("record should exist");

        assert_eq!(loaded.port, 5000);
        assert_eq!(loaded.status, InstanceStatus::Running);
        assert_eq!(loaded.service_status, ServiceStatus::Enabled);
        assert_eq!(loaded.password.as_deref(), Some("pw"));
        assert_eq!(loaded.created_at.timestamp(), record.created_at.timestamp());
        Ok(())
    }

    #[tokio::test]
    async fn test_duplicate_port_is_conflict_and_keeps_existing_row() -> Result<()> {
        let repo = SqliteRepository::open_in_memory()?;
        repo.save(&InstanceRecord::new("a", 5000, None)).await?;

        let err = repo.save(&InstanceRecord::new("b", 5000, None)).await.unwrap_err();

        assert!(matches!(err, Error::PortConflict(5000)));
        assert_eq!(repo.find_by_port(5000).await?.map(|r| r.id), Some("a".to_string()));
        assert!(repo.find_by_id("b").await?.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn test_save_updates_existing_id() -> Result<()> {
        let repo = SqliteRepository::open_in_memory()?;
        let mut record = InstanceRecord::new("a", 5000, None);
        repo.save(&record).await?;

        record.port = 5005;
        repo.save(&record).await?;

        assert!(repo.find_by_port(5000).await?.is_none());
        assert_eq!(repo.find_all().await?.len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_find_all_is_ordered_and_delete_works() -> Result<()> {
        let repo = SqliteRepository::open_in_memory()?;
        repo.save(&InstanceRecord::new("b", 5001, None)).await?;
        repo.save(&InstanceRecord::new("a", 5000, None)).await?;

        let ids: Vec<String> = repo.find_all().await?.into_iter().map(|r| r.id).collect();
        assert_eq!(ids, vec!["a", "b"]);

        assert!(repo.delete("a").await?);
        assert!(!repo.delete("a").await?);
        Ok(())
    }

    #[test]
    fn test_parse_legacy_timestamps() {
        assert!(parse_timestamp("2024-03-01T10:20:30.123456").is_ok());
        assert!(parse_timestamp("2024-03-01 10:20:30").is_ok());
        assert!(parse_timestamp("2024-03-01T10:20:30+00:00").is_ok());
        assert!(parse_timestamp("yesterday").is_err());
    }
}
