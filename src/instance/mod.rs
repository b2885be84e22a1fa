//! Instance records, on-disk layout and config files.
//!
//! * `record` - The persisted description of an instance
//! * `conf` - Typed `server.conf` schema shared by writers and readers
//! * `layout` - Deterministic paths and creation of instance files

pub mod conf;
pub mod layout;
pub mod record;

pub use conf::InstanceConf;
pub use layout::{CONFIG_FILE_NAME, DATA_DIR_NAME, InstanceLayout, LOG_FILE_NAME};
pub use record::{InstanceRecord, InstanceStatus, ServiceStatus};

use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use rand::Rng;
use serde::Serialize;
use std::path::PathBuf;

const MAX_ID_LEN: usize = 64;

/// Check that `id` is usable as a single directory name.
///
/// Ids start with an ASCII letter or digit and may contain letters, digits,
/// `_`, `-` and `.`, up to 64 characters.
pub fn validate_instance_id(id: &str) -> Result<()> {
    let mut chars = id.chars();
    let valid_first = chars.next().is_some_and(|c| c.is_ascii_alphanumeric());
    let valid_rest = chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'));

    if valid_first && valid_rest && id.len() <= MAX_ID_LEN {
        Ok(())
    } else {
        Err(Error::InvalidId(id.to_string()))
    }
}

/// Generate a random alphanumeric credential.
pub fn generate_password(length: usize) -> String {
    rand::rng()
        .sample_iter(&rand::distr::Alphanumeric)
        .take(length)
        .map(char::from)
        .collect()
}

/// An instance record together with its derived paths.
///
/// This is what boundaries hand out. The credential is only included when
/// explicitly requested (creation responses).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InstanceDescriptor {
    /// Instance id
    pub id: String,
    /// Port the server listens on
    pub port: u16,
    /// Config file passed to the server
    pub config_path: PathBuf,
    /// Data directory named in the config file
    pub data_dir: PathBuf,
    /// Last recorded run state
    pub status: InstanceStatus,
    /// Whether the instance is wanted running at startup
    pub service_status: ServiceStatus,
    /// When the instance was created
    pub created_at: DateTime<Utc>,
    /// Generated credential, only present in creation responses
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

impl InstanceDescriptor {
    /// Describe `record` using `layout` for its paths, without the credential.
    pub fn new(record: &InstanceRecord, layout: &InstanceLayout) -> Self {
        Self {
            id: record.id.clone(),
            port: record.port,
            config_path: layout.config_path(&record.id),
            data_dir: layout.data_dir(&record.id),
            status: record.status,
            service_status: record.service_status,
            created_at: record.created_at,
            password: None,
        }
    }

    /// Include the record's credential.
    pub fn with_password(mut self, record: &InstanceRecord) -> Self {
        self.password = record.credential().map(str::to_string);
        self
    }
}

/// Live view of an instance, merging the record with a fresh process lookup
/// and filesystem check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InstanceStatusReport {
    /// Stored view of the instance
    #[serde(flatten)]
    pub instance: InstanceDescriptor,
    /// Whether a server process currently holds the instance's port
    pub running: bool,
    /// Pid of that process
    pub pid: Option<u32>,
    /// Whether the config file exists
    pub config_exists: bool,
    /// Whether the data directory exists
    pub data_dir_exists: bool,
}
