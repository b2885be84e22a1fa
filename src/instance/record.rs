use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Last observed state of an instance.
///
/// This is a cache of process-table truth and may be stale; anything that
/// depends on whether the server is actually alive asks the process locator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstanceStatus {
    /// Server is not running
    Stopped,
    /// Server was running when last checked
    Running,
    /// Server was left in an unknown state
    Error,
}

impl InstanceStatus {
    /// Storage representation of the status.
    pub fn as_str(&self) -> &'static str {
        match self {
            InstanceStatus::Stopped => "stopped",
            InstanceStatus::Running => "running",
            InstanceStatus::Error => "error",
        }
    }
}

impl fmt::Display for InstanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for InstanceStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "stopped" => Ok(InstanceStatus::Stopped),
            "running" => Ok(InstanceStatus::Running),
            "error" => Ok(InstanceStatus::Error),
            other => Err(Error::Storage(format!("Unknown instance status '{}'", other))),
        }
    }
}

/// Desired state: whether the instance is started when the runner starts.
///
/// Serialized as the integers `0` and `1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum ServiceStatus {
    /// Leave the instance alone at startup
    Disabled,
    /// Start the instance at startup
    Enabled,
}

impl From<ServiceStatus> for u8 {
    fn from(status: ServiceStatus) -> Self {
        match status {
            ServiceStatus::Disabled => 0,
            ServiceStatus::Enabled => 1,
        }
    }
}

impl TryFrom<u8> for ServiceStatus {
    type Error = String;

    fn try_from(value: u8) -> std::result::Result<Self, Self::Error> {
        match value {
            0 => Ok(ServiceStatus::Disabled),
            1 => Ok(ServiceStatus::Enabled),
            other => Err(format!("service_status must be 0 or 1, got {}", other)),
        }
    }
}

/// Persisted description of one managed server instance.
///
/// Paths are not part of the record: they are derived from `id` by
/// [`InstanceLayout`](crate::instance::InstanceLayout).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceRecord {
    /// Unique, human-assigned identifier
    pub id: String,
    /// Port the server listens on, unique among records
    pub port: u16,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
    /// Last observed state
    pub status: InstanceStatus,
    /// Desired state across restarts
    pub service_status: ServiceStatus,
    /// Credential written as `requirepass`; `None` means no auth
    pub password: Option<String>,
}

impl InstanceRecord {
    /// A freshly created, stopped instance.
    pub fn new(id: impl Into<String>, port: u16, password: Option<String>) -> Self {
        Self {
            id: id.into(),
            port,
            created_at: Utc::now(),
            status: InstanceStatus::Stopped,
            service_status: ServiceStatus::Disabled,
            password: password.filter(|p| !p.is_empty()),
        }
    }

    /// The credential to authenticate with, if any.
    ///
    /// Legacy records may carry an empty string, which counts as no auth.
    pub fn credential(&self) -> Option<&str> {
        self.password.as_deref().filter(|p| !p.is_empty())
    }

    /// Whether the instance should be started with the runner.
    pub fn is_desired(&self) -> bool {
        self.service_status == ServiceStatus::Enabled
    }

    /// Record the instance as running and wanted across restarts.
    pub fn mark_running(&mut self) {
        self.status = InstanceStatus::Running;
        self.service_status = ServiceStatus::Enabled;
    }

    /// Record the instance as stopped and not wanted across restarts.
    pub fn mark_stopped(&mut self) {
        self.status = InstanceStatus::Stopped;
        self.service_status = ServiceStatus::Disabled;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_record_is_stopped_and_disabled() {
        let record = InstanceRecord::new("cache", 5000, Some("secret".to_string()));

        assert_eq!(record.status, InstanceStatus::Stopped);
        assert_eq!(record.service_status, ServiceStatus::Disabled);
        assert_eq!(record.credential(), Some("secret"));
        assert!(!record.is_desired());
    }

    #[test]
    fn test_empty_password_means_no_auth() {
        let record = InstanceRecord::new("legacy", 5000, Some(String::new()));
        assert_eq!(record.credential(), None);
    }

    #[test]
    fn test_mark_running_and_stopped_only_touch_state() {
        let mut record = InstanceRecord::new("cache", 5000, None);
        let before = record.clone();

        record.mark_running();
        assert_eq!(record.status, InstanceStatus::Running);
        assert!(record.is_desired());

        record.mark_stopped();
        assert_eq!(record, before);
    }

    #[test]
    fn test_service_status_serializes_as_integer() {
        let record = InstanceRecord::new("cache", 5000, None);
        let json = serde_json::to_value(&record).unwrap();

        assert_eq!(json["service_status"], 0);
        assert_eq!(json["status"], "stopped");
    }

    #[test]
    fn test_status_from_str() {
        assert_eq!("RUNNING".parse::<InstanceStatus>().unwrap(), InstanceStatus::Running);
        assert!("paused".parse::<InstanceStatus>().is_err());
    }
}
